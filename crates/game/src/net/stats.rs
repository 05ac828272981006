use rand::Rng;

const THROUGHPUT_WINDOW_SECS: f32 = 1.0;

/// Randomly drops incoming unreliable payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketLossSimulation {
    /// 0.0 to 1.0.
    pub loss: f32,
}

impl PacketLossSimulation {
    pub fn new(loss: f32) -> Self {
        Self {
            loss: loss.clamp(0.0, 1.0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.loss > 0.0
    }

    pub fn should_drop(&self) -> bool {
        self.is_enabled() && rand::thread_rng().gen_bool(f64::from(self.loss))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    /// Bytes per second over the last full window.
    pub send_rate: f32,
    pub receive_rate: f32,
    window_elapsed: f32,
    window_sent: u64,
    window_received: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
        self.window_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
        self.window_received += bytes as u64;
    }

    pub fn record_dropped(&mut self) {
        self.packets_dropped += 1;
    }

    pub fn update(&mut self, dt: f32) {
        self.window_elapsed += dt;
        if self.window_elapsed < THROUGHPUT_WINDOW_SECS {
            return;
        }

        self.send_rate = self.window_sent as f32 / self.window_elapsed;
        self.receive_rate = self.window_received as f32 / self.window_elapsed;
        self.window_elapsed = 0.0;
        self.window_sent = 0;
        self.window_received = 0;
    }
}
