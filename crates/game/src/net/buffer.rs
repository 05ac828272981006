use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use glam::Vec3;

use super::protocol::{PacketError, PacketType};

/// Little-endian packet builder. The first byte is always the packet type.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new(packet_type: PacketType) -> Self {
        let mut data = Vec::with_capacity(64);
        data.push(packet_type as u8);
        Self { data }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_f32(&mut self, value: f32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    /// Writes x and y; z is local layering and never crosses the wire.
    pub fn write_vec2(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }

    pub fn write_cstring(&mut self, value: &str) {
        self.data
            .extend(value.bytes().filter(|&byte| byte != 0));
        self.data.push(0);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over a received packet. Every read fails with
/// [`PacketError::Truncated`] instead of panicking on short input.
#[derive(Debug)]
pub struct PacketReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Reads the leading type byte.
    pub fn read_type(&mut self) -> Result<PacketType, PacketError> {
        let raw = self.read_u8()?;
        PacketType::try_from(raw)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        self.cursor.read_u8().map_err(|_| PacketError::Truncated)
    }

    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| PacketError::Truncated)
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| PacketError::Truncated)
    }

    pub fn read_f32(&mut self) -> Result<f32, PacketError> {
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| PacketError::Truncated)
    }

    pub fn read_vec2(&mut self) -> Result<Vec3, PacketError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        Ok(Vec3::new(x, y, 0.0))
    }

    pub fn read_cstring(&mut self) -> Result<String, PacketError> {
        let mut bytes = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            self.cursor
                .read_exact(&mut byte)
                .map_err(|_| PacketError::Truncated)?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        String::from_utf8(bytes).map_err(|_| PacketError::InvalidString)
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_layout() {
        let mut writer = PacketWriter::new(PacketType::Input);
        writer.write_u16(0x1234);
        writer.write_f32(1.0);

        assert_eq!(writer.as_slice(), &[PacketType::Input as u8, 0x34, 0x12, 0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn cstring_is_nul_terminated() {
        let mut writer = PacketWriter::new(PacketType::Join);
        writer.write_cstring("arena");
        assert_eq!(*writer.as_slice().last().unwrap(), 0);

        let bytes = writer.into_bytes();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_type().unwrap(), PacketType::Join);
        assert_eq!(reader.read_cstring().unwrap(), "arena");
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_reads_fail() {
        let mut reader = PacketReader::new(&[0x01]);
        assert!(matches!(reader.read_u16(), Err(PacketError::Truncated)));

        let mut reader = PacketReader::new(b"abc");
        assert!(matches!(reader.read_cstring(), Err(PacketError::Truncated)));
    }
}
