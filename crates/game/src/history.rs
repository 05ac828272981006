/// Fixed-capacity ring buffer. Pushing into a full buffer evicts the oldest
/// entry.
///
/// `front(depth)` counts from the oldest entry and `back(depth)` from the
/// newest. Both panic when `depth >= size()`.
#[derive(Debug, Clone)]
pub struct CircularHistoryBuffer<T> {
    data: Box<[T]>,
    read_index: usize,
    write_index: usize,
    size: usize,
}

impl<T: Copy + Default> CircularHistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must not be zero");

        Self {
            data: vec![T::default(); capacity].into_boxed_slice(),
            read_index: 0,
            write_index: 0,
            size: 0,
        }
    }

    pub fn push_back(&mut self, value: T) {
        if self.size == self.capacity() {
            self.read_index = self.wrap(self.read_index + 1);
        } else {
            self.size += 1;
        }

        self.data[self.write_index] = value;
        self.write_index = self.wrap(self.write_index + 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }

        let value = self.data[self.read_index];
        self.read_index = self.wrap(self.read_index + 1);
        self.size -= 1;
        Some(value)
    }

    pub fn front(&self, depth: usize) -> &T {
        assert!(
            depth < self.size,
            "front depth {depth} out of range for history of size {}",
            self.size
        );
        &self.data[self.wrap(self.read_index + depth)]
    }

    pub fn back(&self, depth: usize) -> &T {
        assert!(
            depth < self.size,
            "back depth {depth} out of range for history of size {}",
            self.size
        );
        let capacity = self.capacity();
        &self.data[(self.write_index + capacity - 1 - depth) % capacity]
    }

    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
        self.size = 0;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.size).map(move |depth| self.front(depth))
    }

    #[inline]
    fn wrap(&self, index: usize) -> usize {
        index % self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_keeps_newest() {
        let mut history = CircularHistoryBuffer::new(5);
        for value in 0..8u32 {
            history.push_back(value);
        }

        assert_eq!(history.size(), 5);
        assert_eq!(*history.front(0), 3);
        assert_eq!(*history.back(0), 7);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn pop_is_fifo_and_noop_when_empty() {
        let mut history = CircularHistoryBuffer::new(3);
        assert_eq!(history.pop(), None);

        history.push_back(1u8);
        history.push_back(2);
        assert_eq!(history.pop(), Some(1));
        assert_eq!(*history.front(0), 2);
        assert_eq!(history.pop(), Some(2));
        assert!(history.is_empty());
        assert_eq!(history.pop(), None);
    }

    #[test]
    fn back_indexes_from_newest() {
        let mut history = CircularHistoryBuffer::new(4);
        for value in 10..16u16 {
            history.push_back(value);
        }

        assert_eq!(*history.back(0), 15);
        assert_eq!(*history.back(3), 12);
        assert_eq!(*history.front(0), 12);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut history = CircularHistoryBuffer::new(2);
        history.push_back(1i32);
        history.clear();

        assert!(history.is_empty());
        assert_eq!(history.capacity(), 2);
        history.push_back(9);
        assert_eq!(*history.front(0), 9);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn front_past_size_panics() {
        let mut history = CircularHistoryBuffer::new(4);
        history.push_back(1u8);
        let _ = history.front(1);
    }
}
