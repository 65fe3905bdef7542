/// Append-only sequence with a read cursor.
///
/// The cursor never moves past the end: `0 <= offset <= len` holds after every operation.
#[derive(Debug, Clone)]
pub struct Cache<T> {
    storage: Vec<T>,
    offset: usize,
}

impl<T> Cache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            offset: 0,
        }
    }

    pub fn append(&mut self, item: T) {
        self.storage.push(item);
    }

    pub fn has_next(&self) -> bool {
        self.offset < self.storage.len()
    }

    /// Item under the cursor, advancing it. `None` once every item has been read.
    pub fn next(&mut self) -> Option<&T> {
        let item = self.storage.get(self.offset)?;
        self.offset += 1;
        Some(item)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Rewind the cursor, keeping the contents.
    pub fn reset_offset(&mut self) {
        self.offset = 0;
    }

    /// Drop the contents and rewind the cursor.
    pub fn reset(&mut self) {
        self.storage.clear();
        self.offset = 0;
    }
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self::new(0)
    }
}
