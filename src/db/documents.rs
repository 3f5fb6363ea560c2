use super::DbError;
use super::models::SlotId;

/// Append-only sequence of source texts, slot-aligned with the vector index.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    texts: Vec<String>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn append(&mut self, texts: Vec<String>) {
        self.texts.extend(texts);
    }

    /// Returns the text stored at `slot`
    pub fn get(&self, slot: SlotId) -> Result<&str, DbError> {
        self.texts
            .get(slot)
            .map(String::as_str)
            .ok_or(DbError::OutOfRange {
                slot,
                len: self.texts.len(),
            })
    }
}
