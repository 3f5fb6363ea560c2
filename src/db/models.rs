/// Permanent insertion-order position of a vector/document pair.
pub type SlotId = usize;

/// A single nearest-neighbour hit from the vector index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: SlotId,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

/// A search hit joined with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub slot: SlotId,
    pub text: String,
    pub distance: f32,
}
