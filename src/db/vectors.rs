//! Flat (brute-force) vector index over squared Euclidean distance.
use std::cmp::Ordering;
use std::ops::Range;

use super::DbError;
use super::models::{Neighbor, SlotId};

/// Append-only set of fixed-dimension vectors stored contiguously.
///
/// Slot `i` occupies `data[i * dimensions..(i + 1) * dimensions]` and is never
/// moved or removed once written.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            return 0;
        }
        self.data.len() / self.dimensions
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors in order and return the contiguous slot ids assigned.
    ///
    /// Every vector is checked before anything is written, so a dimension
    /// mismatch leaves the index untouched.
    pub fn append(&mut self, vectors: &[Vec<f32>]) -> Result<Range<SlotId>, DbError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(DbError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        let start = self.len();
        self.data.reserve(vectors.len() * self.dimensions);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(start..start + vectors.len())
    }

    /// Return the `k` nearest stored vectors, ascending by distance.
    ///
    /// Ties are broken by the lower slot id. Asking for more neighbours than
    /// are stored returns every stored vector ranked.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, DbError> {
        if query.len() != self.dimensions {
            return Err(DbError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(slot, stored)| Neighbor {
                slot,
                distance: squared_l2(query, stored),
            })
            .collect();

        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank);
            hits.truncate(k);
        }
        hits.sort_unstable_by(rank);
        Ok(hits)
    }
}

fn rank(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.slot.cmp(&b.slot))
}

/// Sum of squared differences, accumulated in f64.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>() as f32
}
