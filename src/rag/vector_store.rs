//! In-memory exact nearest-neighbour index over chunk embeddings.

use crate::error::{RagError, RagResult};

/// One search hit: the insertion position of the stored vector and its
/// squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Append-only flat index. The first `add` fixes the dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append a batch. The whole batch is checked before anything is stored,
    /// so a mismatch leaves the index unchanged.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>) -> RagResult<()> {
        let expected = match (self.dimension, vectors.first()) {
            (Some(dim), _) => dim,
            (None, Some(first)) => first.len(),
            (None, None) => return Ok(()),
        };

        if let Some(bad) = vectors.iter().find(|v| v.len() != expected || v.is_empty()) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        self.dimension = Some(expected);
        self.vectors.extend(vectors);
        Ok(())
    }

    /// Up to `k` nearest neighbours, nearest first. Equal distances keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let dim = match self.dimension {
            Some(dim) if !self.vectors.is_empty() => dim,
            _ => return Err(RagError::EmptyIndex),
        };
        if query.len() != dim {
            return Err(RagError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                distance: squared_l2(query, v),
            })
            .collect();

        // stable sort keeps lower positions first on ties
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k.min(self.vectors.len()));
        Ok(scored)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
