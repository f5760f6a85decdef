// ============================================================
// Layer 5: Nearest-Neighbour Index
// ============================================================
// Retrieval only needs two calls: build an index over code
// embeddings, then ask for the k nearest rows to a query.
// NeighborIndex is that seam; HnswAngularIndex is the default
// implementation on top of hnsw_rs.
//
// hnsw_rs' DistCosine reports 1 - cos(a, b). We report the
// angular distance sqrt(2 · (1 - cos)), the chord length
// between the two unit vectors, so distances lie in [0, 2].

use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::*;

use crate::domain::error::{Result, SiameseError};

/// Build once over row vectors, then query by vector.
pub trait NeighborIndex: Sized {
    fn build(vectors: &[Vec<f32>]) -> Result<Self>;

    /// Up to `k` `(row, distance)` pairs, nearest first.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(usize, f32)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const MAX_NB_CONNECTION: usize = 16;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

pub struct HnswAngularIndex {
    inner:     Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    /// Rows given to `build`
    len:       usize,
    /// Rows actually searchable
    indexed:   usize,
}

impl std::fmt::Debug for HnswAngularIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswAngularIndex")
            .field("dimension", &self.dimension)
            .field("len", &self.len)
            .field("indexed", &self.indexed)
            .finish()
    }
}

/// Angular distance from hnsw_rs' cosine distance.
pub fn angular_distance(cosine_distance: f32) -> f32 {
    (2.0 * cosine_distance.max(0.0)).sqrt()
}

fn check_dimension(vector: &[f32], dimension: usize, what: &str) -> Result<()> {
    if vector.len() != dimension {
        return Err(SiameseError::Tensor(format!(
            "{what} has dimension {}, index expects {dimension}",
            vector.len()
        )));
    }
    Ok(())
}

/// A zero, NaN or infinite vector has no angle to anything.
fn has_direction(vector: &[f32]) -> bool {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    norm >= f32::EPSILON && norm.is_finite()
}

impl NeighborIndex for HnswAngularIndex {
    fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        let dimension = vectors.first().map_or(0, Vec::len);
        let max_elements = vectors.len().max(1);
        tracing::info!(
            "Building HNSW angular index: {} vectors, dim={}, M={}, ef_construction={}",
            vectors.len(),
            dimension,
            MAX_NB_CONNECTION,
            EF_CONSTRUCTION,
        );
        let inner = Hnsw::<f32, DistCosine>::new(
            MAX_NB_CONNECTION,
            max_elements,
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine {},
        );
        let mut indexed = 0;
        for (id, v) in vectors.iter().enumerate() {
            check_dimension(v, dimension, &format!("embedding {id}"))?;
            if !has_direction(v) {
                tracing::warn!("Embedding {} has no direction and is left out of the index", id);
                continue;
            }
            inner.insert_slice((v.as_slice(), id));
            indexed += 1;
        }
        Ok(Self { inner, dimension, len: vectors.len(), indexed })
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if self.indexed == 0 || k == 0 {
            return Ok(Vec::new());
        }
        check_dimension(vector, self.dimension, "query embedding")?;
        if !has_direction(vector) {
            tracing::warn!("Query embedding has no direction, no neighbours returned");
            return Ok(Vec::new());
        }
        let ef_search = EF_SEARCH.max(k);
        let mut hits: Vec<(usize, f32)> = self
            .inner
            .search(vector, k.min(self.indexed), ef_search)
            .into_iter()
            .map(|n| (n.d_id, angular_distance(n.distance)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.len
    }
}
