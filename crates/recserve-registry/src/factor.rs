//! Factor model: dot-product scoring over user and item embeddings.
//!
//! Artifact format (`model.json`):
//!
//! ```json
//! {
//!   "user_factors": { "1": [0.1, 0.2] },
//!   "item_factors": { "10": [0.3, 0.4] },
//!   "seen": { "1": [10] }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{RegistryError, RegistryResult};
use crate::types::Recommender;

#[derive(Debug, Deserialize)]
struct FactorArtifact {
    user_factors: HashMap<u64, Vec<f32>>,
    item_factors: HashMap<u64, Vec<f32>>,
    #[serde(default)]
    seen: HashMap<u64, Vec<u64>>,
}

#[derive(Debug)]
pub struct FactorModel {
    rank: usize,
    user_factors: HashMap<u64, Vec<f32>>,
    /// Sorted by item id so ties resolve to the smaller id.
    items: Vec<(u64, Vec<f32>)>,
    seen: HashMap<u64, HashSet<u64>>,
}

impl FactorModel {
    /// Read and validate `model.json` from `path`.
    pub fn from_file(path: &Path) -> RegistryResult<Self> {
        let load_err = |reason: String| RegistryError::Load {
            location: path.display().to_string(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
        let artifact: FactorArtifact =
            serde_json::from_slice(&bytes).map_err(|e| load_err(e.to_string()))?;
        Self::from_artifact(artifact).map_err(load_err)
    }

    fn from_artifact(artifact: FactorArtifact) -> Result<Self, String> {
        let rank = artifact
            .user_factors
            .values()
            .chain(artifact.item_factors.values())
            .map(Vec::len)
            .next()
            .unwrap_or(0);

        if let Some((id, v)) = artifact.user_factors.iter().find(|(_, v)| v.len() != rank) {
            return Err(format!("user {id} has rank {}, expected {rank}", v.len()));
        }
        if let Some((id, v)) = artifact.item_factors.iter().find(|(_, v)| v.len() != rank) {
            return Err(format!("item {id} has rank {}, expected {rank}", v.len()));
        }

        let mut items: Vec<(u64, Vec<f32>)> = artifact.item_factors.into_iter().collect();
        items.sort_unstable_by_key(|(id, _)| *id);

        let seen = artifact
            .seen
            .into_iter()
            .map(|(user, items)| (user, items.into_iter().collect()))
            .collect();

        Ok(Self {
            rank,
            user_factors: artifact.user_factors,
            items,
            seen,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

impl Recommender for FactorModel {
    fn recommend(&self, user_id: u64, k: usize) -> RegistryResult<Vec<u64>> {
        let user = self
            .user_factors
            .get(&user_id)
            .ok_or(RegistryError::UnknownUser(user_id))?;
        let seen = self.seen.get(&user_id);

        let mut scored: Vec<(u64, f32)> = self
            .items
            .iter()
            .filter(|(item, _)| !seen.is_some_and(|s| s.contains(item)))
            .map(|(item, factors)| (*item, dot(user, factors)))
            .collect();

        // Stable sort keeps ascending item order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored.into_iter().take(k).map(|(item, _)| item).collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
