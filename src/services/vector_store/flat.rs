//! Exact nearest-neighbour index over chunk vectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::ChunkKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (na.sqrt() * nb.sqrt())
            }
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Map a distance onto 0.0-1.0 where larger means closer.
    pub fn relevance(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => (1.0 - distance).clamp(0.0, 1.0),
            DistanceMetric::L2 => 1.0 / (1.0 + distance.max(0.0)),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::L2 => write!(f, "l2"),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            _ => Err(format!("unknown distance metric: {}", s)),
        }
    }
}

/// Brute-force scan; entries are kept in key order.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    metric: DistanceMetric,
    dimension: Option<usize>,
    entries: BTreeMap<ChunkKey, Vec<f32>>,
}

impl FlatIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            dimension: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Dimension of the stored vectors; `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&[f32]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Callers validate the dimension first.
    pub fn insert(&mut self, key: ChunkKey, vector: Vec<f32>) {
        if self.dimension.is_none() {
            self.dimension = Some(vector.len());
        }
        self.entries.insert(key, vector);
    }

    pub fn remove(&mut self, key: &ChunkKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if self.entries.is_empty() {
            self.dimension = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dimension = None;
    }

    /// The `k` closest entries, ascending by distance, ties by key.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(ChunkKey, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(&ChunkKey, f32)> = self
            .entries
            .iter()
            .map(|(key, vector)| (key, self.metric.distance(query, vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(key, d)| (key.clone(), d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_and_l2() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!((DistanceMetric::Cosine.distance(&a, &a)).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::L2.distance(&a, &b) - 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(DistanceMetric::Cosine.distance(&[0.0, 0.0], &a), 1.0);
    }

    #[test]
    fn test_relevance_mapping() {
        assert_eq!(DistanceMetric::Cosine.relevance(0.0), 1.0);
        assert_eq!(DistanceMetric::Cosine.relevance(1.5), 0.0);
        assert_eq!(DistanceMetric::L2.relevance(1.0), 0.5);
    }

    #[test]
    fn test_search_ties_break_by_key() {
        let mut index = FlatIndex::new(DistanceMetric::L2);
        index.insert(ChunkKey::new("/b", 0), vec![1.0, 0.0]);
        index.insert(ChunkKey::new("/a", 1), vec![1.0, 0.0]);
        index.insert(ChunkKey::new("/a", 0), vec![1.0, 0.0]);
        index.insert(ChunkKey::new("/c", 0), vec![0.0, 0.0]);

        let hits = index.search(&[1.0, 0.0], 10);
        let keys: Vec<_> = hits.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![
                ChunkKey::new("/a", 0),
                ChunkKey::new("/a", 1),
                ChunkKey::new("/b", 0),
                ChunkKey::new("/c", 0),
            ]
        );
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_dimension_resets_when_emptied() {
        let mut index = FlatIndex::new(DistanceMetric::Cosine);
        index.insert(ChunkKey::new("/a", 0), vec![1.0, 2.0, 3.0]);
        assert_eq!(index.dimension(), Some(3));
        assert!(index.remove(&ChunkKey::new("/a", 0)));
        assert_eq!(index.dimension(), None);
    }
}
