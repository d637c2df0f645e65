use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ Hit, IndexPoint, VectorIndex, CLASS_NAME };
use crate::error::RelayError;

type Collection = HashMap<String, IndexPoint>;

/// Brute-force cosine index held in process memory.
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a
        .iter()
        .zip(b)
        .map(|(x, y)| x * y)
        .sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 { 0.0 } else { dot / denom }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, collection: &str, _dimension: usize) -> Result<(), RelayError> {
        self.collections.write().await.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), RelayError> {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        for point in points {
            target.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        class_names: Option<&[String]>
    ) -> Result<Vec<Hit>, RelayError> {
        let collections = self.collections.read().await;
        let points = match collections.get(collection) {
            Some(points) => points,
            None => {
                return Ok(Vec::new());
            }
        };

        let mut hits: Vec<Hit> = points
            .values()
            .filter(|p| match class_names {
                Some(names) =>
                    p.payload.get(CLASS_NAME).map_or(false, |c| names.iter().any(|n| n == c)),
                None => true,
            })
            .map(|p| Hit {
                id: p.id.clone(),
                score: cosine(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
