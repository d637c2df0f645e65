//! Retrieval over an API reference split into two collections: parent
//! objects (classes, types) and their attributes (methods, properties,
//! events). Used to ground chat answers in the indexed documentation.

mod memory;
mod qdrant;
pub mod retriever;

pub use self::memory::MemoryVectorIndex;
pub use self::qdrant::QdrantVectorIndex;
pub use self::retriever::{ Retrieval, RetrievalSettings, Retriever };

use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use std::cmp::Ordering;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::error::RelayError;

pub const CLASS_NAME: &str = "className";
pub const PROPERTY_NAME: &str = "propertyName";
/// Older attribute rows name the member `attributeName`.
pub const ATTRIBUTE_NAME: &str = "attributeName";
pub const PROPERTY_TYPE: &str = "propertyType";
pub const KIND: &str = "kind";
pub const TEXT: &str = "text";
pub const DOC_ID: &str = "docId";

/// A vector plus its string metadata, ready for upsert.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, String>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, String>,
}

impl Hit {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn class_name(&self) -> Option<&str> {
        self.field(CLASS_NAME)
    }

    pub fn attribute_name(&self) -> Option<&str> {
        self.field(PROPERTY_NAME).or_else(|| self.field(ATTRIBUTE_NAME))
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates `collection` when it does not exist yet.
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), RelayError>;

    /// Inserts or replaces points by id.
    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), RelayError>;

    /// Nearest `limit` points by cosine similarity, best first. With
    /// `class_names`, only points whose `className` is in the list match.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        class_names: Option<&[String]>
    ) -> Result<Vec<Hit>, RelayError>;
}

/// Keeps the best-scoring hit per (className, attribute) pair and returns
/// them best first. On equal scores the earlier hit wins.
pub fn best_per_attribute(hits: Vec<Hit>) -> Vec<Hit> {
    let mut best: HashMap<(Option<String>, Option<String>), Hit> = HashMap::new();
    for hit in hits {
        let key = (hit.class_name().map(str::to_string), hit.attribute_name().map(str::to_string));
        match best.get(&key) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                best.insert(key, hit);
            }
        }
    }

    let mut ranked: Vec<Hit> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

/// Builds the configured vector index, or `None` when retrieval is off.
pub async fn create_vector_index(
    args: &Args
) -> Result<Option<Arc<dyn VectorIndex>>, Box<dyn Error + Send + Sync>> {
    let index: Arc<dyn VectorIndex> = match args.vector_type.to_lowercase().as_str() {
        "none" | "" => {
            return Ok(None);
        }
        "memory" => Arc::new(MemoryVectorIndex::new()),
        "qdrant" => Arc::new(QdrantVectorIndex::connect(&args.vector_host, args.vector_secret.clone())?),
        other => {
            return Err(format!("Unsupported vector type: {}", other).into());
        }
    };

    for collection in [&args.parent_collection, &args.attr_collection] {
        index.ensure_collection(collection, args.dimension).await?;
    }
    info!(
        "Vector index '{}' ready with collections '{}' and '{}'",
        args.vector_type,
        args.parent_collection,
        args.attr_collection
    );
    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32, class: &str, attr: &str) -> Hit {
        let mut payload = HashMap::new();
        payload.insert(CLASS_NAME.to_string(), class.to_string());
        payload.insert(PROPERTY_NAME.to_string(), attr.to_string());
        Hit { id: id.to_string(), score, payload }
    }

    #[test]
    fn keeps_best_chunk_per_attribute() {
        let ranked = best_per_attribute(
            vec![
                hit("a1", 0.70, "App", "activeDocument"),
                hit("a2", 0.90, "App", "activeDocument"),
                hit("b1", 0.80, "App", "userInterface"),
                hit("c1", 0.85, "Command", "execute")
            ]
        );
        let ids: Vec<&str> = ranked
            .iter()
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a2", "c1", "b1"]);
    }

    #[test]
    fn equal_scores_keep_the_first_hit() {
        let ranked = best_per_attribute(
            vec![hit("first", 0.5, "App", "x"), hit("second", 0.5, "App", "x")]
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "first");
    }

    #[test]
    fn attribute_name_falls_back_to_legacy_key() {
        let mut payload = HashMap::new();
        payload.insert(ATTRIBUTE_NAME.to_string(), "debuggingPort".to_string());
        let hit = Hit { id: "x".into(), score: 1.0, payload };
        assert_eq!(hit.attribute_name(), Some("debuggingPort"));
        assert_eq!(hit.class_name(), None);
    }
}
