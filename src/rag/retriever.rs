use log::{ debug, info };
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::sync::Arc;

use super::{ best_per_attribute, Hit, IndexPoint, VectorIndex, KIND, PROPERTY_TYPE, TEXT };
use crate::error::RelayError;
use crate::llm::embedding::EmbeddingClient;

/// Documents embedded per provider call when indexing.
pub const INDEX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub parent_collection: String,
    pub attr_collection: String,
    pub top_k_parents: usize,
    pub top_k_attrs: usize,
    /// Candidates fetched before grouping by attribute.
    pub top_k_raw_attrs: usize,
    /// Floor applied to the unfiltered fallback search.
    pub min_score: Option<f32>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            parent_collection: "objects".to_string(),
            attr_collection: "object_attrs".to_string(),
            top_k_parents: 5,
            top_k_attrs: 8,
            top_k_raw_attrs: 50,
            min_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parent {
    pub name: String,
    pub kind: Option<String>,
    pub score: f32,
}

/// Outcome of a two-stage lookup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Retrieval {
    pub parents: Vec<Parent>,
    pub attributes: Vec<Hit>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty() && self.attributes.is_empty()
    }

    /// System prompt text listing what was found, or `None` when nothing was.
    pub fn to_context(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut context = String::from(
            "Use the following API reference excerpts when they help answer the question.\n"
        );
        if !self.parents.is_empty() {
            let names: Vec<String> = self.parents
                .iter()
                .map(|p| match &p.kind {
                    Some(kind) => format!("{} [{}]", p.name, kind),
                    None => p.name.clone(),
                })
                .collect();
            context.push_str(&format!("Relevant objects: {}\n", names.join(", ")));
        }
        for hit in &self.attributes {
            let header = format!(
                "{}.{}",
                hit.class_name().unwrap_or(""),
                hit.attribute_name().unwrap_or("")
            );
            context.push_str(&format!("\n{}", header.trim_matches('.')));
            if let Some(kind) = hit.field(PROPERTY_TYPE) {
                context.push_str(&format!(" [{}]", kind));
            }
            context.push('\n');
            if let Some(text) = hit.field(TEXT) {
                context.push_str(text.trim());
                context.push('\n');
            }
        }
        Some(context)
    }
}

/// A document to index: `text` is embedded, `metadata` is stored alongside.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: RetrievalSettings
    ) -> Self {
        Self { embedder, index, settings }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Finds likely parent objects, then the best attributes of those
    /// parents. Without parents it falls back to an unfiltered search.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, RelayError> {
        let vector = self.embedder.embed(query).await?.embedding;
        let parents = self.find_parents(&vector).await?;
        let names: Vec<String> = parents
            .iter()
            .map(|p| p.name.clone())
            .collect();

        let attributes = if names.is_empty() {
            debug!("No parent objects matched, using unfiltered attribute search");
            self.diverse_attributes(
                &vector,
                self.settings.top_k_attrs,
                self.settings.top_k_raw_attrs,
                self.settings.min_score
            ).await?
        } else {
            self.attributes_for_parents(&vector, &names).await?
        };

        info!("Retrieved {} parents and {} attributes", parents.len(), attributes.len());
        Ok(Retrieval { parents, attributes })
    }

    /// Hits without a `className` are skipped.
    pub async fn find_parents(&self, vector: &[f32]) -> Result<Vec<Parent>, RelayError> {
        let hits = self.index.search(
            &self.settings.parent_collection,
            vector.to_vec(),
            self.settings.top_k_parents,
            None
        ).await?;

        Ok(
            hits
                .into_iter()
                .filter_map(|hit| {
                    let name = hit.class_name()?.to_string();
                    Some(Parent {
                        name,
                        kind: hit.field(KIND).map(str::to_string),
                        score: hit.score,
                    })
                })
                .collect()
        )
    }

    pub async fn attributes_for_parents(
        &self,
        vector: &[f32],
        parents: &[String]
    ) -> Result<Vec<Hit>, RelayError> {
        let hits = self.index.search(
            &self.settings.attr_collection,
            vector.to_vec(),
            self.settings.top_k_raw_attrs,
            Some(parents)
        ).await?;

        let mut best = best_per_attribute(hits);
        best.truncate(self.settings.top_k_attrs);
        Ok(best)
    }

    pub async fn diverse_attributes(
        &self,
        vector: &[f32],
        top_k: usize,
        top_k_raw: usize,
        min_score: Option<f32>
    ) -> Result<Vec<Hit>, RelayError> {
        let hits = self.index.search(
            &self.settings.attr_collection,
            vector.to_vec(),
            top_k_raw,
            None
        ).await?;

        let mut best = best_per_attribute(hits);
        if let Some(floor) = min_score {
            best.retain(|h| h.score >= floor);
        }
        best.truncate(top_k);
        Ok(best)
    }

    /// Embeds and upserts `documents` into `collection` in batches.
    pub async fn index_documents(
        &self,
        collection: &str,
        documents: Vec<Document>
    ) -> Result<usize, RelayError> {
        if collection != self.settings.parent_collection && collection != self.settings.attr_collection {
            return Err(RelayError::BadRequest(format!("Unknown collection: '{}'", collection)));
        }

        let total = documents.len();
        let batches = total.div_ceil(INDEX_BATCH_SIZE);
        for (i, batch) in documents.chunks(INDEX_BATCH_SIZE).enumerate() {
            info!("Indexing {} batch {}/{}", collection, i + 1, batches);
            let texts: Vec<String> = batch
                .iter()
                .map(|d| d.text.clone())
                .collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            let points = batch
                .iter()
                .zip(vectors)
                .map(|(doc, vector)| {
                    let mut payload = doc.metadata.clone();
                    payload.insert(TEXT.to_string(), doc.text.clone());
                    IndexPoint { id: doc.id.clone(), vector, payload }
                })
                .collect();
            self.index.upsert(collection, points).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{ MemoryVectorIndex, CLASS_NAME, PROPERTY_NAME };
    use async_trait::async_trait;
    use std::sync::atomic::{ AtomicUsize, Ordering };

    /// Maps text onto a fixed vocabulary, one dimension per word.
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    const VOCAB: [&str; 4] = ["document", "command", "palette", "sketch"];

    impl KeywordEmbedder {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl EmbeddingClient for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(
                texts
                    .iter()
                    .map(|t| {
                        let lower = t.to_lowercase();
                        VOCAB.iter()
                            .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
                            .collect()
                    })
                    .collect()
            )
        }
    }

    fn doc(id: &str, text: &str, fields: &[(&str, &str)]) -> Document {
        Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    async fn seeded() -> (Retriever, Arc<KeywordEmbedder>) {
        let embedder = Arc::new(KeywordEmbedder::new());
        let retriever = Retriever::new(
            embedder.clone(),
            Arc::new(MemoryVectorIndex::new()),
            RetrievalSettings::default()
        );
        retriever
            .index_documents(
                "objects",
                vec![
                    doc("Document", "document object", &[(CLASS_NAME, "Document"), (KIND, "class")]),
                    doc("CommandDefinition", "command palette entry", &[(CLASS_NAME, "CommandDefinition")])
                ]
            ).await
            .unwrap();
        retriever
            .index_documents(
                "object_attrs",
                vec![
                    doc(
                        "Document.name",
                        "document name",
                        &[(CLASS_NAME, "Document"), (PROPERTY_NAME, "name"), (PROPERTY_TYPE, "Property")]
                    ),
                    doc(
                        "Document.name#2",
                        "document name second chunk sketch",
                        &[(CLASS_NAME, "Document"), (PROPERTY_NAME, "name")]
                    ),
                    doc(
                        "CommandDefinition.execute",
                        "command palette execute",
                        &[(CLASS_NAME, "CommandDefinition"), (PROPERTY_NAME, "execute")]
                    ),
                    doc("Sketch.profiles", "sketch profiles", &[(CLASS_NAME, "Sketch"), (PROPERTY_NAME, "profiles")])
                ]
            ).await
            .unwrap();
        (retriever, embedder)
    }

    #[tokio::test]
    async fn attributes_are_limited_to_matched_parents() {
        let (retriever, _) = seeded().await;
        let settings = RetrievalSettings { top_k_parents: 1, ..RetrievalSettings::default() };
        let retriever = Retriever { settings, ..retriever };

        let retrieval = retriever.retrieve("rename the document").await.unwrap();
        assert_eq!(retrieval.parents.len(), 1);
        assert_eq!(retrieval.parents[0].name, "Document");
        assert_eq!(retrieval.parents[0].kind.as_deref(), Some("class"));

        let ids: Vec<&str> = retrieval.attributes
            .iter()
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(ids, vec!["Document.name"]);
    }

    #[tokio::test]
    async fn without_parents_falls_back_to_unfiltered_search() {
        let (retriever, _) = seeded().await;
        let settings = RetrievalSettings {
            parent_collection: "empty".to_string(),
            min_score: Some(0.5),
            ..RetrievalSettings::default()
        };
        let retriever = Retriever { settings, ..retriever };

        let retrieval = retriever.retrieve("sketch").await.unwrap();
        assert!(retrieval.parents.is_empty());
        let ids: Vec<&str> = retrieval.attributes
            .iter()
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(ids, vec!["Sketch.profiles", "Document.name#2"]);
    }

    #[tokio::test]
    async fn indexing_embeds_in_batches() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let retriever = Retriever::new(
            embedder.clone(),
            Arc::new(MemoryVectorIndex::new()),
            RetrievalSettings::default()
        );
        let docs: Vec<Document> = (0..INDEX_BATCH_SIZE + 1)
            .map(|i| doc(&format!("d{}", i), "document", &[(CLASS_NAME, "Document")]))
            .collect();

        assert_eq!(retriever.index_documents("objects", docs).await.unwrap(), INDEX_BATCH_SIZE + 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let unknown = retriever.index_documents("elsewhere", Vec::new()).await;
        assert!(matches!(unknown, Err(RelayError::BadRequest(_))));
    }

    #[test]
    fn context_lists_parents_and_attributes() {
        let mut payload = HashMap::new();
        payload.insert(CLASS_NAME.to_string(), "Document".to_string());
        payload.insert(PROPERTY_NAME.to_string(), "name".to_string());
        payload.insert(PROPERTY_TYPE.to_string(), "Property".to_string());
        payload.insert(TEXT.to_string(), "  The document name.  ".to_string());
        let retrieval = Retrieval {
            parents: vec![Parent { name: "Document".into(), kind: None, score: 0.9 }],
            attributes: vec![Hit { id: "Document.name".into(), score: 0.8, payload }],
        };

        let context = retrieval.to_context().unwrap();
        assert!(context.contains("Relevant objects: Document\n"));
        assert!(context.contains("\nDocument.name [Property]\nThe document name.\n"));
        assert_eq!(Retrieval::default().to_context(), None);
    }
}
