use async_trait::async_trait;
use log::{ debug, info };
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition,
    CreateCollectionBuilder,
    Distance,
    Filter,
    PointStruct,
    SearchPointsBuilder,
    UpsertPointsBuilder,
    Value as QdrantValue,
    VectorParams,
    value::Kind,
    vectors_config::Config as VectorsConfig,
};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ Hit, IndexPoint, VectorIndex, CLASS_NAME, DOC_ID };
use crate::error::RelayError;

fn index_error(e: impl std::fmt::Display) -> RelayError {
    RelayError::Index(e.to_string())
}

/// Qdrant point ids must be UUIDs or integers, so document ids are mapped
/// to a stable v5 UUID and kept verbatim under `docId`.
fn point_id(doc_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes()).to_string()
}

pub struct QdrantVectorIndex {
    client: Qdrant,
}

impl QdrantVectorIndex {
    pub fn connect(url: &str, api_key: Option<String>) -> Result<Self, RelayError> {
        let client = Qdrant::from_url(url)
            .api_key(api_key.filter(|k| !k.is_empty()))
            .build()
            .map_err(index_error)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), RelayError> {
        if self.client.collection_info(collection).await.is_ok() {
            return Ok(());
        }
        info!("Creating Qdrant collection '{}' ({} dims)", collection, dimension);
        let cfg = CreateCollectionBuilder::new(collection)
            .vectors_config(
                VectorsConfig::Params(VectorParams {
                    size: dimension as u64,
                    distance: Distance::Cosine.into(),
                    ..Default::default()
                })
            )
            .build();
        self.client.create_collection(cfg).await.map_err(index_error)?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), RelayError> {
        let count = points.len();
        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|point| {
                let mut payload: HashMap<String, QdrantValue> = point.payload
                    .into_iter()
                    .map(|(k, v)| (k, QdrantValue { kind: Some(Kind::StringValue(v)) }))
                    .collect();
                payload.insert(DOC_ID.to_string(), QdrantValue {
                    kind: Some(Kind::StringValue(point.id.clone())),
                });
                PointStruct::new(point_id(&point.id), point.vector, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true).build()).await
            .map_err(index_error)?;
        debug!("Upserted {} points into '{}'", count, collection);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        class_names: Option<&[String]>
    ) -> Result<Vec<Hit>, RelayError> {
        let mut request = SearchPointsBuilder::new(collection, vector, limit as u64).with_payload(true);
        if let Some(names) = class_names {
            request = request.filter(Filter::must([Condition::matches(CLASS_NAME, names.to_vec())]));
        }

        let resp = self.client.search_points(request.build()).await.map_err(index_error)?;
        Ok(
            resp.result
                .into_iter()
                .map(|pt| {
                    let payload: HashMap<String, String> = pt.payload
                        .into_iter()
                        .filter_map(|(k, v)| match v.kind {
                            Some(Kind::StringValue(s)) => Some((k, s)),
                            _ => None,
                        })
                        .collect();
                    Hit {
                        id: payload.get(DOC_ID).cloned().unwrap_or_default(),
                        score: pt.score,
                        payload,
                    }
                })
                .collect()
        )
    }
}
