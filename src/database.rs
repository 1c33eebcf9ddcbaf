use crate::corpus::VerseRecord;
use crate::embeddings::{embed_all, Embedder, Embedding};
use crate::index::{Retrieved, VerseStore};
use anyhow::{Context, Result};
use log::{info, warn};
use qdrant_client::qdrant::UpsertPointsBuilder;
use qdrant_client::qdrant::{CreateCollectionBuilder, Distance, PointStruct, Value, VectorParams};
use qdrant_client::Qdrant;
use serde_json::json;
use std::collections::HashMap;
use std::env;

const UPSERT_BATCH_SIZE: usize = 256;

/// Configuration for Qdrant
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl QdrantConfig {
    /// Create a configuration from environment variables, `None` when
    /// `QDRANT_URL` is not set
    pub fn from_env() -> Option<Self> {
        let url = env::var("QDRANT_URL").ok()?;
        let api_key = env::var("QDRANT_API_KEY").ok();
        let collection = env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "verses".to_string());

        Some(QdrantConfig {
            url,
            api_key,
            collection,
        })
    }
}

/// Verse collection stored in Qdrant
pub struct QdrantClient {
    client: Qdrant,
    collection_name: String,
}

impl QdrantClient {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build()?;

        Ok(QdrantClient {
            client,
            collection_name: get_collection_name(&config.collection),
        })
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        match self.client.collection_info(&self.collection_name).await {
            Ok(_) => Ok(true),
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to check collection existence: {}",
                e
            )),
        }
    }

    /// Create the collection with Euclidean distance
    pub async fn create_collection(&self, dimension: usize) -> Result<()> {
        let create_collection = CreateCollectionBuilder::new(self.collection_name.clone())
            .vectors_config(VectorParams {
                size: dimension as u64,
                distance: Distance::Euclid.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection_name))?;

        Ok(())
    }

    /// Delete the collection
    pub async fn delete_collection(&self) -> Result<()> {
        self.client
            .delete_collection(self.collection_name.clone())
            .await
            .with_context(|| format!("Failed to delete collection {}", self.collection_name))?;

        Ok(())
    }

    /// Reuse the collection if present, otherwise embed the corpus and
    /// store it. `rebuild` drops any existing collection first.
    pub async fn prepare<E: Embedder>(
        &self,
        records: &[VerseRecord],
        embedder: &E,
        rebuild: bool,
    ) -> Result<()> {
        if records.is_empty() {
            return Err(anyhow::anyhow!(
                "Corpus is empty, nothing to store in collection {}",
                self.collection_name
            ));
        }

        if self.collection_exists().await? {
            if !rebuild {
                info!("Using existing collection: {}", self.collection_name);
                return Ok(());
            }
            self.delete_collection().await?;
        }

        info!("Generating embeddings for {} verses...", records.len());
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let embeddings = embed_all(embedder, &texts).await?;
        let dimension = embeddings.first().map(Embedding::dimension).unwrap_or(0);

        self.create_collection(dimension).await?;
        self.store_verses(records, embeddings).await
    }

    /// Store verses with their embeddings; point ids are corpus positions
    pub async fn store_verses(
        &self,
        records: &[VerseRecord],
        embeddings: Vec<Embedding>,
    ) -> Result<()> {
        if records.len() != embeddings.len() {
            return Err(anyhow::anyhow!(
                "Got {} embeddings for {} verses",
                embeddings.len(),
                records.len()
            ));
        }

        let mut points = Vec::with_capacity(records.len());
        for (idx, (record, embedding)) in records.iter().zip(embeddings).enumerate() {
            let payload: HashMap<String, Value> = serde_json::from_value(json!({
                "text": record.text,
                "source": record.source,
                "chapter": record.chapter,
                "verse": record.verse,
                "position": idx,
            }))
            .context("Failed to build point payload")?;

            points.push(PointStruct::new(idx as u64, embedding.values, payload));
        }

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let upsert_request =
                UpsertPointsBuilder::new(self.collection_name.clone(), batch.to_vec()).build();

            self.client
                .upsert_points(upsert_request)
                .await
                .with_context(|| {
                    format!(
                        "Failed to upsert points in collection {}",
                        self.collection_name
                    )
                })?;
        }

        info!(
            "Stored {} verses in collection {}",
            records.len(),
            self.collection_name
        );
        Ok(())
    }

    /// Search for the nearest verses
    pub async fn search_verses(&self, query: &Embedding, limit: u64) -> Result<Vec<Retrieved>> {
        use qdrant_client::qdrant::{with_payload_selector, SearchPoints, WithPayloadSelector};

        let search_request = SearchPoints {
            collection_name: self.collection_name.clone(),
            vector: query.values.clone(),
            limit,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection_name))?;

        // Euclid scores are distances, already ascending
        let hits = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let record = verse_from_payload(&scored_point.payload);
                if record.is_none() {
                    warn!("Skipping point with incomplete payload");
                }
                Some(Retrieved {
                    record: record?,
                    distance: scored_point.score,
                    embedding: None,
                })
            })
            .collect();

        Ok(hits)
    }
}

impl VerseStore for QdrantClient {
    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<Retrieved>> {
        self.search_verses(query, limit as u64).await
    }
}

/// Rebuild a verse from a point payload
fn verse_from_payload(payload: &HashMap<String, Value>) -> Option<VerseRecord> {
    let field = |key: &str| payload.get(key)?.as_str().map(|s| s.to_string());

    Some(VerseRecord {
        text: field("text")?,
        source: field("source")?,
        chapter: field("chapter")?,
        verse: field("verse")?,
    })
}

/// Generate a collection name from a configured name
fn get_collection_name(name: &str) -> String {
    // Replace non-alphanumeric characters with underscores and convert to lowercase
    let name = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    format!("rag_{}", name)
}
