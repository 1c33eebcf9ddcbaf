use crate::corpus::VerseRecord;
use crate::embeddings::{embed_all, euclidean_distance_squared, Embedder, Embedding};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::future::Future;
use std::path::Path;

/// A verse stored together with its embedding.
///
/// Keeping both in one entry means an index position always resolves to
/// the record it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVerse {
    pub record: VerseRecord,
    pub embedding: Embedding,
}

/// One search hit
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub record: VerseRecord,
    /// Euclidean distance to the query
    pub distance: f32,
    /// Stored vector, when the store returns it
    pub embedding: Option<Embedding>,
}

/// Answers k-nearest-neighbour queries over verses by Euclidean distance
pub trait VerseStore: Send + Sync {
    /// Up to `limit` hits, nearest first
    fn search(
        &self,
        query: &Embedding,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Retrieved>>> + Send;
}

/// Flat (brute-force) Euclidean index over the merged corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerseIndex {
    /// Embedding model the vectors came from
    #[serde(default)]
    model: String,
    dimension: usize,
    entries: Vec<IndexedVerse>,
}

impl VerseIndex {
    /// Join records with their embeddings, in corpus order
    pub fn from_parts(records: Vec<VerseRecord>, embeddings: Vec<Embedding>) -> Result<Self> {
        if records.len() != embeddings.len() {
            return Err(anyhow::anyhow!(
                "Got {} embeddings for {} verses",
                embeddings.len(),
                records.len()
            ));
        }

        let dimension = embeddings.first().map(Embedding::dimension).unwrap_or(0);
        let entries = records
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| IndexedVerse { record, embedding })
            .collect();

        let index = VerseIndex {
            model: String::new(),
            dimension,
            entries,
        };
        index.validate()?;
        Ok(index)
    }

    /// Every vector must have the index dimension
    fn validate(&self) -> Result<()> {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.embedding.dimension() != self.dimension)
        {
            return Err(anyhow::anyhow!(
                "Embedding {} has dimension {}, expected {}",
                pos,
                self.entries[pos].embedding.dimension(),
                self.dimension
            ));
        }
        Ok(())
    }

    /// Embed every verse and build the index
    pub async fn build<E: Embedder>(records: Vec<VerseRecord>, embedder: &E) -> Result<Self> {
        info!("Generating embeddings for {} verses...", records.len());
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let embeddings = embed_all(embedder, &texts).await?;

        let mut index = Self::from_parts(records, embeddings)?;
        index.model = embedder.model().to_string();
        info!(
            "Built flat index: {} verses, model {}, dimension {}",
            index.len(),
            index.model,
            index.dimension
        );
        Ok(index)
    }

    /// Reuse the persisted index at `path` if it was built from `records`
    /// by the same embedding model, otherwise build a fresh one and persist it.
    pub async fn load_or_build<E: Embedder>(
        path: &Path,
        records: Vec<VerseRecord>,
        embedder: &E,
        rebuild: bool,
    ) -> Result<Self> {
        if !rebuild && path.exists() {
            match Self::load(path) {
                Ok(index) if !index.matches(&records) => warn!(
                    "Persisted index {} does not match the corpus, rebuilding",
                    path.display()
                ),
                Ok(index) if index.model != embedder.model() => warn!(
                    "Persisted index {} was built with model '{}', current model is '{}', rebuilding",
                    path.display(),
                    index.model,
                    embedder.model()
                ),
                Ok(index) => {
                    let current = index.current_dimension(embedder).await?;
                    if current == index.dimension {
                        info!("Using persisted index: {}", path.display());
                        return Ok(index);
                    }
                    warn!(
                        "Persisted index {} has dimension {}, embedder produces {}, rebuilding",
                        path.display(),
                        index.dimension,
                        current
                    );
                }
                Err(e) => warn!("Ignoring unreadable index {}: {:#}", path.display(), e),
            }
        }

        let index = Self::build(records, embedder).await?;
        index.save(path)?;
        Ok(index)
    }

    /// Write the index to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let blob = serde_json::to_vec(self).context("Failed to serialize index")?;
        fs::write(path, blob)
            .with_context(|| format!("Failed to write index: {}", path.display()))?;
        info!("Saved index to {}", path.display());
        Ok(())
    }

    /// Read an index previously written by [`VerseIndex::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let blob =
            fs::read(path).with_context(|| format!("Failed to read index: {}", path.display()))?;
        let index: VerseIndex = serde_json::from_slice(&blob)
            .with_context(|| format!("Corrupt index file: {}", path.display()))?;
        index
            .validate()
            .with_context(|| format!("Inconsistent index file: {}", path.display()))?;
        Ok(index)
    }

    /// Dimension the embedder produces now, measured on the first verse
    async fn current_dimension<E: Embedder>(&self, embedder: &E) -> Result<usize> {
        match self.entries.first() {
            Some(entry) => Ok(embedder.embed(&entry.record.text).await?.dimension()),
            None => Ok(self.dimension),
        }
    }

    /// Whether the index holds exactly these records, in this order
    pub fn matches(&self, records: &[VerseRecord]) -> bool {
        self.entries.len() == records.len()
            && self
                .entries
                .iter()
                .zip(records)
                .all(|(entry, record)| &entry.record == record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Brute-force k-nearest search. Ties keep corpus order.
    pub fn nearest(&self, query: &Embedding, limit: usize) -> Vec<Retrieved> {
        if limit == 0 || self.is_empty() || query.dimension() != self.dimension {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                (
                    pos,
                    euclidean_distance_squared(&query.values, &entry.embedding.values),
                )
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(pos, distance)| {
                let entry = &self.entries[pos];
                Retrieved {
                    record: entry.record.clone(),
                    distance: distance.sqrt(),
                    embedding: Some(entry.embedding.clone()),
                }
            })
            .collect()
    }
}

impl VerseStore for VerseIndex {
    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<Retrieved>> {
        Ok(self.nearest(query, limit))
    }
}
