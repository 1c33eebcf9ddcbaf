use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Maps text to a fixed-dimension vector
pub trait Embedder: Send + Sync {
    /// Identifies the model producing the vectors
    fn model(&self) -> &str;

    /// Generate the embedding for a single text
    fn embed(&self, text: &str) -> impl Future<Output = Result<Embedding>> + Send;
}

/// Embed every text in order, one request at a time
pub async fn embed_all<E: Embedder>(embedder: &E, texts: &[&str]) -> Result<Vec<Embedding>> {
    let mut embeddings = Vec::with_capacity(texts.len());

    for (idx, text) in texts.iter().enumerate() {
        embeddings.push(embedder.embed(text).await?);

        if (idx + 1) % 100 == 0 {
            info!("Embedded {}/{} texts", idx + 1, texts.len());
        }
    }

    Ok(embeddings)
}

/// Squared Euclidean distance; vectors must have the same length
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Cosine similarity in [-1, 1], 0 when either vector has zero magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}
