use crate::embeddings::{cosine_similarity, Embedder};
use crate::index::VerseStore;
use anyhow::Result;
use log::{debug, info};
use serde::Serialize;
use std::io::{self, Write};

/// Number of verses retrieved per query
pub const DEFAULT_TOP_K: usize = 3;

const GREETINGS: [&str; 5] = ["hi", "hello", "hey", "namaste", "hii"];
const INAPPROPRIATE_KEYWORDS: [&str; 4] = ["violence", "hate", "abuse", "sex"];

pub const FRIENDLY_RESPONSE: &str = "Hello! How can I assist you today? You can ask about verses, teachings, or other related topics.";
pub const INAPPROPRIATE_QUERY: &str = "Inappropriate Query";
pub const NO_RESULTS: &str = "No relevant results found. Please refine your query.";

/// How a raw query is handled before any retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Greeting,
    Inappropriate,
    Search,
}

/// Classify a query: greetings match exactly after trim and lowercase,
/// disallowed keywords match as substrings.
pub fn classify(query: &str) -> QueryKind {
    let normalized = query.trim().to_lowercase();

    if GREETINGS.contains(&normalized.as_str()) {
        QueryKind::Greeting
    } else if INAPPROPRIATE_KEYWORDS
        .iter()
        .any(|keyword| normalized.contains(keyword))
    {
        QueryKind::Inappropriate
    } else {
        QueryKind::Search
    }
}

/// One retrieved verse as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedText {
    pub text: String,
    pub source: String,
    pub chapter: String,
    /// Verse identifier
    pub title: String,
}

/// Answer to a searchable query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query: String,
    /// Nearest first
    pub retrieved_texts: Vec<RetrievedText>,
    /// Text of the best match
    pub generated_response: String,
    /// Cosine similarity between the query and the best match, in [-1, 1]
    pub accuracy_score: f32,
}

/// Every shape the pipeline can answer with
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Greeting { friendly_response: String },
    Error { error: String },
    Answer(QueryResult),
}

impl QueryOutcome {
    fn greeting() -> Self {
        QueryOutcome::Greeting {
            friendly_response: FRIENDLY_RESPONSE.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        QueryOutcome::Error {
            error: message.to_string(),
        }
    }

    /// Plain-text rendering used by the web form and the terminal loop
    pub fn render(&self) -> String {
        match self {
            QueryOutcome::Greeting { friendly_response } => friendly_response.clone(),
            QueryOutcome::Error { error } => error.clone(),
            QueryOutcome::Answer(result) => {
                let mut out = format!("Query: {}\n", result.query);
                for (idx, retrieved) in result.retrieved_texts.iter().enumerate() {
                    out.push_str(&format!(
                        "\n\nResult {}:\nText: {}\nSource: {}\nChapter: {}\nTitle: {}\n",
                        idx + 1,
                        retrieved.text,
                        retrieved.source,
                        retrieved.chapter,
                        retrieved.title
                    ));
                }
                out.push_str(&format!(
                    "\nGenerated Response: {}\nAccuracy Score: {:.4}",
                    result.generated_response, result.accuracy_score
                ));
                out
            }
        }
    }
}

/// Single-turn query pipeline over a verse store
pub struct QueryPipeline<E, S> {
    embedder: E,
    store: S,
    top_k: usize,
}

impl<E: Embedder, S: VerseStore> QueryPipeline<E, S> {
    /// Create a new pipeline retrieving [`DEFAULT_TOP_K`] verses per query
    pub fn new(embedder: E, store: S) -> Self {
        QueryPipeline {
            embedder,
            store,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Answer one query. Only embedding or store failures are errors.
    pub async fn answer(&self, query: &str) -> Result<QueryOutcome> {
        let kind = classify(query);
        debug!("Query classified as {:?}", kind);

        match kind {
            QueryKind::Greeting => return Ok(QueryOutcome::greeting()),
            QueryKind::Inappropriate => return Ok(QueryOutcome::error(INAPPROPRIATE_QUERY)),
            QueryKind::Search => {}
        }

        let query_embedding = self.embedder.embed(query).await?;
        let hits = self.store.search(&query_embedding, self.top_k).await?;

        let Some(best) = hits.first() else {
            return Ok(QueryOutcome::error(NO_RESULTS));
        };

        let best_embedding = match &best.embedding {
            Some(embedding) => embedding.clone(),
            None => self.embedder.embed(&best.record.text).await?,
        };
        let accuracy_score = cosine_similarity(&query_embedding.values, &best_embedding.values);
        let generated_response = best.record.text.clone();

        let retrieved_texts = hits
            .into_iter()
            .map(|hit| RetrievedText {
                text: hit.record.text,
                source: hit.record.source,
                chapter: hit.record.chapter,
                title: hit.record.verse,
            })
            .collect();

        Ok(QueryOutcome::Answer(QueryResult {
            query: query.to_string(),
            retrieved_texts,
            generated_response,
            accuracy_score,
        }))
    }

    /// Run the interactive question loop on the terminal
    pub async fn run_query_loop(&self) -> Result<()> {
        info!("Ready to answer questions. Type 'exit' to quit.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();

            if question.to_lowercase() == "exit" {
                info!("Goodbye!");
                break;
            }

            let outcome = self.answer(question).await?;
            println!("\n{}", outcome.render());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::VerseRecord;
    use crate::embeddings::testing::{FailingEmbedder, WordHashEmbedder};
    use crate::embeddings::Embedding;
    use crate::index::{Retrieved, VerseIndex};
    use serde_json::json;
    use std::sync::Arc;

    fn verse(text: &str, source: &str, chapter: &str, verse: &str) -> VerseRecord {
        VerseRecord {
            text: text.to_string(),
            source: source.to_string(),
            chapter: chapter.to_string(),
            verse: verse.to_string(),
        }
    }

    fn corpus() -> Vec<VerseRecord> {
        vec![
            verse("the soul is never born and never dies", "Bhagavad Gita", "2", "20"),
            verse("you have a right to action but not to its fruits", "Bhagavad Gita", "2", "47"),
            verse("yoga is the stilling of the fluctuations of the mind", "Patanjali Yoga Sutras", "1", "2"),
            verse("practice and detachment still the mind", "Patanjali Yoga Sutras", "1", "12"),
        ]
    }

    async fn pipeline() -> QueryPipeline<Arc<WordHashEmbedder>, VerseIndex> {
        let embedder = Arc::new(WordHashEmbedder::default());
        let index = VerseIndex::build(corpus(), embedder.as_ref()).await.unwrap();
        QueryPipeline::new(embedder, index)
    }

    /// Store that returns hits without vectors
    struct VectorlessStore(Vec<VerseRecord>);

    impl VerseStore for VectorlessStore {
        async fn search(&self, _query: &Embedding, limit: usize) -> Result<Vec<Retrieved>> {
            Ok(self
                .0
                .iter()
                .take(limit)
                .enumerate()
                .map(|(pos, record)| Retrieved {
                    record: record.clone(),
                    distance: pos as f32,
                    embedding: None,
                })
                .collect())
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("  Hello "), QueryKind::Greeting);
        assert_eq!(classify("NAMASTE"), QueryKind::Greeting);
        assert_eq!(classify("hello there"), QueryKind::Search);
        assert_eq!(classify("Why is there Violence?"), QueryKind::Inappropriate);
        assert_eq!(classify("a hateful mind"), QueryKind::Inappropriate);
        assert_eq!(classify("what is hatred"), QueryKind::Search);
        assert_eq!(classify("what is dharma"), QueryKind::Search);
    }

    #[tokio::test]
    async fn test_greeting_skips_retrieval() {
        let pipeline = pipeline().await;
        let calls_before = pipeline.embedder.calls();

        let outcome = pipeline.answer(" Hii ").await.unwrap();

        assert_eq!(outcome, QueryOutcome::greeting());
        assert_eq!(pipeline.embedder.calls(), calls_before);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "friendly_response": FRIENDLY_RESPONSE })
        );
    }

    #[tokio::test]
    async fn test_inappropriate_query_is_rejected() {
        let pipeline = pipeline().await;
        let calls_before = pipeline.embedder.calls();

        let outcome = pipeline.answer("tell me about VIOLENCE in war").await.unwrap();

        assert_eq!(pipeline.embedder.calls(), calls_before);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "error": "Inappropriate Query" })
        );
    }

    #[tokio::test]
    async fn test_topical_query_returns_ranked_results() {
        let pipeline = pipeline().await;

        let outcome = pipeline.answer("how to still the mind").await.unwrap();

        let QueryOutcome::Answer(result) = outcome else {
            panic!("expected an answer, got {:?}", outcome);
        };
        assert_eq!(result.query, "how to still the mind");
        assert_eq!(result.retrieved_texts.len(), 3);
        assert_eq!(result.generated_response, result.retrieved_texts[0].text);
        assert_eq!(result.retrieved_texts[0].title, "12");
        assert_eq!(result.retrieved_texts[0].source, "Patanjali Yoga Sutras");
        assert!((-1.0..=1.0).contains(&result.accuracy_score));
    }

    #[tokio::test]
    async fn test_results_are_nearest_first() {
        let pipeline = pipeline().await;
        let query = pipeline.embedder.embed("the right to action").await.unwrap();

        let hits = pipeline.store().search(&query, DEFAULT_TOP_K).await.unwrap();
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_identical_text_scores_one() {
        let pipeline = pipeline().await;

        let outcome = pipeline
            .answer("you have a right to action but not to its fruits")
            .await
            .unwrap();

        let QueryOutcome::Answer(result) = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(result.retrieved_texts[0].title, "47");
        assert!((result.accuracy_score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let embedder = WordHashEmbedder::default();
        let index = VerseIndex::build(corpus(), &embedder).await.unwrap();
        let pipeline = QueryPipeline::new(FailingEmbedder, index);

        assert!(pipeline.answer("what is karma").await.is_err());
        assert_eq!(
            pipeline.answer("hello").await.unwrap(),
            QueryOutcome::greeting()
        );
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_results() {
        let embedder = Arc::new(WordHashEmbedder::default());
        let index = VerseIndex::from_parts(Vec::new(), Vec::new()).unwrap();
        let pipeline = QueryPipeline::new(embedder, index);

        let outcome = pipeline.answer("what is karma").await.unwrap();

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "error": NO_RESULTS })
        );
    }

    #[tokio::test]
    async fn test_store_without_vectors_reembeds_best_match() {
        let embedder = Arc::new(WordHashEmbedder::default());
        let pipeline = QueryPipeline::new(embedder, VectorlessStore(corpus())).with_top_k(2);

        let outcome = pipeline
            .answer("the soul is never born and never dies")
            .await
            .unwrap();

        let QueryOutcome::Answer(result) = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(result.retrieved_texts.len(), 2);
        assert_eq!(pipeline.embedder.calls(), 2);
        assert!((result.accuracy_score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_render_answer() {
        let outcome = QueryOutcome::Answer(QueryResult {
            query: "what is yoga".to_string(),
            retrieved_texts: vec![RetrievedText {
                text: "yoga is skill in action".to_string(),
                source: "Bhagavad Gita".to_string(),
                chapter: "2".to_string(),
                title: "50".to_string(),
            }],
            generated_response: "yoga is skill in action".to_string(),
            accuracy_score: 0.87654,
        });

        assert_eq!(
            outcome.render(),
            "Query: what is yoga\n\n\nResult 1:\nText: yoga is skill in action\nSource: Bhagavad Gita\nChapter: 2\nTitle: 50\n\nGenerated Response: yoga is skill in action\nAccuracy Score: 0.8765"
        );
    }

    #[test]
    fn test_render_short_circuits() {
        assert_eq!(QueryOutcome::greeting().render(), FRIENDLY_RESPONSE);
        assert_eq!(
            QueryOutcome::error(INAPPROPRIATE_QUERY).render(),
            INAPPROPRIATE_QUERY
        );
    }
}
