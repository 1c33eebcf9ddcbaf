use anyhow::{Context, Result};
use log::{debug, info};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Column holding the English translation used as the verse text
const TEXT_COLUMN: &str = "translation";
const CHAPTER_COLUMN: &str = "chapter";
const VERSE_COLUMN: &str = "verse";

pub const GITA_LABEL: &str = "Bhagavad Gita";
pub const YOGA_SUTRAS_LABEL: &str = "Patanjali Yoga Sutras";

/// One row of source text plus its chapter/verse/source metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseRecord {
    /// The verse translation
    pub text: String,
    /// Label of the corpus this verse came from
    pub source: String,
    pub chapter: String,
    pub verse: String,
}

/// A tabular verse dataset and the label attached to each of its rows
#[derive(Debug, Clone)]
pub struct CorpusSource {
    pub label: String,
    pub path: PathBuf,
}

impl CorpusSource {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        CorpusSource {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// Locations of the two verse datasets
pub struct CorpusConfig {
    pub gita_path: PathBuf,
    pub yoga_sutras_path: PathBuf,
}

impl CorpusConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Self {
        let gita_path = env::var("GITA_CSV")
            .unwrap_or_else(|_| "Bhagwad_Gita_Verses_English_Questions.csv".to_string());
        let yoga_sutras_path = env::var("YOGA_SUTRAS_CSV")
            .unwrap_or_else(|_| "Patanjali_Yoga_Sutras_Verses_English_Questions.csv".to_string());

        CorpusConfig {
            gita_path: gita_path.into(),
            yoga_sutras_path: yoga_sutras_path.into(),
        }
    }

    /// The sources in merge order
    pub fn sources(&self) -> Vec<CorpusSource> {
        vec![
            CorpusSource::new(GITA_LABEL, &self.gita_path),
            CorpusSource::new(YOGA_SUTRAS_LABEL, &self.yoga_sutras_path),
        ]
    }
}

/// Load every source and concatenate the rows, preserving order.
///
/// Fails as a whole if any source is missing or malformed.
pub fn load_corpus(sources: &[CorpusSource]) -> Result<Vec<VerseRecord>> {
    let mut corpus = Vec::new();

    for source in sources {
        let mut records = read_source(source)?;
        info!("Loaded {} verses from {}", records.len(), source.label);
        corpus.append(&mut records);
    }

    info!("Merged corpus holds {} verses", corpus.len());
    Ok(corpus)
}

/// Read one verse table, tagging each row with the source label
pub fn read_source(source: &CorpusSource) -> Result<Vec<VerseRecord>> {
    let path = source.path.as_path();

    let mime = from_path(path).first_or_octet_stream();
    debug!("Detected MIME type: {} for {}", mime, path.display());
    if mime != mime_guess::mime::TEXT_CSV && mime != mime_guess::mime::TEXT_PLAIN {
        return Err(anyhow::anyhow!(
            "Unsupported dataset format: {}. Only CSV files are supported.",
            mime
        ));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open dataset: {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    let text_idx = column_index(&headers, TEXT_COLUMN, path)?;
    let chapter_idx = column_index(&headers, CHAPTER_COLUMN, path)?;
    let verse_idx = column_index(&headers, VERSE_COLUMN, path)?;

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let row_data =
            result.with_context(|| format!("Malformed row {} in {}", row + 1, path.display()))?;

        // Absent cells become empty strings
        let field = |idx: usize| row_data.get(idx).unwrap_or("").to_string();

        records.push(VerseRecord {
            text: field(text_idx),
            source: source.label.clone(),
            chapter: field(chapter_idx),
            verse: field(verse_idx),
        });
    }

    Ok(records)
}

fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .with_context(|| format!("Missing column '{}' in {}", name, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_corpus_concatenates_in_order() {
        let dir = TempDir::new().unwrap();
        let gita = write(
            &dir,
            "gita.csv",
            "chapter,verse,translation,question\n1,1,Dhritarashtra said,q1\n2,47,Do your duty,q2\n",
        );
        let sutras = write(
            &dir,
            "sutras.csv",
            "translation,chapter,verse\nYoga is the stilling of the mind,1,2\n",
        );

        let corpus = load_corpus(&[
            CorpusSource::new(GITA_LABEL, gita),
            CorpusSource::new(YOGA_SUTRAS_LABEL, sutras),
        ])
        .unwrap();

        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus[0].text, "Dhritarashtra said");
        assert_eq!(corpus[0].source, GITA_LABEL);
        assert_eq!(corpus[1].chapter, "2");
        assert_eq!(corpus[1].verse, "47");
        assert_eq!(corpus[2].text, "Yoga is the stilling of the mind");
        assert_eq!(corpus[2].source, YOGA_SUTRAS_LABEL);
    }

    #[test]
    fn test_missing_cells_become_empty() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "gita.csv", "chapter,verse,translation\n3,,\n4\n");

        let records = read_source(&CorpusSource::new(GITA_LABEL, path)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chapter, "3");
        assert_eq!(records[0].verse, "");
        assert_eq!(records[0].text, "");
        assert_eq!(records[1].chapter, "4");
        assert_eq!(records[1].text, "");
    }

    #[test]
    fn test_missing_file_fails_whole_load() {
        let dir = TempDir::new().unwrap();
        let gita = write(&dir, "gita.csv", "chapter,verse,translation\n1,1,text\n");
        let missing = dir.path().join("absent.csv");

        let result = load_corpus(&[
            CorpusSource::new(GITA_LABEL, gita),
            CorpusSource::new(YOGA_SUTRAS_LABEL, missing),
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "gita.csv", "chapter,verse,sanskrit\n1,1,dharma\n");

        let err = read_source(&CorpusSource::new(GITA_LABEL, path)).unwrap_err();
        assert!(err.to_string().contains("translation"));
    }

    #[test]
    fn test_non_csv_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "gita.pdf", "%PDF-1.4");

        assert!(read_source(&CorpusSource::new(GITA_LABEL, path)).is_err());
    }

    #[test]
    fn test_other_text_formats_are_rejected() {
        let dir = TempDir::new().unwrap();
        let content = "chapter,verse,translation\n1,1,text\n";

        for name in ["gita.html", "gita.md"] {
            let path = write(&dir, name, content);
            let err = read_source(&CorpusSource::new(GITA_LABEL, path)).unwrap_err();
            assert!(err.to_string().contains("Unsupported dataset format"));
        }

        let path = write(&dir, "gita.txt", content);
        assert_eq!(
            read_source(&CorpusSource::new(GITA_LABEL, path)).unwrap().len(),
            1
        );
    }
}
