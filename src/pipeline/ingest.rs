// ingest.rs
// Phase 1: Load document vector records and validate their embeddings

use crate::error::{AnalysisError, DataError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File suffix of per-document vector records inside an input directory.
pub const VECTOR_FILE_SUFFIX: &str = "_vector.json";

#[derive(Debug)]
pub enum InputSource {
    /// Directory of `*_vector.json` files, read in file-name order.
    Directory(PathBuf),
    /// A single JSON file holding an array of records.
    File(PathBuf),
}

impl InputSource {
    /// Pick `Directory` or `File` based on what the path points at.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            InputSource::Directory(path)
        } else {
            InputSource::File(path)
        }
    }
}

/// On-disk shape of one document vector record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    #[serde(default)]
    pub metadata: RecordMetadata,
    #[serde(default)]
    pub vector: RecordVector,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordVector {
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
    #[serde(default)]
    pub embedding_dimension: Option<usize>,
}

impl DocumentRecord {
    /// Build a record from plain parts (mostly useful for callers that
    /// already hold embeddings in memory).
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        summary: impl Into<String>,
        embedding: Vec<f64>,
    ) -> Self {
        let dimension = embedding.len();
        Self {
            document_id: id.into(),
            metadata: RecordMetadata {
                title: title.into(),
                author: author.into(),
                summary: summary.into(),
            },
            vector: RecordVector {
                embedding: Some(embedding),
                embedding_dimension: Some(dimension),
            },
        }
    }
}

/// A validated document. Immutable for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub author: String,
    pub summary: String,
    pub embedding: Vec<f64>,
}

/// Holds the validated documents of one run, in input order.
///
/// Invariants: at least two documents, unique ids, every embedding non-empty
/// and of the same dimension.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    documents: Vec<Document>,
    dimension: usize,
}

impl DocumentStore {
    /// Validate documents and build the store.
    pub fn new(documents: Vec<Document>) -> Result<Self> {
        if documents.len() < 2 {
            return Err(DataError::InsufficientData {
                found: documents.len(),
            }
            .into());
        }

        let dimension = documents[0].embedding.len();
        let mut seen = HashSet::with_capacity(documents.len());

        for doc in &documents {
            if doc.embedding.is_empty() {
                return Err(DataError::EmptyEmbedding { id: doc.id.clone() }.into());
            }
            if doc.embedding.len() != dimension {
                return Err(DataError::DimensionMismatch {
                    id: doc.id.clone(),
                    expected: dimension,
                    actual: doc.embedding.len(),
                }
                .into());
            }
            if !seen.insert(doc.id.as_str()) {
                return Err(DataError::DuplicateId { id: doc.id.clone() }.into());
            }
        }

        Ok(Self {
            documents,
            dimension,
        })
    }

    /// Convert raw records, skipping the ones that carry no embedding.
    pub fn from_records(records: Vec<DocumentRecord>) -> Result<Self> {
        let mut documents = Vec::with_capacity(records.len());

        for record in records {
            match record.vector.embedding {
                Some(embedding) if !embedding.is_empty() => documents.push(Document {
                    id: record.document_id,
                    title: record.metadata.title,
                    author: record.metadata.author,
                    summary: record.metadata.summary,
                    embedding,
                }),
                _ => warn!(
                    document_id = %record.document_id,
                    "skipping document without an embedding"
                ),
            }
        }

        Self::new(documents)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Always false for a constructed store; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn ids(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.id.clone()).collect()
    }

    /// Embeddings as an `n x d` matrix, rows in document order.
    pub fn embedding_matrix(&self) -> Array2<f64> {
        let n = self.documents.len();
        Array2::from_shape_fn((n, self.dimension), |(i, j)| {
            self.documents[i].embedding[j]
        })
    }
}

/// Load and validate the documents of one run.
pub fn ingest(source: InputSource) -> Result<DocumentStore> {
    let records = match source {
        InputSource::Directory(dir) => {
            info!(dir = %dir.display(), "reading document vectors");
            read_vector_dir(&dir)?
        }
        InputSource::File(path) => {
            info!(path = %path.display(), "reading document vector file");
            let json = fs::read_to_string(&path).map_err(|e| AnalysisError::io(&path, e))?;
            serde_json::from_str::<Vec<DocumentRecord>>(&json)?
        }
    };

    let store = DocumentStore::from_records(records)?;
    info!(
        documents = store.len(),
        dimension = store.dimension(),
        "documents loaded"
    );
    Ok(store)
}

/// Read every `*_vector.json` file in `dir`, sorted by file name.
///
/// Files that fail to parse are skipped with a warning.
fn read_vector_dir(dir: &Path) -> Result<Vec<DocumentRecord>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| AnalysisError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(VECTOR_FILE_SUFFIX))
        })
        .collect();
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read vector file");
                continue;
            }
        };
        match serde_json::from_str::<DocumentRecord>(&json) {
            Ok(record) => {
                debug!(path = %path.display(), id = %record.document_id, "loaded record");
                records.push(record);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to parse vector file"),
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(id: &str, embedding: Vec<f64>) -> Document {
        Document {
            id: id.to_string(),
            title: format!("Title {id}"),
            author: "Author".to_string(),
            summary: String::new(),
            embedding,
        }
    }

    #[test]
    fn rejects_fewer_than_two_documents() {
        let err = DocumentStore::new(vec![doc("a", vec![1.0])]).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Data(DataError::InsufficientData { found: 1 })
        ));
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let err = DocumentStore::new(vec![doc("a", vec![1.0, 2.0]), doc("b", vec![1.0])])
            .unwrap_err();
        match err {
            AnalysisError::Data(DataError::DimensionMismatch {
                id,
                expected,
                actual,
            }) => {
                assert_eq!(id, "b");
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = DocumentStore::new(vec![doc("a", vec![1.0]), doc("a", vec![2.0])])
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Data(DataError::DuplicateId { .. })));
    }

    #[test]
    fn skips_records_without_embeddings() {
        let mut empty = DocumentRecord::new("c", "C", "x", "", vec![]);
        empty.vector.embedding = None;
        let store = DocumentStore::from_records(vec![
            DocumentRecord::new("a", "A", "x", "", vec![1.0, 0.0]),
            empty,
            DocumentRecord::new("b", "B", "x", "", vec![0.0, 1.0]),
        ])
        .unwrap();
        assert_eq!(store.ids(), vec!["a", "b"]);
        assert_eq!(store.embedding_matrix().dim(), (2, 2));
    }

    #[test]
    fn reads_vector_directory_in_file_name_order() {
        let dir = tempdir().unwrap();
        for (name, id) in [("0002_b_vector.json", "b"), ("0001_a_vector.json", "a")] {
            let record = DocumentRecord::new(id, id, "x", "", vec![1.0, 2.0]);
            fs::write(dir.path().join(name), serde_json::to_string(&record).unwrap()).unwrap();
        }
        fs::write(dir.path().join("0003_c_vector.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = ingest(InputSource::from_path(dir.path())).unwrap();
        assert_eq!(store.ids(), vec!["a", "b"]);
    }

    #[test]
    fn reads_record_array_file_and_ignores_extra_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            r#"[
                {"document_id": "a", "index": 0, "metadata": {"title": "A"},
                 "vector": {"embedding": [1.0, 0.0]}},
                {"document_id": "b", "index": 1,
                 "vector": {"embedding": [0.0, 1.0], "embedding_dimension": 2}}
            ]"#,
        )
        .unwrap();

        let store = ingest(InputSource::from_path(&path)).unwrap();
        assert_eq!(store.ids(), vec!["a", "b"]);
        assert_eq!(store.documents()[0].title, "A");
        assert_eq!(store.dimension(), 2);
    }

    #[test]
    fn missing_input_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = ingest(InputSource::File(dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, AnalysisError::Io { .. }));
    }
}
