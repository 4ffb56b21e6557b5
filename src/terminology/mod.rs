//! Terminology validation over an immutable ICD-10 reference table.
//!
//! The table is loaded once at startup from CSV and never mutated, so
//! lookups take `&self` and need no synchronization; callers share the
//! store behind an `Arc`. Validation offers exact code lookup with
//! prefix-based alternatives on a miss, description comparison with fixed
//! similarity thresholds, and substring search with a fuzzy fallback.

mod matching;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::observability::metrics::metrics;

/// Maximum alternatives returned for a failed code lookup
const MAX_ALTERNATIVES: usize = 5;

/// Maximum results returned by the fuzzy search fallback
const MAX_FUZZY_RESULTS: usize = 5;

/// Similarity floor for the fuzzy search fallback
const FUZZY_CUTOFF: f64 = 0.6;

/// Terminology data and lookup errors
#[derive(Debug, Error)]
pub enum TerminologyError {
    #[error("Terminology code cannot be empty")]
    EmptyCode,

    #[error("Unknown terminology code: {code}")]
    UnknownCode { code: String },

    #[error("Failed to load terminology data from {path}: {source}")]
    DataLoad {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Terminology data is missing required column '{column}'")]
    MissingColumn { column: String },

    #[error("Invalid terminology record {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    #[error("Duplicate terminology code '{code}' in record {row}")]
    DuplicateCode { code: String, row: usize },
}

/// One entry of the reference classification table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminologyRecord {
    pub code: String,
    /// Official description (the `definition` column of the source CSV)
    pub description: String,
    pub chapter: String,
    pub domain: String,
    pub url: String,
}

/// Outcome of comparing a candidate description against the official one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionMatch {
    /// True only when similarity exceeds the match threshold
    pub matches: bool,
    /// Normalized similarity in [0, 1]
    pub similarity: f64,
    pub note: String,
}

/// Outcome of an exact code lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeValidation {
    pub valid: bool,
    /// The matched record when `valid` is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<TerminologyRecord>,
    /// On a miss, records sharing the queried code's prefix, in table order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<TerminologyRecord>,
    /// Present when a candidate description was supplied alongside the code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_match: Option<DescriptionMatch>,
}

/// Raw CSV row, field names matching the reference file's header
#[derive(Debug, Deserialize)]
struct RawTerminologyRow {
    code: String,
    definition: String,
    chapter: String,
    domain: String,
    url: String,
}

const REQUIRED_COLUMNS: &[&str] = &["code", "definition", "chapter", "domain", "url"];

/// Immutable terminology reference table keyed by code.
///
/// Records keep their source file order, which determines the order of
/// alternatives and substring search results.
#[derive(Debug, Clone)]
pub struct TerminologyStore {
    records: Vec<TerminologyRecord>,
    index: HashMap<String, usize>,
}

impl TerminologyStore {
    /// Build a store from in-memory records, validating uniqueness and
    /// required fields
    pub fn from_records(records: Vec<TerminologyRecord>) -> Result<Self, TerminologyError> {
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            let row = position + 1;
            if record.code.trim().is_empty() {
                return Err(TerminologyError::InvalidRecord {
                    row,
                    message: "code is empty".to_string(),
                });
            }
            if record.description.trim().is_empty() {
                return Err(TerminologyError::InvalidRecord {
                    row,
                    message: format!("definition for code '{}' is empty", record.code),
                });
            }
            if index.insert(record.code.clone(), position).is_some() {
                return Err(TerminologyError::DuplicateCode {
                    code: record.code.clone(),
                    row,
                });
            }
        }

        if records.is_empty() {
            warn!("terminology store is empty, every lookup will miss");
        }

        Ok(Self { records, index })
    }

    /// Load the reference table from a CSV file with columns
    /// `code, definition, chapter, domain, url`
    pub fn load_csv(path: &Path) -> Result<Self, TerminologyError> {
        let data_load = |source: csv::Error| TerminologyError::DataLoad {
            path: path.display().to_string(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(data_load)?;

        let headers = reader.headers().map_err(data_load)?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == *column) {
                return Err(TerminologyError::MissingColumn {
                    column: (*column).to_string(),
                });
            }
        }

        let mut records = Vec::new();
        for row in reader.deserialize::<RawTerminologyRow>() {
            let row = row.map_err(data_load)?;
            records.push(TerminologyRecord {
                code: row.code,
                description: row.definition,
                chapter: row.chapter,
                domain: row.domain,
                url: row.url,
            });
        }

        let store = Self::from_records(records)?;
        info!(
            path = %path.display(),
            records = store.len(),
            "terminology reference data loaded"
        );
        Ok(store)
    }

    /// Number of records in the table
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact lookup by code
    pub fn get(&self, code: &str) -> Option<&TerminologyRecord> {
        self.index.get(code).map(|&position| &self.records[position])
    }

    /// Validate a code against the reference table.
    ///
    /// On a hit the full record is returned, plus a description comparison
    /// when `candidate_description` is supplied. On a miss the result
    /// carries up to five alternatives sharing the queried code's prefix
    /// (the part before the first `.`), taken in table order rather than
    /// ranked by similarity.
    pub fn validate_code(
        &self,
        code: &str,
        candidate_description: Option<&str>,
    ) -> Result<CodeValidation, TerminologyError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(TerminologyError::EmptyCode);
        }

        if let Some(record) = self.get(code) {
            metrics().code_lookup(true);
            let description_match =
                candidate_description.map(|candidate| compare_descriptions(record, candidate));
            return Ok(CodeValidation {
                valid: true,
                record: Some(record.clone()),
                alternatives: Vec::new(),
                description_match,
            });
        }

        metrics().code_lookup(false);
        let prefix = matching::code_prefix(code);
        let alternatives = self
            .records
            .iter()
            .filter(|record| matching::code_prefix(&record.code) == prefix)
            .take(MAX_ALTERNATIVES)
            .cloned()
            .collect();

        Ok(CodeValidation {
            valid: false,
            record: None,
            alternatives,
            description_match: None,
        })
    }

    /// Compare a candidate description against the official description of
    /// a known code
    pub fn validate_description(
        &self,
        code: &str,
        candidate_description: &str,
    ) -> Result<DescriptionMatch, TerminologyError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(TerminologyError::EmptyCode);
        }

        let record = self.get(code).ok_or_else(|| TerminologyError::UnknownCode {
            code: code.to_string(),
        })?;
        Ok(compare_descriptions(record, candidate_description))
    }

    /// Case-insensitive substring search across official descriptions,
    /// falling back to fuzzy matching when nothing contains the query.
    ///
    /// Substring hits are returned unbounded in table order; the fuzzy
    /// fallback returns at most five records at or above the similarity
    /// cutoff, best first.
    pub fn search_by_description(&self, text: &str) -> Vec<TerminologyRecord> {
        let needle = matching::normalize(text);

        let hits: Vec<TerminologyRecord> = self
            .records
            .iter()
            .filter(|record| matching::normalize(&record.description).contains(&needle))
            .cloned()
            .collect();
        if !hits.is_empty() {
            metrics().description_search(false);
            return hits;
        }

        metrics().description_search(true);
        let mut scored: Vec<(f64, &TerminologyRecord)> = self
            .records
            .iter()
            .filter_map(|record| {
                let similarity = matching::similarity_ratio(text, &record.description);
                (similarity >= FUZZY_CUTOFF).then_some((similarity, record))
            })
            .collect();
        // Stable sort keeps table order among equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(MAX_FUZZY_RESULTS)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

fn compare_descriptions(record: &TerminologyRecord, candidate: &str) -> DescriptionMatch {
    let similarity = matching::similarity_ratio(candidate, &record.description);
    let (matches, note) = matching::classify_similarity(similarity);
    DescriptionMatch {
        matches,
        similarity,
        note: note.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record(code: &str, description: &str) -> TerminologyRecord {
        TerminologyRecord {
            code: code.to_string(),
            description: description.to_string(),
            chapter: "Test chapter".to_string(),
            domain: "Test domain".to_string(),
            url: format!("https://icd.who.int/browse10/2019/en#/{code}"),
        }
    }

    fn sample_store() -> TerminologyStore {
        TerminologyStore::from_records(vec![
            record("A00", "Cholera"),
            record("A00.0", "Cholera due to Vibrio cholerae 01, biovar cholerae"),
            record("A00.1", "Cholera due to Vibrio cholerae 01, biovar eltor"),
            record("A00.9", "Cholera, unspecified"),
            record("A01.0", "Typhoid fever"),
            record("G43.9", "Migraine, unspecified"),
            record("Z99.0", "Dependence on aspirator"),
            record("Z99.1", "Dependence on respirator"),
            record("Z99.2", "Dependence on renal dialysis"),
            record("Z99.3", "Dependence on wheelchair"),
            record("Z99.8", "Dependence on other enabling machines and devices"),
            record("Z99.81", "Dependence on supplemental oxygen"),
        ])
        .unwrap()
    }

    #[test]
    fn test_validate_code_exact_hit() {
        let store = sample_store();

        let validation = store.validate_code("A00", None).unwrap();

        assert!(validation.valid);
        let matched = validation.record.unwrap();
        assert_eq!(matched.code, "A00");
        assert_eq!(matched.description, "Cholera");
        assert!(validation.alternatives.is_empty());
        assert!(validation.description_match.is_none());
    }

    #[test]
    fn test_validate_code_miss_returns_prefix_alternatives() {
        let store = sample_store();

        let validation = store.validate_code("Z99.9", None).unwrap();

        assert!(!validation.valid);
        assert!(validation.record.is_none());
        // Six Z99 records exist, only the first five in table order come back
        assert_eq!(validation.alternatives.len(), 5);
        let codes: Vec<&str> = validation
            .alternatives
            .iter()
            .map(|r| r.code.as_str())
            .collect();
        assert_eq!(codes, vec!["Z99.0", "Z99.1", "Z99.2", "Z99.3", "Z99.8"]);
        for alternative in &validation.alternatives {
            assert!(alternative.code.starts_with("Z99"));
        }
    }

    #[test]
    fn test_validate_code_miss_without_neighbors() {
        let store = sample_store();

        let validation = store.validate_code("Q12.3", None).unwrap();

        assert!(!validation.valid);
        assert!(validation.alternatives.is_empty());
    }

    #[test]
    fn test_validate_code_rejects_empty_code() {
        let store = sample_store();

        assert!(matches!(
            store.validate_code("", None),
            Err(TerminologyError::EmptyCode)
        ));
        assert!(matches!(
            store.validate_code("   ", None),
            Err(TerminologyError::EmptyCode)
        ));
    }

    #[test]
    fn test_validate_code_with_candidate_description() {
        let store = sample_store();

        let validation = store.validate_code("A00", Some("Cholera")).unwrap();

        let description_match = validation.description_match.unwrap();
        assert!(description_match.matches);
        assert_eq!(description_match.similarity, 1.0);
        assert_eq!(description_match.note, "Descriptions match");
    }

    #[test]
    fn test_validate_description_identical() {
        let store = sample_store();

        let result = store.validate_description("A01.0", "Typhoid fever").unwrap();

        assert!(result.matches);
        assert_eq!(result.similarity, 1.0);
        assert_eq!(result.note, "Descriptions match");
    }

    #[test]
    fn test_validate_description_case_insensitive() {
        let store = sample_store();

        let result = store.validate_description("A00", "CHOLERA").unwrap();

        assert_eq!(result.similarity, 1.0);
        assert!(result.matches);
    }

    #[test]
    fn test_validate_description_similar_band() {
        let store = sample_store();

        // Two substitutions against "cholera": 1 - 2/7, between 0.6 and 0.8
        let result = store.validate_description("A00", "Cholexx").unwrap();

        assert!(!result.matches);
        assert!(result.similarity > 0.6 && result.similarity <= 0.8);
        assert_eq!(result.note, "Descriptions are similar");
    }

    #[test]
    fn test_validate_description_no_match() {
        let store = sample_store();

        let result = store.validate_description("A00", "Typhoid").unwrap();

        assert!(!result.matches);
        assert!(result.similarity <= 0.6);
        assert_eq!(result.note, "Descriptions do not match");
    }

    #[test]
    fn test_validate_description_unknown_code() {
        let store = sample_store();

        assert!(matches!(
            store.validate_description("B99", "anything"),
            Err(TerminologyError::UnknownCode { .. })
        ));
    }

    #[test]
    fn test_search_by_substring() {
        let store = sample_store();

        let results = store.search_by_description("cholera");

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].code, "A00");
        assert_eq!(results[3].code, "A00.9");
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let store = sample_store();

        let results = store.search_by_description("TYPHOID");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "A01.0");
    }

    #[test]
    fn test_search_fuzzy_fallback() {
        let store = sample_store();

        // No description contains "colera", the fuzzy fallback still finds
        // the single-edit neighbor
        let results = store.search_by_description("colera");

        assert!(!results.is_empty());
        assert!(results.len() <= 5);
        assert_eq!(results[0].code, "A00");
    }

    #[test]
    fn test_search_no_results() {
        let store = sample_store();

        let results = store.search_by_description("quantum chromodynamics");

        assert!(results.is_empty());
    }

    #[test]
    fn test_search_empty_query_returns_everything() {
        let store = sample_store();

        // An empty needle is a substring of every description
        let results = store.search_by_description("");

        assert_eq!(results.len(), store.len());
    }

    #[test]
    fn test_from_records_rejects_blank_code() {
        let result = TerminologyStore::from_records(vec![record("  ", "Cholera")]);
        assert!(matches!(
            result,
            Err(TerminologyError::InvalidRecord { row: 1, .. })
        ));
    }

    #[test]
    fn test_from_records_rejects_blank_description() {
        let result = TerminologyStore::from_records(vec![
            record("A00", "Cholera"),
            record("A01", ""),
        ]);
        assert!(matches!(
            result,
            Err(TerminologyError::InvalidRecord { row: 2, .. })
        ));
    }

    #[test]
    fn test_from_records_rejects_duplicate_code() {
        let result = TerminologyStore::from_records(vec![
            record("A00", "Cholera"),
            record("A00", "Cholera again"),
        ]);
        assert!(matches!(
            result,
            Err(TerminologyError::DuplicateCode { row: 2, .. })
        ));
    }

    #[test]
    fn test_load_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "code,definition,chapter,domain,url").unwrap();
        writeln!(
            file,
            "A00,Cholera,Infectious diseases,Intestinal,https://example.test/A00"
        )
        .unwrap();
        writeln!(
            file,
            "A00.0,\"Cholera due to Vibrio cholerae 01, biovar cholerae\",Infectious diseases,Intestinal,https://example.test/A00.0"
        )
        .unwrap();

        let store = TerminologyStore::load_csv(file.path()).unwrap();

        assert_eq!(store.len(), 2);
        let validation = store.validate_code("A00.0", None).unwrap();
        assert!(validation.valid);
        assert_eq!(
            validation.record.unwrap().description,
            "Cholera due to Vibrio cholerae 01, biovar cholerae"
        );
    }

    #[test]
    fn test_load_csv_missing_file() {
        let result = TerminologyStore::load_csv(Path::new("/nonexistent/codes.csv"));
        assert!(matches!(result, Err(TerminologyError::DataLoad { .. })));
    }

    #[test]
    fn test_load_csv_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "code,definition,chapter,domain").unwrap();
        writeln!(file, "A00,Cholera,Infectious diseases,Intestinal").unwrap();

        let result = TerminologyStore::load_csv(file.path());

        assert!(matches!(
            result,
            Err(TerminologyError::MissingColumn { column }) if column == "url"
        ));
    }

    #[test]
    fn test_load_csv_blank_definition() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "code,definition,chapter,domain,url").unwrap();
        writeln!(file, "A00,,Infectious diseases,Intestinal,https://example.test").unwrap();

        let result = TerminologyStore::load_csv(file.path());

        assert!(matches!(result, Err(TerminologyError::InvalidRecord { .. })));
    }

    #[test]
    fn test_load_csv_duplicate_code() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "code,definition,chapter,domain,url").unwrap();
        writeln!(file, "A00,Cholera,C1,D1,https://example.test/1").unwrap();
        writeln!(file, "A00,Cholera repeated,C1,D1,https://example.test/2").unwrap();

        let result = TerminologyStore::load_csv(file.path());

        assert!(matches!(
            result,
            Err(TerminologyError::DuplicateCode { code, .. }) if code == "A00"
        ));
    }
}
