//! JSON report writer for search, evaluation and redundancy outputs.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use dkeval_search::{CandidateEvaluation, FoldScore, PipelineCandidate, SearchRecord, SearchReport, StopReason};

use crate::IoError;
use crate::domain::ExperimentName;

/// Writes reports to JSON files named `{experiment}_{kind}.json`.
///
/// Creates the output directory on construction if it does not exist.
pub struct ReportWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ReportWriter {
    /// Create a new writer targeting the given directory and experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    /// Path of the `kind` report.
    #[must_use]
    pub fn report_path(&self, kind: &str) -> PathBuf {
        self.output_dir.join(self.experiment.report_file(kind))
    }

    fn write_json<T: Serialize>(&self, kind: &str, artifact: &T) -> Result<PathBuf, IoError> {
        let path = self.report_path(kind);
        let json = serde_json::to_string_pretty(artifact).map_err(|source| IoError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), kind, "report written");
        Ok(path)
    }

    /// Write a search report to `{experiment}_search.json`: the best
    /// candidate with its per-fold confusion matrices and the full history.
    ///
    /// # Errors
    ///
    /// [`IoError::Encode`] or [`IoError::WriteFile`].
    #[instrument(skip_all, fields(n_candidates = report.history.len()))]
    pub fn write_search(&self, report: &SearchReport) -> Result<PathBuf, IoError> {
        let artifact = SearchArtifact {
            experiment: self.experiment.as_str(),
            stop_reason: report.stop_reason,
            elapsed_seconds: report.elapsed_seconds,
            candidates_evaluated: report.history.len(),
            best: report.best_record().map(|r| CandidateArtifact::new(&r.candidate, &r.evaluation)),
            history: report.history.iter().map(HistoryEntry::from).collect(),
        };
        self.write_json("search", &artifact)
    }

    /// Write one explicit pipeline's evaluation to `{experiment}_evaluate.json`.
    ///
    /// # Errors
    ///
    /// [`IoError::Encode`] or [`IoError::WriteFile`].
    #[instrument(skip_all)]
    pub fn write_evaluation(
        &self,
        candidate: &PipelineCandidate,
        evaluation: &CandidateEvaluation,
    ) -> Result<PathBuf, IoError> {
        let artifact = EvaluateArtifact {
            experiment: self.experiment.as_str(),
            candidate: CandidateArtifact::new(candidate, evaluation),
        };
        self.write_json("evaluate", &artifact)
    }

    /// Write a redundancy analysis to `{experiment}_redundant.json`.
    ///
    /// # Errors
    ///
    /// [`IoError::Encode`] or [`IoError::WriteFile`].
    #[instrument(skip_all, fields(n_redundant = redundant.len()))]
    pub fn write_redundant(&self, n_features: usize, redundant: &BTreeSet<String>) -> Result<PathBuf, IoError> {
        let artifact = RedundantArtifact {
            experiment: self.experiment.as_str(),
            n_features,
            n_redundant: redundant.len(),
            redundant,
        };
        self.write_json("redundant", &artifact)
    }
}

// --- Shadow structs for JSON serialization ---

#[derive(Serialize)]
struct SearchArtifact<'a> {
    experiment: &'a str,
    stop_reason: StopReason,
    elapsed_seconds: f64,
    candidates_evaluated: usize,
    best: Option<CandidateArtifact<'a>>,
    history: Vec<HistoryEntry>,
}

#[derive(Serialize)]
struct CandidateArtifact<'a> {
    pipeline: String,
    candidate: &'a PipelineCandidate,
    fitness: f64,
    mean: f64,
    std_dev: f64,
    failed_folds: usize,
    folds: &'a [FoldScore],
}

impl<'a> CandidateArtifact<'a> {
    fn new(candidate: &'a PipelineCandidate, evaluation: &'a CandidateEvaluation) -> Self {
        Self {
            pipeline: candidate.to_string(),
            candidate,
            fitness: evaluation.fitness,
            mean: evaluation.mean,
            std_dev: evaluation.std_dev,
            failed_folds: evaluation.failed_folds(),
            folds: &evaluation.folds,
        }
    }
}

#[derive(Serialize)]
struct HistoryEntry {
    index: usize,
    pipeline: String,
    fitness: f64,
    mean: f64,
    std_dev: f64,
    failed_folds: usize,
    tuned: bool,
}

impl From<&SearchRecord> for HistoryEntry {
    fn from(record: &SearchRecord) -> Self {
        Self {
            index: record.index,
            pipeline: record.candidate.to_string(),
            fitness: record.evaluation.fitness,
            mean: record.evaluation.mean,
            std_dev: record.evaluation.std_dev,
            failed_folds: record.evaluation.failed_folds(),
            tuned: record.tuning.is_some(),
        }
    }
}

#[derive(Serialize)]
struct EvaluateArtifact<'a> {
    experiment: &'a str,
    candidate: CandidateArtifact<'a>,
}

#[derive(Serialize)]
struct RedundantArtifact<'a> {
    experiment: &'a str,
    n_features: usize,
    n_redundant: usize,
    redundant: &'a BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    use dkeval_search::ModelSpec;

    fn evaluation() -> CandidateEvaluation {
        let fold = |fold, fitness| FoldScore {
            fold,
            fitness,
            measures: BTreeMap::from([("accuracy".to_string(), fitness)]),
            confusion: Some(vec![vec![4, 1], vec![0, 5]]),
            warnings: Vec::new(),
            error: None,
        };
        CandidateEvaluation {
            fitness: 0.85,
            mean: 0.9,
            std_dev: 0.1,
            folds: vec![fold(0, 0.8), fold(1, 1.0)],
        }
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn write_evaluation_json_structure() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), ExperimentName::new("eval_test").unwrap()).unwrap();
        let candidate = PipelineCandidate::new(Vec::new(), ModelSpec::random_forest(5).unwrap());

        let path = writer.write_evaluation(&candidate, &evaluation()).unwrap();
        assert_eq!(path, dir.path().join("eval_test_evaluate.json"));

        let content = read(&path);
        assert_eq!(content["experiment"], "eval_test");
        assert_eq!(content["candidate"]["pipeline"], "random-forest");
        assert_eq!(content["candidate"]["candidate"]["model"]["model"], "random-forest");
        assert!((content["candidate"]["fitness"].as_f64().unwrap() - 0.85).abs() < 1e-12);
        let folds = content["candidate"]["folds"].as_array().unwrap();
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0]["confusion"][0][1], 1);
    }

    #[test]
    fn write_empty_search_report() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), ExperimentName::new("empty").unwrap()).unwrap();
        let report = SearchReport {
            best: None,
            history: Vec::new(),
            stop_reason: StopReason::WallClock,
            elapsed_seconds: 0.0,
        };
        let content = read(&writer.write_search(&report).unwrap());
        assert_eq!(content["stop_reason"], "wall-clock");
        assert!(content["best"].is_null());
        assert_eq!(content["candidates_evaluated"], 0);
    }

    #[test]
    fn write_redundant_lists_sorted_names() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), ExperimentName::new("red").unwrap()).unwrap();
        let redundant: BTreeSet<String> = ["zeta", "alpha"].into_iter().map(String::from).collect();
        let content = read(&writer.write_redundant(5, &redundant).unwrap());
        assert_eq!(content["n_features"], 5);
        assert_eq!(content["redundant"], serde_json::json!(["alpha", "zeta"]));
    }

    #[test]
    fn creates_nested_output_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested").join("deep");
        let writer = ReportWriter::new(&nested, ExperimentName::new("nested").unwrap()).unwrap();
        writer.write_redundant(0, &BTreeSet::new()).unwrap();
        assert!(nested.join("nested_redundant.json").exists());
    }
}
