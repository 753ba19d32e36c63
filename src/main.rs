use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use dkeval_data::{DataPackage, PatientFoldGenerator};
use dkeval_io::{ColumnRoles, CsvReader, ExperimentName, ReportWriter};
use dkeval_model::{FeatureOverlap, KernelDensityExtractor, Measure};
use dkeval_search::{EvaluationOptions, ModelSpec, PipelineCandidate, Search, SearchConfig};
use dkeval_stages::{DataOptimizer, Stage, StageKind};

#[derive(Parser)]
#[command(name = "dkeval")]
#[command(about = "Pipeline search and model optimization over patient-grouped tabular data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Input table location and column roles.
#[derive(Args, Debug, Clone)]
struct InputArgs {
    /// Path to the input CSV file
    #[arg(long)]
    data: PathBuf,

    /// Name of the class label column
    #[arg(long, default_value = "label")]
    label: String,

    /// Name of the subject id column (each row is its own subject if unset)
    #[arg(long)]
    subject: Option<String>,
}

impl InputArgs {
    fn read(&self) -> Result<DataPackage> {
        let roles = match &self.subject {
            Some(subject) => ColumnRoles::new(&self.label).with_subject(subject),
            None => ColumnRoles::new(&self.label),
        };
        CsvReader::new(&self.data, roles)
            .read()
            .with_context(|| format!("failed to read {}", self.data.display()))
    }
}

/// Report destination.
#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
    #[arg(long)]
    experiment: String,

    /// Output directory for result files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

impl OutputArgs {
    fn writer(&self) -> Result<ReportWriter> {
        let name = ExperimentName::new(self.experiment.as_str())?;
        Ok(ReportWriter::new(&self.output_dir, name)?)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Search preprocessing pipelines and models with cross-validation
    Search {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// JSON search config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of subject-grouped folds
        #[arg(long)]
        folds: Option<usize>,

        /// Number of candidates to evaluate
        #[arg(long)]
        max_candidates: Option<usize>,

        /// Wall-clock limit in seconds
        #[arg(long)]
        max_seconds: Option<f64>,

        /// Fitness measure, e.g. "roc-distance", "accuracy", "mcc"
        #[arg(long)]
        measure: Option<String>,

        /// Tune stage hyperparameters of every candidate with Nelder-Mead
        #[arg(long, default_value_t = false)]
        tune: bool,
    },

    /// Cross-validate one explicit pipeline
    Evaluate {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Comma-separated stages, e.g. "pca,undersampling"
        #[arg(long, value_delimiter = ',')]
        stages: Vec<String>,

        /// Model: decision-tree, random-forest, kde, tuned-decision-tree or tuned-random-forest
        #[arg(long, default_value = "random-forest")]
        model: String,

        /// Number of subject-grouped folds
        #[arg(long, default_value_t = 5)]
        folds: usize,

        /// Fitness measure
        #[arg(long, default_value = "roc-distance")]
        measure: String,
    },

    /// List constant and highly correlated features
    Redundant {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Absolute correlation at or above which a later feature is redundant
        #[arg(long, default_value_t = 0.95)]
        threshold: f64,
    },

    /// Rank features by class-density overlap (most discriminative first)
    RankFeatures {
        #[command(flatten)]
        input: InputArgs,

        /// Print only the first N features
        #[arg(long)]
        top: Option<usize>,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct SearchOutput {
    experiment: String,
    n_rows: usize,
    n_subjects: usize,
    candidates_evaluated: usize,
    best_pipeline: Option<String>,
    best_fitness: Option<f64>,
    report: PathBuf,
}

#[derive(Serialize)]
struct EvaluateOutput {
    experiment: String,
    pipeline: String,
    measure: Measure,
    fitness: f64,
    mean: f64,
    std_dev: f64,
    failed_folds: usize,
    report: PathBuf,
}

#[derive(Serialize)]
struct RedundantOutput {
    experiment: String,
    n_features: usize,
    redundant: Vec<String>,
    report: PathBuf,
}

#[derive(Serialize)]
struct RankOutput {
    n_features: usize,
    ranking: Vec<FeatureOverlap>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Search {
            input,
            output,
            config,
            folds,
            max_candidates,
            max_seconds,
            measure,
            tune,
        } => {
            let data = input.read()?;
            let mut search_config = match &config {
                Some(path) => SearchConfig::from_json_file(path).context("failed to load search config")?,
                None => SearchConfig::new(),
            }
            .with_seed(cli.seed);
            if let Some(k) = folds {
                search_config = search_config.with_n_folds(k);
            }
            if let Some(n) = max_candidates {
                search_config = search_config.with_max_candidates(n);
            }
            if let Some(s) = max_seconds {
                let limit = Duration::try_from_secs_f64(s).context("invalid --max-seconds")?;
                search_config = search_config.with_max_duration(limit);
            }
            if let Some(m) = measure {
                search_config = search_config.with_measure(m.parse()?);
            }
            if tune {
                search_config = search_config.with_tuning(true);
            }

            let report = Search::new(search_config)?.run(&data).context("pipeline search failed")?;
            let path = output.writer()?.write_search(&report)?;

            let best = report.best_record();
            let summary = SearchOutput {
                experiment: output.experiment,
                n_rows: data.row_count(),
                n_subjects: data.distinct_subjects(),
                candidates_evaluated: report.history.len(),
                best_pipeline: best.map(|r| r.candidate.to_string()),
                best_fitness: best.map(|r| r.evaluation.fitness),
                report: path,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Evaluate {
            input,
            output,
            stages,
            model,
            folds,
            measure,
        } => {
            let data = input.read()?;
            let measure: Measure = measure.parse()?;
            let stages = stages
                .iter()
                .map(|s| -> Result<Stage> {
                    let kind: StageKind = s.trim().parse()?;
                    Ok(Stage::default_for(kind, data.feature_count()))
                })
                .collect::<Result<Vec<_>>>()?;
            let model: ModelSpec = model.parse()?;

            let mut candidate = PipelineCandidate::new(stages, model);
            let generator = PatientFoldGenerator::new(folds)?.with_seed(cli.seed);
            let options = EvaluationOptions::new(measure).with_seed(cli.seed);
            let evaluation = candidate
                .evaluate(&data, &generator, &options)
                .context("pipeline evaluation failed")?;
            info!(pipeline = %candidate, fitness = evaluation.fitness, "evaluation complete");

            let path = output.writer()?.write_evaluation(&candidate, &evaluation)?;
            let summary = EvaluateOutput {
                experiment: output.experiment,
                pipeline: candidate.to_string(),
                measure,
                fitness: evaluation.fitness,
                mean: evaluation.mean,
                std_dev: evaluation.std_dev,
                failed_folds: evaluation.failed_folds(),
                report: path,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Redundant {
            input,
            output,
            threshold,
        } => {
            let data = input.read()?;
            let redundant = DataOptimizer::new(threshold)?.redundant_features(&data);
            info!(n_redundant = redundant.len(), "redundancy analysis complete");

            let path = output.writer()?.write_redundant(data.feature_count(), &redundant)?;
            let summary = RedundantOutput {
                experiment: output.experiment,
                n_features: data.feature_count(),
                redundant: redundant.into_iter().collect(),
                report: path,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::RankFeatures { input, top } => {
            let data = input.read()?;
            let extractor = KernelDensityExtractor::new(&data).context("kernel density extraction failed")?;
            let ranking: Vec<FeatureOverlap> = extractor
                .overlap_ratios()
                .iter()
                .take(top.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            let summary = RankOutput {
                n_features: data.feature_count(),
                ranking,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
