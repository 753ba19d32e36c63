//! Criterion benchmarks for dkeval-search: candidate scoring and short searches.

use criterion::{Criterion, criterion_group, criterion_main};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use dkeval_data::{DataPackage, PatientFoldGenerator, SubjectId};
use dkeval_model::Measure;
use dkeval_search::{EvaluationOptions, ModelSpec, PipelineCandidate, Search, SearchConfig};
use dkeval_stages::{Stage, StageKind};

fn make_cohort(n_subjects: usize, n_features: usize, seed: u64) -> DataPackage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut subjects = Vec::new();
    for s in 0..n_subjects {
        let label = usize::from(s % 3 == 0);
        for _ in 0..3 {
            let row: Vec<f64> = (0..n_features)
                .map(|f| {
                    let base = if f < 2 { label as f64 * 2.0 } else { 0.0 };
                    base + rng.r#gen::<f64>()
                })
                .collect();
            rows.push(row);
            labels.push(label);
            subjects.push(SubjectId::new(format!("s{s}")));
        }
    }
    let names: Vec<String> = (0..n_features).map(|f| format!("f{f}")).collect();
    DataPackage::from_names(&names, rows, labels, subjects).unwrap()
}

fn bench_candidate_evaluate(c: &mut Criterion) {
    let data = make_cohort(100, 10, 42);
    let folds = PatientFoldGenerator::new(5).unwrap();
    let options = EvaluationOptions::new(Measure::RocDistance);
    let candidate = PipelineCandidate::new(
        vec![
            Stage::default_for(StageKind::Oversampling, 10),
            Stage::default_for(StageKind::Pca, 10),
        ],
        ModelSpec::random_forest(20).unwrap(),
    );

    c.bench_function("candidate_smote_pca_rf20_300x10_5fold", |b| {
        b.iter(|| candidate.clone().evaluate(&data, &folds, &options).unwrap());
    });
}

fn bench_short_search(c: &mut Criterion) {
    let data = make_cohort(60, 6, 7);
    let config = SearchConfig::new()
        .with_n_folds(3)
        .with_max_candidates(8)
        .with_models(vec![ModelSpec::random_forest(10).unwrap()]);
    let search = Search::new(config).unwrap();

    let mut group = c.benchmark_group("search");
    group.sample_size(10);
    group.bench_function("search_8_candidates_180x6", |b| {
        b.iter(|| search.run(&data).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_candidate_evaluate, bench_short_search);
criterion_main!(benches);
