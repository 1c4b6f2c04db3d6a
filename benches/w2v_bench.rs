use criterion::{
    black_box, criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId,
    Criterion,
};
use pprof::criterion::{Output, PProfProfiler};
use std::time::Duration;
use w2v_bench::{train, Corpus, InMemoryCorpus, Text8Corpus, TrainParams, Vocabulary};

fn set_default_benchmark_configs(benchmark: &mut BenchmarkGroup<WallTime>) {
    let sample_size: usize = 10;
    let measurement_time: Duration = Duration::new(20, 0);
    let confidence_level: f64 = 0.97;
    let warm_up_time: Duration = Duration::new(5, 0);
    let noise_threshold: f64 = 0.05;

    benchmark
        .sample_size(sample_size)
        .measurement_time(measurement_time)
        .confidence_level(confidence_level)
        .warm_up_time(warm_up_time)
        .noise_threshold(noise_threshold);
}

/// The first 200k words of `text8` when it is around, a synthetic corpus
/// otherwise.
fn get_corpus() -> InMemoryCorpus {
    if let Ok(text8) = Text8Corpus::open("text8") {
        if let Ok(sentences) = text8.sentences() {
            let sentences: Vec<Vec<String>> = sentences.take(20).filter_map(Result::ok).collect();
            return InMemoryCorpus::new(sentences);
        }
    }
    let words: Vec<String> = (0..200_000).map(|i| format!("w{}", (i * 7919) % 5_000)).collect();
    InMemoryCorpus::new(words.chunks(10_000).map(|c| c.to_vec()).collect())
}

fn bench(c: &mut Criterion) {
    let mut benchmark = c.benchmark_group("w2v");
    set_default_benchmark_configs(&mut benchmark);

    let corpus = get_corpus();

    benchmark.bench_function(BenchmarkId::new("vocabulary", "min_count-5"), |bencher| {
        bencher.iter(|| Vocabulary::build(black_box(&corpus), 5))
    });

    for (name, params) in [
        ("single-thread", TrainParams::benchmark().set_workers(1)),
        ("parallel-training", TrainParams::benchmark()),
        (
            "parallel-training-pinned",
            TrainParams::benchmark().set_pin_workers(true),
        ),
    ] {
        benchmark.bench_function(BenchmarkId::new(name, "cbow-100d-w5-n5"), |bencher| {
            bencher.iter(|| train(black_box(&corpus), params.clone()))
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(500, Output::Flamegraph(None)));
    targets = bench
}

criterion_main!(benches);
