use crossbeam::channel::{self, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    algo::{self, Hogwild, Layers, Scratch, Shared},
    cores,
    corpus::Corpus,
    error::{Result, Word2VecError},
    model::Word2VecModel,
    params::TrainParams,
    vocab::Vocabulary,
};

/// Sentences handed to one worker, trained with a single learning rate.
#[derive(Debug)]
struct Job {
    epoch: usize,
    alpha: f32,
    raw_words: u64,
    sentences: Vec<Vec<String>>,
}

enum Event {
    /// The producer finished queueing an epoch.
    Queued { epoch: usize, jobs: usize },
    Trained {
        epoch: usize,
        raw_words: u64,
        effective_words: u64,
        loss: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub jobs: usize,
    pub raw_words: u64,
    pub effective_words: u64,
    pub loss: f64,
    /// Time since training started when the last job of the epoch finished.
    pub finished_at: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
    pub elapsed: Duration,
}

impl TrainingReport {
    pub fn raw_words(&self) -> u64 {
        self.epochs.iter().map(|e| e.raw_words).sum()
    }

    pub fn effective_words(&self) -> u64 {
        self.epochs.iter().map(|e| e.effective_words).sum()
    }

    pub fn loss(&self) -> f64 {
        self.epochs.iter().map(|e| e.loss).sum()
    }

    pub fn words_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.effective_words() as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct Word2Vec {
    params: TrainParams,
}

impl Word2Vec {
    pub fn new(params: TrainParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TrainParams {
        &self.params
    }

    /// Builds the vocabulary, then trains for `epochs` passes over the
    /// corpus. Blocks until every worker is done.
    pub fn train<C: Corpus + ?Sized>(&self, corpus: &C) -> Result<Word2VecModel> {
        let params = &self.params;
        params.validate()?;
        tracing::info!(
            algorithm = ?params.algorithm,
            dimension = params.dimension,
            window = params.window,
            workers = params.workers,
            negative = params.negative,
            hs = params.hs,
            epochs = params.epochs,
            batch_words = params.batch_words,
            "Training word2vec"
        );

        let vocab = Vocabulary::build(corpus, params.min_count)?;
        let rows = vocab.len();
        let dim = params.dimension;

        let mut syn0 = algo::init_input_layer(rows, dim, params.seed);
        let mut syn1 = if params.hs {
            vec![0.0; rows * dim]
        } else {
            Vec::new()
        };
        let mut syn1neg = if params.negative > 0 {
            vec![0.0; rows * dim]
        } else {
            Vec::new()
        };

        let report = {
            let layers = Layers {
                syn0: Hogwild::new(&mut syn0, dim),
                syn1: if params.hs {
                    Some(Hogwild::new(&mut syn1, dim))
                } else {
                    None
                },
                syn1neg: if params.negative > 0 {
                    Some(Hogwild::new(&mut syn1neg, dim))
                } else {
                    None
                },
            };
            let shared = Shared::new(params, &vocab, layers);
            run(&shared, corpus)?
        };

        tracing::info!(
            raw_words = report.raw_words(),
            effective_words = report.effective_words(),
            elapsed = ?report.elapsed,
            words_per_sec = report.words_per_sec() as u64,
            "Training finished"
        );
        let model = Word2VecModel::new(vocab, syn0, dim).with_training(params.clone(), report);
        if params.negative > 0 {
            // HS rows are inner tree nodes, only negative sampling keeps one
            // output vector per word
            return model.with_context(syn1neg);
        }
        Ok(model)
    }
}

/// Trains with the given parameters, see [`Word2Vec::train`].
pub fn train<C: Corpus + ?Sized>(corpus: &C, params: TrainParams) -> Result<Word2VecModel> {
    Word2Vec::new(params).train(corpus)
}

fn build_pool(params: &TrainParams) -> Result<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new()
        .num_threads(params.workers)
        .thread_name(|i| format!("w2v-worker-{i}"));
    if params.pin_workers {
        match cores::get_core_ids() {
            Some(core_ids) if !core_ids.is_empty() => {
                builder = builder.start_handler(move |i| {
                    let core_id = core_ids[i % core_ids.len()];
                    if !cores::set_for_current(core_id) {
                        tracing::warn!(worker = i, core = core_id.id, "Failed to pin worker");
                    }
                });
            }
            _ => tracing::warn!("Could not read CPU affinity, workers are not pinned"),
        }
    }
    Ok(builder.build()?)
}

fn run<C: Corpus + ?Sized>(shared: &Shared, corpus: &C) -> Result<TrainingReport> {
    let params = shared.params;
    let pool = build_pool(params)?;
    let (job_tx, job_rx) = channel::bounded::<Job>(params.workers * 2);
    let (event_tx, event_rx) = channel::unbounded::<Event>();
    let total_words = shared.vocab.raw_words() * params.epochs as u64;
    let mut progress = Progress::new(params, shared.vocab.raw_words())?;

    thread::scope(|s| {
        let producer_events = event_tx.clone();
        let producer =
            s.spawn(move || produce(corpus, params, total_words, job_tx, producer_events));
        let workers = s.spawn(move || {
            pool.scope(|ps| {
                for index in 0..params.workers {
                    let jobs = job_rx.clone();
                    let events = event_tx.clone();
                    ps.spawn(move |_| work(shared, index, jobs, events));
                }
            })
        });

        for event in event_rx.iter() {
            progress.record(event);
        }

        let produced = producer.join().map_err(|_| Word2VecError::WorkerPanicked)?;
        workers.join().map_err(|_| Word2VecError::WorkerPanicked)?;
        produced?;
        Ok(progress.finish())
    })
}

/// Linear decay from `alpha` to `min_alpha` over the whole run.
fn learning_rate(params: &TrainParams, queued: u64, total: u64) -> f32 {
    let progress = if total == 0 {
        0.0
    } else {
        (queued as f64 / total as f64).min(1.0) as f32
    };
    (params.alpha - (params.alpha - params.min_alpha) * progress).max(params.min_alpha)
}

fn produce<C: Corpus + ?Sized>(
    corpus: &C,
    params: &TrainParams,
    total_words: u64,
    jobs: Sender<Job>,
    events: Sender<Event>,
) -> Result<()> {
    let mut queued = 0u64;
    for epoch in 0..params.epochs {
        let mut sent = 0usize;
        let mut sentences: Vec<Vec<String>> = Vec::new();
        let mut words = 0u64;

        let mut flush = |sentences: &mut Vec<Vec<String>>, words: &mut u64| -> bool {
            let job = Job {
                epoch,
                alpha: learning_rate(params, queued, total_words),
                raw_words: *words,
                sentences: std::mem::take(sentences),
            };
            queued += *words;
            *words = 0;
            sent += 1;
            jobs.send(job).is_ok()
        };

        for sentence in corpus.sentences()? {
            let sentence = sentence?;
            let full = words + sentence.len() as u64 > params.batch_words as u64;
            // a failed send means every worker is gone, the pool reports why
            if full && !sentences.is_empty() && !flush(&mut sentences, &mut words) {
                return Ok(());
            }
            words += sentence.len() as u64;
            sentences.push(sentence);
        }
        if !sentences.is_empty() && !flush(&mut sentences, &mut words) {
            return Ok(());
        }

        tracing::debug!(epoch, jobs = sent, "Queued epoch");
        if events.send(Event::Queued { epoch, jobs: sent }).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

fn work(shared: &Shared, index: usize, jobs: Receiver<Job>, events: Sender<Event>) {
    let mut scratch = Scratch::new(
        shared.params.dimension,
        shared.params.seed.wrapping_add(index as u64),
    );
    for job in jobs.iter() {
        let (effective_words, loss) =
            algo::train_sentences(shared, &mut scratch, &job.sentences, job.alpha);
        let event = Event::Trained {
            epoch: job.epoch,
            raw_words: job.raw_words,
            effective_words,
            loss,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

/// Aggregates job reports into per-epoch stats and logs progress.
struct Progress {
    epochs: Vec<EpochStats>,
    expected_jobs: Vec<Option<usize>>,
    corpus_words: u64,
    report_delay: Duration,
    compute_loss: bool,
    started: Instant,
    last_report: Instant,
}

impl Progress {
    fn new(params: &TrainParams, corpus_words: u64) -> Result<Self> {
        let report_delay = Duration::try_from_secs_f64(params.report_delay)
            .map_err(|e| Word2VecError::invalid_params(format!("report_delay: {e}")))?;
        let now = Instant::now();
        Ok(Self {
            epochs: (0..params.epochs)
                .map(|epoch| EpochStats {
                    epoch,
                    ..Default::default()
                })
                .collect(),
            expected_jobs: vec![None; params.epochs],
            corpus_words,
            report_delay,
            compute_loss: params.compute_loss,
            started: now,
            last_report: now,
        })
    }

    fn record(&mut self, event: Event) {
        let epoch = match event {
            Event::Queued { epoch, jobs } => {
                self.expected_jobs[epoch] = Some(jobs);
                epoch
            }
            Event::Trained {
                epoch,
                raw_words,
                effective_words,
                loss,
            } => {
                let stats = &mut self.epochs[epoch];
                stats.jobs += 1;
                stats.raw_words += raw_words;
                stats.effective_words += effective_words;
                stats.loss += loss as f64;
                stats.finished_at = self.started.elapsed();
                self.log_progress(epoch);
                epoch
            }
        };
        if self.expected_jobs[epoch] == Some(self.epochs[epoch].jobs) {
            self.log_epoch(epoch);
        }
    }

    fn log_progress(&mut self, epoch: usize) {
        if self.last_report.elapsed() < self.report_delay {
            return;
        }
        self.last_report = Instant::now();
        let stats = &self.epochs[epoch];
        let percent = if self.corpus_words == 0 {
            100.0
        } else {
            stats.raw_words as f64 * 100.0 / self.corpus_words as f64
        };
        let secs = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let trained: u64 = self.epochs.iter().map(|e| e.effective_words).sum();
        tracing::info!(
            epoch = epoch + 1,
            progress = %format!("{percent:.2}%"),
            words_per_sec = (trained as f64 / secs) as u64,
            "Training progress"
        );
    }

    fn log_epoch(&self, epoch: usize) {
        let stats = &self.epochs[epoch];
        let previous = epoch
            .checked_sub(1)
            .map(|e| self.epochs[e].finished_at)
            .unwrap_or_default();
        let took = stats.finished_at.saturating_sub(previous);
        if self.compute_loss {
            tracing::info!(
                epoch = epoch + 1,
                raw_words = stats.raw_words,
                effective_words = stats.effective_words,
                epoch_loss = stats.loss,
                took = ?took,
                "Training epoch"
            );
        } else {
            tracing::info!(
                epoch = epoch + 1,
                raw_words = stats.raw_words,
                effective_words = stats.effective_words,
                took = ?took,
                "Training epoch"
            );
        }
    }

    fn finish(self) -> TrainingReport {
        TrainingReport {
            epochs: self.epochs,
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{InMemoryCorpus, Sentences},
        params::Algorithm,
    };
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Serves `corpus()` until `sentences` has been called `healthy` times,
    /// then either fails with an I/O error mid-stream or panics.
    struct FlakyCorpus {
        inner: InMemoryCorpus,
        healthy: usize,
        calls: AtomicUsize,
        panic: bool,
    }

    impl FlakyCorpus {
        fn new(healthy: usize, panic: bool) -> Self {
            Self {
                inner: corpus(),
                healthy,
                calls: AtomicUsize::new(0),
                panic,
            }
        }
    }

    impl Corpus for FlakyCorpus {
        fn sentences(&self) -> Result<Sentences<'_>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy {
                return self.inner.sentences();
            }
            if self.panic {
                panic!("corpus reader crashed");
            }
            let good = self.inner.sentences()?.take(5);
            let bad = std::iter::once(Err(Word2VecError::Io(io::Error::other("disk gone"))));
            Ok(Box::new(good.chain(bad)))
        }
    }

    fn corpus() -> InMemoryCorpus {
        let line = "the quick brown fox jumps over the lazy dog while the cat sleeps";
        InMemoryCorpus::from_text(&vec![line; 40].join("\n"))
    }

    #[test]
    fn test_learning_rate_decays_linearly() {
        let params = TrainParams::benchmark();
        let close = |a: f32, b: f32| (a - b).abs() < 1e-6;
        assert_eq!(learning_rate(&params, 0, 100), params.alpha);
        assert!(close(learning_rate(&params, 100, 100), params.min_alpha));
        assert!(close(
            learning_rate(&params, 50, 100),
            (params.alpha + params.min_alpha) / 2.0
        ));
        assert!(learning_rate(&params, 500, 100) >= params.min_alpha);
    }

    #[test]
    fn test_train_counts_every_word_once_per_epoch() {
        let params = TrainParams::benchmark()
            .set_dimension(8)
            .set_workers(2)
            .set_epochs(3)
            .set_batch_words(25)
            .set_min_count(1)
            .set_compute_loss(true);
        let model = train(&corpus(), params).unwrap();
        let report = model.report().unwrap();

        assert_eq!(report.epochs.len(), 3);
        for stats in &report.epochs {
            assert_eq!(stats.raw_words, 13 * 40);
            // 13-word sentences never share a 25-word job
            assert_eq!(stats.jobs, 40);
            assert!(stats.effective_words > 0);
            assert!(stats.loss > 0.0);
        }
        assert_eq!(model.vocab_size(), 11);
        assert_eq!(model.embedding_dim(), 8);
    }

    #[test]
    fn test_train_skipgram_with_hs() {
        let params = TrainParams::default()
            .set_algorithm(Algorithm::SkipGram)
            .set_dimension(4)
            .set_workers(1)
            .set_epochs(1)
            .set_negative(0)
            .set_hs(true)
            .set_min_count(1);
        let model = train(&corpus(), params).unwrap();
        assert!(model.get_embedding("fox").is_some());
    }

    #[test]
    fn test_train_keeps_context_vectors() {
        let params = TrainParams::benchmark()
            .set_dimension(4)
            .set_workers(1)
            .set_min_count(1);
        let model = train(&corpus(), params.clone()).unwrap();
        assert!(model.has_context());

        let model = train(&corpus(), params.set_negative(0).set_hs(true)).unwrap();
        assert!(!model.has_context());
    }

    #[test]
    fn test_train_returns_corpus_error_from_later_epoch() {
        // one read for the vocabulary, one for epoch 1, epoch 2 fails
        let corpus = FlakyCorpus::new(2, false);
        let params = TrainParams::benchmark()
            .set_dimension(4)
            .set_workers(2)
            .set_epochs(3)
            .set_batch_words(3)
            .set_min_count(1);
        let err = train(&corpus, params).unwrap_err();
        assert!(matches!(err, Word2VecError::Io(_)), "{err}");
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_train_reports_panicking_worker() {
        let corpus = FlakyCorpus::new(2, true);
        let params = TrainParams::benchmark()
            .set_dimension(4)
            .set_workers(2)
            .set_epochs(2)
            .set_min_count(1);
        let err = train(&corpus, params).unwrap_err();
        assert!(matches!(err, Word2VecError::WorkerPanicked));
    }

    #[test]
    fn test_train_rejects_invalid_params() {
        let err = train(&corpus(), TrainParams::benchmark().set_dimension(0)).unwrap_err();
        assert!(matches!(err, Word2VecError::InvalidParams { .. }));
    }
}
