use std::io::Write;
use w2v_bench::{
    train, Algorithm, InMemoryCorpus, Text8Corpus, TrainParams, Word2Vec, Word2VecError,
};

const TEXT: &str = "Today we will be learning about the fundamentals of data science and statistics. Data Science and statistics are hot and growing fields with alternative names of machine learning, artificial intelligence, big data, etc. I'm really excited to talk to you about data science and statistics because data science and statistics have long been a passions of mine. I didn't used to be very good at data science and statistics but after studying data science and statistics for a long time, I got better and better at it until I became a data science and statistics expert. I'm really excited to talk to you about data science and statistics, thanks for listening to me talk about data science and statistics.";

#[test]
fn test_train() {
    let corpus = InMemoryCorpus::from_text(TEXT);

    let params = TrainParams::benchmark()
        .set_dimension(3)
        .set_epochs(10)
        .set_min_count(1)
        .set_compute_loss(true);
    let model = train(&corpus, params).unwrap();

    assert!(model.contains_word("statistics"));
    assert_eq!(model.get_embedding("science").unwrap().len(), 3);
    let report = model.report().unwrap();
    assert_eq!(report.epochs.len(), 10);
    assert_eq!(report.raw_words(), 10 * 119);
    assert!(report.loss() > 0.0);
}

#[test]
fn test_train_text8_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for _ in 0..200 {
        write!(file, " anarchism originated as a term of abuse first used against early working class radicals").unwrap();
    }
    file.flush().unwrap();

    let corpus = Text8Corpus::open(file.path())
        .unwrap()
        .set_max_sentence_length(1_000);
    let model = Word2Vec::new(TrainParams::benchmark().set_dimension(10))
        .train(&corpus)
        .unwrap();

    assert_eq!(model.vocab_size(), 14);
    let report = model.report().unwrap();
    assert_eq!(report.raw_words(), 200 * 14);
    // three sentences of at most 1000 words fit in a single job
    assert_eq!(report.epochs[0].jobs, 1);
    assert_eq!(model.params().unwrap(), &TrainParams::benchmark().set_dimension(10));
}

#[test]
fn test_skipgram_similarity() {
    let corpus = InMemoryCorpus::from_text(&vec![TEXT; 20].join("\n"));
    let params = TrainParams::default()
        .set_algorithm(Algorithm::SkipGram)
        .set_dimension(16)
        .set_epochs(2)
        .set_workers(2)
        .set_min_count(1);
    let model = train(&corpus, params).unwrap();

    let similar = model.most_similar("data", 5).unwrap();
    assert_eq!(similar.len(), 5);
    assert!(similar.iter().all(|(w, _)| w != "data"));
    assert!(similar.windows(2).all(|w| w[0].1 >= w[1].1));
}

#[test]
fn test_missing_corpus() {
    let err = Text8Corpus::open("no-such-dir/text8").unwrap_err();
    assert!(matches!(err, Word2VecError::CorpusNotFound { .. }));
}
