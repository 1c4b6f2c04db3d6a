use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use w2v_bench::{logger, Text8Corpus, TrainParams, VectorType, Word2Vec};

/// Trains CBOW embeddings over a text8 corpus and discards the model.
#[derive(Debug, Parser)]
#[command(name = "w2v-bench", version)]
struct Args {
    /// Corpus in text8 layout
    #[arg(long, default_value = "text8")]
    corpus: PathBuf,

    /// TOML file replacing the benchmark hyperparameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the vectors in word2vec text format instead of dropping them
    #[arg(long)]
    save: Option<PathBuf>,

    /// Vectors written by --save; aggregated adds the context vectors
    #[arg(long, value_enum, default_value_t = VectorType::Single)]
    vector_type: VectorType,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_logger(args.verbose);

    let params = match &args.config {
        Some(path) => TrainParams::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TrainParams::benchmark(),
    };
    tracing::debug!(?params, "Benchmark parameters");

    let corpus = Text8Corpus::open(&args.corpus)?
        .set_max_sentence_length(params.max_sentence_length);
    let model = Word2Vec::new(params).train(&corpus)?;

    if let Some(path) = &args.save {
        model
            .save_word2vec_text(path, args.vector_type)
            .with_context(|| format!("saving vectors to {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            words = model.vocab_size(),
            vector_type = ?args.vector_type,
            "Saved vectors"
        );
    }
    Ok(())
}
