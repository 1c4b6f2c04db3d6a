use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};

use crate::{
    error::{Result, Word2VecError},
    params::TrainParams,
    trainer::TrainingReport,
    vocab::Vocabulary,
};

/// Which vectors [`Word2VecModel::save_word2vec_text`] writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VectorType {
    /// Input vectors only.
    #[default]
    Single,
    /// Input plus context (negative sampling output) vectors.
    #[serde(alias = "agg")]
    #[value(alias = "agg")]
    Aggregated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word2VecModel {
    vocab: Vocabulary,
    embeddings: Vec<f32>,
    embedding_dim: usize,
    /// Negative sampling output vectors, same layout as `embeddings`.
    context: Option<Vec<f32>>,
    params: Option<TrainParams>,
    report: Option<TrainingReport>,
}

/// Agreement between human similarity judgements and the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PairEvaluation {
    pub pairs: usize,
    pub oov: usize,
    /// `None` when fewer than two pairs were in vocabulary.
    pub pearson: Option<f64>,
}

impl PairEvaluation {
    pub fn oov_ratio(&self) -> f64 {
        let total = self.pairs + self.oov;
        if total == 0 {
            0.0
        } else {
            self.oov as f64 / total as f64
        }
    }
}

impl Word2VecModel {
    pub fn new(vocab: Vocabulary, embeddings: Vec<f32>, embedding_dim: usize) -> Self {
        Self {
            vocab,
            embeddings,
            embedding_dim,
            context: None,
            params: None,
            report: None,
        }
    }

    pub fn with_context(mut self, context: Vec<f32>) -> Result<Self> {
        if context.len() != self.embeddings.len() {
            return Err(Word2VecError::Parse {
                line: 0,
                message: format!(
                    "context holds {} values, embeddings {}",
                    context.len(),
                    self.embeddings.len()
                ),
            });
        }
        self.context = Some(context);
        Ok(self)
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    fn check_layout(&self) -> Result<()> {
        let expected = self.vocab.len().checked_mul(self.embedding_dim);
        let matches = |len: usize| self.embedding_dim > 0 && expected == Some(len);
        let context_ok = self.context.as_ref().map_or(true, |c| matches(c.len()));
        if !matches(self.embeddings.len()) || !context_ok {
            return Err(Word2VecError::Parse {
                line: 0,
                message: format!(
                    "{} words of dimension {} do not fit {} stored values",
                    self.vocab.len(),
                    self.embedding_dim,
                    self.embeddings.len()
                ),
            });
        }
        Ok(())
    }

    pub fn with_training(mut self, params: TrainParams, report: TrainingReport) -> Self {
        self.params = Some(params);
        self.report = Some(report);
        self
    }

    /// `.txt` files are read as word2vec text vectors, anything else as a
    /// bincode dump written by [`Word2VecModel::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().extension().is_some_and(|e| e.eq("txt")) {
            return Self::load_word2vec_text(path);
        }
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        let model: Self = bincode::deserialize(&buffer)?;
        model.check_layout()?;
        Ok(model)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    pub fn load_word2vec_text<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut lines = BufReader::new(File::open(path)?).lines();

        let first_line = lines.next().transpose()?.unwrap_or_default();
        let mut header = first_line.split_whitespace();
        let mut header_field = |name: &str| -> Result<usize> {
            header
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Word2VecError::Parse {
                    line: 1,
                    message: format!("missing or invalid {name} in header"),
                })
        };
        let vocab_size = header_field("vocabulary size")?;
        let embedding_dim = header_field("dimension")?;
        if embedding_dim == 0 || vocab_size.checked_mul(embedding_dim).is_none() {
            return Err(Word2VecError::Parse {
                line: 1,
                message: format!("unusable header {vocab_size} x {embedding_dim}"),
            });
        }

        // grown from the rows actually read, the header is not trusted
        let mut words = Vec::new();
        let mut seen = HashSet::new();
        let mut embeddings = Vec::new();

        for (idx, line) in lines.enumerate() {
            let line_no = idx + 2;
            let line = line?;
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            if !seen.insert(word.to_string()) {
                return Err(Word2VecError::Parse {
                    line: line_no,
                    message: format!("duplicate word {word:?}"),
                });
            }
            let before = embeddings.len();
            for val in parts {
                embeddings.push(val.parse::<f32>().map_err(|e| Word2VecError::Parse {
                    line: line_no,
                    message: e.to_string(),
                })?);
            }
            if embeddings.len() - before != embedding_dim {
                return Err(Word2VecError::Parse {
                    line: line_no,
                    message: format!(
                        "expected {embedding_dim} values, found {}",
                        embeddings.len() - before
                    ),
                });
            }
            words.push(word.to_string());
        }
        if words.len() != vocab_size {
            return Err(Word2VecError::Parse {
                line: 1,
                message: format!("header declares {vocab_size} words, found {}", words.len()),
            });
        }

        // the file keeps the frequency order but not the counts
        let n = words.len() as u64;
        let counts = words.into_iter().enumerate().map(|(i, w)| (w, n - i as u64));
        let vocab = Vocabulary::from_counts(counts, 0, 0)?;
        Ok(Self::new(vocab, embeddings, embedding_dim))
    }

    /// Plain word2vec format: a `<words> <dim>` header, then one word and
    /// its vector per line. [`VectorType::Aggregated`] needs the context
    /// vectors of a negative sampling run.
    pub fn save_word2vec_text<P: AsRef<Path>>(
        &self,
        path: P,
        vector_type: VectorType,
    ) -> Result<()> {
        let context = match (vector_type, &self.context) {
            (VectorType::Single, _) => None,
            (VectorType::Aggregated, Some(context)) => Some(context),
            (VectorType::Aggregated, None) => {
                return Err(Word2VecError::invalid_params(
                    "aggregated vectors need a model trained with negative sampling",
                ))
            }
        };
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{} {}", self.vocab_size(), self.embedding_dim)?;
        for (index, word) in self.vocab.words().enumerate() {
            write!(writer, "{word}")?;
            let row = self.row(index);
            match context {
                Some(context) => {
                    let start = index * self.embedding_dim;
                    let ctx = &context[start..start + self.embedding_dim];
                    for (v, c) in row.iter().zip(ctx) {
                        write!(writer, " {}", v + c)?;
                    }
                }
                None => {
                    for v in row {
                        write!(writer, " {v}")?;
                    }
                }
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let values: Vec<Value> = self
            .vocab
            .words()
            .enumerate()
            .map(|(index, word)| json!({"word": word, "embedding": self.row(index)}))
            .collect();
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &values)?;
        Ok(())
    }

    fn row(&self, index: usize) -> &[f32] {
        let start = index * self.embedding_dim;
        &self.embeddings[start..start + self.embedding_dim]
    }

    pub fn get_embedding(&self, word: &str) -> Option<&[f32]> {
        self.vocab.index(word).map(|index| self.row(index as usize))
    }

    pub fn cosine_similarity(&self, word1: &str, word2: &str) -> Option<f32> {
        let embedding1 = self.get_embedding(word1)?;
        let embedding2 = self.get_embedding(word2)?;

        Some(cosine_similarity(embedding1, embedding2))
    }

    pub fn most_similar(&self, word: &str, top_k: usize) -> Option<Vec<(String, f32)>> {
        let target_embedding = self.get_embedding(word)?;

        let mut similarities: Vec<(String, f32)> = self
            .vocab
            .words()
            .enumerate()
            .filter(|(_, w)| *w != word)
            .map(|(index, w)| {
                let similarity = cosine_similarity(target_embedding, self.row(index));
                (w.to_string(), similarity)
            })
            .collect();

        similarities.sort_by(|a, b| b.1.total_cmp(&a.1));
        similarities.truncate(top_k);
        Some(similarities)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn contains_word(&self, word: &str) -> bool {
        self.vocab.index(word).is_some()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn params(&self) -> Option<&TrainParams> {
        self.params.as_ref()
    }

    pub fn report(&self) -> Option<&TrainingReport> {
        self.report.as_ref()
    }

    /// Reads `word1<TAB>word2<TAB>score` lines and correlates the scores with
    /// the model's cosine similarities. Lines whose score does not parse
    /// (headers, comments) are skipped. With `output_path`, every pair is
    /// also written as CSV.
    pub fn evaluate_word_pairs<P: AsRef<Path>>(
        &self,
        pairs_path: P,
        output_path: Option<P>,
    ) -> Result<PairEvaluation> {
        let reader = BufReader::new(File::open(pairs_path)?);
        let mut output = match output_path {
            Some(path) => {
                let mut file = BufWriter::new(File::create(path)?);
                writeln!(file, "word1,word2,human_score,model_score")?;
                Some(file)
            }
            None => None,
        };

        let mut human = Vec::new();
        let mut model = Vec::new();
        let mut oov = 0;
        for line in reader.lines() {
            let line = line?;
            let parts: Vec<&str> = line.split('\t').collect();
            let [word1, word2, score, ..] = parts[..] else {
                continue;
            };
            let Ok(human_score) = score.trim().parse::<f64>() else {
                continue;
            };

            let model_score = self.cosine_similarity(word1, word2);
            if let Some(out) = output.as_mut() {
                let model_score = match model_score {
                    Some(score) => format!("{:.4}", score),
                    None => "N/A".to_string(),
                };
                writeln!(out, "{word1},{word2},{human_score},{model_score}")?;
            }
            match model_score {
                Some(score) => {
                    human.push(human_score);
                    model.push(score as f64);
                }
                None => oov += 1,
            }
        }
        if let Some(mut out) = output {
            out.flush()?;
        }

        let evaluation = PairEvaluation {
            pairs: human.len(),
            oov,
            pearson: pearson(&human, &model),
        };
        tracing::info!(
            pairs = evaluation.pairs,
            oov_ratio = evaluation.oov_ratio(),
            pearson = ?evaluation.pearson,
            "Evaluated word pairs"
        );
        Ok(evaluation)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        cov += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}
