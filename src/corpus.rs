use regex::Regex;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, ErrorKind, Read},
    mem,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use crate::error::{Result, Word2VecError};

/// Bytes pulled from the file per read.
pub const CHUNK_SIZE: usize = 8192;
pub const MAX_SENTENCE_LENGTH: usize = 10_000;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[[:punct:]]").expect("valid punctuation pattern"));

pub type Sentences<'a> = Box<dyn Iterator<Item = Result<Vec<String>>> + 'a>;

/// A re-iterable source of tokenised sentences.
///
/// Training walks the corpus once to build the vocabulary and once more per
/// epoch, so `sentences` must restart from the beginning on every call.
pub trait Corpus: Sync {
    fn sentences(&self) -> Result<Sentences<'_>>;
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Word2VecError::CorpusNotFound {
            path: path.to_path_buf(),
        },
        _ => Word2VecError::Io(e),
    })
}

fn split_words(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
    bytes
        .split(|b| b.is_ascii_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| String::from_utf8_lossy(w).into_owned())
}

/// The text8 layout: one huge line of space separated tokens.
#[derive(Debug, Clone)]
pub struct Text8Corpus {
    path: PathBuf,
    max_sentence_length: usize,
}

impl Text8Corpus {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        open_existing(&path)?;
        Ok(Self {
            path,
            max_sentence_length: MAX_SENTENCE_LENGTH,
        })
    }

    pub fn set_max_sentence_length(mut self, max_sentence_length: usize) -> Self {
        self.max_sentence_length = max_sentence_length.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Corpus for Text8Corpus {
    fn sentences(&self) -> Result<Sentences<'_>> {
        let file = open_existing(&self.path)?;
        Ok(Box::new(Text8Sentences::new(file, self.max_sentence_length)))
    }
}

/// Streams fixed-size chunks and cuts the token stream into sentences.
pub struct Text8Sentences<R> {
    reader: R,
    buf: Vec<u8>,
    // bytes of a token that may continue in the next chunk
    rest: Vec<u8>,
    pending: Vec<String>,
    max_len: usize,
    eof: bool,
}

impl<R: Read> Text8Sentences<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: vec![0; CHUNK_SIZE],
            rest: Vec::new(),
            pending: Vec::new(),
            max_len: max_len.max(1),
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let n = loop {
            match self.reader.read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
            let rest = mem::take(&mut self.rest);
            self.pending.extend(split_words(&rest));
            return Ok(());
        }
        self.rest.extend_from_slice(&self.buf[..n]);
        if let Some(pos) = self.rest.iter().rposition(|b| b.is_ascii_whitespace()) {
            let tail = self.rest.split_off(pos + 1);
            let head = mem::replace(&mut self.rest, tail);
            self.pending.extend(split_words(&head));
        }
        Ok(())
    }
}

impl<R: Read> Iterator for Text8Sentences<R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending.len() >= self.max_len {
                let tail = self.pending.split_off(self.max_len);
                return Some(Ok(mem::replace(&mut self.pending, tail)));
            }
            if self.eof {
                if self.pending.is_empty() {
                    return None;
                }
                return Some(Ok(mem::take(&mut self.pending)));
            }
            if let Err(e) = self.fill() {
                self.eof = true;
                self.pending.clear();
                self.rest.clear();
                return Some(Err(e.into()));
            }
        }
    }
}

/// One sentence per line.
#[derive(Debug, Clone)]
pub struct LineCorpus {
    path: PathBuf,
    max_sentence_length: usize,
}

impl LineCorpus {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        open_existing(&path)?;
        Ok(Self {
            path,
            max_sentence_length: MAX_SENTENCE_LENGTH,
        })
    }

    pub fn set_max_sentence_length(mut self, max_sentence_length: usize) -> Self {
        self.max_sentence_length = max_sentence_length.max(1);
        self
    }
}

impl Corpus for LineCorpus {
    fn sentences(&self) -> Result<Sentences<'_>> {
        let reader = BufReader::new(open_existing(&self.path)?);
        let max_len = self.max_sentence_length;
        Ok(Box::new(reader.split(b'\n').flat_map(
            move |line| -> Vec<Result<Vec<String>>> {
                match line {
                    Ok(line) => {
                        let words: Vec<String> = split_words(&line).collect();
                        words.chunks(max_len).map(|c| Ok(c.to_vec())).collect()
                    }
                    Err(e) => vec![Err(e.into())],
                }
            },
        )))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    sentences: Vec<Vec<String>>,
}

impl InMemoryCorpus {
    pub fn new(sentences: Vec<Vec<String>>) -> Self {
        Self { sentences }
    }

    /// Lower-cases the text, drops punctuation and treats every line as a
    /// sentence.
    pub fn from_text(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let clean = PUNCTUATION.replace_all(&lowered, "");
        let sentences = clean
            .lines()
            .map(|line| line.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
            .filter(|s| !s.is_empty())
            .collect();
        Self { sentences }
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

impl Corpus for InMemoryCorpus {
    fn sentences(&self) -> Result<Sentences<'_>> {
        Ok(Box::new(self.sentences.iter().cloned().map(Ok)))
    }
}
