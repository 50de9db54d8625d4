use std::{
    ops::Range,
    str::FromStr,
    sync::{Arc, OnceLock},
};

use tiktoken_rs::{CoreBPE, o200k_base};

use super::ChunkerError;

/// Counts tokens and locates them in the source text.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Byte ranges of consecutive tokens. Ranges are contiguous and cover `text`
    /// except for whitespace the tokenizer drops.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Character,
    Word,
    Tiktoken,
}

impl TokenizerKind {
    pub const NAMES: [&'static str; 3] = ["character", "word", "tiktoken"];

    pub fn build(self) -> Result<Arc<dyn Tokenizer>, ChunkerError> {
        match self {
            TokenizerKind::Character => Ok(Arc::new(CharacterTokenizer)),
            TokenizerKind::Word => Ok(Arc::new(WordTokenizer)),
            TokenizerKind::Tiktoken => TiktokenTokenizer::shared(),
        }
    }
}

impl FromStr for TokenizerKind {
    type Err = ChunkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(TokenizerKind::Character),
            "word" => Ok(TokenizerKind::Word),
            "tiktoken" | "gpt2" | "o200k_base" => Ok(TokenizerKind::Tiktoken),
            other => Err(ChunkerError::invalid(
                "tokenizer",
                format!("unknown tokenizer '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterTokenizer;

impl Tokenizer for CharacterTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        text.char_indices()
            .map(|(index, ch)| index..index + ch.len_utf8())
            .collect()
    }
}

/// Whitespace-delimited words. Each span carries its trailing whitespace; leading
/// whitespace belongs to the first word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans: Vec<Range<usize>> = Vec::new();
        let mut in_word = false;

        for (index, ch) in text.char_indices() {
            let whitespace = ch.is_whitespace();
            if !whitespace && !in_word {
                match spans.last_mut() {
                    Some(previous) => {
                        previous.end = index;
                        spans.push(index..index);
                    }
                    None => spans.push(0..index),
                }
            }
            in_word = !whitespace;
        }

        if let Some(last) = spans.last_mut() {
            last.end = text.len();
        }
        spans
    }
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self, ChunkerError> {
        let bpe = o200k_base().map_err(|err| ChunkerError::Unavailable {
            name: "tiktoken".to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { bpe })
    }

    /// Process-wide instance; loading the BPE ranks is expensive.
    pub fn shared() -> Result<Arc<dyn Tokenizer>, ChunkerError> {
        static SHARED: OnceLock<Result<Arc<TiktokenTokenizer>, ChunkerError>> = OnceLock::new();
        SHARED
            .get_or_init(|| TiktokenTokenizer::new().map(Arc::new))
            .clone()
            .map(|tokenizer| tokenizer as Arc<dyn Tokenizer>)
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut cursor = 0usize;
        let mut pending: Vec<u32> = Vec::new();

        // Tokens that split a multi-byte character only decode as a group.
        for token in self.encode(text) {
            pending.push(token);
            if let Ok(piece) = self.bpe.decode(pending.clone()) {
                let mut end = (cursor + piece.len()).min(text.len());
                while !text.is_char_boundary(end) {
                    end += 1;
                }
                spans.push(cursor..end);
                cursor = end;
                pending.clear();
            }
        }

        if cursor < text.len() {
            spans.push(cursor..text.len());
        }
        spans
    }
}
