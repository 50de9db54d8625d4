use std::ops::Range;

use super::{
    CharOffsets, Chunk, ChunkParams, Chunker, ChunkerError, ParamSpec, ParameterSchema,
    TokenizerKind, build_chunk, check_overlap, param_str, param_usize,
};

const DEFAULT_DELIMITERS: &str = ".!?\n";

/// Packs whole sentences into chunks up to a token budget.
#[derive(Debug, Default, Clone)]
pub struct SentenceChunker;

impl Chunker for SentenceChunker {
    fn name(&self) -> &str {
        "sentence"
    }

    fn description(&self) -> &str {
        "Splits text at sentence boundaries while respecting a token budget"
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::from([
            (
                "tokenizer".to_string(),
                ParamSpec::string("Tokenizer used to count tokens", "character")
                    .one_of(&TokenizerKind::NAMES),
            ),
            (
                "chunk_size".to_string(),
                ParamSpec::integer("Maximum tokens per chunk", 2048).min(1.0),
            ),
            (
                "chunk_overlap".to_string(),
                ParamSpec::integer("Tokens of trailing sentences repeated in the next chunk", 0)
                    .min(0.0),
            ),
            (
                "min_sentences_per_chunk".to_string(),
                ParamSpec::integer("Minimum sentences per chunk", 1).min(1.0),
            ),
            (
                "min_characters_per_sentence".to_string(),
                ParamSpec::integer("Shorter sentences are merged into their neighbour", 12)
                    .min(1.0),
            ),
            (
                "delim".to_string(),
                ParamSpec::string("Characters that end a sentence", DEFAULT_DELIMITERS),
            ),
        ])
    }

    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>, ChunkerError> {
        let tokenizer = param_str(params, "tokenizer")?.parse::<TokenizerKind>()?.build()?;
        let size = param_usize(params, "chunk_size")?;
        let overlap = param_usize(params, "chunk_overlap")?;
        let min_sentences = param_usize(params, "min_sentences_per_chunk")?.max(1);
        let min_characters = param_usize(params, "min_characters_per_sentence")?;
        let delimiters = param_str(params, "delim")?;
        check_overlap(size, overlap)?;
        if delimiters.is_empty() {
            return Err(ChunkerError::invalid("delim", "must contain at least one character"));
        }

        let sentences = merge_short(text, split_sentences(text, delimiters), min_characters);
        let counts: Vec<usize> = sentences
            .iter()
            .map(|range| tokenizer.count(&text[range.clone()]))
            .collect();
        let offsets = CharOffsets::new(text);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < sentences.len() {
            let mut end = start;
            let mut tokens = 0usize;
            while end < sentences.len()
                && (tokens + counts[end] <= size || end - start < min_sentences)
            {
                tokens += counts[end];
                end += 1;
            }

            let range = sentences[start].start..sentences[end - 1].end;
            chunks.push(build_chunk(text, range, &offsets, tokenizer.as_ref(), self.name()));
            if end >= sentences.len() {
                break;
            }

            let mut next = end;
            let mut carried = 0usize;
            while next > start + 1 && carried + counts[next - 1] <= overlap {
                carried += counts[next - 1];
                next -= 1;
            }
            start = next;
        }

        Ok(chunks)
    }
}

/// Sentence byte ranges. A sentence runs through its delimiter and any whitespace
/// that follows; whitespace-only tails are folded into the previous sentence.
fn split_sentences(text: &str, delimiters: &str) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if !delimiters.contains(ch) {
            continue;
        }
        let mut end = index + ch.len_utf8();
        while let Some(&(next_index, next)) = chars.peek() {
            if next.is_whitespace() && !delimiters.contains(next) {
                end = next_index + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        sentences.push(start..end);
        start = end;
    }

    if start < text.len() {
        if text[start..].trim().is_empty() {
            match sentences.last_mut() {
                Some(last) => last.end = text.len(),
                None => sentences.push(start..text.len()),
            }
        } else {
            sentences.push(start..text.len());
        }
    }

    sentences.retain(|range| !text[range.clone()].trim().is_empty());
    sentences
}

fn merge_short(text: &str, sentences: Vec<Range<usize>>, min_characters: usize) -> Vec<Range<usize>> {
    let is_short = |range: &Range<usize>| text[range.clone()].trim().chars().count() < min_characters;

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        match merged.last_mut() {
            Some(last) if is_short(last) => last.end = sentence.end,
            _ => merged.push(sentence),
        }
    }

    // A short trailing sentence joins the one before it.
    if merged.len() > 1 && merged.last().is_some_and(|last| is_short(last)) {
        if let Some(last) = merged.pop() {
            if let Some(previous) = merged.last_mut() {
                previous.end = last.end;
            }
        }
    }
    merged
}
