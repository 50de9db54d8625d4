use std::ops::Range;

use super::{
    CharOffsets, Chunk, ChunkParams, Chunker, ChunkerError, ParamSpec, ParameterSchema,
    Tokenizer, TokenizerKind, build_chunk, param_str, param_usize,
};

struct Level {
    delimiters: &'static [&'static str],
    /// Cut before the delimiter's second character instead of after the delimiter.
    split_before: bool,
}

const PLAIN_LEVELS: &[Level] = &[
    Level { delimiters: &["\n\n"], split_before: false },
    Level { delimiters: &["\n"], split_before: false },
    Level { delimiters: &[". ", "! ", "? "], split_before: false },
    Level { delimiters: &[" "], split_before: false },
];

const MARKDOWN_LEVELS: &[Level] = &[
    Level { delimiters: &["\n# ", "\n## ", "\n### "], split_before: true },
    Level { delimiters: &["\n#### ", "\n##### ", "\n###### "], split_before: true },
    Level { delimiters: &["\n\n"], split_before: false },
    Level { delimiters: &["\n"], split_before: false },
    Level { delimiters: &[". ", "! ", "? "], split_before: false },
    Level { delimiters: &[" "], split_before: false },
];

/// Splits on progressively finer delimiters until every piece fits, then merges
/// neighbours back up to the budget.
#[derive(Debug, Default, Clone)]
pub struct RecursiveChunker;

impl Chunker for RecursiveChunker {
    fn name(&self) -> &str {
        "recursive"
    }

    fn description(&self) -> &str {
        "Recursively splits on paragraphs, lines, sentences and words"
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
                "min_characters_per_chunk".to_string(),
                ParamSpec::integer("Smaller chunks are merged into their neighbour", 24).min(1.0),
            ),
            (
                "recipe".to_string(),
                ParamSpec::string("Delimiter recipe; 'markdown' splits on headings first", "")
                    .one_of(&["", "markdown"]),
            ),
        ])
    }

    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>, ChunkerError> {
        let tokenizer = param_str(params, "tokenizer")?.parse::<TokenizerKind>()?.build()?;
        let size = param_usize(params, "chunk_size")?;
        let min_characters = param_usize(params, "min_characters_per_chunk")?;
        let levels = match param_str(params, "recipe")? {
            "markdown" => MARKDOWN_LEVELS,
            _ => PLAIN_LEVELS,
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let splitter = Splitter {
            text,
            levels,
            tokenizer: tokenizer.as_ref(),
            size,
        };
        let pieces = splitter.split(0..text.len(), 0);
        let pieces = merge_small(text, pieces, min_characters);

        let offsets = CharOffsets::new(text);
        Ok(pieces
            .into_iter()
            .filter(|range| !text[range.clone()].trim().is_empty())
            .map(|range| build_chunk(text, range, &offsets, tokenizer.as_ref(), self.name()))
            .collect())
    }
}

struct Splitter<'a> {
    text: &'a str,
    levels: &'static [Level],
    tokenizer: &'a dyn Tokenizer,
    size: usize,
}

impl Splitter<'_> {
    fn fits(&self, range: &Range<usize>) -> bool {
        self.tokenizer.count(&self.text[range.clone()]) <= self.size
    }

    fn split(&self, range: Range<usize>, depth: usize) -> Vec<Range<usize>> {
        if self.fits(&range) {
            return vec![range];
        }
        let Some(level) = self.levels.get(depth) else {
            return self.hard_split(range);
        };

        let cuts = cut_points(&self.text[range.clone()], level);
        if cuts.is_empty() {
            return self.split(range, depth + 1);
        }

        let mut pieces = Vec::with_capacity(cuts.len() + 1);
        let mut cursor = range.start;
        for cut in cuts {
            let at = range.start + cut;
            if at > cursor && at < range.end {
                pieces.push(cursor..at);
                cursor = at;
            }
        }
        pieces.push(cursor..range.end);

        let mut fitted = Vec::new();
        for piece in pieces {
            if self.fits(&piece) {
                fitted.push(piece);
            } else {
                fitted.extend(self.split(piece, depth + 1));
            }
        }
        self.merge_fitting(fitted)
    }

    /// Last resort when no delimiter is left: cut on token boundaries.
    fn hard_split(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let spans = self.tokenizer.token_spans(&self.text[range.clone()]);
        spans
            .chunks(self.size.max(1))
            .filter_map(|window| {
                let first = window.first()?;
                let last = window.last()?;
                Some(range.start + first.start..range.start + last.end)
            })
            .collect()
    }

    fn merge_fitting(&self, pieces: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let mut merged: Vec<Range<usize>> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match merged.last_mut() {
                Some(last) if self.fits(&(last.start..piece.end)) => last.end = piece.end,
                _ => merged.push(piece),
            }
        }
        merged
    }
}

fn cut_points(piece: &str, level: &Level) -> Vec<usize> {
    let mut cuts: Vec<usize> = level
        .delimiters
        .iter()
        .flat_map(|delimiter| {
            piece.match_indices(delimiter).map(move |(index, matched)| {
                if level.split_before {
                    // Keep the newline with the preceding piece.
                    index + 1
                } else {
                    index + matched.len()
                }
            })
        })
        .collect();
    cuts.sort_unstable();
    cuts.dedup();
    cuts
}

/// Folds pieces shorter than `min_characters` into their neighbour.
fn merge_small(text: &str, pieces: Vec<Range<usize>>, min_characters: usize) -> Vec<Range<usize>> {
    let is_small = |range: &Range<usize>| text[range.clone()].trim().chars().count() < min_characters;

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match merged.last_mut() {
            Some(last) if is_small(last) || is_small(&piece) => last.end = piece.end,
            _ => merged.push(piece),
        }
    }
    merged
}
