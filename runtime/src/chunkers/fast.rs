use std::ops::Range;

use serde_json::{Map, Value, json};

use super::{
    CharOffsets, Chunk, ChunkParams, Chunker, ChunkerError, ParamSpec, ParameterSchema,
    param_str, param_usize,
};

const DEFAULT_DELIMITERS: &str = "\n.?!";

/// Byte-budget splitter that cuts at the last delimiter inside each window.
/// No tokenizer is involved, so every chunk reports a token count of zero.
#[derive(Debug, Default, Clone)]
pub struct FastChunker;

impl Chunker for FastChunker {
    fn name(&self) -> &str {
        "fast"
    }

    fn description(&self) -> &str {
        "High-speed delimiter-based chunking on a byte budget"
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::from([
            (
                "chunk_size".to_string(),
                ParamSpec::integer("Maximum number of bytes per chunk", 4096).min(1.0),
            ),
            (
                "delimiters".to_string(),
                ParamSpec::string("Delimiter characters to split on", DEFAULT_DELIMITERS),
            ),
            (
                "pattern".to_string(),
                ParamSpec::string("Multi-character pattern to split on; overrides delimiters", ""),
            ),
            (
                "prefix".to_string(),
                ParamSpec::boolean(
                    "Keep the delimiter at the start of the next chunk instead of the end of this one",
                    false,
                ),
            ),
            (
                "consecutive".to_string(),
                ParamSpec::boolean("Treat a run of delimiters as a single split point", false),
            ),
            (
                "forward_fallback".to_string(),
                ParamSpec::boolean(
                    "Search past the window for a delimiter instead of cutting mid-text",
                    false,
                ),
            ),
        ])
    }

    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>, ChunkerError> {
        let size = param_usize(params, "chunk_size")?;
        let pattern = param_str(params, "pattern")?;
        let delimiters = param_str(params, "delimiters")?;
        let matcher = if pattern.is_empty() {
            if delimiters.is_empty() {
                return Err(ChunkerError::invalid(
                    "delimiters",
                    "set delimiters or a pattern",
                ));
            }
            Matcher::Chars(delimiters)
        } else {
            Matcher::Pattern(pattern)
        };

        let splitter = FastSplitter {
            text,
            size,
            matcher,
            prefix: param_bool(params, "prefix")?,
            consecutive: param_bool(params, "consecutive")?,
            forward_fallback: param_bool(params, "forward_fallback")?,
        };

        let offsets = CharOffsets::new(text);
        Ok(splitter
            .ranges()
            .into_iter()
            .map(|range| {
                let mut metadata = Map::new();
                metadata.insert("chunker".to_string(), json!(self.name()));
                Chunk {
                    text: text[range.clone()].to_string(),
                    start_index: offsets.char_index(range.start),
                    end_index: offsets.char_index(range.end),
                    token_count: 0,
                    metadata,
                }
            })
            .collect())
    }
}

fn param_bool(params: &ChunkParams, name: &str) -> Result<bool, ChunkerError> {
    params
        .get(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| ChunkerError::invalid(name, "expected a boolean"))
}

enum Matcher<'a> {
    Chars(&'a str),
    Pattern(&'a str),
}

impl Matcher<'_> {
    /// Byte range of the last delimiter that ends at or before `end`.
    fn last_in(&self, text: &str, start: usize, end: usize) -> Option<Range<usize>> {
        let window = &text[start..end];
        match self {
            Matcher::Chars(set) => window
                .char_indices()
                .rev()
                .find(|(_, ch)| set.contains(*ch))
                .map(|(index, ch)| start + index..start + index + ch.len_utf8()),
            Matcher::Pattern(pattern) => window
                .rfind(pattern)
                .map(|index| start + index..start + index + pattern.len()),
        }
    }

    /// Byte range of the first delimiter starting at or after `start`.
    fn first_from(&self, text: &str, start: usize) -> Option<Range<usize>> {
        let rest = &text[start..];
        match self {
            Matcher::Chars(set) => rest
                .char_indices()
                .find(|(_, ch)| set.contains(*ch))
                .map(|(index, ch)| start + index..start + index + ch.len_utf8()),
            Matcher::Pattern(pattern) => rest
                .find(pattern)
                .map(|index| start + index..start + index + pattern.len()),
        }
    }

    /// Delimiter immediately preceding `end`, if any.
    fn ending_at(&self, text: &str, end: usize) -> Option<Range<usize>> {
        let before = &text[..end];
        match self {
            Matcher::Chars(set) => before
                .chars()
                .next_back()
                .filter(|ch| set.contains(*ch))
                .map(|ch| end - ch.len_utf8()..end),
            Matcher::Pattern(pattern) => {
                before.ends_with(pattern).then(|| end - pattern.len()..end)
            }
        }
    }
}

struct FastSplitter<'a> {
    text: &'a str,
    size: usize,
    matcher: Matcher<'a>,
    prefix: bool,
    consecutive: bool,
    forward_fallback: bool,
}

impl FastSplitter<'_> {
    fn ranges(&self) -> Vec<Range<usize>> {
        let len = self.text.len();
        let mut ranges = Vec::new();
        let mut start = 0usize;

        while start < len {
            if len - start <= self.size {
                ranges.push(start..len);
                break;
            }

            let window_end = self.window_end(start);
            let split = match self.split_in_window(start, window_end) {
                Some(split) => split,
                None if self.forward_fallback => self.forward_split(window_end),
                None => window_end,
            };

            ranges.push(start..split);
            start = split;
        }

        ranges
    }

    /// Last char boundary within the byte budget, always past `start`.
    fn window_end(&self, start: usize) -> usize {
        let mut end = start + self.size;
        while !self.text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = start + self.size;
            while !self.text.is_char_boundary(end) {
                end += 1;
            }
        }
        end
    }

    fn split_in_window(&self, start: usize, end: usize) -> Option<usize> {
        let found = self.matcher.last_in(self.text, start, end)?;
        let run = if self.consecutive {
            self.run_start(found.clone())
        } else {
            found.clone()
        };

        let split = if self.prefix { run.start } else { found.end };
        if split > start {
            return Some(split);
        }
        // The run reaches back to the chunk start; cut at the delimiter itself.
        let split = if self.prefix { found.start } else { found.end };
        (split > start).then_some(split)
    }

    /// First delimiter past the window, or the end of the text when there is none.
    fn forward_split(&self, from: usize) -> usize {
        self.matcher
            .first_from(self.text, from)
            .map(|found| if self.prefix { found.start } else { found.end })
            .unwrap_or(self.text.len())
    }

    /// Extends `found` backwards over directly preceding delimiters.
    fn run_start(&self, mut found: Range<usize>) -> Range<usize> {
        while let Some(previous) = self.matcher.ending_at(self.text, found.start) {
            found.start = previous.start;
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(
        text: &str,
        size: usize,
        matcher: Matcher<'_>,
        prefix: bool,
        consecutive: bool,
    ) -> Vec<String> {
        let splitter = FastSplitter {
            text,
            size,
            matcher,
            prefix,
            consecutive,
            forward_fallback: false,
        };
        splitter
            .ranges()
            .into_iter()
            .map(|range| text[range].to_string())
            .collect()
    }

    #[test]
    fn cuts_after_the_last_delimiter_in_the_window() {
        let chunks = split("One. Two. Three.", 10, Matcher::Chars("."), false, false);
        assert_eq!(chunks, ["One. Two.", " Three."]);
    }

    #[test]
    fn prefix_moves_the_delimiter_forward() {
        let chunks = split("a\nb\nc", 3, Matcher::Chars("\n"), true, false);
        assert_eq!(chunks, ["a", "\nb", "\nc"]);
    }

    #[test]
    fn consecutive_keeps_runs_together() {
        let chunks = split("alpha\n\n\nbeta", 10, Matcher::Chars("\n"), true, true);
        assert_eq!(chunks, ["alpha", "\n\n\nbeta"]);

        let chunks = split("alpha\n\n\nbeta", 10, Matcher::Chars("\n"), true, false);
        assert_eq!(chunks, ["alpha\n\n", "\nbeta"]);
    }

    #[test]
    fn pattern_overrides_single_characters() {
        let chunks = split("left::right::end", 8, Matcher::Pattern("::"), false, false);
        assert_eq!(chunks, ["left::", "right::", "end"]);
    }
}
