use std::ops::Range;

use serde_json::json;

use super::{
    CharOffsets, Chunk, ChunkParams, Chunker, ChunkerError, ParamSpec, ParameterSchema,
    Tokenizer, TokenizerKind, build_chunk, param_str, param_usize,
};

const ROW_MODE: &str = "row";

/// Splits markdown tables into row groups, repeating the header in every chunk.
/// Text outside tables becomes one chunk per block.
#[derive(Debug, Default, Clone)]
pub struct TableChunker;

struct TableBlock {
    header: Range<usize>,
    rows: Vec<Range<usize>>,
}

enum Block {
    Text(Range<usize>),
    Table(TableBlock),
}

impl Chunker for TableChunker {
    fn name(&self) -> &str {
        "table"
    }

    fn description(&self) -> &str {
        "Splits markdown tables by rows and keeps the header with every chunk"
    }

    fn parameter_schema(&self) -> ParameterSchema {
        let mut tokenizers = vec![ROW_MODE];
        tokenizers.extend(TokenizerKind::NAMES);
        ParameterSchema::from([
            (
                "tokenizer".to_string(),
                ParamSpec::string("'row' counts table rows; any other value counts tokens", ROW_MODE)
                    .one_of(&tokenizers),
            ),
            (
                "chunk_size".to_string(),
                ParamSpec::integer("Rows (or tokens) per chunk", 3).min(1.0),
            ),
        ])
    }

    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>, ChunkerError> {
        let mode = param_str(params, "tokenizer")?;
        let size = param_usize(params, "chunk_size")?;
        let counter = match mode {
            ROW_MODE => TokenizerKind::Character.build()?,
            other => other.parse::<TokenizerKind>()?.build()?,
        };
        let by_rows = mode == ROW_MODE;

        let offsets = CharOffsets::new(text);
        let mut chunks = Vec::new();

        for block in parse_blocks(text) {
            match block {
                Block::Text(range) => {
                    chunks.push(build_chunk(text, range, &offsets, counter.as_ref(), self.name()));
                }
                Block::Table(table) => {
                    let groups = if by_rows {
                        table.rows.chunks(size).map(<[_]>::to_vec).collect()
                    } else {
                        group_by_tokens(text, &table, counter.as_ref(), size)
                    };
                    chunks.extend(table_chunks(text, &table, groups, &offsets, counter.as_ref(), by_rows));
                }
            }
        }

        Ok(chunks)
    }
}

fn table_chunks(
    text: &str,
    table: &TableBlock,
    groups: Vec<Vec<Range<usize>>>,
    offsets: &CharOffsets,
    counter: &dyn Tokenizer,
    by_rows: bool,
) -> Vec<Chunk> {
    let header = &text[table.header.clone()];

    if groups.is_empty() {
        let mut chunk = build_chunk(text, table.header.clone(), offsets, counter, "table");
        chunk.metadata.insert("rows".to_string(), json!(0));
        if by_rows {
            chunk.token_count = 0;
        }
        return vec![chunk];
    }

    groups
        .into_iter()
        .enumerate()
        .filter_map(|(index, rows)| {
            let first = rows.first()?.clone();
            let last = rows.last()?.clone();
            let start = if index == 0 { table.header.start } else { first.start };

            let mut body = String::from(header);
            if !body.ends_with('\n') {
                body.push('\n');
            }
            for row in &rows {
                body.push_str(&text[row.clone()]);
            }

            let token_count = if by_rows { rows.len() } else { counter.count(&body) };
            let mut chunk = build_chunk(text, start..last.end, offsets, counter, "table");
            chunk.text = body;
            chunk.token_count = token_count;
            chunk.metadata.insert("rows".to_string(), json!(rows.len()));
            chunk.metadata.insert("header_repeated".to_string(), json!(index > 0));
            Some(chunk)
        })
        .collect()
}

fn group_by_tokens(
    text: &str,
    table: &TableBlock,
    counter: &dyn Tokenizer,
    size: usize,
) -> Vec<Vec<Range<usize>>> {
    let header_tokens = counter.count(&text[table.header.clone()]);
    let mut groups: Vec<Vec<Range<usize>>> = Vec::new();
    let mut current: Vec<Range<usize>> = Vec::new();
    let mut tokens = header_tokens;

    for row in &table.rows {
        let row_tokens = counter.count(&text[row.clone()]);
        if !current.is_empty() && tokens + row_tokens > size {
            groups.push(std::mem::take(&mut current));
            tokens = header_tokens;
        }
        tokens += row_tokens;
        current.push(row.clone());
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn line_ranges(text: &str) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut start = 0usize;
    for (index, _) in text.match_indices('\n') {
        lines.push(start..index + 1);
        start = index + 1;
    }
    if start < text.len() {
        lines.push(start..text.len());
    }
    lines
}

fn is_row(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('-')
        && trimmed.contains('|')
        && trimmed.chars().all(|ch| matches!(ch, '|' | '-' | ':' | ' ' | '\t'))
}

fn parse_blocks(text: &str) -> Vec<Block> {
    let lines = line_ranges(text);
    let mut blocks = Vec::new();
    let mut pending_text: Option<Range<usize>> = None;
    let mut index = 0usize;

    let flush = |pending: &mut Option<Range<usize>>, blocks: &mut Vec<Block>| {
        if let Some(range) = pending.take() {
            if !text[range.clone()].trim().is_empty() {
                blocks.push(Block::Text(range));
            }
        }
    };

    while index < lines.len() {
        let line = &text[lines[index].clone()];
        let starts_table = is_row(line)
            && lines
                .get(index + 1)
                .is_some_and(|next| is_separator(&text[next.clone()]));

        if starts_table {
            flush(&mut pending_text, &mut blocks);
            let header = lines[index].start..lines[index + 1].end;
            index += 2;
            let mut rows = Vec::new();
            while index < lines.len() && is_row(&text[lines[index].clone()]) {
                rows.push(lines[index].clone());
                index += 1;
            }
            blocks.push(Block::Table(TableBlock { header, rows }));
        } else {
            let range = lines[index].clone();
            pending_text = Some(match pending_text.take() {
                Some(existing) => existing.start..range.end,
                None => range,
            });
            index += 1;
        }
    }
    flush(&mut pending_text, &mut blocks);

    blocks
}
