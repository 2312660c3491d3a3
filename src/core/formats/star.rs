// STAR / XMD metadata files: `data_<name>` blocks holding either a `loop_`
// table or `_label value` pairs (read as a single-row table).
use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;

use crate::core::column::Column;
use crate::core::error::{Error, ErrorKind, usage};
use crate::core::file;
use crate::core::object::Object;
use crate::core::table::Table;
use crate::core::table_io::TableFormat;
use crate::core::types::{Type, infer_from_string};

#[derive(Debug, Default)]
pub struct StarFormat;

#[derive(Debug, Default, PartialEq)]
struct Block {
    name: String,
    labels: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Split one line into tokens; single or double quotes group whitespace.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '\'' || c == '"' {
            chars.next();
            while let Some(next) = chars.next() {
                if next == c && chars.peek().is_none_or(|after| after.is_whitespace()) {
                    break;
                }
                token.push(next);
            }
        } else {
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                token.push(next);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

fn parse(text: &str) -> Result<Vec<Block>, Error> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut in_loop = false;
    for (number, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix("data_") {
            blocks.push(Block {
                name: name.trim().to_string(),
                ..Block::default()
            });
            in_loop = false;
            continue;
        }
        let Some(block) = blocks.last_mut() else {
            return Err(Error::new(ErrorKind::HeaderParse)
                .with_message(format!("line {} appears before any data_ block", number + 1)));
        };
        let mixed = || {
            Error::new(ErrorKind::HeaderParse)
                .with_message(format!("line {} mixes loop and key/value entries", number + 1))
        };
        if trimmed == "loop_" {
            if !block.labels.is_empty() {
                return Err(mixed());
            }
            in_loop = true;
            continue;
        }
        let tokens = tokenize(trimmed);
        if let Some(label) = trimmed.strip_prefix('_') {
            let label = label.split_whitespace().next().unwrap_or_default().to_string();
            if in_loop {
                if !block.rows.is_empty() {
                    return Err(mixed());
                }
                block.labels.push(label);
                continue;
            }
            // key/value pair: the block is one row wide
            let value = tokens.get(1).cloned().unwrap_or_default();
            block.labels.push(label);
            match block.rows.first_mut() {
                Some(row) => row.push(value),
                None => block.rows.push(vec![value]),
            }
            continue;
        }
        if !in_loop {
            return Err(Error::new(ErrorKind::HeaderParse)
                .with_message(format!("unexpected value outside a loop on line {}", number + 1)));
        }
        if tokens.len() != block.labels.len() {
            return Err(Error::new(ErrorKind::HeaderParse)
                .with_message(format!(
                    "row has {} values for {} columns in data_{}",
                    tokens.len(),
                    block.labels.len(),
                    block.name
                ))
                .with_index(block.rows.len() + 1));
        }
        block.rows.push(tokens);
    }
    Ok(blocks)
}

fn rank(ty: Type) -> u8 {
    if ty == Type::int32() {
        0
    } else if ty == Type::float() {
        1
    } else {
        2
    }
}

/// Narrowest of int32, float and string that holds every value in column `col`.
fn column_type(rows: &[Vec<String>], col: usize) -> Type {
    rows.iter()
        .map(|row| infer_from_string(&row[col]))
        .max_by_key(|ty| rank(*ty))
        .unwrap_or_else(Type::string)
}

fn build_table(block: &Block) -> Result<Table, Error> {
    let columns = block
        .labels
        .iter()
        .enumerate()
        .map(|(col, label)| Column::new(label.clone(), column_type(&block.rows, col)));
    let mut table = Table::with_columns(columns)?;
    for (number, tokens) in block.rows.iter().enumerate() {
        let mut row = table.create_row();
        for (column, token) in table.column_map().iter().zip(tokens) {
            let mut value = Object::of_type(column.ty());
            value
                .from_string(token)
                .map_err(|err| err.with_index(number + 1))?;
            row.assign(column.name(), &value)?;
        }
        table.add_row(&row)?;
    }
    Ok(table)
}

fn format_value(value: &Object) -> String {
    let text = value.to_string();
    if !value.ty().is::<String>() {
        return text;
    }
    if needs_quotes(&text) {
        let quote = if text.contains('"') { '\'' } else { '"' };
        return format!("{quote}{text}{quote}");
    }
    text
}

/// Values the parser would otherwise read as whitespace, a label, a comment or a block marker.
fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text.contains(char::is_whitespace)
        || text.starts_with(['_', '#', '\'', '"'])
        || text.starts_with("data_")
        || text == "loop_"
}

fn render(name: &str, table: &Table) -> String {
    let mut out = format!("\ndata_{name}\n\n");
    if table.column_count() == 0 {
        return out;
    }
    out.push_str("loop_\n");
    for (i, column) in table.column_map().iter().enumerate() {
        let _ = writeln!(out, "_{} #{}", column.name(), i + 1);
    }
    for row in table {
        let line: Vec<String> = row.iter().map(|(_, value)| format_value(value)).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

fn read_blocks(file: &mut File, path: &Path) -> Result<Vec<Block>, Error> {
    let text = file::read_to_string(file, path)?;
    parse(&text).map_err(|err| err.with_path(path))
}

impl TableFormat for StarFormat {
    fn name(&self) -> &'static str {
        "star"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["star", "xmd"]
    }

    fn table_names(&mut self, file: &mut File, path: &Path) -> Result<Vec<String>, Error> {
        Ok(read_blocks(file, path)?
            .into_iter()
            .map(|block| block.name)
            .collect())
    }

    fn read(&mut self, file: &mut File, path: &Path, name: &str, table: &mut Table) -> Result<(), Error> {
        let blocks = read_blocks(file, path)?;
        let block = blocks
            .iter()
            .find(|block| block.name == name)
            .or_else(|| blocks.first().filter(|_| name.is_empty()))
            .ok_or_else(|| {
                usage(format!("no data block `{name}`"))
                    .with_path(path)
                    .with_hint("Run `emio table show` without --name to list the blocks.")
            })?;
        *table = build_table(block).map_err(|err| err.with_path(path))?;
        Ok(())
    }

    fn write(&mut self, file: &mut File, path: &Path, name: &str, table: &Table) -> Result<(), Error> {
        file::append(file, path, &render(name, table))
    }
}
