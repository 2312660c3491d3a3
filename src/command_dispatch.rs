//! Purpose: Hold top-level CLI command dispatch for `emio`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command emits exactly one JSON document on success.
//! Invariants: Table edits read every block first, then rewrite the file with all blocks in order.

use std::path::Path;

use emio::api::{ArrayDim, Error, ErrorKind, FileMode, ImageIo, Table, TableIo, Type};
use serde_json::json;
use tracing::debug;

use super::info_json::{formats_json, image_info_json, table_json};
use super::{Command, FormatArg, ImageCommand, RunOutcome, TableCommand, TableTarget, emit_json};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Formats => {
            emit_json(formats_json());
        }
        Command::Image { command } => match command {
            ImageCommand::Info { path, format } => {
                let mut io = image_session(&format)?;
                io.open(&path, FileMode::ReadOnly)?;
                let info = image_info_json(&io, file_size(&path)?);
                io.close();
                emit_json(info);
            }
            ImageCommand::Create {
                path,
                dim,
                ty,
                format,
            } => {
                let ty = element_type(&ty)?;
                let mut io = image_session(&format)?;
                create_image(&mut io, &path, dim, ty)?;
                let info = image_info_json(&io, file_size(&path)?);
                io.close();
                emit_json(info);
            }
        },
        Command::Table { command } => match command {
            TableCommand::Show { path, name, format } => {
                let mut io = table_session(&format)?;
                io.open(&path, FileMode::ReadOnly)?;
                let names = match name {
                    Some(name) => vec![name],
                    None => io.table_names()?,
                };
                let mut tables = Vec::with_capacity(names.len());
                for name in &names {
                    let mut table = Table::new();
                    io.read(name, &mut table)?;
                    tables.push(table_json(name, &table));
                }
                io.close();
                emit_json(json!({ "path": path.display().to_string(), "tables": tables }));
            }
            TableCommand::Delete { target, query } => {
                let edit = edit_table(&target, |table| table.delete_rows(&query))?;
                emit_json(json!({
                    "path": edit.output,
                    "name": edit.name,
                    "deleted": edit.affected,
                    "rows": edit.rows,
                }));
            }
            TableCommand::Update { target, set, query } => {
                let edit = edit_table(&target, |table| table.update_rows(&set, &query))?;
                emit_json(json!({
                    "path": edit.output,
                    "name": edit.name,
                    "updated": edit.affected,
                    "rows": edit.rows,
                }));
            }
        },
    }
    Ok(RunOutcome::ok())
}

fn image_session(format: &FormatArg) -> Result<ImageIo, Error> {
    match &format.format {
        Some(key) => ImageIo::with_format(key),
        None => Ok(ImageIo::new()),
    }
}

fn table_session(format: &FormatArg) -> Result<TableIo, Error> {
    match &format.format {
        Some(key) => TableIo::with_format(key),
        None => Ok(TableIo::new()),
    }
}

fn element_type(name: &str) -> Result<Type, Error> {
    Type::by_name(name).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("unknown element type `{name}`"))
            .with_hint("Use one of int8, uint8, int16, uint16, int32, uint32, int64, uint64, float, double.")
    })
}

fn create_image(io: &mut ImageIo, path: &Path, dim: ArrayDim, ty: Type) -> Result<(), Error> {
    io.open(path, FileMode::Truncate)?;
    if let Err(err) = io.create_file(dim, ty) {
        io.close();
        return Err(err);
    }
    Ok(())
}

fn file_size(path: &Path) -> Result<u64, Error> {
    std::fs::metadata(path).map(|meta| meta.len()).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_path(path)
            .with_source(err)
    })
}

struct TableEdit {
    output: String,
    name: String,
    affected: usize,
    rows: usize,
}

/// Read every block, apply `change` to the selected one, then rewrite all blocks.
fn edit_table<F>(target: &TableTarget, change: F) -> Result<TableEdit, Error>
where
    F: FnOnce(&mut Table) -> Result<usize, Error>,
{
    let mut io = table_session(&target.format)?;
    io.open(&target.path, FileMode::ReadOnly)?;
    let names = io.table_names()?;
    let mut tables = Vec::with_capacity(names.len());
    for name in &names {
        let mut table = Table::new();
        io.read(name, &mut table)?;
        tables.push((name.clone(), table));
    }
    io.close();

    let selected = match &target.name {
        Some(name) => tables.iter().position(|(block, _)| block == name),
        None => (!tables.is_empty()).then_some(0),
    };
    let Some(selected) = selected else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "no data block `{}`",
                target.name.as_deref().unwrap_or_default()
            ))
            .with_path(&target.path)
            .with_hint("Run `emio table show` to list the blocks."));
    };
    let (name, table) = &mut tables[selected];
    let affected = change(table)?;
    let rows = table.len();
    let name = name.clone();

    let output = target.output.as_deref().unwrap_or(&target.path);
    debug!(output = %output.display(), name = %name, affected, "rewriting table file");
    io.open(output, FileMode::Truncate)?;
    for (block, table) in &tables {
        io.write(block, table)?;
    }
    io.close();
    Ok(TableEdit {
        output: output.display().to_string(),
        name,
        affected,
        rows,
    })
}
