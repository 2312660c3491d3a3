//! Purpose: `emio` CLI entry point: inspect and create image files, query and edit metadata tables.
//! Role: Binary crate root; parses args, registers formats, runs commands, emits JSON on stdout.
//! Invariants: Command results are JSON documents on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Logs go to stderr, filtered by `RUST_LOG` (default `warn`).
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use emio::api::{ArrayDim, Error, ErrorKind, register_builtin, to_exit_code};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod info_json;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `emio --help`."));
            }
        },
    };

    init_tracing();
    register_builtin();
    command_dispatch::dispatch_command(cli.command).map_err(add_hint)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "emio",
    version,
    about = "Inspect electron-microscopy image files and edit STAR metadata tables",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered image and table format keys.
    Formats,
    /// Image file operations.
    Image {
        #[command(subcommand)]
        command: ImageCommand,
    },
    /// Metadata table operations.
    Table {
        #[command(subcommand)]
        command: TableCommand,
    },
}

#[derive(Args)]
struct FormatArg {
    #[arg(long, help = "Format key to use instead of the file extension")]
    format: Option<String>,
}

#[derive(Subcommand)]
enum ImageCommand {
    /// Describe an image file: format, dimensions, element type and layout.
    Info {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[command(flatten)]
        format: FormatArg,
    },
    /// Create a zero-filled image file.
    Create {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Dimensions as X,Y,Z,N (missing values default to 1)")]
        dim: ArrayDim,
        #[arg(long = "type", default_value = "float", help = "Element type name")]
        ty: String,
        #[command(flatten)]
        format: FormatArg,
    },
}

#[derive(Args)]
struct TableTarget {
    #[arg(value_hint = ValueHint::FilePath)]
    path: PathBuf,
    #[arg(long, help = "Data block name (default: first block)")]
    name: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath, help = "Write the result here instead of in place")]
    output: Option<PathBuf>,
    #[command(flatten)]
    format: FormatArg,
}

#[derive(Subcommand)]
enum TableCommand {
    /// Print tables as JSON (every block unless --name is given).
    Show {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Data block name")]
        name: Option<String>,
        #[command(flatten)]
        format: FormatArg,
    },
    /// Delete the rows matching a query.
    Delete {
        #[command(flatten)]
        target: TableTarget,
        #[arg(long = "where", help = "Row predicate, e.g. 'rlnDefocusU > 20000'")]
        query: String,
    },
    /// Apply an update to the rows matching a query.
    Update {
        #[command(flatten)]
        target: TableTarget,
        #[arg(long, help = "Row update, e.g. '.rlnClassNumber = 1'")]
        set: String,
        #[arg(long = "where", default_value = "true", help = "Row predicate")]
        query: String,
    },
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Io => err.with_hint("Check that the path exists and is accessible."),
        ErrorKind::HeaderParse => err.with_hint("The file does not look like the format its extension suggests; try --format."),
        ErrorKind::Internal => err.with_hint("This is a bug; please report it with the command that triggered it."),
        _ => err,
    }
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::UnknownFormat => "unknown format",
        ErrorKind::HeaderParse => "malformed header",
        ErrorKind::Io => "i/o error",
        ErrorKind::TypeMismatch => "type mismatch",
        ErrorKind::SchemaMismatch => "schema mismatch",
        ErrorKind::UnsupportedConversion => "unsupported conversion",
        ErrorKind::ColumnNotFound => "column not found",
        ErrorKind::RowNotFound => "row not found",
        ErrorKind::DuplicateColumn => "duplicate column",
        ErrorKind::IndexOutOfRange => "index out of range",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(index) = err.index() {
        lines.push(format!("index: {index}"));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
