//! Purpose: Read and write named tables in metadata files through a registered format.
//! Exports: `TableFormat`, `TableFormatBuilder`, `TableIo`.
//! Role: Session over one file, mirroring `ImageIo` format selection and lifecycle.
//! Invariants: One open file per session; read-only sessions never write.
//! Invariants: Writes append a new named block; existing blocks are left untouched.
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::core::error::{Error, ErrorKind, usage};
use crate::core::file::{self, FileMode};
use crate::core::registry::table_formats;
use crate::core::table::Table;

/// Codec for one text or binary table container.
pub trait TableFormat: Send {
    fn name(&self) -> &'static str;

    fn extensions(&self) -> &'static [&'static str];

    fn open_file(&mut self, path: &Path, mode: FileMode) -> Result<File, Error> {
        file::open(path, mode)
    }

    /// Names of every table stored in the file, in file order.
    fn table_names(&mut self, file: &mut File, path: &Path) -> Result<Vec<String>, Error>;

    /// Replace `table` with the block called `name`; an empty name selects the first block.
    fn read(&mut self, file: &mut File, path: &Path, name: &str, table: &mut Table) -> Result<(), Error>;

    fn write(&mut self, file: &mut File, path: &Path, name: &str, table: &Table) -> Result<(), Error>;
}

pub type TableFormatBuilder = Arc<dyn Fn() -> Box<dyn TableFormat> + Send + Sync>;

struct OpenFile {
    path: PathBuf,
    mode: FileMode,
    file: File,
}

#[derive(Default)]
pub struct TableIo {
    format: Option<Box<dyn TableFormat>>,
    pinned: bool,
    open: Option<OpenFile>,
}

impl TableIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(key: &str) -> Result<Self, Error> {
        let mut io = Self::default();
        io.format = Some(build_format(key)?);
        io.pinned = true;
        Ok(io)
    }

    pub fn has_impl(key: &str) -> bool {
        table_formats().has(key)
    }

    /// Every registered key (format names and extensions), sorted.
    pub fn registered_keys() -> Vec<String> {
        table_formats().keys()
    }

    pub fn register_impl(builder: TableFormatBuilder) -> bool {
        let probe = builder();
        let keys = probe
            .extensions()
            .iter()
            .copied()
            .chain(std::iter::once(probe.name()));
        table_formats().register(keys, builder)
    }

    pub fn open(&mut self, path: impl AsRef<Path>, mode: FileMode) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(current) = &self.open {
            return Err(usage("table session is already open")
                .with_path(&current.path)
                .with_hint("Call close() before opening another file."));
        }
        if !self.pinned {
            let ext = file::extension(path).unwrap_or_default();
            self.format = Some(build_format(ext).map_err(|err| err.with_path(path))?);
        }
        let Some(format) = self.format.as_mut() else {
            return Err(Error::new(ErrorKind::Internal).with_message("format vanished"));
        };
        let file = format.open_file(path, mode)?;
        debug!(path = %path.display(), format = format.name(), ?mode, "opened table file");
        self.open = Some(OpenFile {
            path: path.to_path_buf(),
            mode,
            file,
        });
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            debug!(path = %open.path.display(), "closed table file");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.open.as_ref().map(|open| open.path.as_path())
    }

    pub fn format_name(&self) -> Option<&'static str> {
        self.format.as_ref().map(|format| format.name())
    }

    pub fn table_names(&mut self) -> Result<Vec<String>, Error> {
        let (format, open) = self.parts()?;
        format.table_names(&mut open.file, &open.path)
    }

    pub fn read(&mut self, name: &str, table: &mut Table) -> Result<(), Error> {
        let (format, open) = self.parts()?;
        format.read(&mut open.file, &open.path, name, table)?;
        debug!(path = %open.path.display(), name, rows = table.len(), "read table");
        Ok(())
    }

    pub fn write(&mut self, name: &str, table: &Table) -> Result<(), Error> {
        let (format, open) = self.parts()?;
        if !open.mode.is_writable() {
            return Err(usage("table session is read-only").with_path(&open.path));
        }
        format.write(&mut open.file, &open.path, name, table)?;
        debug!(path = %open.path.display(), name, rows = table.len(), "wrote table");
        Ok(())
    }

    fn parts(&mut self) -> Result<(&mut Box<dyn TableFormat>, &mut OpenFile), Error> {
        match (self.format.as_mut(), self.open.as_mut()) {
            (Some(format), Some(open)) => Ok((format, open)),
            _ => Err(usage("table session is not open")),
        }
    }
}

impl fmt::Debug for TableIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableIo")
            .field("format", &self.format_name())
            .field("path", &self.path())
            .finish()
    }
}

fn build_format(key: &str) -> Result<Box<dyn TableFormat>, Error> {
    match table_formats().builder(key) {
        Some(builder) => Ok(builder()),
        None => Err(Error::new(ErrorKind::UnknownFormat)
            .with_message(format!("no table format registered for `{key}`"))
            .with_hint("Run `emio formats` to list registered keys.")),
    }
}

#[cfg(test)]
mod tests {
    use super::TableIo;
    use crate::core::column::Column;
    use crate::core::error::ErrorKind;
    use crate::core::file::FileMode;
    use crate::core::formats;
    use crate::core::table::Table;
    use crate::core::types::Type;

    fn sample() -> Table {
        let mut table = Table::with_columns([
            Column::new("rlnImageName", Type::string()),
            Column::new("rlnDefocusU", Type::float()),
        ])
        .expect("columns");
        for (name, defocus) in [("1@stack.mrcs", 12000.5f32), ("2@stack.mrcs", 13000.0)] {
            let mut row = table.create_row();
            row.set("rlnImageName", name.to_string()).expect("name");
            row.set("rlnDefocusU", defocus).expect("defocus");
            table.add_row(&row).expect("add");
        }
        table
    }

    #[test]
    fn write_then_read_by_name() {
        formats::register_builtin();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("particles.star");
        let mut io = TableIo::new();
        io.open(&path, FileMode::Truncate).expect("open");
        io.write("optics", &Table::new()).expect("write empty");
        io.write("particles", &sample()).expect("write");
        io.close();

        io.open(&path, FileMode::ReadOnly).expect("reopen");
        assert_eq!(io.format_name(), Some("star"));
        assert_eq!(io.table_names().unwrap(), vec!["optics", "particles"]);
        let mut table = Table::new();
        io.read("particles", &mut table).expect("read");
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("rlnDefocusU").unwrap().ty(), Type::float());
        assert_eq!(table.row(1).unwrap().get("rlnImageName").unwrap().to_string(), "2@stack.mrcs");
    }

    #[test]
    fn read_only_sessions_reject_writes() {
        formats::register_builtin();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.star");
        std::fs::write(&path, "data_t\n_x 1\n").expect("seed");
        let mut io = TableIo::new();
        io.open(&path, FileMode::ReadOnly).expect("open");
        let err = io.write("t", &sample()).expect_err("read-only");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = io.open(&path, FileMode::ReadOnly).expect_err("already open");
        assert_eq!(err.kind(), ErrorKind::Usage);
        io.close();
        let mut table = Table::new();
        assert_eq!(io.read("t", &mut table).unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn unknown_extension_is_reported() {
        let mut io = TableIo::new();
        let err = io.open("meta.unknown-table", FileMode::ReadOnly).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnknownFormat);
        assert!(TableIo::with_format("unknown-table").is_err());
    }
}
