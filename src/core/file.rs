// Open modes and positioned file I/O shared by image and table sessions.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use crate::core::error::{Error, ErrorKind};

/// How a session opens its file. Integer values are stable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum FileMode {
    #[default]
    ReadOnly = 0,
    /// Read and update; the file must already exist.
    ReadWrite = 1,
    /// Create or empty the file.
    Truncate = 2,
}

impl FileMode {
    pub fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            FileMode::ReadOnly => options.read(true),
            FileMode::ReadWrite => options.read(true).write(true),
            FileMode::Truncate => options.read(true).write(true).create(true).truncate(true),
        };
        options
    }

    pub fn is_writable(self) -> bool {
        self != FileMode::ReadOnly
    }
}

impl TryFrom<u8> for FileMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(FileMode::ReadOnly),
            1 => Ok(FileMode::ReadWrite),
            2 => Ok(FileMode::Truncate),
            other => Err(Error::new(ErrorKind::Usage).with_message(format!("unknown file mode {other}"))),
        }
    }
}

pub(crate) fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io).with_path(path).with_source(err)
}

pub(crate) fn open(path: &Path, mode: FileMode) -> Result<File, Error> {
    mode.open_options().open(path).map_err(|err| io_error(path, err))
}

pub(crate) fn len(file: &File, path: &Path) -> Result<u64, Error> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(|err| io_error(path, err))
}

/// Fill `buf` from `offset`; a short read is an error.
pub(crate) fn read_exact_at(file: &mut File, path: &Path, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| io_error(path, err).with_offset(offset))?;
    file.read_exact(buf)
        .map_err(|err| io_error(path, err).with_offset(offset))
}

pub(crate) fn write_all_at(file: &mut File, path: &Path, offset: u64, buf: &[u8]) -> Result<(), Error> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| io_error(path, err).with_offset(offset))?;
    file.write_all(buf)
        .map_err(|err| io_error(path, err).with_offset(offset))?;
    file.flush().map_err(|err| io_error(path, err))
}

/// Grow (or shrink) the file to exactly `size` bytes, reserving the blocks when the filesystem allows.
pub(crate) fn expand(file: &File, path: &Path, size: u64) -> Result<(), Error> {
    if let Err(err) = file.allocate(size) {
        tracing::debug!(path = %path.display(), size, error = %err, "block reservation unavailable");
    }
    file.set_len(size).map_err(|err| io_error(path, err))
}

pub(crate) fn read_to_string(file: &mut File, path: &Path) -> Result<String, Error> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).map_err(|err| io_error(path, err))?;
    file.read_to_string(&mut text).map_err(|err| io_error(path, err))?;
    Ok(text)
}

pub(crate) fn append(file: &mut File, path: &Path, text: &str) -> Result<(), Error> {
    file.seek(SeekFrom::End(0)).map_err(|err| io_error(path, err))?;
    file.write_all(text.as_bytes()).map_err(|err| io_error(path, err))?;
    file.flush().map_err(|err| io_error(path, err))
}

/// Extension of `path` as written (case preserved), if any.
pub fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

#[cfg(test)]
mod tests {
    use super::{FileMode, expand, extension, len, open, read_exact_at, write_all_at};
    use crate::core::error::ErrorKind;
    use std::path::Path;

    #[test]
    fn mode_values_are_stable() {
        assert_eq!(FileMode::ReadOnly as u8, 0);
        assert_eq!(FileMode::ReadWrite as u8, 1);
        assert_eq!(FileMode::Truncate as u8, 2);
        assert_eq!(FileMode::try_from(2).unwrap(), FileMode::Truncate);
        assert_eq!(FileMode::try_from(7).unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn read_write_requires_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.bin");
        let err = open(&path, FileMode::ReadWrite).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[test]
    fn positioned_io_and_short_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        let mut file = open(&path, FileMode::Truncate).expect("create");
        expand(&file, &path, 64).expect("expand");
        assert_eq!(len(&file, &path).unwrap(), 64);

        write_all_at(&mut file, &path, 60, b"abcd").expect("write");
        let mut buf = [0u8; 4];
        read_exact_at(&mut file, &path, 60, &mut buf).expect("read");
        assert_eq!(&buf, b"abcd");

        let mut past_end = [0u8; 8];
        let err = read_exact_at(&mut file, &path, 60, &mut past_end).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.offset(), Some(60));
    }

    #[test]
    fn extension_keeps_case() {
        assert_eq!(extension(Path::new("/data/a.MRC")), Some("MRC"));
        assert_eq!(extension(Path::new("/data/noext")), None);
    }
}
