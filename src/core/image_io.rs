//! Purpose: Open image files through a registered format and move items in and out of them.
//! Exports: `ImageFormat`, `ImageFormatBuilder`, `ImageHeader`, `ImageIo`, `item_offset`.
//! Role: Session over one file: format selection, header parse/write, positioned item I/O.
//! Invariants: Item `i` (1-based) starts at `header + (item_bytes + pad) * (i - 1)`.
//! Invariants: `create_file` pre-sizes the file so item writes never grow it.
//! Invariants: Reads convert into the destination type; writes require the file's type.
//! Invariants: `close` is idempotent and never fails.
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::error::{Error, ErrorKind, usage};
use crate::core::file::{self, FileMode};
use crate::core::image::{ArrayDim, Image, ImageLocation};
use crate::core::object::ObjectDict;
use crate::core::registry::image_formats;
use crate::core::types::Type;

/// What a format learns from a file's main header.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageHeader {
    pub dim: ArrayDim,
    pub ty: Type,
    pub values: ObjectDict,
}

/// Codec for one on-disk image format.
///
/// A format reads and writes only the main header; `ImageIo` owns item
/// placement using `header_size` and `pad_size`. Both may depend on the
/// last header read or written.
pub trait ImageFormat: Send {
    /// Canonical key, registered next to every extension.
    fn name(&self) -> &'static str;

    fn extensions(&self) -> &'static [&'static str];

    fn open_file(&mut self, path: &Path, mode: FileMode) -> Result<File, Error> {
        file::open(path, mode)
    }

    fn read_header(&mut self, file: &mut File, path: &Path) -> Result<ImageHeader, Error>;

    fn write_header(&mut self, file: &mut File, path: &Path, dim: ArrayDim, ty: Type) -> Result<(), Error>;

    fn header_size(&self) -> u64;

    fn pad_size(&self) -> u64 {
        0
    }

    fn supports_type(&self, ty: Type) -> bool;
}

pub type ImageFormatBuilder = Arc<dyn Fn() -> Box<dyn ImageFormat> + Send + Sync>;

/// Byte offset of 1-based item `index`.
pub fn item_offset(header_size: u64, pad_size: u64, item_bytes: u64, index: usize) -> u64 {
    header_size + (item_bytes + pad_size) * (index as u64).saturating_sub(1)
}

struct OpenFile {
    path: PathBuf,
    mode: FileMode,
    file: File,
}

#[derive(Default)]
pub struct ImageIo {
    format: Option<Box<dyn ImageFormat>>,
    pinned: bool,
    open: Option<OpenFile>,
    dim: ArrayDim,
    ty: Type,
    header: ObjectDict,
    scratch: Image,
}

impl ImageIo {
    /// A session that picks its format from the path extension at every `open`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session bound to the format registered under `key`.
    pub fn with_format(key: &str) -> Result<Self, Error> {
        let mut io = Self::default();
        io.format = Some(build_format(key)?);
        io.pinned = true;
        Ok(io)
    }

    pub fn has_impl(key: &str) -> bool {
        image_formats().has(key)
    }

    /// Every registered key (format names and extensions), sorted.
    pub fn registered_keys() -> Vec<String> {
        image_formats().keys()
    }

    /// Register `builder` under its format name and every extension it declares.
    pub fn register_impl(builder: ImageFormatBuilder) -> bool {
        let probe = builder();
        let keys = probe
            .extensions()
            .iter()
            .copied()
            .chain(std::iter::once(probe.name()));
        image_formats().register(keys, builder)
    }

    pub fn open(&mut self, path: impl AsRef<Path>, mode: FileMode) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(current) = &self.open {
            return Err(usage("image session is already open")
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
        let mut file = format.open_file(path, mode)?;
        if mode != FileMode::Truncate {
            let header = format.read_header(&mut file, path)?;
            self.dim = header.dim;
            self.ty = header.ty;
            self.header = header.values;
        } else {
            self.dim = ArrayDim::default();
            self.ty = Type::null();
            self.header = ObjectDict::new();
        }
        debug!(
            path = %path.display(),
            format = format.name(),
            ?mode,
            dim = %self.dim,
            ty = %self.ty,
            "opened image file"
        );
        self.open = Some(OpenFile {
            path: path.to_path_buf(),
            mode,
            file,
        });
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            debug!(path = %open.path.display(), "closed image file");
        }
    }

    /// Write the main header and pre-size the file for `dim.n` items of `ty`.
    pub fn create_file(&mut self, dim: ArrayDim, ty: Type) -> Result<(), Error> {
        let Some(open) = self.open.as_mut() else {
            return Err(not_open());
        };
        if open.mode != FileMode::Truncate {
            return Err(usage("create_file requires a session opened with FileMode::Truncate")
                .with_path(&open.path));
        }
        let Some(format) = self.format.as_mut() else {
            return Err(not_open());
        };
        if !format.supports_type(ty) {
            return Err(Error::new(ErrorKind::UnsupportedConversion)
                .with_message(format!("{} files cannot store {ty} elements", format.name()))
                .with_path(&open.path));
        }
        format.write_header(&mut open.file, &open.path, dim, ty)?;
        self.dim = dim;
        self.ty = ty;
        let item_bytes = (dim.item_size() * ty.size()) as u64;
        let size = format.header_size() + (item_bytes + format.pad_size()) * dim.n as u64;
        debug!(
            path = %open.path.display(),
            item_bytes,
            header_size = format.header_size(),
            pad_size = format.pad_size(),
            size,
            "pre-sizing image file"
        );
        file::expand(&open.file, &open.path, size)
    }

    /// Read item `index` into `image`, adopting the file's type when `image` has none.
    pub fn read(&mut self, index: usize, image: &mut Image) -> Result<(), Error> {
        let offset = self.item_offset(index)?;
        let item_dim = self.dim.with_n(1);
        let file_ty = self.ty;
        if image.ty().is_null() {
            image.resize_as(item_dim, file_ty);
        } else {
            image.resize(item_dim);
        }
        let count = item_dim.item_size();
        let mut bytes = vec![0u8; count * file_ty.size()];
        let Some(open) = self.open.as_mut() else {
            return Err(not_open());
        };
        trace!(path = %open.path.display(), index, offset, len = bytes.len(), "reading item");
        file::read_exact_at(&mut open.file, &open.path, offset, &mut bytes)?;

        if image.ty() == file_ty {
            return image.data_mut().decode(count, &bytes);
        }
        self.scratch.resize_as(item_dim, file_ty);
        self.scratch.data_mut().decode(count, &bytes)?;
        let target = image.ty();
        target
            .cast_from(self.scratch.data(), image.data_mut(), count)
            .map_err(|err| err.with_path(&open.path))
    }

    /// Write `image` (one item of the file's type and shape) at `index`.
    pub fn write(&mut self, index: usize, image: &Image) -> Result<(), Error> {
        let offset = self.item_offset(index)?;
        let Some(open) = self.open.as_mut() else {
            return Err(not_open());
        };
        if !open.mode.is_writable() {
            return Err(usage("image session is read-only").with_path(&open.path));
        }
        if image.ty() != self.ty {
            return Err(Error::new(ErrorKind::UnsupportedConversion)
                .with_message(format!(
                    "cannot write {} pixels into a {} file",
                    image.ty(),
                    self.ty
                ))
                .with_path(&open.path)
                .with_hint("Convert the image to the file's element type first."));
        }
        let count = self.dim.item_size();
        if image.data().len() < count {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message(format!(
                    "image {} is smaller than one file item {}",
                    image.dim(),
                    self.dim.with_n(1)
                ))
                .with_path(&open.path));
        }
        let mut bytes = vec![0u8; count * self.ty.size()];
        image.data().encode(count, &mut bytes)?;
        trace!(path = %open.path.display(), index, offset, len = bytes.len(), "writing item");
        file::write_all_at(&mut open.file, &open.path, offset, &bytes)
    }

    /// Open `location.path`, read its item `location.index`, close.
    pub fn read_location(&mut self, location: &ImageLocation, image: &mut Image) -> Result<(), Error> {
        self.open(&location.path, FileMode::ReadOnly)?;
        let result = self.read(location.index, image);
        self.close();
        result
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.open.as_ref().map(|open| open.path.as_path())
    }

    pub fn mode(&self) -> Option<FileMode> {
        self.open.as_ref().map(|open| open.mode)
    }

    pub fn format_name(&self) -> Option<&'static str> {
        self.format.as_ref().map(|format| format.name())
    }

    pub fn dim(&self) -> ArrayDim {
        self.dim
    }

    pub fn element_type(&self) -> Type {
        self.ty
    }

    /// Main header values parsed by the format.
    pub fn header(&self) -> &ObjectDict {
        &self.header
    }

    pub fn header_size(&self) -> u64 {
        self.format.as_ref().map_or(0, |format| format.header_size())
    }

    pub fn pad_size(&self) -> u64 {
        self.format.as_ref().map_or(0, |format| format.pad_size())
    }

    /// Bytes of one item on disk, excluding padding.
    pub fn item_bytes(&self) -> u64 {
        (self.dim.item_size() * self.ty.size()) as u64
    }

    /// Byte offset of 1-based item `index` in the open file.
    pub fn item_offset(&self, index: usize) -> Result<u64, Error> {
        let Some(open) = self.open.as_ref() else {
            return Err(not_open());
        };
        if index < ImageLocation::FIRST || index > self.dim.n {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("file holds {} items", self.dim.n))
                .with_index(index)
                .with_path(&open.path));
        }
        Ok(item_offset(self.header_size(), self.pad_size(), self.item_bytes(), index))
    }
}

impl fmt::Debug for ImageIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageIo")
            .field("format", &self.format_name())
            .field("path", &self.path())
            .field("mode", &self.mode())
            .field("dim", &self.dim)
            .field("type", &self.ty)
            .finish()
    }
}

fn build_format(key: &str) -> Result<Box<dyn ImageFormat>, Error> {
    match image_formats().builder(key) {
        Some(builder) => Ok(builder()),
        None => Err(Error::new(ErrorKind::UnknownFormat)
            .with_message(format!("no image format registered for `{key}`"))
            .with_hint("Run `emio formats` to list registered keys.")),
    }
}

fn not_open() -> Error {
    usage("image session is not open")
}

#[cfg(test)]
mod tests {
    use super::{ImageFormat, ImageHeader, ImageIo, item_offset};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::file::FileMode;
    use crate::core::formats;
    use crate::core::image::{ArrayDim, Image};
    use crate::core::object::ObjectDict;
    use crate::core::registry::image_formats;
    use crate::core::types::Type;
    use std::fs::File;
    use std::path::Path;
    use std::sync::Arc;

    struct Probe(&'static str);

    impl ImageFormat for Probe {
        fn name(&self) -> &'static str {
            self.0
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["probe-ext"]
        }

        fn read_header(&mut self, _file: &mut File, _path: &Path) -> Result<ImageHeader, Error> {
            Ok(ImageHeader {
                dim: ArrayDim::new(1, 1, 1, 1),
                ty: Type::uint8(),
                values: ObjectDict::new(),
            })
        }

        fn write_header(&mut self, _: &mut File, _: &Path, _: ArrayDim, _: Type) -> Result<(), Error> {
            Ok(())
        }

        fn header_size(&self) -> u64 {
            0
        }

        fn supports_type(&self, _ty: Type) -> bool {
            true
        }
    }

    #[test]
    fn offsets_follow_header_item_and_pad() {
        // 10x10 float items behind a 512-byte header, 8 bytes of padding each.
        let (h, p, item) = (512, 8, 10 * 10 * 4);
        assert_eq!(item_offset(h, p, item, 1), 512);
        assert_eq!(item_offset(h, p, item, 2), 512 + 408);
        assert_eq!(item_offset(h, p, item, 5), 512 + 4 * 408);
        assert_eq!(item_offset(1024, 0, 2 * 3 * 4 * 2, 5), 1024 + 4 * 48);
    }

    #[test]
    fn second_registration_of_a_key_wins() {
        ImageIo::register_impl(Arc::new(|| Box::new(Probe("probe-a")) as Box<dyn ImageFormat>));
        ImageIo::register_impl(Arc::new(|| Box::new(Probe("probe-b")) as Box<dyn ImageFormat>));
        let builder = image_formats().builder("probe-ext").expect("registered");
        assert_eq!(builder().name(), "probe-b");
        assert!(ImageIo::has_impl("probe-a"));
        assert_eq!(ImageIo::with_format("probe-ext").unwrap().format_name(), Some("probe-b"));
    }

    #[test]
    fn unknown_extension_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.unknown-ext");
        let mut io = ImageIo::new();
        let err = io.open(&path, FileMode::Truncate).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnknownFormat);
        assert!(!io.is_open());
    }

    #[test]
    fn session_state_is_enforced() {
        formats::register_builtin();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.em");
        let mut io = ImageIo::new();
        let mut image = Image::new();
        assert_eq!(io.read(1, &mut image).unwrap_err().kind(), ErrorKind::Usage);

        io.open(&path, FileMode::Truncate).expect("open");
        let err = io.open(&path, FileMode::Truncate).expect_err("already open");
        assert_eq!(err.kind(), ErrorKind::Usage);
        io.create_file(ArrayDim::new(4, 4, 1, 2), Type::float()).expect("create");
        io.close();
        io.close();
        assert!(!io.is_open());

        io.open(&path, FileMode::ReadOnly).expect("reopen");
        let err = io.create_file(ArrayDim::new(4, 4, 1, 2), Type::float()).expect_err("mode");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = io.write(1, &Image::with_dim(ArrayDim::new(4, 4, 1, 1), Type::float())).expect_err("read-only");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(io.read(0, &mut image).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(io.read(3, &mut image).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
    }

    #[test]
    fn read_converts_but_write_requires_file_type() {
        formats::register_builtin();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stack.mrcs");
        let dim = ArrayDim::new(2, 2, 1, 3);
        let mut io = ImageIo::new();
        io.open(&path, FileMode::Truncate).expect("open");
        io.create_file(dim, Type::float()).expect("create");

        let mut item = Image::with_dim(dim.with_n(1), Type::float());
        item.as_mut_slice::<f32>().unwrap().copy_from_slice(&[1.5, -2.3, 3.9, 0.0]);
        io.write(3, &item).expect("write");

        let wrong = Image::with_dim(dim.with_n(1), Type::double());
        assert_eq!(io.write(1, &wrong).unwrap_err().kind(), ErrorKind::UnsupportedConversion);
        io.close();

        io.open(&path, FileMode::ReadOnly).expect("reopen");
        let mut as_int = Image::with_dim(ArrayDim::new(1, 1, 1, 1), Type::int32());
        io.read(3, &mut as_int).expect("read");
        assert_eq!(as_int.dim(), dim.with_n(1));
        assert_eq!(as_int.as_slice::<i32>(), Some(&[1, -2, 3, 0][..]));

        let mut untyped = Image::new();
        io.read(3, &mut untyped).expect("read");
        assert_eq!(untyped.ty(), Type::float());
        assert_eq!(untyped.as_slice::<f32>(), item.as_slice::<f32>());
    }
}
