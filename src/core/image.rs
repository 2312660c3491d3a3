//! Purpose: In-memory images: dimensions, tagged pixel buffer and header dictionaries.
//! Exports: `ArrayDim`, `Image`, `ImageLocation`.
//! Role: Unit of data moved by `ImageIo` sessions; also storable inside an `Object`.
//! Invariants: `data.len() == dim.size()` whenever the element type is non-null.
//! Invariants: `headers[0]` is the main header and always exists.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::buffer::Buffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::image_io::ImageIo;
use crate::core::object::ObjectDict;
use crate::core::types::{Element, Type};

/// Extent of an image stack: `n` items of `x * y * z` elements.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ArrayDim {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub n: usize,
}

impl ArrayDim {
    pub fn new(x: usize, y: usize, z: usize, n: usize) -> Self {
        Self { x, y, z, n }
    }

    /// Elements in one item.
    pub fn item_size(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Elements across all items.
    pub fn size(&self) -> usize {
        self.item_size() * self.n
    }

    /// Same item shape, `n` items.
    pub fn with_n(self, n: usize) -> Self {
        Self { n, ..self }
    }
}

impl fmt::Display for ArrayDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x, self.y, self.z, self.n)
    }
}

impl std::str::FromStr for ArrayDim {
    type Err = Error;

    /// Parses `X,Y,Z,N`; missing trailing values default to 1.
    fn from_str(text: &str) -> Result<Self, Error> {
        let parts = text
            .split(',')
            .map(|part| part.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid dimensions `{text}`"))
                    .with_hint("Use X,Y,Z,N, for example 10,10,1,1.")
                    .with_source(err)
            })?;
        if parts.is_empty() || parts.len() > 4 || parts.contains(&0) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid dimensions `{text}`"))
                .with_hint("Use one to four positive values: X,Y,Z,N."));
        }
        let at = |i: usize| parts.get(i).copied().unwrap_or(1);
        Ok(Self::new(at(0), at(1), at(2), at(3)))
    }
}

#[derive(Clone, PartialEq)]
pub struct Image {
    dim: ArrayDim,
    data: Buffer,
    headers: Vec<ObjectDict>,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            dim: ArrayDim::default(),
            data: Buffer::null(),
            headers: vec![ObjectDict::new()],
        }
    }
}

impl Image {
    /// An image without a type; reading into it adopts the file's type.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dim(dim: ArrayDim, ty: Type) -> Self {
        Self {
            dim,
            data: ty.allocate(dim.size()),
            headers: vec![ObjectDict::new()],
        }
    }

    pub fn dim(&self) -> ArrayDim {
        self.dim
    }

    pub fn ty(&self) -> Type {
        self.data.ty()
    }

    /// Pixel data size in bytes.
    pub fn data_size(&self) -> usize {
        self.data.byte_len()
    }

    pub fn data(&self) -> &Buffer {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Buffer {
        &mut self.data
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        self.data.as_slice()
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        self.data.as_mut_slice()
    }

    /// Change dimensions, keeping the element type.
    pub fn resize(&mut self, dim: ArrayDim) {
        self.dim = dim;
        self.data.resize(dim.size());
    }

    /// Change dimensions and element type.
    pub fn resize_as(&mut self, dim: ArrayDim, ty: Type) {
        self.dim = dim;
        self.data.reshape(ty, dim.size());
    }

    pub fn headers(&self) -> &[ObjectDict] {
        &self.headers
    }

    pub fn header(&self, index: usize) -> Result<&ObjectDict, Error> {
        let len = self.headers.len();
        self.headers.get(index).ok_or_else(|| header_out_of_range(index, len))
    }

    /// Mutable header `index`, creating empty headers up to it.
    pub fn header_mut(&mut self, index: usize) -> &mut ObjectDict {
        if index >= self.headers.len() {
            self.headers.resize_with(index + 1, ObjectDict::new);
        }
        &mut self.headers[index]
    }

    /// Read the item named by `location` into this image.
    pub fn read(&mut self, location: &ImageLocation) -> Result<(), Error> {
        ImageIo::new().read_location(location, self)
    }
}

fn header_out_of_range(index: usize, len: usize) -> Error {
    Error::new(ErrorKind::IndexOutOfRange)
        .with_message(format!("image has {len} headers"))
        .with_index(index)
}

impl Element for Image {
    const NAME: &'static str = "image";

    fn write_text(&self, out: &mut String) {
        out.push_str(&format!("{}<{}>", self.dim, self.ty()));
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dimensions: {}", self.dim)?;
        writeln!(f, "Type: {}", self.ty())?;
        writeln!(f, "Header:")?;
        for (key, value) in &self.headers[0] {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("dim", &self.dim)
            .field("type", &self.ty())
            .field("headers", &self.headers.len())
            .finish()
    }
}

/// One item inside an image file; indexes start at `FIRST`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ImageLocation {
    pub path: PathBuf,
    pub index: usize,
}

impl ImageLocation {
    pub const FIRST: usize = 1;

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::at(path, Self::FIRST)
    }

    pub fn at(path: impl AsRef<Path>, index: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            index,
        }
    }
}

impl fmt::Display for ImageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.path.display())
    }
}
