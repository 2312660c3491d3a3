//! Purpose: Define the public Rust API boundary for emio.
//! Exports: Value model, tables, image and table sessions, format plug-in traits.
//! Role: Additive-only surface used by the CLI, tests and external format crates.
//! Invariants: Everything a format implementation needs is reachable from here.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::buffer::Buffer;
pub use crate::core::column::{Column, ColumnKey, ColumnMap};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::file::FileMode;
pub use crate::core::formats::register_builtin;
pub use crate::core::image::{ArrayDim, Image, ImageLocation};
pub use crate::core::image_io::{ImageFormat, ImageFormatBuilder, ImageHeader, ImageIo, item_offset};
pub use crate::core::object::{Object, ObjectDict};
pub use crate::core::query::{QueryValue, RowQuery, RowUpdate};
pub use crate::core::table::{Row, RowOperation, RowPredicate, Table};
pub use crate::core::table_io::{TableFormat, TableFormatBuilder, TableIo};
pub use crate::core::types::{Element, Family, Scalar, Type, infer_from_string, infer_from_window};
