// Core modules: runtime types, values, tables, file sessions and built-in formats.
pub mod buffer;
pub mod column;
pub mod error;
pub mod file;
pub mod formats;
pub mod image;
pub mod image_io;
pub mod object;
pub mod query;
pub mod registry;
pub mod table;
pub mod table_io;
pub mod types;
