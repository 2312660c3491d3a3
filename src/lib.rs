//! Purpose: Library crate behind the `emio` CLI: typed values, tables and image/table file I/O.
//! Exports: `api` (stable surface), `core` (implementation modules).
//! Role: Shared by the binary, integration tests and format plug-ins.
//! Invariants: Prefer `api` paths; `core` layout may change between releases.
//! Invariants: Built-in formats are registered explicitly via `api::register_builtin`.
pub mod api;
pub mod core;
