//! Purpose: Process-wide maps from format key (name or extension) to a format builder.
//! Exports: `Registry`, `image_formats`, `table_formats`.
//! Role: Shared plumbing behind `ImageIo` / `TableIo` format selection.
//! Invariants: Keys are case-sensitive exact matches; re-registering a key replaces it.
//! Invariants: Entries are never removed; tests isolate themselves with distinct keys.
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::core::image_io::ImageFormatBuilder;
use crate::core::table_io::TableFormatBuilder;

pub struct Registry<B> {
    kind: &'static str,
    builders: RwLock<HashMap<String, B>>,
}

impl<B: Clone> Registry<B> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `builder` under every key; true when at least one key was new.
    pub fn register<I, S>(&self, keys: I, builder: B) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builders = self.builders.write().unwrap_or_else(PoisonError::into_inner);
        let mut any_new = false;
        for key in keys {
            let key = key.into();
            if builders.insert(key.clone(), builder.clone()).is_some() {
                tracing::debug!(kind = self.kind, key = %key, "replacing registered format");
            } else {
                any_new = true;
            }
        }
        any_new
    }

    pub fn has(&self, key: &str) -> bool {
        self.builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn builder(&self, key: &str) -> Option<B> {
        self.builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

pub fn image_formats() -> &'static Registry<ImageFormatBuilder> {
    static IMAGE_FORMATS: OnceLock<Registry<ImageFormatBuilder>> = OnceLock::new();
    IMAGE_FORMATS.get_or_init(|| Registry::new("image"))
}

pub fn table_formats() -> &'static Registry<TableFormatBuilder> {
    static TABLE_FORMATS: OnceLock<Registry<TableFormatBuilder>> = OnceLock::new();
    TABLE_FORMATS.get_or_init(|| Registry::new("table"))
}
