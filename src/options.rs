//! Creation options for the destination slices
//!
//! Source image structure metadata is sorted into creation options by a
//! small rule table. Keys describing the old shape are dropped, the codec
//! key is renamed, format tuning flags are bundled into the free-form
//! `OPTIONS` value and anything unknown passes through as a creation option.

use crate::layout::{ChunkPlan, VolumeDescriptor};
use crate::metadata::{BLOCKXSIZE, BLOCKYSIZE, COMPRESS, COMPRESSION, OPTIONS, ZSIZE, ZSLICE};
use std::fmt;

/// Where a source metadata entry ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionClass {
    /// Not carried over
    Drop,
    /// Carried over as a creation option under a new key and value
    Rewrite(String, String),
    /// Carried over unchanged as a creation option
    CreationOption,
    /// Appended to the free-form `OPTIONS` value
    FreeFormOption,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    Drop,
    RenameTo(&'static str),
    FreeForm,
}

/// Classification rules, matched case-insensitively on the key
const RULES: &[(&str, Rule)] = &[
    (COMPRESSION, Rule::RenameTo(COMPRESS)),
    (ZSLICE, Rule::Drop),
    (ZSIZE, Rule::Drop),
    ("V2", Rule::Drop),
    ("V1", Rule::FreeForm),
    ("GZ", Rule::FreeForm),
    ("ZSTD", Rule::FreeForm),
    ("RAWZ", Rule::FreeForm),
    ("DEFLATE", Rule::FreeForm),
    ("LERC_PREC", Rule::FreeForm),
];

/// Classify one source metadata entry
pub fn classify(key: &str, value: &str) -> OptionClass {
    match RULES.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
        Some((_, Rule::Drop)) => OptionClass::Drop,
        Some((_, Rule::RenameTo(new_key))) => {
            OptionClass::Rewrite(new_key.to_string(), value.to_string())
        }
        Some((_, Rule::FreeForm)) => OptionClass::FreeFormOption,
        None => OptionClass::CreationOption,
    }
}

/// Ordered list of creation options with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationOptions {
    entries: Vec<(String, String)>,
}

impl CreationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, even if the key is already present
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace the value of an existing key, or append it
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Options for the destination slices of a transposed volume
    ///
    /// The source metadata is classified entry by entry, free-form tokens
    /// are joined into `OPTIONS`, then the tiling and the new depth (the
    /// original Y size) are set explicitly.
    pub fn for_transpose(descriptor: &VolumeDescriptor, plan: &ChunkPlan) -> Self {
        let mut options = Self::new();
        let mut free_form: Vec<String> = Vec::new();

        for (key, value) in &descriptor.metadata {
            match classify(key, value) {
                OptionClass::Drop => {}
                OptionClass::Rewrite(k, v) => options.push(k, v),
                OptionClass::CreationOption => options.push(key.as_str(), value.as_str()),
                OptionClass::FreeFormOption => free_form.push(format!("{}={}", key, value)),
            }
        }

        if !free_form.is_empty() {
            options.set(OPTIONS, free_form.join(" "));
        }

        options.set(BLOCKXSIZE, plan.tile_x.to_string());
        options.set(BLOCKYSIZE, plan.page_size.to_string());
        options.set(ZSIZE, descriptor.y_size.to_string());
        options
    }
}

impl fmt::Display for CreationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CreationOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
