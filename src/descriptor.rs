//! The metadata block format: INI-like text with `[Section]` headers
//! and `key = value` lines.
//!
//! A file's descriptor lives in `[Main]` (identity, part count, length,
//! content hash, chain link `n`, padding `p`) and `[Part]` (one entry
//! per part, keyed by its absolute index). Before encryption every
//! descriptor block is padded with `Main:p` so the serialized text is
//! exactly one block long.

use crate::crypto;
use crate::error::{DfsError, DfsResult};

/// Section and key names used by the file engine.
pub const MAIN: &str = "Main";
pub const PART: &str = "Part";

/// An ordered key-value document. Sections and keys keep insertion
/// order so the serialized form is deterministic.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `section:key` to `value`, replacing an existing entry.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let index = match self.sections.iter().position(|(name, _)| name == section) {
            Some(index) => index,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[index].1;
        match entries.iter().position(|(k, _)| k == key) {
            Some(slot) => entries[slot].1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)?
            .1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, section: &str, key: &str) -> Option<u64> {
        self.get(section, key)?.parse().ok()
    }

    /// Render as text.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    /// Parse a decrypted descriptor block. Anything that is not valid
    /// UTF-8 key-value text (wrong key, corrupted blob) is a
    /// [`DfsError::MalformedDescriptor`].
    pub fn parse(data: &[u8]) -> DfsResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| DfsError::MalformedDescriptor("not text".to_string()))?;
        let mut descriptor = Self::new();
        let mut current: Option<String> = None;
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                descriptor.sections.push((name.to_string(), Vec::new()));
                current = Some(name.to_string());
                continue;
            }
            let section = current
                .clone()
                .ok_or_else(|| DfsError::MalformedDescriptor(format!("entry outside any section: {}", line)))?;
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| DfsError::MalformedDescriptor(format!("bad entry: {}", line)))?;
            descriptor.set(&section, key.trim(), value.trim());
        }
        Ok(descriptor)
    }

    /// Serialize with `Main:p` padding so the result is exactly
    /// `block_size` bytes. Fails when the unpadded form already exceeds
    /// the block.
    pub fn pad_to_block(&mut self, block_size: usize) -> DfsResult<Vec<u8>> {
        self.set(MAIN, "p", "");
        let base = self.serialize().len();
        if base > block_size {
            return Err(DfsError::MalformedDescriptor(format!(
                "descriptor needs {} bytes, block is {}",
                base, block_size
            )));
        }
        self.set(MAIN, "p", crypto::random_printable(block_size - base));
        let out = self.serialize().into_bytes();
        debug_assert_eq!(out.len(), block_size);
        Ok(out)
    }
}
