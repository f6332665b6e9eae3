//! db::shrink
//!
//! Reversible shortening of identifiers that exceed a backend's length limit.
//!
//! A long name keeps a readable prefix and gains a `_` plus 16 hex digits of
//! its BLAKE2b digest, so the same name always shrinks to the same
//! identifier. Every shrunk name is remembered so it can be expanded again
//! within the session.

use std::collections::HashMap;

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};

type Blake2b64 = Blake2b<U8>;

/// Length of the `_` + hex digest suffix.
const SUFFIX_LEN: usize = 17;

/// Bidirectional map between full and shortened identifiers.
#[derive(Debug, Clone)]
pub struct NameShrinker {
    max_length: usize,
    shrunk: HashMap<String, String>,
    expanded: HashMap<String, String>,
}

impl NameShrinker {
    /// Create a shrinker for identifiers of at most `max_length` bytes.
    ///
    /// Limits shorter than the digest suffix are raised to fit it.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(SUFFIX_LEN + 1),
            shrunk: HashMap::new(),
            expanded: HashMap::new(),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Shorten `name` if it exceeds the limit; otherwise return it unchanged.
    pub fn shrink(&mut self, name: &str) -> String {
        if name.len() <= self.max_length {
            return name.to_string();
        }
        if let Some(short) = self.shrunk.get(name) {
            return short.clone();
        }

        let digest = Blake2b64::digest(name.as_bytes());
        let mut keep = self.max_length - SUFFIX_LEN;
        while !name.is_char_boundary(keep) {
            keep -= 1;
        }
        let short = format!("{}_{}", &name[..keep], hex::encode(digest));

        tracing::trace!(full = name, short = %short, "shrunk identifier");
        self.shrunk.insert(name.to_string(), short.clone());
        self.expanded.insert(short.clone(), name.to_string());
        short
    }

    /// Recover the full name of a shrunk identifier.
    ///
    /// Names that were never shrunk are returned unchanged.
    pub fn expand(&self, name: &str) -> String {
        self.expanded
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}
