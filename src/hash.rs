// src/hash.rs

//! Content digests for package trees
//!
//! A package's identity is the SHA-256 over its files: each file contributes
//! its path relative to the package root and its contents, in sorted path
//! order, so the digest is independent of directory iteration order.

use sha2::{Digest, Sha256};

/// Incremental digest over a package tree
pub struct TreeHasher {
    inner: Sha256,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Add one file; callers feed files in sorted path order
    pub fn add_file(&mut self, relative_path: &str, contents: &[u8]) {
        // Length prefixes keep ("ab", "c") distinct from ("a", "bc")
        self.inner.update((relative_path.len() as u64).to_le_bytes());
        self.inner.update(relative_path.as_bytes());
        self.inner.update((contents.len() as u64).to_le_bytes());
        self.inner.update(contents);
    }

    /// Lowercase hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for TreeHasher {
    fn default() -> Self {
        Self::new()
    }
}
