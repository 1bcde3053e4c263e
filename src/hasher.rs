// Copyright 2016 Mozilla Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming fingerprint accumulator.
//!
//! Wraps the MD5 primitive (a `compilercheck`-grade 128-bit digest is all
//! that's asked of it; the specific hash family is an external
//! implementation detail, not something this crate reimplements) behind a
//! `delimiter`-aware API so that concatenation of fields can never be
//! ambiguous: `hash("ab") || hash("c")` must differ from
//! `hash("a") || hash("bc")`.

use md5::{Digest as Md5Digest, Md5};

/// A fixed-width digest paired with the total number of bytes that produced
/// it. Two `FileHash`es are equal iff both fields match; `size` is part of
/// cache-path derivation, not just a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHash {
    pub digest: [u8; 16],
    pub size: u32,
}

impl FileHash {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// Streaming hash accumulator. `start` / `update` / `delimiter` /
/// `finalize`; the Hasher does no I/O of its own, callers feed it bytes.
#[derive(Clone)]
pub struct Hasher {
    md5: Md5,
    size: u64,
}

impl Hasher {
    pub fn start() -> Hasher {
        Hasher {
            md5: Md5::new(),
            size: 0,
        }
    }

    /// Mix `bytes` into the running digest.
    pub fn update(&mut self, bytes: &[u8]) {
        self.md5.update(bytes);
        self.size += bytes.len() as u64;
    }

    /// Mix a zero byte, `label`'s bytes, and another zero byte into the
    /// digest. MUST be called between every logical field fed to the same
    /// Hasher so that two different splits of the same byte stream never
    /// collide.
    pub fn delimiter(&mut self, label: &str) {
        self.update(&[0u8]);
        self.update(label.as_bytes());
        self.update(&[0u8]);
    }

    pub fn finalize(self) -> FileHash {
        let digest = self.md5.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest);
        FileHash {
            digest: out,
            size: self.size as u32,
        }
    }

    /// Number of bytes consumed so far, without finalizing.
    pub fn bytes_so_far(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut h1 = Hasher::start();
        h1.update(b"hello");
        h1.delimiter("field");
        h1.update(b"world");
        let f1 = h1.finalize();

        let mut h2 = Hasher::start();
        h2.update(b"hello");
        h2.delimiter("field");
        h2.update(b"world");
        let f2 = h2.finalize();

        assert_eq!(f1, f2);
    }

    #[test]
    fn test_delimiter_prevents_concatenation_ambiguity() {
        // hash("ab") || hash("c") must differ from hash("a") || hash("bc")
        let mut h1 = Hasher::start();
        h1.update(b"ab");
        h1.delimiter("x");
        h1.update(b"c");
        let f1 = h1.finalize();

        let mut h2 = Hasher::start();
        h2.update(b"a");
        h2.delimiter("x");
        h2.update(b"bc");
        let f2 = h2.finalize();

        assert_ne!(f1, f2);
    }

    #[test]
    fn test_size_tracks_total_bytes() {
        let mut h = Hasher::start();
        h.update(b"abc");
        h.delimiter("l");
        h.update(b"de");
        let f = h.finalize();
        // 3 + (1 + 1 + 1) + 2 = 8
        assert_eq!(f.size, 8);
    }

    #[test]
    fn test_no_delimiter_can_collide_across_split() {
        // Without a delimiter between fields, two different splits of the
        // same concatenation hash identically. This documents *why*
        // `delimiter` exists; it is not itself the contract under test.
        let mut h1 = Hasher::start();
        h1.update(b"ab");
        h1.update(b"c");
        let f1 = h1.finalize();

        let mut h2 = Hasher::start();
        h2.update(b"a");
        h2.update(b"bc");
        let f2 = h2.finalize();

        assert_eq!(f1, f2);
    }
}
