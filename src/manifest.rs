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

//! The per-source-hash manifest: records which object-hash to use for
//! which tuple of include-file hashes, so direct mode can decide a hit
//! without running the preprocessor. Bit-exact on-disk format per spec
//! §6 "Manifest file format" (kept for interoperability, even though
//! nothing outside this crate reads it).

use crate::errors::*;
use crate::hasher::FileHash;
use crate::scanner::IncludeSet;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{self, Read, Write};

const MAGIC: &[u8; 4] = b"cCmF";
const VERSION: u8 = 0;
const HASH_SIZE: u8 = 16;

/// Both the path pool and the hash pool are capped; once a `put` would
/// exceed this, the write is skipped entirely rather than evicting
/// (spec §4.5 "Capacity").
pub const MAX_POOL_ENTRIES: usize = 16384;

/// One `(include-path ⇒ include-hash)` pair, referenced by index from
/// section 3's entries. `path_index` indexes into `path_pool`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HashPoolEntry {
    path_index: u32,
    hash: FileHash,
}

/// One `(include-set-reference, object-hash)` candidate (spec §3
/// ManifestEntry), represented as indices into `hash_pool` rather than an
/// owned copy of the include set (spec §9 "no cyclic references").
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    hash_indices: Vec<u32>,
    object_hash: FileHash,
}

/// A manifest's in-memory representation: a DAG of parallel ordered
/// sequences (path pool, hash pool, entries), never a graph with back-
/// references (spec §9 "Cyclic references: none").
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    path_pool: Vec<String>,
    hash_pool: Vec<HashPoolEntry>,
    entries: Vec<Entry>,
}

impl Manifest {
    pub fn new() -> Manifest {
        Manifest::default()
    }

    /// Parse a manifest from its gzip-compressed on-disk bytes. Any
    /// magic/version/gzip failure is reported as `Ok(None)`, per spec §6:
    /// "A manifest that fails magic/version/gzip checks MUST be treated
    /// as absent", which is also the behavior spec §7 calls "manifest
    /// corruption".
    pub fn read(bytes: &[u8]) -> Option<Manifest> {
        match Self::try_read(bytes) {
            Ok(m) => Some(m),
            Err(e) => {
                debug!("manifest corrupt, treating as absent: {}", e);
                None
            }
        }
    }

    fn try_read(bytes: &[u8]) -> Result<Manifest> {
        let mut raw = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut raw)?;
        let mut r = io::Cursor::new(raw);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!(ErrorKind::ManifestError("bad magic".into()));
        }
        let version = r.read_u8()?;
        if version != VERSION {
            bail!(ErrorKind::ManifestError(format!("unsupported version {}", version)));
        }
        let hash_size = r.read_u8()?;
        if hash_size != HASH_SIZE {
            bail!(ErrorKind::ManifestError(format!("unsupported hash size {}", hash_size)));
        }
        let _reserved = r.read_u16::<BigEndian>()?;

        // Section 1: path pool.
        let n_paths = r.read_u32::<BigEndian>()?;
        let mut path_pool = Vec::with_capacity(n_paths as usize);
        for _ in 0..n_paths {
            path_pool.push(read_cstr(&mut r)?);
        }

        // Section 2: hash pool.
        let n_hashes = r.read_u32::<BigEndian>()?;
        let mut hash_pool = Vec::with_capacity(n_hashes as usize);
        for _ in 0..n_hashes {
            let path_index = r.read_u32::<BigEndian>()?;
            let mut digest = [0u8; 16];
            r.read_exact(&mut digest)?;
            let size = r.read_u32::<BigEndian>()?;
            hash_pool.push(HashPoolEntry {
                path_index,
                hash: FileHash { digest, size },
            });
        }

        // Section 3: entries.
        let n_entries = r.read_u32::<BigEndian>()?;
        let mut entries = Vec::with_capacity(n_entries as usize);
        for _ in 0..n_entries {
            let m = r.read_u32::<BigEndian>()?;
            let mut hash_indices = Vec::with_capacity(m as usize);
            for _ in 0..m {
                hash_indices.push(r.read_u32::<BigEndian>()?);
            }
            let mut digest = [0u8; 16];
            r.read_exact(&mut digest)?;
            let size = r.read_u32::<BigEndian>()?;
            entries.push(Entry {
                hash_indices,
                object_hash: FileHash { digest, size },
            });
        }

        Ok(Manifest {
            path_pool,
            hash_pool,
            entries,
        })
    }

    /// Serialize to the gzip-compressed on-disk form described in spec §6.
    pub fn write(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(MAGIC);
        raw.push(VERSION);
        raw.push(HASH_SIZE);
        raw.write_u16::<BigEndian>(0).unwrap();

        raw.write_u32::<BigEndian>(self.path_pool.len() as u32).unwrap();
        for p in &self.path_pool {
            raw.extend_from_slice(p.as_bytes());
            raw.push(0);
        }

        raw.write_u32::<BigEndian>(self.hash_pool.len() as u32).unwrap();
        for h in &self.hash_pool {
            raw.write_u32::<BigEndian>(h.path_index).unwrap();
            raw.extend_from_slice(&h.hash.digest);
            raw.write_u32::<BigEndian>(h.hash.size).unwrap();
        }

        raw.write_u32::<BigEndian>(self.entries.len() as u32).unwrap();
        for e in &self.entries {
            raw.write_u32::<BigEndian>(e.hash_indices.len() as u32).unwrap();
            for idx in &e.hash_indices {
                raw.write_u32::<BigEndian>(*idx).unwrap();
            }
            raw.extend_from_slice(&e.object_hash.digest);
            raw.write_u32::<BigEndian>(e.object_hash.size).unwrap();
        }

        let mut out = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut out, Compression::default());
            encoder.write_all(&raw).expect("writing to an in-memory buffer");
        }
        out
    }

    /// Probe every entry, in order, against the filesystem by calling
    /// `current_hash(path)` for each referenced include; the first entry
    /// whose every include still matches its stored hash wins. Returns
    /// `None` if no entry fully matches (spec §4.5 `get`).
    pub fn get<F>(&self, mut current_hash: F) -> Option<FileHash>
    where
        F: FnMut(&str) -> Option<FileHash>,
    {
        let mut cache: HashMap<u32, Option<FileHash>> = HashMap::new();
        'entry: for entry in &self.entries {
            for &idx in &entry.hash_indices {
                let pool_entry = self.hash_pool.get(idx as usize)?;
                let current = cache
                    .entry(idx)
                    .or_insert_with(|| {
                        self.path_pool
                            .get(pool_entry.path_index as usize)
                            .and_then(|p| current_hash(p))
                    })
                    .clone();
                match current {
                    Some(ref h) if *h == pool_entry.hash => continue,
                    _ => continue 'entry,
                }
            }
            return Some(entry.object_hash.clone());
        }
        None
    }

    /// Append a new entry mapping `includes` to `object_hash`, de-
    /// duplicating against the existing path/hash pools. Returns `false`
    /// (write skipped) if the pools are already at capacity or if an
    /// identical entry already exists; spec §4.5 requires "a new entry
    /// MUST NOT be added if an identical entry already exists" and allows
    /// a capacity overflow to simply skip the write rather than evict.
    pub fn put(&mut self, includes: &IncludeSet, object_hash: FileHash) -> bool {
        let mut hash_indices: Vec<u32> = Vec::with_capacity(includes.len());
        // Stage pool growth so a capacity failure partway through doesn't
        // leave the manifest half-mutated.
        let mut new_paths: Vec<String> = vec![];
        let mut new_hashes: Vec<HashPoolEntry> = vec![];
        let mut path_pool_len = self.path_pool.len();
        let mut hash_pool_len = self.hash_pool.len();

        let mut sorted: Vec<(&String, &FileHash)> = includes.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        for (path, hash) in sorted {
            let path_index = match self.path_pool.iter().position(|p| p == path) {
                Some(i) => i as u32,
                None => match new_paths.iter().position(|p| p == path) {
                    Some(i) => (self.path_pool.len() + i) as u32,
                    None => {
                        if path_pool_len >= MAX_POOL_ENTRIES {
                            return false;
                        }
                        new_paths.push(path.clone());
                        path_pool_len += 1;
                        (path_pool_len - 1) as u32
                    }
                },
            };

            let existing = self
                .hash_pool
                .iter()
                .position(|h| h.path_index == path_index && h.hash == *hash)
                .or_else(|| {
                    new_hashes
                        .iter()
                        .position(|h| h.path_index == path_index && h.hash == *hash)
                        .map(|i| self.hash_pool.len() + i)
                });
            let hash_index = match existing {
                Some(i) => i as u32,
                None => {
                    if hash_pool_len >= MAX_POOL_ENTRIES {
                        return false;
                    }
                    new_hashes.push(HashPoolEntry {
                        path_index,
                        hash: hash.clone(),
                    });
                    hash_pool_len += 1;
                    (hash_pool_len - 1) as u32
                }
            };
            hash_indices.push(hash_index);
        }
        hash_indices.sort_unstable();

        if self.entries.iter().any(|e| e.hash_indices == hash_indices && e.object_hash == object_hash) {
            // Identical entry already present; nothing to append.
            return true;
        }

        self.path_pool.extend(new_paths);
        self.hash_pool.extend(new_hashes);
        self.entries.push(Entry {
            hash_indices,
            object_hash,
        });
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_cstr<R: Read>(r: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    fn fh(byte: u8) -> FileHash {
        FileHash {
            digest: [byte; 16],
            size: 10,
        }
    }

    #[test]
    fn test_roundtrip_put_get() {
        let mut m = Manifest::new();
        let mut includes = IncludeSet::new();
        includes.insert("a.h".to_string(), fh(1));
        includes.insert("b.h".to_string(), fh(2));
        assert!(m.put(&includes, fh(0xff)));

        let current = |p: &str| match p {
            "a.h" => Some(fh(1)),
            "b.h" => Some(fh(2)),
            _ => None,
        };
        assert_eq!(m.get(current), Some(fh(0xff)));
    }

    #[test]
    fn test_get_none_when_include_changed() {
        let mut m = Manifest::new();
        let mut includes = IncludeSet::new();
        includes.insert("a.h".to_string(), fh(1));
        m.put(&includes, fh(0xff));

        let current = |p: &str| match p {
            "a.h" => Some(fh(99)),
            _ => None,
        };
        assert_eq!(m.get(current), None);
    }

    #[test]
    fn test_put_skips_exact_duplicate() {
        let mut m = Manifest::new();
        let mut includes = IncludeSet::new();
        includes.insert("a.h".to_string(), fh(1));
        m.put(&includes, fh(0xff));
        m.put(&includes, fh(0xff));
        assert_eq!(m.entries.len(), 1);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut m = Manifest::new();
        let mut includes = IncludeSet::new();
        includes.insert("a.h".to_string(), fh(1));
        m.put(&includes, fh(0xff));

        let bytes = m.write();
        let m2 = Manifest::read(&bytes).expect("should parse");
        let current = |p: &str| match p {
            "a.h" => Some(fh(1)),
            _ => None,
        };
        assert_eq!(m2.get(current), Some(fh(0xff)));
    }

    #[test]
    fn test_read_rejects_bad_magic() {
        let mut out = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut out, Compression::default());
            encoder.write_all(b"NOPE").unwrap();
        }
        assert!(Manifest::read(&out).is_none());
    }

    #[test]
    fn test_read_rejects_non_gzip() {
        assert!(Manifest::read(b"not gzip data").is_none());
    }

    #[test]
    fn test_fully_matching_entry_after_second_candidate() {
        let mut m = Manifest::new();
        let mut old = IncludeSet::new();
        old.insert("a.h".to_string(), fh(1));
        m.put(&old, fh(0xaa));

        let mut new = IncludeSet::new();
        new.insert("a.h".to_string(), fh(2));
        m.put(&new, fh(0xbb));

        let current = |p: &str| match p {
            "a.h" => Some(fh(2)),
            _ => None,
        };
        assert_eq!(m.get(current), Some(fh(0xbb)));
    }
}
