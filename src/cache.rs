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

//! The content-addressed cache store: turns a `FileHash` into a path on
//! disk, and stages/materializes artifacts under that path. See spec
//! §3 "CachePath" and §4.4.

use crate::errors::*;
use crate::hasher::FileHash;
use crate::util;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Gzip's two-byte magic number, used to sniff whether a cache file is
/// compressed without trusting a side channel.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The suffix (and thereby kind) of a cache artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Object,
    Stderr,
    Dep,
    Manifest,
}

impl ArtifactKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Object => ".o",
            ArtifactKind::Stderr => ".stderr",
            ArtifactKind::Dep => ".d",
            ArtifactKind::Manifest => ".manifest",
        }
    }
}

/// Fan-out directory depth and root shared by every path derivation; see
/// spec §3 CachePath: hex digest, `-<size>`, first `nlevels` hex chars
/// split into directory components, artifact suffix appended.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pub cache_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub nlevels: usize,
    pub enable_compression: bool,
    pub hardlink: bool,
}

impl CacheStore {
    pub fn new(cache_dir: PathBuf, temp_dir: PathBuf, nlevels: usize, enable_compression: bool, hardlink: bool) -> Self {
        CacheStore {
            cache_dir,
            temp_dir,
            nlevels,
            enable_compression,
            hardlink,
        }
    }

    /// Derive the on-disk path for `hash`'s artifact of `kind`, creating
    /// the fan-out directories along the way. Two equal `FileHash`es
    /// always yield the same path (spec §3 CachePath invariant).
    pub fn path_of(&self, hash: &FileHash, kind: ArtifactKind) -> Result<PathBuf> {
        let hex = hash.to_hex();
        let stem = format!("{}-{}", hex, hash.size);
        let nlevels = self.nlevels.max(1).min(hex.len());

        let mut dir = self.cache_dir.clone();
        for i in 0..nlevels {
            dir.push(&hex[i..i + 1]);
        }
        util::ensure_dir(&dir)?;

        let mut path = dir;
        path.push(format!("{}{}", stem, kind.suffix()));
        Ok(path)
    }

    /// Move `src` (expected to already live under `temp_dir`) into `dst`,
    /// optionally gzip-compressing it on the way. Writers go through a
    /// temp file and a single rename so readers never observe a partial
    /// file (spec §4.4, §5).
    pub fn stage(&self, src: &Path, dst: &Path, compress: bool) -> Result<()> {
        let tmp = util::temp_path(&self.temp_dir, "stage", ".tmp");
        util::ensure_dir(&self.temp_dir)?;
        if compress {
            let mut input = File::open(src)?;
            let out = File::create(&tmp)?;
            let mut encoder = GzEncoder::new(out, Compression::default());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?;
        } else {
            fs::copy(src, &tmp)?;
        }
        if let Some(parent) = dst.parent() {
            util::ensure_dir(parent)?;
        }
        fs::rename(&tmp, dst)?;
        Ok(())
    }

    /// Write `bytes` into `dst` via the same write-temp-then-rename
    /// discipline as `stage`.
    pub fn stage_bytes(&self, bytes: &[u8], dst: &Path, compress: bool) -> Result<()> {
        let tmp = util::temp_path(&self.temp_dir, "stage", ".tmp");
        util::ensure_dir(&self.temp_dir)?;
        {
            let out = File::create(&tmp)?;
            if compress {
                let mut encoder = GzEncoder::new(out, Compression::default());
                encoder.write_all(bytes)?;
                encoder.finish()?;
            } else {
                let mut out = out;
                out.write_all(bytes)?;
            }
        }
        if let Some(parent) = dst.parent() {
            util::ensure_dir(parent)?;
        }
        fs::rename(&tmp, dst)?;
        Ok(())
    }

    /// Copy (decompressing on the fly if needed) or hardlink `cached`
    /// to `dst`. Hardlinking is only used when `hardlink` is configured
    /// and the cached file is uncompressed (spec §4.4). A vanished
    /// source file between stat and open is reported as a cache miss via
    /// `Ok(false)` rather than an error, per spec §4.4's tolerance for
    /// racing cleanup.
    pub fn materialize(&self, cached: &Path, dst: &Path) -> Result<bool> {
        if !cached.is_file() {
            return Ok(false);
        }
        let compressed = match self.is_compressed(cached) {
            Ok(c) => c,
            Err(_) => return Ok(false),
        };
        if let Some(parent) = dst.parent() {
            util::ensure_dir(parent)?;
        }
        if dst.exists() {
            let _ = fs::remove_file(dst);
        }
        if !compressed && self.hardlink {
            match fs::hard_link(cached, dst) {
                Ok(()) => return Ok(true),
                Err(_) => { /* fall through to copy, e.g. cross-device */ }
            }
        }
        let result = if compressed {
            let input = match File::open(cached) {
                Ok(f) => f,
                Err(_) => return Ok(false),
            };
            let mut decoder = GzDecoder::new(input);
            let mut out = File::create(dst)?;
            io::copy(&mut decoder, &mut out).map(|_| ())
        } else {
            fs::copy(cached, dst).map(|_| ())
        };
        match result {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Read back a cache artifact's bytes, decompressing if needed.
    pub fn read(&self, cached: &Path) -> Result<Vec<u8>> {
        let compressed = self.is_compressed(cached)?;
        let mut buf = Vec::new();
        if compressed {
            let f = File::open(cached)?;
            GzDecoder::new(f).read_to_end(&mut buf)?;
        } else {
            File::open(cached)?.read_to_end(&mut buf)?;
        }
        Ok(buf)
    }

    /// Bump `cached`'s mtime to now. Racy with concurrent cleanup but
    /// idempotent (spec §5).
    pub fn refresh_mtime(&self, cached: &Path) -> Result<()> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let now = filetime::FileTime::from_seconds_since_1970(now.as_secs(), now.subsec_nanos());
        filetime::set_file_times(cached, now, now)
            .chain_err(|| format!("refreshing mtime of {}", cached.display()))
    }

    /// Sniff the gzip magic bytes to decide if `path` is compressed,
    /// without trusting any other signal (spec §4.4, §6).
    pub fn is_compressed(&self, path: &Path) -> Result<bool> {
        let mut f = File::open(path)?;
        let mut buf = [0u8; 2];
        match f.read_exact(&mut buf) {
            Ok(()) => Ok(buf == GZIP_MAGIC),
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> CacheStore {
        CacheStore::new(dir.join("cache"), dir.join("tmp"), 2, false, false)
    }

    fn fh(byte: u8, size: u32) -> FileHash {
        FileHash {
            digest: [byte; 16],
            size,
        }
    }

    #[test]
    fn test_path_of_equal_hashes_equal_paths() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let h = fh(0xab, 42);
        let p1 = store.path_of(&h, ArtifactKind::Object).unwrap();
        let p2 = store.path_of(&h, ArtifactKind::Object).unwrap();
        assert_eq!(p1, p2);
        assert!(p1.to_string_lossy().ends_with(".o"));
    }

    #[test]
    fn test_stage_then_materialize_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let h = fh(0x01, 5);
        let cached = store.path_of(&h, ArtifactKind::Object).unwrap();

        let src = dir.path().join("src.o");
        fs::write(&src, b"hello").unwrap();
        store.stage(&src, &cached, false).unwrap();

        let dst = dir.path().join("dst.o");
        assert!(store.materialize(&cached, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn test_stage_compressed_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = store(dir.path());
        store.enable_compression = true;
        let h = fh(0x02, 5);
        let cached = store.path_of(&h, ArtifactKind::Object).unwrap();

        let src = dir.path().join("src.o");
        fs::write(&src, b"world").unwrap();
        store.stage(&src, &cached, true).unwrap();

        assert!(store.is_compressed(&cached).unwrap());

        let dst = dir.path().join("dst.o");
        assert!(store.materialize(&cached, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"world");
    }

    #[test]
    fn test_materialize_missing_is_miss_not_error() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let h = fh(0x03, 1);
        let cached = store.path_of(&h, ArtifactKind::Object).unwrap();
        let dst = dir.path().join("dst.o");
        assert!(!store.materialize(&cached, &dst).unwrap());
    }
}
