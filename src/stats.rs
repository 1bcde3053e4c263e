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

//! Per-cache-directory statistics counters (spec §2 "Statistics counter
//! file" — named as an external collaborator whose bit-exact design is
//! out of scope for the core, spec §1). Named counters relevant to the
//! end-to-end scenarios in spec §8 (`cache_miss`, `files_to_cache`,
//! `direct_cache_hit`, `preprocessor_cache_hit`, ...) are bumped by the
//! driver on every decision path.
//!
//! This is the one place spec §5 calls out a per-directory lock file:
//! `stats.lock` is created with `create_new` and removed when done, so
//! concurrent processes sharing a cache directory don't race each other's
//! read-modify-write of the flat counter file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const STATS_FILE: &str = "stats";
const LOCK_FILE: &str = "stats.lock";
const LOCK_RETRIES: u32 = 50;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Counter {
    CacheMiss,
    CacheHit,
    DirectCacheHit,
    PreprocessorCacheHit,
    FilesToCache,
    CacheErrors,
    CompileFailed,
    NotCompilation,
    Bypassed,
}

impl Counter {
    fn name(self) -> &'static str {
        match self {
            Counter::CacheMiss => "cache_miss",
            Counter::CacheHit => "cache_hit",
            Counter::DirectCacheHit => "direct_cache_hit",
            Counter::PreprocessorCacheHit => "preprocessor_cache_hit",
            Counter::FilesToCache => "files_to_cache",
            Counter::CacheErrors => "cache_errors",
            Counter::CompileFailed => "compile_failed",
            Counter::NotCompilation => "not_a_compilation",
            Counter::Bypassed => "bypassed",
        }
    }

}

struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(cache_dir: &Path) -> io::Result<LockGuard> {
        let path = cache_dir.join(LOCK_FILE);
        for _ in 0..LOCK_RETRIES {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(LockGuard { path }),
                Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
        // Lock contention this persistent most likely means a stale lock
        // from a crashed process; proceed without it rather than wedging
        // every subsequent compile (counters are best-effort, spec §2).
        Ok(LockGuard { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Increment `counter` by one in `<cache_dir>/stats`, under the per-
/// directory lock. Failures are swallowed: a statistics update must
/// never be allowed to fail a compile (spec §4.7).
pub fn bump(cache_dir: &Path, counter: Counter) {
    if let Err(e) = bump_inner(cache_dir, counter) {
        debug!("failed to update stats: {}", e);
    }
}

fn bump_inner(cache_dir: &Path, counter: Counter) -> io::Result<()> {
    crate::util::ensure_dir(cache_dir)?;
    let _lock = LockGuard::acquire(cache_dir)?;
    let path = cache_dir.join(STATS_FILE);
    let mut counts = read_counts(&path);
    *counts.entry(counter.name().to_string()).or_insert(0) += 1;
    write_counts(&path, &counts)
}

/// Read back all counters, for `--show-stats`.
pub fn read(cache_dir: &Path) -> BTreeMap<String, u64> {
    read_counts(&cache_dir.join(STATS_FILE))
}

/// Reset every counter to zero, for `--zero-stats`.
pub fn zero(cache_dir: &Path) -> io::Result<()> {
    crate::util::ensure_dir(cache_dir)?;
    let _lock = LockGuard::acquire(cache_dir)?;
    write_counts(&cache_dir.join(STATS_FILE), &BTreeMap::new())
}

fn read_counts(path: &Path) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return counts,
    };
    for line in data.lines() {
        let mut parts = line.splitn(2, ' ');
        if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
            if let Ok(v) = value.trim().parse::<u64>() {
                counts.insert(name.to_string(), v);
            }
        }
    }
    counts
}

fn write_counts(path: &Path, counts: &BTreeMap<String, u64>) -> io::Result<()> {
    let mut out = String::new();
    for (name, value) in counts {
        out.push_str(name);
        out.push(' ');
        out.push_str(&value.to_string());
        out.push('\n');
    }
    let tmp = path.with_extension("stats.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(out.as_bytes())?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bump_and_read() {
        let dir = tempdir().unwrap();
        bump(dir.path(), Counter::CacheMiss);
        bump(dir.path(), Counter::CacheMiss);
        bump(dir.path(), Counter::DirectCacheHit);
        let counts = read(dir.path());
        assert_eq!(counts.get("cache_miss"), Some(&2));
        assert_eq!(counts.get("direct_cache_hit"), Some(&1));
    }

    #[test]
    fn test_zero_resets() {
        let dir = tempdir().unwrap();
        bump(dir.path(), Counter::CacheMiss);
        zero(dir.path()).unwrap();
        let counts = read(dir.path());
        assert!(counts.is_empty());
    }
}
