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

//! End-to-end scenarios from spec §8, driven against the real `ccrs`
//! binary and a real system C compiler (`cc`), the way the teacher's own
//! wrapper is exercised: through `assert_cmd`, never by calling internal
//! functions directly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn ccrs() -> Command {
    Command::cargo_bin("ccrs").expect("built binary")
}

/// A fresh cache dir plus a matching `ccrs` invocation helper bound to it.
struct Harness {
    _cache_dir: tempfile::TempDir,
    src_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Harness {
        Harness {
            _cache_dir: tempfile::tempdir().unwrap(),
            src_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn cache_path(&self) -> &Path {
        self._cache_dir.path()
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = ccrs();
        cmd.current_dir(self.src_dir.path())
            .env("CCACHE_DIR", self.cache_path())
            .env_remove("CCACHE_DISABLE")
            .args(args);
        cmd
    }

    fn write(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let path = self.src_dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn stats(&self) -> std::collections::HashMap<String, u64> {
        let raw = fs::read_to_string(self.cache_path().join("stats")).unwrap_or_default();
        raw.lines()
            .filter_map(|l| {
                let mut it = l.splitn(2, ' ');
                let name = it.next()?.to_string();
                let val = it.next()?.trim().parse().ok()?;
                Some((name, val))
            })
            .collect()
    }
}

/// Scenario 1: cold then warm. First invocation misses and stores the
/// object; the second is a direct-mode hit and never runs `cc` again.
#[test]
fn cold_then_warm_direct_hit() {
    let h = Harness::new();
    h.write("hello.c", "int main(void) { return 0; }\n");

    h.cmd(&["cc", "-c", "hello.c", "-o", "hello.o"])
        .assert()
        .success();
    assert!(h.src_dir.path().join("hello.o").is_file());
    let after_first = h.stats();
    assert_eq!(after_first.get("cache_miss").copied(), Some(1));

    fs::remove_file(h.src_dir.path().join("hello.o")).unwrap();

    h.cmd(&["cc", "-c", "hello.c", "-o", "hello.o"])
        .assert()
        .success();
    assert!(h.src_dir.path().join("hello.o").is_file());
    let after_second = h.stats();
    assert_eq!(after_second.get("direct_cache_hit").copied(), Some(1));
    assert_eq!(after_second.get("cache_miss").copied(), Some(1));
}

/// Scenario 6: failure transparency. A source that fails to compile must
/// exit nonzero with the compiler's own diagnostic, and must not populate
/// the cache.
#[test]
fn failure_transparency() {
    let h = Harness::new();
    h.write("bad.c", "int main(void) { return \n");

    h.cmd(&["cc", "-c", "bad.c", "-o", "bad.o"])
        .assert()
        .failure()
        .stderr(predicate::str::is_empty().not());

    assert!(!h.src_dir.path().join("bad.o").is_file());
    let stats = h.stats();
    assert!(stats.get("files_to_cache").is_none());
}

/// A `-E`-only invocation is outside the classifier's supported surface
/// (spec §4.2 rule 1) and must be passed straight through.
#[test]
fn dash_e_bypasses_cache() {
    let h = Harness::new();
    h.write("hello.c", "int main(void) { return 0; }\n");

    h.cmd(&["cc", "-E", "hello.c"]).assert().success();
    let stats = h.stats();
    assert_eq!(stats.get("bypassed").copied(), Some(1));
}

/// Second invocation with a non-compile command (no `-c`) is passed
/// through without being counted as a cache miss.
#[test]
fn non_compile_invocation_passes_through() {
    let h = Harness::new();
    h.write("hello.c", "int main(void) { return 0; }\n");
    h.cmd(&["cc", "--version"]).assert().success();
}

#[test]
fn show_stats_admin_flag_runs_without_a_compiler_argument() {
    let h = Harness::new();
    h.cmd(&["--show-stats"]).assert().success();
}

#[test]
fn zero_stats_resets_counters() {
    let h = Harness::new();
    h.write("hello.c", "int main(void) { return 0; }\n");
    h.cmd(&["cc", "-c", "hello.c", "-o", "hello.o"])
        .assert()
        .success();
    assert!(!h.stats().is_empty());

    h.cmd(&["--zero-stats"]).assert().success();
    assert!(h.stats().is_empty());
}
