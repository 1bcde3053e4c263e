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

//! Parses a preprocessed translation unit, feeding its line-marker
//! directives into a `Hasher` and (in direct mode) publishing the set of
//! included files it named. See spec §4.3.

use crate::config::Config;
use crate::hasher::{FileHash, Hasher};
use memmap2::Mmap;
use regex::bytes::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Path (as rewritten relative to `base_dir`) to the hash of its contents
/// at scan time. The source file itself, directory entries, and the
/// `<built-in>`/`<command-line>` pseudo-paths are never members (spec §3
/// IncludeSet invariant).
pub type IncludeSet = HashMap<String, FileHash>;

lazy_static! {
    /// Matches a line-marker directive at the start of a line, either the
    /// compiler form (`# 1 "foo.h"`) or the HP form (`#line 1 "foo.h"`).
    static ref LINE_MARKER: Regex =
        Regex::new(r#"(?m-u)^(?:#[ \t]*[0-9]+[ \t]*"([^"]*)"|#line[ \t]+[0-9]+[ \t]*"([^"]*)")"#)
            .expect("static regex");
}

/// Outcome of a scan pass. `includes` is `Some` only when direct mode was
/// requested and the per-file probing pass completed without error;
/// callers see `None` both when direct mode wasn't requested and when it
/// had to be abandoned mid-scan (spec §4.3: "Any failure during this pass
/// clears `enable_direct` but does not fail the overall compile").
pub struct ScanOutcome {
    pub includes: Option<IncludeSet>,
}

/// True if `data` contains `__TIME__` or `__DATE__` as a literal
/// substring. Used both for include files (here) and for the main source
/// file (in the driver) to implement the `TIME_MACROS` sloppiness switch.
pub fn contains_time_macros(data: &[u8]) -> bool {
    contains(data, b"__TIME__") || contains(data, b"__DATE__")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Scan `data` (the preprocessor's captured stdout), feeding each marker
/// line into `hasher` and, when `want_includes` is set, resolving each
/// named file to a `FileHash` for the returned `IncludeSet`.
///
/// `compile_start` is used to reject include files whose mtime is at or
/// after the start of this compilation (spec §4.3 "too new"), unless
/// `INCLUDE_FILE_MTIME` sloppiness is set.
pub fn scan_preprocessed(
    data: &[u8],
    input_file: &Path,
    cwd: &Path,
    cfg: &Config,
    hasher: &mut Hasher,
    want_includes: bool,
    compile_start: SystemTime,
) -> ScanOutcome {
    let mut consumed = 0usize;
    let mut queued: Vec<PathBuf> = vec![];

    for cap in LINE_MARKER.captures_iter(data) {
        let whole = cap.get(0).unwrap();
        let line_end = data[whole.start()..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| whole.start() + p + 1)
            .unwrap_or_else(|| data.len());

        if whole.start() > consumed {
            hasher.update(&data[consumed..whole.start()]);
        }
        hasher.update(&data[whole.start()..line_end]);
        consumed = line_end;

        let raw = cap
            .get(1)
            .or_else(|| cap.get(2))
            .map(|m| m.as_bytes())
            .unwrap_or(&[]);
        let path_str = String::from_utf8_lossy(raw).into_owned();
        let rewritten = cfg.rewrite_path(cwd, Path::new(&path_str));
        hasher.delimiter("path");
        hasher.update(rewritten.to_string_lossy().as_bytes());

        if want_includes {
            queued.push(PathBuf::from(path_str));
        }
    }
    if consumed < data.len() {
        hasher.update(&data[consumed..]);
    }

    if !want_includes {
        return ScanOutcome { includes: None };
    }

    let mut includes = IncludeSet::new();
    for path in queued {
        if should_skip(&path, input_file) {
            continue;
        }
        let key = cfg
            .rewrite_path(cwd, &path)
            .to_string_lossy()
            .into_owned();
        if includes.contains_key(&key) {
            continue;
        }
        match hash_include_file(&path, cfg, compile_start) {
            Ok(Some(file_hash)) => {
                includes.insert(key, file_hash);
            }
            Ok(None) => {}
            Err(e) => {
                debug!("disabling direct mode: {}", e);
                return ScanOutcome { includes: None };
            }
        }
    }
    ScanOutcome {
        includes: Some(includes),
    }
}

fn should_skip(path: &Path, input_file: &Path) -> bool {
    if path == input_file {
        return true;
    }
    let s = path.to_string_lossy();
    if s.starts_with('<') && s.ends_with('>') {
        // <built-in>, <command-line>, and similar pseudo-paths.
        return true;
    }
    if path.is_dir() {
        return true;
    }
    false
}

/// Open, mmap, and hash one include file, applying the mtime and
/// time-macro sloppiness checks from spec §4.3. `Ok(None)` means "quietly
/// drop this candidate" (vanished, turned out to be a directory); `Err`
/// means the whole scan should degrade to preprocessor-mode-only.
fn hash_include_file(
    path: &Path,
    cfg: &Config,
    compile_start: SystemTime,
) -> Result<Option<FileHash>, String> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return Err(format!("open {}: {}", path.display(), e)),
    };
    let metadata = file
        .metadata()
        .map_err(|e| format!("stat {}: {}", path.display(), e))?;
    if metadata.is_dir() {
        return Ok(None);
    }
    if !cfg.sloppiness.include_file_mtime {
        if let Ok(mtime) = metadata.modified() {
            if mtime >= compile_start {
                return Err(format!("{} is too new", path.display()));
            }
        }
    }

    if metadata.len() == 0 {
        let mut hasher = Hasher::start();
        hasher.update(b"");
        return Ok(Some(hasher.finalize()));
    }

    let mmap = unsafe {
        Mmap::map(&file).map_err(|e| format!("mmap {}: {}", path.display(), e))?
    };
    if !cfg.sloppiness.time_macros && contains_time_macros(&mmap) {
        return Err(format!("{} contains __TIME__/__DATE__", path.display()));
    }

    let mut hasher = Hasher::start();
    hasher.update(&mmap);
    Ok(Some(hasher.finalize()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{CompilerCheck, Sloppiness};

    fn test_config() -> Config {
        Config {
            cache_dir: PathBuf::from("/tmp/.ccache"),
            base_dir: None,
            nlevels: 2,
            temp_dir: PathBuf::from("/tmp/.ccache/tmp"),
            enable_direct: true,
            enable_unify: false,
            enable_compression: false,
            compile_preprocessed_source_code: true,
            compilercheck: CompilerCheck::Mtime,
            hashdir: false,
            extra_files: vec![],
            sloppiness: Sloppiness::default(),
            recache: false,
            readonly: false,
            hardlink: false,
            prefix: None,
            disable: false,
            compiler_override: None,
            extension_override: None,
            umask: None,
            logfile: None,
        }
    }

    #[test]
    fn test_contains_time_macros() {
        assert!(contains_time_macros(b"const char *t = __TIME__;"));
        assert!(contains_time_macros(b"const char *d = __DATE__;"));
        assert!(!contains_time_macros(b"int x = 1;"));
    }

    #[test]
    fn test_scan_hashes_rewritten_path_not_raw_path() {
        let data = b"# 1 \"/b/x/z/h.h\"\nint x;\n";
        let cwd = PathBuf::from("/b/x/y");
        let mut cfg = test_config();
        cfg.base_dir = Some(PathBuf::from("/b"));
        let mut h1 = Hasher::start();
        scan_preprocessed(
            data,
            Path::new("t.c"),
            &cwd,
            &cfg,
            &mut h1,
            false,
            SystemTime::now(),
        );
        let data2 = b"# 1 \"../z/h.h\"\nint x;\n";
        let mut h2 = Hasher::start();
        scan_preprocessed(
            data2,
            Path::new("t.c"),
            &cwd,
            &cfg,
            &mut h2,
            false,
            SystemTime::now(),
        );
        assert_eq!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn test_should_skip_pseudo_paths() {
        assert!(should_skip(Path::new("<built-in>"), Path::new("t.c")));
        assert!(should_skip(Path::new("<command-line>"), Path::new("t.c")));
        assert!(should_skip(Path::new("t.c"), Path::new("t.c")));
        assert!(!should_skip(Path::new("h.h"), Path::new("t.c")));
    }
}
