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

//! Immutable configuration threaded through the driver, built once from
//! the process environment. See spec §3 "Configuration" and §6
//! "Environment variables".

use std::env;
use std::path::PathBuf;

/// A bitmask of cache-correctness relaxations. See the GLOSSARY.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sloppiness {
    pub file_macro: bool,
    pub include_file_mtime: bool,
    pub time_macros: bool,
}

impl Sloppiness {
    fn parse(raw: &str) -> Sloppiness {
        let mut s = Sloppiness::default();
        for word in raw.split(|c: char| c == ',' || c.is_whitespace()) {
            match word.trim().to_lowercase().as_str() {
                "file_macro" => s.file_macro = true,
                "include_file_mtime" => s.include_file_mtime = true,
                "time_macros" => s.time_macros = true,
                "" => {}
                other => warn!("unknown sloppiness word: {}", other),
            }
        }
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerCheck {
    None,
    Mtime,
    Content,
}

impl Default for CompilerCheck {
    fn default() -> Self {
        CompilerCheck::Mtime
    }
}

impl CompilerCheck {
    fn parse(raw: &str) -> CompilerCheck {
        match raw.to_lowercase().as_str() {
            "none" => CompilerCheck::None,
            "content" => CompilerCheck::Content,
            "mtime" => CompilerCheck::Mtime,
            other => {
                warn!("unknown CCACHE_COMPILERCHECK value {:?}, falling back to mtime", other);
                CompilerCheck::Mtime
            }
        }
    }
}

/// Immutable, process-wide configuration. Built once in `main` and passed
/// by reference everywhere else; no global mutable state (spec §9
/// "Global configuration").
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub base_dir: Option<PathBuf>,
    pub nlevels: usize,
    pub temp_dir: PathBuf,
    pub enable_direct: bool,
    pub enable_unify: bool,
    pub enable_compression: bool,
    pub compile_preprocessed_source_code: bool,
    pub compilercheck: CompilerCheck,
    pub hashdir: bool,
    pub extra_files: Vec<PathBuf>,
    pub sloppiness: Sloppiness,
    pub recache: bool,
    pub readonly: bool,
    pub hardlink: bool,
    pub prefix: Option<String>,
    pub disable: bool,
    pub compiler_override: Option<PathBuf>,
    pub extension_override: Option<String>,
    pub umask: Option<u32>,
    pub logfile: Option<PathBuf>,
}

impl Config {
    /// Build the configuration from `CCACHE_*` environment variables,
    /// applying the defaults named in spec §3/§6.
    pub fn from_env() -> Config {
        let cache_dir = env_path("CCACHE_DIR").unwrap_or_else(default_cache_dir);
        let temp_dir = env_path("CCACHE_TEMPDIR").unwrap_or_else(|| cache_dir.join("tmp"));

        let base_dir = env_path("CCACHE_BASEDIR").and_then(|p| {
            if p.is_absolute() {
                Some(p)
            } else {
                warn!("CCACHE_BASEDIR is not absolute, ignoring: {}", p.display());
                None
            }
        });

        let nlevels = env::var("CCACHE_NLEVELS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|n| n.max(1).min(8))
            .unwrap_or(2);

        Config {
            cache_dir,
            base_dir,
            nlevels,
            temp_dir,
            enable_direct: !env_bool("CCACHE_NODIRECT") && !env_bool("CCACHE_UNIFY"),
            enable_unify: env_bool("CCACHE_UNIFY"),
            enable_compression: env_bool("CCACHE_COMPRESS"),
            compile_preprocessed_source_code: !env_bool("CCACHE_CPP2"),
            compilercheck: env::var("CCACHE_COMPILERCHECK")
                .ok()
                .map(|v| CompilerCheck::parse(&v))
                .unwrap_or_default(),
            hashdir: env_bool("CCACHE_HASHDIR"),
            extra_files: env::var("CCACHE_EXTRAFILES")
                .ok()
                .map(|v| v.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
                .unwrap_or_default(),
            sloppiness: env::var("CCACHE_SLOPPINESS")
                .ok()
                .map(|v| Sloppiness::parse(&v))
                .unwrap_or_default(),
            recache: env_bool("CCACHE_RECACHE"),
            readonly: env_bool("CCACHE_READONLY"),
            hardlink: env_bool("CCACHE_HARDLINK"),
            prefix: env::var("CCACHE_PREFIX").ok(),
            disable: env_bool("CCACHE_DISABLE"),
            compiler_override: env::var("CCACHE_CC").ok().map(PathBuf::from),
            extension_override: env::var("CCACHE_EXTENSION").ok(),
            umask: env::var("CCACHE_UMASK")
                .ok()
                .and_then(|v| u32::from_str_radix(&v, 8).ok()),
            logfile: env_path("CCACHE_LOGFILE"),
        }
    }

    /// Rewrite `path` relative to `cwd` if both `path` and `cwd` are
    /// absolute paths under `base_dir`; otherwise return `path` unchanged.
    /// See spec §8 "Path rewriting": with `base_dir=/b`, `cwd=/b/x/y`,
    /// hashing `/b/x/z/h.h` must hash the same as hashing `../z/h.h`.
    pub fn rewrite_path(&self, cwd: &std::path::Path, path: &std::path::Path) -> PathBuf {
        let base = match &self.base_dir {
            Some(b) => b,
            None => return path.to_path_buf(),
        };
        if !path.is_absolute() || !path.starts_with(base) || !cwd.starts_with(base) {
            return path.to_path_buf();
        }
        diff_paths(path, cwd).unwrap_or_else(|| path.to_path_buf())
    }
}

/// Express `path` relative to `base`, walking up out of any components
/// `base` has that `path` doesn't share.
fn diff_paths(path: &std::path::Path, base: &std::path::Path) -> Option<PathBuf> {
    use std::path::Component;

    let path_comps: Vec<Component> = path.components().collect();
    let base_comps: Vec<Component> = base.components().collect();

    let common = path_comps
        .iter()
        .zip(base_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_comps.len() {
        out.push("..");
    }
    for comp in &path_comps[common..] {
        out.push(comp.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Some(out)
}

fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new().home_dir().join(".ccache")
}

fn env_bool(key: &str) -> bool {
    env::var(key).map(|v| !v.is_empty()).unwrap_or(false)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sloppiness_parse() {
        let s = Sloppiness::parse("file_macro,time_macros");
        assert!(s.file_macro);
        assert!(!s.include_file_mtime);
        assert!(s.time_macros);
    }

    #[test]
    fn test_sloppiness_parse_whitespace() {
        let s = Sloppiness::parse("file_macro include_file_mtime");
        assert!(s.file_macro);
        assert!(s.include_file_mtime);
    }

    #[test]
    fn test_compilercheck_parse() {
        assert_eq!(CompilerCheck::parse("content"), CompilerCheck::Content);
        assert_eq!(CompilerCheck::parse("none"), CompilerCheck::None);
        assert_eq!(CompilerCheck::parse("garbage"), CompilerCheck::Mtime);
    }

    #[test]
    fn test_rewrite_path_basedir_relativization() {
        let mut cfg = test_config();
        cfg.base_dir = Some(PathBuf::from("/b"));
        let cwd = PathBuf::from("/b/x/y");
        let rewritten = cfg.rewrite_path(&cwd, &PathBuf::from("/b/x/z/h.h"));
        assert_eq!(rewritten, PathBuf::from("../z/h.h"));
    }

    #[test]
    fn test_rewrite_path_outside_basedir_unchanged() {
        let mut cfg = test_config();
        cfg.base_dir = Some(PathBuf::from("/b"));
        let cwd = PathBuf::from("/b/x/y");
        let rewritten = cfg.rewrite_path(&cwd, &PathBuf::from("/elsewhere/h.h"));
        assert_eq!(rewritten, PathBuf::from("/elsewhere/h.h"));
    }

    #[test]
    fn test_rewrite_path_no_basedir_unchanged() {
        let cfg = test_config();
        let cwd = PathBuf::from("/b/x/y");
        let rewritten = cfg.rewrite_path(&cwd, &PathBuf::from("/b/x/z/h.h"));
        assert_eq!(rewritten, PathBuf::from("/b/x/z/h.h"));
    }

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
}
