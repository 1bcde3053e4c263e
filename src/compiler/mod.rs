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

pub mod args;
pub mod c;
pub mod gcc;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// The result of trying to classify a compiler invocation: either we
/// understood it well enough to cache ("Ok"), we understood it but know we
/// can't cache it ("CannotCache"), or it isn't a compilation at all
/// ("NotCompilation" -- e.g. a link-only invocation).
#[derive(Debug, PartialEq, Clone)]
pub enum CompilerArguments<T> {
    Ok(T),
    CannotCache(&'static str),
    NotCompilation,
}

/// Source languages recognized from an input file's extension. The
/// `*Preprocessed` variants are "already run through cpp" forms (`.i`,
/// `.ii`, `.mi`, `.mii`); a language is preprocessed iff its default source
/// extension is already one of these.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Language {
    C,
    Cxx,
    ObjectiveC,
    ObjectiveCxx,
    CPreprocessed,
    CxxPreprocessed,
    ObjectiveCPreprocessed,
    ObjectiveCxxPreprocessed,
}

impl Language {
    /// Recognized extensions and their languages, per spec §4.2 rule 8.
    pub fn from_file_name(file: &Path) -> Option<Self> {
        match file.extension().and_then(|e| e.to_str()) {
            Some("c") => Some(Language::C),
            Some("C") | Some("cc") | Some("CC") | Some("cpp") | Some("CPP") | Some("cxx")
            | Some("CXX") | Some("c++") | Some("C++") => Some(Language::Cxx),
            Some("i") => Some(Language::CPreprocessed),
            Some("ii") => Some(Language::CxxPreprocessed),
            Some("mi") => Some(Language::ObjectiveCPreprocessed),
            Some("mii") => Some(Language::ObjectiveCxxPreprocessed),
            Some("m") => Some(Language::ObjectiveC),
            Some("M") | Some("mm") => Some(Language::ObjectiveCxx),
            _ => None,
        }
    }

    /// Parse a `-x LANG` style GCC language name, as accepted on the
    /// commandline (as opposed to recognized from a file extension).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "c" => Some(Language::C),
            "c++" => Some(Language::Cxx),
            "objective-c" => Some(Language::ObjectiveC),
            "objective-c++" => Some(Language::ObjectiveCxx),
            "cpp-output" => Some(Language::CPreprocessed),
            "c++-cpp-output" => Some(Language::CxxPreprocessed),
            "objective-c-cpp-output" | "objc-cpp-output" => Some(Language::ObjectiveCPreprocessed),
            "objective-c++-cpp-output" | "objc++-cpp-output" => Some(Language::ObjectiveCxxPreprocessed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Language::C => "c",
            Language::Cxx => "c++",
            Language::ObjectiveC => "objective-c",
            Language::ObjectiveCxx => "objective-c++",
            Language::CPreprocessed => "cpp-output",
            Language::CxxPreprocessed => "c++-cpp-output",
            Language::ObjectiveCPreprocessed => "objective-c-cpp-output",
            Language::ObjectiveCxxPreprocessed => "objective-c++-cpp-output",
        }
    }

    /// True iff this language's default source extension is already a
    /// `*-cpp-output` variant (spec §4.2 rule 8).
    pub fn is_preprocessed(&self) -> bool {
        match *self {
            Language::CPreprocessed
            | Language::CxxPreprocessed
            | Language::ObjectiveCPreprocessed
            | Language::ObjectiveCxxPreprocessed => true,
            _ => false,
        }
    }
}

/// The outcome of classifying an argv into a cacheable compilation. Kept
/// alongside `CCompilerImpl` per compiler family in `c.rs`/`gcc.rs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArguments {
    /// The input source file, as given on the commandline (not yet made
    /// absolute or rewritten).
    pub input_file: PathBuf,
    pub language: Language,
    /// Where the compiler will write the object file.
    pub output_obj: PathBuf,
    /// Where the compiler will write the dependency file, if any.
    pub output_dep: Option<PathBuf>,
    /// Arguments for invoking the preprocessor (`-E`) pass.
    pub preprocessor_args: Vec<OsString>,
    /// Arguments for invoking the real compile pass.
    pub compiler_args: Vec<OsString>,
    /// Arguments that participate in the hash in every mode.
    pub hash_args: Vec<OsString>,
    /// Arguments that additionally participate in the hash only in direct
    /// mode (spec §4.2 rule 6 / §8 "Hash-exclusion in preprocessor mode").
    pub direct_only_hash_args: Vec<OsString>,
    /// Files named by `--specs=FILE`; their *contents* are hashed under
    /// the `"specs"` delimiter label instead of the path text.
    pub specs_files: Vec<PathBuf>,
    pub generating_dependencies: bool,
    /// True when the input file is itself already preprocessed output
    /// (`.i`/`.ii`/...), so no separate preprocessor invocation is needed.
    pub direct_i_file: bool,
    /// Whether to feed the preprocessor's captured stdout to the compile
    /// step, vs re-reading the original source file. Forced false by
    /// `-g3` (spec §4.2 rule 5).
    pub compile_preprocessed_source_code: bool,
    /// Whether direct mode is still viable for this invocation (can be
    /// cleared by `-Xpreprocessor`/unrecognized `-Wp,` forms).
    pub enable_direct: bool,
    /// Whether unify mode is still viable (cleared by any `-g` other than
    /// `-g0`).
    pub enable_unify: bool,
}

impl ParsedArguments {
    pub fn output_pretty(&self) -> std::borrow::Cow<str> {
        self.output_obj
            .file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or(std::borrow::Cow::Borrowed("<unknown>"))
    }
}

/// Resolve the real compiler per spec §4.6 step 1 / §6 "Invocation".
///
/// `wrapper_argv0` is this process's own `argv[0]`; `rest` is everything
/// after it. In masquerade form (argv[0]'s basename names a compiler,
/// e.g. a symlink `gcc -> ccrs`), the compiler name comes from
/// `wrapper_argv0` itself and every element of `rest` is a compiler
/// argument. In wrapped form, `rest[0]` names (or paths to) the compiler
/// and `rest[1..]` are its arguments.
///
/// `CCACHE_CC` overrides whatever name/path was found. Returns the
/// fatal "recursive invocation" error if PATH search would resolve back
/// to this same wrapper executable.
pub fn find_compiler(
    wrapper_argv0: &Path,
    rest: &[std::ffi::OsString],
    compiler_override: Option<&Path>,
    wrapper_name: &str,
) -> crate::errors::Result<(PathBuf, Vec<std::ffi::OsString>)> {
    use crate::errors::*;

    let argv0_basename = wrapper_argv0
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let masqueraded = argv0_basename != wrapper_name;

    let (candidate_name, args): (std::ffi::OsString, Vec<std::ffi::OsString>) = if masqueraded {
        (wrapper_argv0.as_os_str().to_owned(), rest.to_vec())
    } else {
        match rest.split_first() {
            Some((first, tail)) => (first.clone(), tail.to_vec()),
            None => bail!(ErrorKind::CompilerError("no compiler given".into())),
        }
    };

    if let Some(over) = compiler_override {
        return Ok((over.to_path_buf(), args));
    }

    let candidate_path = Path::new(&candidate_name);
    if candidate_path.components().count() > 1 {
        // Contains a path separator; take it as-is rather than searching PATH.
        return Ok((candidate_path.to_path_buf(), args));
    }

    let wrapper_canon = std::fs::canonicalize(wrapper_argv0).ok();

    // Fast path: `which` resolves the usual case (the first PATH match
    // isn't ourselves) in one call.
    if let Ok(found) = which::which(&candidate_name) {
        if std::fs::canonicalize(&found).ok() != wrapper_canon {
            return Ok((found, args));
        }
    }

    // Slow path: the first match on PATH IS this wrapper (the common
    // masquerade-free setup, e.g. a ccache-style symlink directory
    // prepended to PATH); walk PATH ourselves to find the next candidate.
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(&candidate_name);
        if !is_executable_file(&candidate) {
            continue;
        }
        let found_canon = std::fs::canonicalize(&candidate).ok();
        if wrapper_canon.is_some() && found_canon == wrapper_canon {
            continue;
        }
        return Ok((candidate, args));
    }
    bail!(ErrorKind::CompilerError(format!(
        "recursive invocation: no compiler named {:?} found other than this wrapper",
        candidate_name
    )))
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
