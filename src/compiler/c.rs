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

//! Identifies which C/C++ compiler family an executable belongs to, and
//! dispatches the preprocess/compile subprocess invocations through a
//! per-family implementation. Argument classification itself lives in
//! `compiler::args` and is shared by every family (spec §4.2 is written
//! compiler-generically); only the actual subprocess invocation grammar
//! differs here.

use crate::compiler::gcc;
use crate::compiler::ParsedArguments;
use crate::errors::*;
use std::path::{Path, PathBuf};
use std::process;

/// Supported C compiler families. Kept as a three-way enum rather than a
/// trait object, matching spec §9 "Polymorphism over capability sets":
/// the two invocation grammars (gcc-family, MSVC) are enumerated variants,
/// not runtime-dispatched objects.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CCompilerKind {
    Gcc,
    Clang,
    Msvc,
}

impl CCompilerKind {
    /// Guess a compiler's family from its executable's basename. This is
    /// intentionally crude: the argument tables in `compiler::args` are
    /// gcc/clang-shaped; MSVC is recognized only far enough to bypass it.
    pub fn detect(executable: &Path) -> CCompilerKind {
        let name = executable
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("cl") && !name.contains("clang") {
            CCompilerKind::Msvc
        } else if name.contains("clang") {
            CCompilerKind::Clang
        } else {
            CCompilerKind::Gcc
        }
    }
}

/// A resolved real compiler: its executable path plus the family used to
/// pick an invocation grammar. MSVC always bypasses preprocess/compile
/// with a `CompilerError`, since this crate doesn't implement `cl.exe`'s
/// argument grammar.
#[derive(Debug, Clone)]
pub struct CCompiler {
    pub executable: PathBuf,
    pub kind: CCompilerKind,
}

impl CCompiler {
    pub fn new(executable: PathBuf) -> CCompiler {
        let kind = CCompilerKind::detect(&executable);
        CCompiler { executable, kind }
    }

    /// Run the preprocessor pass (`-E`), returning its captured stdout
    /// (the preprocessed translation unit) and stderr. Spec §4.6 step 5:
    /// "Run the preprocessor ... capturing stdout to a temp file and
    /// stderr to another temp file" -- here represented directly as a
    /// `process::Output` for the caller to stage into temp files.
    pub fn preprocess(
        &self,
        parsed: &ParsedArguments,
        cwd: &Path,
        prefix: Option<&str>,
    ) -> Result<process::Output> {
        match self.kind {
            CCompilerKind::Gcc | CCompilerKind::Clang => {
                gcc::preprocess(&self.executable, parsed, cwd, prefix)
            }
            CCompilerKind::Msvc => {
                bail!(ErrorKind::CompilerError("MSVC is not supported by this cache".into()))
            }
        }
    }

    /// Run the real compile step, writing `parsed.output_obj` (and, if
    /// applicable, `parsed.output_dep`) directly to disk; `source` is
    /// either the original source file or the staged preprocessed output,
    /// depending on `parsed.compile_preprocessed_source_code`.
    pub fn compile(
        &self,
        parsed: &ParsedArguments,
        cwd: &Path,
        source: &Path,
        prefix: Option<&str>,
    ) -> Result<process::Output> {
        match self.kind {
            CCompilerKind::Gcc | CCompilerKind::Clang => {
                gcc::compile(&self.executable, parsed, cwd, source, prefix)
            }
            CCompilerKind::Msvc => {
                bail!(ErrorKind::CompilerError("MSVC is not supported by this cache".into()))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_detect_gcc() {
        assert_eq!(CCompilerKind::detect(Path::new("/usr/bin/gcc")), CCompilerKind::Gcc);
        assert_eq!(CCompilerKind::detect(Path::new("/usr/bin/x86_64-linux-gnu-gcc-10")), CCompilerKind::Gcc);
    }

    #[test]
    fn test_detect_clang() {
        assert_eq!(CCompilerKind::detect(Path::new("/usr/bin/clang++")), CCompilerKind::Clang);
    }

    #[test]
    fn test_detect_msvc() {
        assert_eq!(CCompilerKind::detect(Path::new(r"C:\VC\bin\cl.exe")), CCompilerKind::Msvc);
    }
}
