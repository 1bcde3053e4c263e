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

//! The gcc/clang invocation grammar: both families accept the same `-E`
//! and `-c` commandline shape, so one implementation covers both.

use crate::compiler::ParsedArguments;
use crate::errors::*;
use std::path::Path;
use std::process::{self, Command, Stdio};

/// Split `prefix` (spec §3/§6 `CCACHE_PREFIX`: "command prepended to
/// every invocation of the real compiler") into a program and its
/// leading arguments, the way a shell word-split would for the simple
/// one-word case ccache itself supports (e.g. `distcc`).
fn split_prefix(prefix: &str) -> Vec<&str> {
    prefix.split_whitespace().collect()
}

fn build_command(executable: &Path, prefix: Option<&str>) -> Command {
    match prefix {
        Some(p) => {
            let mut words = split_prefix(p);
            let program = words.remove(0);
            let mut cmd = Command::new(program);
            cmd.args(words);
            cmd.arg(executable);
            cmd
        }
        None => Command::new(executable),
    }
}

/// Run `compiler -E <preprocessor_args> <input>`, capturing stdout (the
/// preprocessed translation unit) and stderr without writing either to
/// disk here; the driver stages them into temp files (spec §4.6 step 5).
pub fn preprocess(
    executable: &Path,
    parsed: &ParsedArguments,
    cwd: &Path,
    prefix: Option<&str>,
) -> Result<process::Output> {
    let mut cmd = build_command(executable, prefix);
    cmd.current_dir(cwd)
        .arg("-E")
        .args(&parsed.preprocessor_args)
        .arg(&parsed.input_file)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output()
        .chain_err(|| format!("failed to execute preprocessor {}", executable.display()))
}

/// Run the real compile step. `source` is the file to feed the compiler
/// (either the original source or a staged copy of the preprocessor's
/// stdout, depending on `compile_preprocessed_source_code`); the
/// compiler writes `parsed.output_obj` (and `parsed.output_dep`, if
/// generating dependencies without direct mode) directly.
pub fn compile(
    executable: &Path,
    parsed: &ParsedArguments,
    cwd: &Path,
    source: &Path,
    prefix: Option<&str>,
) -> Result<process::Output> {
    let mut cmd = build_command(executable, prefix);
    cmd.current_dir(cwd)
        .arg("-c")
        .args(&parsed.compiler_args)
        .arg(source)
        .arg("-o")
        .arg(&parsed.output_obj)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output()
        .chain_err(|| format!("failed to execute compiler {}", executable.display()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_prefix_single_word() {
        assert_eq!(split_prefix("distcc"), vec!["distcc"]);
    }

    #[test]
    fn test_split_prefix_with_args() {
        assert_eq!(split_prefix("ccache-prefix --flag"), vec!["ccache-prefix", "--flag"]);
    }
}
