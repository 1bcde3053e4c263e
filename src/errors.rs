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

use std::process;

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        /// The real compiler exited with a non-zero status. Carries its
        /// captured output so callers can forward stdout/stderr verbatim.
        ProcessError(output: process::Output) {
            description("process exited unsuccessfully")
        }

        /// An argv could not be classified into a cacheable compilation.
        BadArgument(arg: String) {
            description("unsupported or malformed argument")
            display("unsupported or malformed argument: {}", arg)
        }

        /// The manifest file failed a magic/version/gzip check.
        ManifestError(msg: String) {
            description("manifest is corrupt or unreadable")
            display("manifest error: {}", msg)
        }

        /// A cache store operation (stage/materialize/path_of) failed.
        CacheError(msg: String) {
            description("cache I/O error")
            display("cache error: {}", msg)
        }

        /// The compiler could not be resolved, or resolved to ourselves.
        CompilerError(msg: String) {
            description("could not resolve real compiler")
            display("{}", msg)
        }
    }
}

/// Shorthand used throughout the crate for fallible synchronous operations.
pub type CResult<T> = Result<T>;
