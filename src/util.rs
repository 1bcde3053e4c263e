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

//! Thin wrappers: path helpers and temp-file naming shared across the
//! cache store and driver.

use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A path under `temp_dir` that nothing else will be using, suffixed so a
/// leaked temp file (if the process dies mid-write) is easy to spot and
/// doesn't collide with a concurrent invocation's.
pub fn temp_path(temp_dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let unique = Uuid::new_v4().simple().to_string();
    temp_dir.join(format!("{}-{}{}", prefix, unique, suffix))
}

/// `mkdir -p`, tolerating the directory already existing (which is the
/// common case on a warm cache).
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) => {
            if dir.is_dir() {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

/// The basename of `path` as a `String`, losslessly where possible.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_temp_path_unique() {
        let dir = Path::new("/tmp/ccrs-test");
        let a = temp_path(dir, "obj", ".tmp");
        let b = temp_path(dir, "obj", ".tmp");
        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        assert!(a.to_string_lossy().ends_with(".tmp"));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename(Path::new("/a/b/c.o")), "c.o");
    }
}
