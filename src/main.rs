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

//! `ccrs`'s entry point: decides between invocation form (a), wrapped
//! (`ccrs gcc -c foo.c -o foo.o` or an admin subcommand), and form (b),
//! masqueraded (a symlink named `gcc` pointing at this binary); see spec
//! §6 "Invocation". Administrative flags (spec §6 "Administrative CLI")
//! are recognized here, before anything falls into compiler-wrapper
//! mode, using `clap` the way the teacher's CLI surface does.

extern crate ccrs;
#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

use ccrs::config::Config;
use ccrs::stats;
use clap::{App, Arg};
use number_prefix::{binary_prefix, Prefixed, Standalone};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process;

const WRAPPER_NAME: &str = "ccrs";

fn main() {
    init_logging();

    let argv: Vec<OsString> = env::args_os().collect();
    let argv0 = argv.get(0).cloned().unwrap_or_default();
    let masqueraded = Path::new(&argv0)
        .file_name()
        .map(|n| n.to_string_lossy() != WRAPPER_NAME)
        .unwrap_or(false);

    let rest = &argv[1.min(argv.len())..];

    if !masqueraded {
        if let Some(first) = rest.get(0) {
            if is_admin_flag(first) {
                let code = run_admin(rest);
                process::exit(code);
            }
        }
    }

    let cfg = Config::from_env();
    apply_umask(&cfg);
    let code = ccrs::driver::run(&argv0, WRAPPER_NAME, rest, &cfg);
    process::exit(code);
}

/// `env_logger`-based initialization, routed to `CCACHE_LOGFILE` when
/// set instead of stderr (spec §6), matching the teacher's one-off
/// `init_logging()` helper around `env_logger`. `env_logger` 0.4's
/// `LogTarget` only knows `Stdout`/`Stderr`, so the file is wired up by
/// making stderr itself point at it before `env_logger::init()` runs,
/// rather than reaching for a `LogTarget` variant this version lacks.
fn init_logging() {
    #[cfg(unix)]
    {
        if let Ok(logfile) = env::var("CCACHE_LOGFILE") {
            let _ = redirect_stderr_to_file(&logfile);
        }
    }
    env_logger::init().ok();
}

#[cfg(unix)]
fn redirect_stderr_to_file(path: &str) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    nix::unistd::dup2(file.as_raw_fd(), libc::STDERR_FILENO)
        .map(|_| ())
        .map_err(|_| std::io::Error::last_os_error())
}

fn apply_umask(cfg: &Config) {
    #[cfg(unix)]
    {
        if let Some(mask) = cfg.umask {
            unsafe {
                libc::umask(mask as libc::mode_t);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = cfg;
    }
}

const ADMIN_FLAGS: &[&str] = &[
    "-h", "--help", "-V", "--version", "-s", "--show-stats", "-z", "--zero-stats", "-c",
    "--cleanup", "-C", "--clear", "-F", "--max-files", "-M", "--max-size",
];

fn is_admin_flag(arg: &OsString) -> bool {
    arg.to_str().map(|s| ADMIN_FLAGS.contains(&s)).unwrap_or(false)
}

/// Spec §6 names these "out of core but named for completeness"; their
/// bodies are intentionally thin since LRU cleanup/size accounting is
/// explicitly out of scope for the core (spec §1).
fn run_admin(args: &[OsString]) -> i32 {
    let matches = build_admin_app().get_matches_from(args);

    if matches.is_present("show-stats") {
        return show_stats();
    }
    if matches.is_present("zero-stats") {
        return zero_stats();
    }
    if matches.is_present("clear") {
        return clear_cache();
    }
    if matches.is_present("cleanup") {
        // No LRU size/file-count accounting is implemented (spec §1
        // explicitly excludes it); "cleanup" with nothing to account for
        // degrades to a no-op rather than inventing eviction policy.
        println!("ccrs: cleanup is a no-op (no LRU accounting implemented)");
        return 0;
    }
    0
}

fn build_admin_app() -> App<'static, 'static> {
    App::new("ccrs")
        .version(crate_version!())
        .about("A transparent compiler cache for C/C++")
        .arg(Arg::with_name("show-stats").short("s").long("show-stats"))
        .arg(Arg::with_name("zero-stats").short("z").long("zero-stats"))
        .arg(Arg::with_name("cleanup").short("c").long("cleanup"))
        .arg(Arg::with_name("clear").short("C").long("clear"))
        .arg(
            Arg::with_name("max-files")
                .short("F")
                .long("max-files")
                .takes_value(true)
                .value_name("N"),
        )
        .arg(
            Arg::with_name("max-size")
                .short("M")
                .long("max-size")
                .takes_value(true)
                .value_name("SIZE"),
        )
}

fn show_stats() -> i32 {
    let cfg = Config::from_env();
    let counts = stats::read(&cfg.cache_dir);
    for (name, value) in &counts {
        println!("{:<28} {}", name, value);
    }
    println!("{:<28} {}", "cache size", format_size(dir_size(&cfg.cache_dir)));
    if env::var("CCACHE_STATS_JSON").is_ok() {
        if let Ok(json) = serde_json::to_string_pretty(&counts) {
            println!("{}", json);
        }
    }
    0
}

/// Sum the size of every regular file under `dir`. Used only for the
/// informational `cache size` line in `--show-stats`; actual eviction
/// accounting is out of scope for the core (spec §1).
fn dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let entries = match fs::read_dir(&d) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => stack.push(path),
                Ok(ft) if ft.is_file() => {
                    total += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
                _ => {}
            }
        }
    }
    total
}

fn format_size(bytes: u64) -> String {
    match binary_prefix(bytes as f64) {
        Standalone(b) => format!("{} bytes", b),
        Prefixed(prefix, n) => format!("{:.1} {}B", n, prefix),
    }
}

fn zero_stats() -> i32 {
    let cfg = Config::from_env();
    match stats::zero(&cfg.cache_dir) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ccrs: failed to zero stats: {}", e);
            1
        }
    }
}

fn clear_cache() -> i32 {
    let cfg = Config::from_env();
    match fs::remove_dir_all(&cfg.cache_dir) {
        Ok(()) | Err(_) if !cfg.cache_dir.exists() => {
            println!("ccrs: cache cleared");
            0
        }
        Err(e) => {
            eprintln!("ccrs: failed to clear cache: {}", e);
            1
        }
    }
}
