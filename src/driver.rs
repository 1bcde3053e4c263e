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

//! Sequences the two-mode lookup, invokes the external compile when
//! needed, and decides when to fall back to running the real compiler
//! unchanged. See spec §4.6 "Driver" and §4.7 "Failure model": every
//! fallible path funnels into `fallback`, which execs (or, on platforms
//! without `exec` semantics, spawns-and-forwards) the real compiler so a
//! cache-internal failure can never make a compile fail that would
//! otherwise succeed.

use crate::cache::{ArtifactKind, CacheStore};
use crate::compiler::args::parse_arguments;
use crate::compiler::c::CCompiler;
use crate::compiler::{find_compiler, CompilerArguments, Language, ParsedArguments};
use crate::config::Config;
use crate::errors::*;
use crate::hasher::{FileHash, Hasher};
use crate::manifest::Manifest;
use crate::scanner::{self, IncludeSet};
use crate::stats::{self, Counter};
use crate::util;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::SystemTime;

/// Version tag mixed into every hash; bump whenever a hash input changes
/// meaning, so stale cache entries from an earlier build of this crate
/// are never misread as hits (spec §9 "flag in the version prefix").
const CACHE_VERSION: &[u8] = b"ccrs1";

/// Entry point called from `main`: resolves the real compiler, runs the
/// full hit/miss sequence, and returns the process exit code. Never
/// panics or propagates an `Error` past this boundary -- spec §4.7: "the
/// wrapper never reports its own error to the user".
pub fn run(wrapper_argv0: &OsStr, wrapper_name: &str, rest: &[OsString], cfg: &Config) -> i32 {
    match try_run(wrapper_argv0, wrapper_name, rest, cfg) {
        Ok(code) => code,
        Err(e) => {
            warn!("falling back to real compiler: {}", e);
            stats::bump(&cfg.cache_dir, Counter::CacheErrors);
            fallback(wrapper_argv0, wrapper_name, rest, cfg)
        }
    }
}

fn try_run(wrapper_argv0: &OsStr, wrapper_name: &str, rest: &[OsString], cfg: &Config) -> Result<i32> {
    if cfg.disable {
        return Ok(exec_fallback(wrapper_argv0, wrapper_name, rest, cfg));
    }

    let cwd = std::env::current_dir().chain_err(|| "getting current directory")?;
    let (executable, compiler_argv) = find_compiler(
        Path::new(wrapper_argv0),
        rest,
        cfg.compiler_override.as_deref(),
        wrapper_name,
    )?;

    let parsed = match parse_arguments(&compiler_argv, &cwd, cfg) {
        CompilerArguments::Ok(p) => p,
        CompilerArguments::NotCompilation => {
            debug!("not a compilation, passing through");
            stats::bump(&cfg.cache_dir, Counter::NotCompilation);
            return Ok(exec_real_compiler(&executable, &compiler_argv, &cwd, cfg));
        }
        CompilerArguments::CannotCache(why) => {
            debug!("bypassing cache: {}", why);
            stats::bump(&cfg.cache_dir, Counter::Bypassed);
            return Ok(exec_real_compiler(&executable, &compiler_argv, &cwd, cfg));
        }
    };

    let compiler = CCompiler::new(executable.clone());
    let store = CacheStore::new(
        cfg.cache_dir.clone(),
        cfg.temp_dir.clone(),
        cfg.nlevels,
        cfg.enable_compression,
        cfg.hardlink,
    );
    let compile_start = SystemTime::now();

    let input_abs = if parsed.input_file.is_absolute() {
        parsed.input_file.clone()
    } else {
        cwd.join(&parsed.input_file)
    };

    let common_hash = compute_common_hash(&executable, &parsed, &cwd, cfg)?;
    let enable_direct = parsed.enable_direct && cfg.enable_direct;

    // --- Direct-mode attempt (spec §4.6 step 4) --------------------------
    let mut direct_digest: Option<FileHash> = None;
    if enable_direct {
        match build_direct_digest(&common_hash, &input_abs, &parsed, cfg) {
            Ok(Some(digest)) => {
                direct_digest = Some(digest.clone());
                if let Some(object_hash) = lookup_manifest(&store, &digest, &cwd, cfg) {
                    if from_cache(&store, HitMode::Direct, &object_hash, &parsed, cfg)? {
                        info!("[{}]: direct cache hit", parsed.output_pretty());
                        stats::bump(&cfg.cache_dir, Counter::DirectCacheHit);
                        stats::bump(&cfg.cache_dir, Counter::CacheHit);
                        return Ok(0);
                    }
                }
            }
            Ok(None) => {
                debug!("[{}]: direct mode disabled for this source", parsed.output_pretty());
            }
            Err(e) => {
                debug!("[{}]: direct-mode hashing failed: {}", parsed.output_pretty(), e);
            }
        }
    }

    // --- Preprocessor-mode attempt (spec §4.6 step 5) ---------------------
    let (preprocessed, cpp_stderr) = if parsed.direct_i_file {
        (fs::read(&input_abs).chain_err(|| format!("reading {}", input_abs.display()))?, Vec::new())
    } else {
        let output = compiler
            .preprocess(&parsed, &cwd, cfg.prefix.as_deref())
            .chain_err(|| "running preprocessor")?;
        if !output.status.success() {
            bail!(ErrorKind::ProcessError(output));
        }
        (output.stdout, output.stderr)
    };

    let mut cpp_hash = common_hash.clone();
    let want_includes = enable_direct && direct_digest.is_some();
    let scan_outcome = scanner::scan_preprocessed(
        &preprocessed,
        &parsed.input_file,
        &cwd,
        cfg,
        &mut cpp_hash,
        want_includes,
        compile_start,
    );
    cpp_hash.delimiter("cppstderr");
    cpp_hash.update(&cpp_stderr);
    let cpp_digest = cpp_hash.finalize();

    let cached_obj = store.path_of(&cpp_digest, ArtifactKind::Object)?;
    if !cfg.recache && cached_obj.is_file() {
        if from_cache(&store, HitMode::Cpp, &cpp_digest, &parsed, cfg)? {
            info!("[{}]: preprocessor cache hit", parsed.output_pretty());
            stats::bump(&cfg.cache_dir, Counter::PreprocessorCacheHit);
            stats::bump(&cfg.cache_dir, Counter::CacheHit);
            maybe_update_manifest(&store, direct_digest.as_ref(), scan_outcome.includes.as_ref(), &cpp_digest, cfg);
            return Ok(0);
        }
    }

    // --- Miss: run the real compiler (spec §4.6 step 6) --------------------
    stats::bump(&cfg.cache_dir, Counter::CacheMiss);
    if cfg.readonly {
        debug!("readonly mode, falling back");
        return Ok(exec_real_compiler(&executable, &compiler_argv, &cwd, cfg));
    }

    let source_for_compile = if parsed.compile_preprocessed_source_code {
        let ext = intermediate_extension(parsed.language);
        let staged = util::temp_path(&cfg.temp_dir, "cpp", &format!(".{}", ext));
        util::ensure_dir(&cfg.temp_dir)?;
        fs::write(&staged, &preprocessed)?;
        staged
    } else {
        input_abs.clone()
    };

    let compile_output = compiler
        .compile(&parsed, &cwd, &source_for_compile, cfg.prefix.as_deref())
        .chain_err(|| "running compiler")?;

    if !compile_output.status.success() {
        std::io::stderr().write_all(&compile_output.stderr).ok();
        stats::bump(&cfg.cache_dir, Counter::CompileFailed);
        return Ok(compile_output.status.code().unwrap_or(1));
    }

    if !parsed.output_obj.is_file() || fs::metadata(&parsed.output_obj).map(|m| m.len()).unwrap_or(0) == 0 {
        bail!(ErrorKind::CacheError(format!(
            "compiler produced no object at {}",
            parsed.output_obj.display()
        )));
    }

    let mut merged_stderr = cpp_stderr;
    merged_stderr.extend_from_slice(&compile_output.stderr);
    std::io::stderr().write_all(&compile_output.stderr).ok();

    store_compiled_artifacts(&store, &cpp_digest, &parsed, &merged_stderr, cfg)?;
    stats::bump(&cfg.cache_dir, Counter::FilesToCache);
    maybe_update_manifest(&store, direct_digest.as_ref(), scan_outcome.includes.as_ref(), &cpp_digest, cfg);

    Ok(0)
}

/// Which manifest/cache path produced an object-hash hit, so
/// `from_cache` can apply the DIRECT-only ".d must exist" rule (spec
/// §4.6 `from_cache`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HitMode {
    Direct,
    Cpp,
}

/// Materialize a previously-cached object (and its dependency file and
/// captured stderr) to this invocation's destination paths. Returns
/// `Ok(false)` (not `Err`) for every miss condition named in spec §4.6,
/// since a miss here just means "fall through to the next mode", not a
/// cache-internal failure.
fn from_cache(store: &CacheStore, mode: HitMode, object_hash: &FileHash, parsed: &ParsedArguments, cfg: &Config) -> Result<bool> {
    let obj_cache = store.path_of(object_hash, ArtifactKind::Object)?;
    if !obj_cache.is_file() {
        return Ok(false);
    }
    let dep_cache = store.path_of(object_hash, ArtifactKind::Dep)?;
    if mode == HitMode::Direct && parsed.generating_dependencies && !dep_cache.is_file() {
        return Ok(false);
    }

    if !store.materialize(&obj_cache, &parsed.output_obj)? {
        return Ok(false);
    }
    if parsed.generating_dependencies {
        if let Some(dst) = &parsed.output_dep {
            let _ = store.materialize(&dep_cache, dst);
        }
    }
    let stderr_cache = store.path_of(object_hash, ArtifactKind::Stderr)?;
    if let Ok(bytes) = store.read(&stderr_cache) {
        std::io::stderr().write_all(&bytes).ok();
    }
    store.refresh_mtime(&obj_cache).ok();
    Ok(true)
}

/// Stage a freshly-compiled object, its merged stderr, and (when
/// applicable) its dependency file into the cache store, all keyed by
/// the same object hash (spec §4.6 step 6).
fn store_compiled_artifacts(store: &CacheStore, object_hash: &FileHash, parsed: &ParsedArguments, stderr: &[u8], cfg: &Config) -> Result<()> {
    let obj_dst = store.path_of(object_hash, ArtifactKind::Object)?;
    store.stage(&parsed.output_obj, &obj_dst, cfg.enable_compression)?;

    let stderr_dst = store.path_of(object_hash, ArtifactKind::Stderr)?;
    store.stage_bytes(stderr, &stderr_dst, cfg.enable_compression)?;

    if parsed.generating_dependencies {
        if let Some(dep) = &parsed.output_dep {
            if dep.is_file() {
                let dep_dst = store.path_of(object_hash, ArtifactKind::Dep)?;
                store.stage(dep, &dep_dst, cfg.enable_compression)?;
            }
        }
    }
    Ok(())
}

/// If direct mode is viable and we have a freshly-scanned include set,
/// write (or refresh) the manifest entry mapping it to `object_hash`
/// (spec §4.6 step 5: "updating the manifest with the newly-known
/// include-set unless already present").
fn maybe_update_manifest(
    store: &CacheStore,
    direct_digest: Option<&FileHash>,
    includes: Option<&IncludeSet>,
    object_hash: &FileHash,
    cfg: &Config,
) {
    let (digest, includes) = match (direct_digest, includes) {
        (Some(d), Some(i)) => (d, i),
        _ => return,
    };
    if cfg.readonly {
        return;
    }
    let manifest_path = match store.path_of(digest, ArtifactKind::Manifest) {
        Ok(p) => p,
        Err(_) => return,
    };
    let mut manifest = store
        .read(&manifest_path)
        .ok()
        .and_then(|b| Manifest::read(&b))
        .unwrap_or_default();
    if manifest.put(includes, object_hash.clone()) {
        let bytes = manifest.write();
        if let Err(e) = store.stage_bytes(&bytes, &manifest_path, true) {
            debug!("failed to write manifest: {}", e);
        }
    }
}

/// Look up a manifest by its direct-mode digest and probe it against the
/// current filesystem state of its referenced includes (spec §4.5
/// `get`).
fn lookup_manifest(store: &CacheStore, digest: &FileHash, cwd: &Path, _cfg: &Config) -> Option<FileHash> {
    let path = store.path_of(digest, ArtifactKind::Manifest).ok()?;
    let bytes = store.read(&path).ok()?;
    let manifest = Manifest::read(&bytes)?;
    let cwd = cwd.to_path_buf();
    manifest.get(|key| hash_for_probe(&resolve_key(key, &cwd)))
}

/// Paths in a manifest's path pool were stored relative to the cwd they
/// were rewritten against (spec §4.3's `base_dir` rewriting happens
/// before the path reaches the hasher); re-resolve against the current
/// cwd to probe the live filesystem.
fn resolve_key(key: &str, cwd: &Path) -> PathBuf {
    let p = Path::new(key);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

fn hash_for_probe(path: &Path) -> Option<FileHash> {
    let bytes = fs::read(path).ok()?;
    let mut hasher = Hasher::start();
    hasher.update(&bytes);
    Some(hasher.finalize())
}

/// Build the direct-mode digest (spec §4.6 step 4): `common_hash` plus
/// the input file's name (unless `FILE_MACRO` sloppiness is set) plus
/// the hashed contents of the source file. Returns `Ok(None)` when the
/// source contains `__TIME__`/`__DATE__` without `TIME_MACROS`
/// sloppiness set, which per spec §7 disables direct mode for this
/// compile without failing it.
fn build_direct_digest(common_hash: &Hasher, input_abs: &Path, parsed: &ParsedArguments, cfg: &Config) -> Result<Option<FileHash>> {
    let mut h = common_hash.clone();
    for arg in &parsed.direct_only_hash_args {
        h.delimiter("arg");
        h.update(&os_bytes(arg));
    }
    if !cfg.sloppiness.file_macro {
        h.delimiter("inputfile");
        h.update(&os_bytes(parsed.input_file.as_os_str()));
    }
    let source = fs::read(input_abs).chain_err(|| format!("reading {}", input_abs.display()))?;
    if !cfg.sloppiness.time_macros && scanner::contains_time_macros(&source) {
        return Ok(None);
    }
    h.delimiter("sourcecode");
    h.update(&source);
    Ok(Some(h.finalize()))
}

/// Mix in the inputs common to both direct- and preprocessor-mode
/// digests (spec §4.6 step 3).
fn compute_common_hash(executable: &Path, parsed: &ParsedArguments, cwd: &Path, cfg: &Config) -> Result<Hasher> {
    let mut h = Hasher::start();
    h.delimiter("version");
    h.update(CACHE_VERSION);

    h.delimiter("ext");
    h.update(intermediate_extension(parsed.language).as_bytes());

    match cfg.compilercheck {
        crate::config::CompilerCheck::None => {
            h.delimiter("cc_none");
        }
        crate::config::CompilerCheck::Mtime => {
            let meta = fs::metadata(executable).chain_err(|| format!("stat {}", executable.display()))?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            h.delimiter("cc_mtime");
            h.update(&meta.len().to_be_bytes());
            h.update(&mtime.to_be_bytes());
        }
        crate::config::CompilerCheck::Content => {
            let bytes = fs::read(executable).chain_err(|| format!("reading {}", executable.display()))?;
            h.delimiter("cc_content");
            h.update(&bytes);
        }
    }

    h.delimiter("cc_name");
    h.update(util::basename(executable).as_bytes());

    if cfg.hashdir {
        h.delimiter("cwd");
        h.update(cwd.to_string_lossy().as_bytes());
    }

    for f in &cfg.extra_files {
        h.delimiter("extrafile");
        let bytes = fs::read(f).chain_err(|| format!("reading extra_files entry {}", f.display()))?;
        h.update(&bytes);
    }

    for spec in &parsed.specs_files {
        h.delimiter("specs");
        if let Ok(bytes) = fs::read(spec) {
            h.update(&bytes);
        } else {
            warn!("could not read --specs file {}", spec.display());
        }
    }

    for arg in &parsed.hash_args {
        h.delimiter("arg");
        h.update(&os_bytes(arg));
    }

    Ok(h)
}

fn intermediate_extension(language: Language) -> &'static str {
    match language {
        Language::C | Language::CPreprocessed => "i",
        Language::Cxx | Language::CxxPreprocessed => "ii",
        Language::ObjectiveC | Language::ObjectiveCPreprocessed => "mi",
        Language::ObjectiveCxx | Language::ObjectiveCxxPreprocessed => "mii",
    }
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> std::borrow::Cow<[u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> std::borrow::Cow<[u8]> {
    std::borrow::Cow::Owned(s.to_string_lossy().into_owned().into_bytes())
}

/// Run the real compiler with exactly its originally-classified
/// arguments, for the `NotCompilation`/`CannotCache` paths where we
/// never intended to cache anything. Unlike `fallback`, argv here has
/// already had the wrapper's own `argv[0]` stripped off.
fn exec_real_compiler(executable: &Path, args: &[OsString], cwd: &Path, cfg: &Config) -> i32 {
    spawn_and_forward(executable, args, cwd, cfg.prefix.as_deref())
}

/// The last-resort path (spec §4.6 step 7 / §4.7): funnel every fatal
/// internal failure here, stripping any `--ccache-*` marker arguments
/// and handing control to the real compiler with the rest of the
/// original argv untouched.
fn fallback(wrapper_argv0: &OsStr, wrapper_name: &str, rest: &[OsString], cfg: &Config) -> i32 {
    exec_fallback(wrapper_argv0, wrapper_name, rest, cfg)
}

fn exec_fallback(wrapper_argv0: &OsStr, wrapper_name: &str, rest: &[OsString], cfg: &Config) -> i32 {
    let cleaned: Vec<OsString> = rest
        .iter()
        .filter(|a| !a.to_string_lossy().starts_with("--ccache-"))
        .cloned()
        .collect();
    match find_compiler(Path::new(wrapper_argv0), &cleaned, cfg.compiler_override.as_deref(), wrapper_name) {
        Ok((executable, args)) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            spawn_and_forward(&executable, &args, &cwd, cfg.prefix.as_deref())
        }
        Err(e) => {
            eprintln!("ccrs: fatal: {}", e);
            1
        }
    }
}

/// Run `executable args` with stdio inherited and return its exit code.
/// On Unix this actually replaces the process image via `execv`
/// (matching the original's reliance on `exec` semantics, spec §9); a
/// spawn-and-forward loop is kept as the portable fallback for when
/// `execv` itself fails to start the process.
fn spawn_and_forward(executable: &Path, args: &[OsString], cwd: &Path, prefix: Option<&str>) -> i32 {
    #[cfg(unix)]
    {
        if prefix.is_none() {
            exec_in_place(executable, args, cwd);
            // only reached if execv failed to start at all
        }
    }
    match run_and_wait(executable, args, cwd, prefix) {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            eprintln!("ccrs: fatal: could not execute {}: {}", executable.display(), e);
            1
        }
    }
}

#[cfg(unix)]
fn exec_in_place(executable: &Path, args: &[OsString], cwd: &Path) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if std::env::set_current_dir(cwd).is_err() {
        return;
    }
    let prog = match CString::new(executable.as_os_str().as_bytes()) {
        Ok(c) => c,
        Err(_) => return,
    };
    let mut argv: Vec<CString> = vec![prog.clone()];
    for a in args {
        if let Ok(c) = CString::new(a.as_bytes()) {
            argv.push(c);
        } else {
            return;
        }
    }
    // On success this never returns; on failure we fall through to the
    // spawn-and-wait path below.
    let _ = nix::unistd::execv(&prog, &argv);
}

fn run_and_wait(executable: &Path, args: &[OsString], cwd: &Path, prefix: Option<&str>) -> std::io::Result<ExitStatus> {
    let mut cmd = match prefix {
        Some(p) => {
            let mut words = p.split_whitespace();
            let program = words.next().unwrap_or_default();
            let mut c = std::process::Command::new(program);
            c.args(words);
            c.arg(executable);
            c
        }
        None => std::process::Command::new(executable),
    };
    cmd.current_dir(cwd).args(args);
    cmd.status()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_intermediate_extension() {
        assert_eq!(intermediate_extension(Language::C), "i");
        assert_eq!(intermediate_extension(Language::Cxx), "ii");
        assert_eq!(intermediate_extension(Language::ObjectiveC), "mi");
        assert_eq!(intermediate_extension(Language::ObjectiveCxx), "mii");
    }
}
