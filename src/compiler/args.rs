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

//! The argument classifier: turns a compiler's argv into the four outputs
//! named in spec §4.2 (`preprocessor_args`, `compiler_args`, `hash_args`,
//! and the cache-control flag bundle), or a `bypass` signal.

use crate::compiler::{CompilerArguments, Language, ParsedArguments};
use crate::config::Config;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Options that take a value as a separate, following token (as opposed to
/// glued onto the flag, e.g. `-Ifoo`). `-MF`/`-MT`/`-MQ`/`-x`/`-o` are
/// handled individually below because each has option-specific side
/// effects; this list covers the plain pass-through ones.
const PATH_REWRITE_OPTS: &[&str] = &[
    "-I", "-idirafter", "-imacros", "-include", "-iprefix", "-isystem",
];

/// Options excluded from `hash_args` in preprocessor mode only (spec §4.2
/// rule 6 / §8). They still land in `direct_only_hash_args`.
const PREPROCESSOR_EXCLUDED: &[&str] = &[
    "-D", "-I", "-U", "-idirafter", "-imacros", "-imultilib", "-include",
    "-iprefix", "-iquote", "-isysroot", "-isystem", "-iwithprefix",
    "-iwithprefixbefore", "-nostdinc", "-nostdinc++",
];

fn is_preprocessor_excluded(flag: &str) -> bool {
    PREPROCESSOR_EXCLUDED.contains(&flag)
}

fn is_path_rewrite_opt(flag: &str) -> bool {
    PATH_REWRITE_OPTS.contains(&flag)
}

/// Split a concatenated option like `-Ifoo` into (`-I`, `foo`) if `arg`
/// starts with one of the single-character prefixes that support gluing.
fn split_concatenated<'a>(arg: &'a str, flags: &[&'static str]) -> Option<(&'static str, &'a str)> {
    for &flag in flags {
        if arg.len() > flag.len() && arg.starts_with(flag) {
            return Some((flag, &arg[flag.len()..]));
        }
    }
    None
}

/// Parse `arguments`, the gcc/clang-family way. Returns `NotCompilation`
/// for anything without `-c`, `CannotCache(reason)` for anything matching
/// spec §4.2 rule 1 (hard bypass) or any other unsupported construct, and
/// `Ok(ParsedArguments)` otherwise.
pub fn parse_arguments(arguments: &[OsString], cwd: &Path, cfg: &Config) -> CompilerArguments<ParsedArguments> {
    let mut compilation = false;
    let mut output_arg: Option<OsString> = None;
    let mut output_dep: Option<PathBuf> = None;
    let mut input_arg: Option<OsString> = None;
    let mut explicit_language: Option<Language> = None;
    let mut last_explicit_language_before_input = true;

    let mut common_args: Vec<OsString> = vec![]; // participate in both modes' compiler_args, subject to hash rules
    let mut preprocessor_only_args: Vec<OsString> = vec![]; // -MF/-MD/-MMD/-MT/-MQ style, preprocessor-pass only
    let mut hash_args: Vec<OsString> = vec![];
    let mut direct_only_hash_args: Vec<OsString> = vec![];
    let mut specs_files: Vec<PathBuf> = vec![];

    let mut generating_dependencies = false;
    let mut saw_mt_or_mq = false;
    let mut dep_target: Option<OsString> = None;
    let mut enable_direct = cfg.enable_direct;
    let mut enable_unify = cfg.enable_unify;
    let mut compile_preprocessed_source_code = cfg.compile_preprocessed_source_code;
    let mut input_charset: Option<String> = None;
    let mut arch_count = 0usize;

    let mut iter = arguments.iter();
    while let Some(arg) = iter.next() {
        let s = match arg.to_str() {
            Some(s) => s,
            None => {
                // Non-UTF8 args can't be classified; forward opaquely.
                common_args.push(arg.clone());
                hash_args.push(arg.clone());
                continue;
            }
        };

        // Rule 1: hard bypass.
        if s == "-E" || s == "-M" || s == "-MM" || s == "--coverage"
            || s == "-fbranch-probabilities"
            || s == "-fprofile-arcs" || s == "-fprofile-generate" || s == "-fprofile-use"
            || s == "-ftest-coverage" || s == "-save-temps"
        {
            return CompilerArguments::CannotCache("unsupported argument");
        }
        if s.starts_with('@') {
            return CompilerArguments::CannotCache("@file");
        }
        if s == "-arch" {
            arch_count += 1;
            if arch_count > 1 {
                return CompilerArguments::CannotCache("multiple -arch");
            }
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            if let Some(val) = iter.next() {
                common_args.push(val.clone());
                hash_args.push(val.clone());
            }
            continue;
        }

        // Rule 2: direct-mode demotion.
        if s == "-Xpreprocessor" {
            enable_direct = false;
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            continue;
        }
        if s.starts_with("-Wp,") {
            if s == "-Wp,-MD," || s.starts_with("-Wp,-MD,") || s.starts_with("-Wp,-MMD,") {
                // recognized form, direct mode survives
                generating_dependencies = true;
            } else {
                enable_direct = false;
            }
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            continue;
        }

        // -c: this is a compilation.
        if s == "-c" {
            compilation = true;
            continue;
        }

        // -o FILE / -oFILE
        if s == "-o" {
            if let Some(val) = iter.next() {
                if val == "-" {
                    return CompilerArguments::CannotCache("-o -");
                }
                output_arg = Some(val.clone());
            }
            continue;
        }
        if let Some((_, val)) = split_concatenated(s, &["-o"]) {
            if val == "-" {
                return CompilerArguments::CannotCache("-o -");
            }
            output_arg = Some(OsString::from(val));
            continue;
        }

        // -x LANG / -xLANG
        if s == "-x" {
            if let Some(val) = iter.next() {
                explicit_language = Language::from_str(&val.to_string_lossy());
                last_explicit_language_before_input = input_arg.is_none();
            }
            continue;
        }
        if let Some((_, val)) = split_concatenated(s, &["-x"]) {
            explicit_language = Language::from_str(val);
            last_explicit_language_before_input = input_arg.is_none();
            continue;
        }

        // -MF FILE
        if s == "-MF" {
            if let Some(val) = iter.next() {
                output_dep = Some(PathBuf::from(&val));
            }
            continue;
        }
        // -MT / -MQ: suppress default -MT injection, but still forward.
        if s == "-MT" || s == "-MQ" {
            saw_mt_or_mq = true;
            preprocessor_only_args.push(arg.clone());
            hash_args.push(arg.clone());
            if let Some(val) = iter.next() {
                dep_target = Some(val.clone());
                preprocessor_only_args.push(val.clone());
                hash_args.push(val.clone());
            }
            continue;
        }
        // -MD / -MMD
        if s == "-MD" || s == "-MMD" {
            generating_dependencies = true;
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            continue;
        }

        // -finput-charset=...: remembered, suppressed from compiler_args
        // when feeding preprocessed source.
        if let Some(rest) = s.strip_prefix("-finput-charset=") {
            input_charset = Some(rest.to_owned());
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            continue;
        }

        // --specs=FILE: hash the file's contents instead of the arg text.
        if let Some(file) = s.strip_prefix("--specs=") {
            specs_files.push(PathBuf::from(file));
            common_args.push(arg.clone());
            // deliberately NOT pushed to hash_args: the driver hashes the
            // file's contents under the "specs" label instead.
            continue;
        }

        // --ccache-skip: consume next token verbatim, don't forward the
        // marker itself.
        if s == "--ccache-skip" {
            if let Some(val) = iter.next() {
                common_args.push(val.clone());
                hash_args.push(val.clone());
            }
            continue;
        }

        // -L ...: never participates in hash.
        if s == "-L" {
            common_args.push(arg.clone());
            if let Some(val) = iter.next() {
                common_args.push(val.clone());
            }
            continue;
        }
        if let Some((_, _val)) = split_concatenated(s, &["-L"]) {
            common_args.push(arg.clone());
            continue;
        }

        // Rule 4: path-rewriting options, two-token form.
        if is_path_rewrite_opt(s) {
            if let Some(val) = iter.next() {
                let rewritten = cfg.rewrite_path(cwd, Path::new(&val));
                common_args.push(arg.clone());
                common_args.push(rewritten.clone().into_os_string());
                if is_preprocessor_excluded(s) {
                    direct_only_hash_args.push(arg.clone());
                    direct_only_hash_args.push(rewritten.into_os_string());
                } else {
                    hash_args.push(arg.clone());
                    hash_args.push(rewritten.into_os_string());
                }
            }
            continue;
        }
        // Rule 4, concatenated `-I<path>` form.
        if let Some((flag, val)) = split_concatenated(s, &["-I"]) {
            let rewritten = cfg.rewrite_path(cwd, Path::new(val));
            let joined = format!("{}{}", flag, rewritten.display());
            common_args.push(OsString::from(&joined));
            if is_preprocessor_excluded(flag) {
                direct_only_hash_args.push(OsString::from(joined));
            } else {
                hash_args.push(OsString::from(joined));
            }
            continue;
        }

        // -D / -U, two-token and concatenated forms: not path-rewritten,
        // but subject to the same preprocessor-mode hash exclusion.
        if s == "-D" || s == "-U" {
            common_args.push(arg.clone());
            let mut full = vec![arg.clone()];
            if let Some(val) = iter.next() {
                common_args.push(val.clone());
                full.push(val.clone());
            }
            if is_preprocessor_excluded(s) {
                direct_only_hash_args.extend(full);
            } else {
                hash_args.extend(full);
            }
            continue;
        }
        if let Some((flag, _)) = split_concatenated(s, &["-D", "-U"]) {
            common_args.push(arg.clone());
            if is_preprocessor_excluded(flag) {
                direct_only_hash_args.push(arg.clone());
            } else {
                hash_args.push(arg.clone());
            }
            continue;
        }
        // -imultilib, -iquote, -isysroot, -iwithprefix, -iwithprefixbefore,
        // -nostdinc, -nostdinc++: excluded from preprocessor-mode hash, no
        // path rewriting specified for them.
        if s == "-imultilib" || s == "-iquote" || s == "-isysroot"
            || s == "-iwithprefix" || s == "-iwithprefixbefore"
        {
            common_args.push(arg.clone());
            direct_only_hash_args.push(arg.clone());
            if let Some(val) = iter.next() {
                common_args.push(val.clone());
                direct_only_hash_args.push(val.clone());
            }
            continue;
        }
        if s == "-nostdinc" || s == "-nostdinc++" {
            common_args.push(arg.clone());
            direct_only_hash_args.push(arg.clone());
            continue;
        }

        // Rule 5: debug options.
        if s.starts_with("-g") {
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            if s == "-g3" {
                compile_preprocessed_source_code = false;
            }
            if s != "-g0" {
                enable_unify = false;
            }
            continue;
        }

        // Any other flag-looking argument: forwarded and hashed verbatim.
        if s.starts_with('-') && s.len() > 1 {
            // still respect the generic "takes a value" set for anything
            // we haven't special-cased, so the value token travels with
            // its flag instead of being misread as an input file.
            common_args.push(arg.clone());
            hash_args.push(arg.clone());
            if argument_takes_value(s) {
                if let Some(val) = iter.next() {
                    common_args.push(val.clone());
                    hash_args.push(val.clone());
                }
            }
            continue;
        }

        // Rule 8: input file.
        if input_arg.is_some() || s == "-" {
            return CompilerArguments::CannotCache("multiple input files");
        }
        input_arg = Some(arg.clone());
    }

    if !compilation {
        return CompilerArguments::NotCompilation;
    }
    let input_arg = match input_arg {
        Some(i) => i,
        None => return CompilerArguments::CannotCache("no input file"),
    };
    let input_path = PathBuf::from(&input_arg);
    let language = if let (Some(lang), true) = (explicit_language, last_explicit_language_before_input) {
        lang
    } else if let Some(lang) = Language::from_file_name(&input_path) {
        lang
    } else if let Some(lang) = explicit_language {
        lang
    } else {
        return CompilerArguments::CannotCache("unknown source extension");
    };

    let output_obj = match output_arg {
        None => return CompilerArguments::CannotCache("no output file"),
        Some(o) => PathBuf::from(o),
    };
    if output_obj.exists() && !output_obj.is_file() {
        return CompilerArguments::CannotCache("output exists and is not a regular file");
    }

    if generating_dependencies && output_dep.is_none() {
        let base = output_obj
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dep = output_obj.with_file_name(format!("{}.d", base));
        preprocessor_only_args.push(OsString::from("-MF"));
        preprocessor_only_args.push(dep.clone().into_os_string());
        if !saw_mt_or_mq {
            preprocessor_only_args.push(OsString::from("-MT"));
            preprocessor_only_args.push(output_obj.clone().into_os_string());
        }
        output_dep = Some(dep);
    } else if generating_dependencies {
        if let Some(dep) = &output_dep {
            preprocessor_only_args.push(OsString::from("-MF"));
            preprocessor_only_args.push(dep.clone().into_os_string());
        }
        if !saw_mt_or_mq {
            preprocessor_only_args.push(OsString::from("-MT"));
            preprocessor_only_args.push(
                dep_target.clone().unwrap_or_else(|| output_obj.clone().into_os_string()),
            );
        }
    }

    let mut preprocessor_args: Vec<OsString> = common_args.clone();
    preprocessor_args.extend(preprocessor_only_args.clone());
    if let Some(cs) = &input_charset {
        preprocessor_args.push(OsString::from(format!("-finput-charset={}", cs)));
    }
    if let Some(lang) = explicit_language {
        preprocessor_args.push(OsString::from("-x"));
        preprocessor_args.push(OsString::from(lang.as_str()));
    }

    let mut compiler_args: Vec<OsString> = common_args;
    if generating_dependencies && !compile_preprocessed_source_code {
        compiler_args.extend(preprocessor_only_args);
    }
    if compile_preprocessed_source_code {
        compiler_args.push(OsString::from("-x"));
        compiler_args.push(OsString::from(language.as_str()));
    }

    let direct_i_file = language.is_preprocessed();

    CompilerArguments::Ok(ParsedArguments {
        input_file: input_path,
        language,
        output_obj,
        output_dep,
        preprocessor_args,
        compiler_args,
        hash_args,
        direct_only_hash_args,
        specs_files,
        generating_dependencies,
        direct_i_file,
        compile_preprocessed_source_code,
        enable_direct,
        enable_unify,
    })
}

/// Options that take a value as a following token, for anything not given
/// bespoke handling above. Mirrors the `ARGS_WITH_VALUE` table real
/// gcc/clang frontends use to avoid misreading an option's value as the
/// input file.
const ARGS_WITH_VALUE: &[&str] = &[
    "--param", "-A", "-F", "-G", "-V", "-Xassembler", "-Xlinker",
    "-aux-info", "-b", "-install_name", "-u",
];

pub fn argument_takes_value(arg: &str) -> bool {
    ARGS_WITH_VALUE.contains(&arg)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::CompilerArguments;
    use std::path::PathBuf;

    fn ovec(args: &[&str]) -> Vec<OsString> {
        args.iter().map(|s| OsString::from(s)).collect()
    }

    fn default_cfg() -> Config {
        Config {
            cache_dir: PathBuf::from("/tmp/.ccache"),
            base_dir: None,
            nlevels: 2,
            temp_dir: PathBuf::from("/tmp/.ccache/tmp"),
            enable_direct: true,
            enable_unify: false,
            enable_compression: false,
            compile_preprocessed_source_code: true,
            compilercheck: crate::config::CompilerCheck::Mtime,
            hashdir: false,
            extra_files: vec![],
            sloppiness: Default::default(),
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
    fn test_basic_compile() {
        let args = ovec(&["-c", "foo.c", "-o", "foo.o"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::Ok(parsed) => {
                assert_eq!(parsed.input_file, PathBuf::from("foo.c"));
                assert_eq!(parsed.output_obj, PathBuf::from("foo.o"));
                assert_eq!(parsed.language, Language::C);
            }
            o => panic!("unexpected: {:?}", o),
        }
    }

    #[test]
    fn test_not_compilation_without_dash_c() {
        let args = ovec(&["foo.c", "-o", "foo.o"]);
        let cwd = PathBuf::from("/tmp");
        assert_eq!(
            parse_arguments(&args, &cwd, &default_cfg()),
            CompilerArguments::NotCompilation
        );
    }

    #[test]
    fn test_bypass_on_e() {
        let args = ovec(&["-E", "-c", "foo.c", "-o", "foo.o"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::CannotCache(_) => {}
            o => panic!("expected bypass, got {:?}", o),
        }
    }

    #[test]
    fn test_bypass_multiple_inputs() {
        let args = ovec(&["-c", "foo.c", "bar.c", "-o", "foo.o"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::CannotCache(_) => {}
            o => panic!("expected bypass, got {:?}", o),
        }
    }

    #[test]
    fn test_hash_exclusion_d_i_u_in_preprocessor_mode() {
        let cwd = PathBuf::from("/tmp");
        let cfg = default_cfg();
        let a = ovec(&["-c", "foo.c", "-o", "foo.o", "-DFOO=1", "-Ibar"]);
        let b = ovec(&["-c", "foo.c", "-o", "foo.o"]);
        let (pa, pb) = match (parse_arguments(&a, &cwd, &cfg), parse_arguments(&b, &cwd, &cfg)) {
            (CompilerArguments::Ok(pa), CompilerArguments::Ok(pb)) => (pa, pb),
            _ => panic!("expected Ok"),
        };
        // hash_args (preprocessor-mode-participating) must be equal...
        assert_eq!(pa.hash_args, pb.hash_args);
        // ...but direct_only_hash_args must differ.
        assert_ne!(pa.direct_only_hash_args, pb.direct_only_hash_args);
    }

    #[test]
    fn test_g3_forces_compile_preprocessed_source_code_false() {
        let args = ovec(&["-c", "foo.c", "-o", "foo.o", "-g3"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::Ok(parsed) => {
                assert!(!parsed.compile_preprocessed_source_code);
            }
            o => panic!("unexpected: {:?}", o),
        }
    }

    #[test]
    fn test_g_disables_unify_except_g0() {
        let cwd = PathBuf::from("/tmp");
        let mut cfg = default_cfg();
        cfg.enable_unify = true;
        let args = ovec(&["-c", "foo.c", "-o", "foo.o", "-g"]);
        match parse_arguments(&args, &cwd, &cfg) {
            CompilerArguments::Ok(parsed) => assert!(!parsed.enable_unify),
            o => panic!("unexpected: {:?}", o),
        }
        let args0 = ovec(&["-c", "foo.c", "-o", "foo.o", "-g0"]);
        match parse_arguments(&args0, &cwd, &cfg) {
            CompilerArguments::Ok(parsed) => assert!(parsed.enable_unify),
            o => panic!("unexpected: {:?}", o),
        }
    }

    #[test]
    fn test_generating_dependencies_synthesizes_mf() {
        let args = ovec(&["-c", "foo.c", "-o", "foo.o", "-MD"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::Ok(parsed) => {
                assert_eq!(parsed.output_dep, Some(PathBuf::from("foo.o.d")));
                assert!(parsed
                    .preprocessor_args
                    .iter()
                    .any(|a| a == "-MT"));
            }
            o => panic!("unexpected: {:?}", o),
        }
    }

    #[test]
    fn test_specs_file_excluded_from_hash_args() {
        let args = ovec(&["-c", "foo.c", "-o", "foo.o", "--specs=my.specs"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::Ok(parsed) => {
                assert_eq!(parsed.specs_files, vec![PathBuf::from("my.specs")]);
                assert!(!parsed.hash_args.iter().any(|a| a.to_string_lossy().contains("specs")));
            }
            o => panic!("unexpected: {:?}", o),
        }
    }

    #[test]
    fn test_l_never_in_hash() {
        let args = ovec(&["-c", "foo.c", "-o", "foo.o", "-L", "/usr/lib"]);
        let cwd = PathBuf::from("/tmp");
        match parse_arguments(&args, &cwd, &default_cfg()) {
            CompilerArguments::Ok(parsed) => {
                assert!(!parsed.hash_args.iter().any(|a| a == "-L"));
                assert!(!parsed.direct_only_hash_args.iter().any(|a| a == "-L"));
                assert!(parsed.compiler_args.iter().any(|a| a == "-L"));
            }
            o => panic!("unexpected: {:?}", o),
        }
    }

    #[test]
    fn test_path_rewriting_i_option() {
        let args = ovec(&["-c", "foo.c", "-o", "foo.o", "-I", "/b/x/z"]);
        let cwd = PathBuf::from("/b/x/y");
        let mut cfg = default_cfg();
        cfg.base_dir = Some(PathBuf::from("/b"));
        match parse_arguments(&args, &cwd, &cfg) {
            CompilerArguments::Ok(parsed) => {
                assert!(parsed
                    .compiler_args
                    .iter()
                    .any(|a| a == "../z"));
            }
            o => panic!("unexpected: {:?}", o),
        }
    }
}
