//! Compiler-style command line parsing.
//!
//! Accepts the arguments an editor passes to its C# compiler:
//!
//! ```text
//! -out:Library/Game.dll -r:UnityEngine.dll -define:DEBUG;TRACE @args.rsp a.cs b.cs
//! ```
//!
//! Response files (`@file`) hold one argument per line and may nest.

use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use kiln_core::{BuildOptions, DebugSymbolMode, OutputReuse};
use rustc_hash::FxHashSet;

/// Response files nested deeper than this are rejected.
const MAX_RESPONSE_DEPTH: usize = 16;

/// Everything a single compile call asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerArgs {
    pub output: Option<String>,
    pub assembly_name: String,
    pub defines: Vec<String>,
    pub references: Vec<String>,
    pub files: Vec<String>,
    pub suppressed: Vec<String>,
    pub allow_unsafe: bool,
    pub extra_flags: Vec<String>,
}

impl CompilerArgs {
    /// Parse `args`, expanding response files relative to `work_dir`.
    ///
    /// References and sources are de-duplicated keeping the first occurrence.
    pub fn parse<I, S>(args: I, work_dir: &Path) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = CompilerArgs::default();
        for arg in args {
            parsed.parse_arg(arg.as_ref(), work_dir, 0)?;
        }
        dedup(&mut parsed.references);
        dedup(&mut parsed.files);

        if parsed.output.is_none() {
            bail!("No output given (expected -out:<file>)");
        }
        Ok(parsed)
    }

    fn parse_arg(&mut self, arg: &str, work_dir: &Path, depth: usize) -> anyhow::Result<()> {
        let arg = arg.trim();
        if arg.is_empty() {
            return Ok(());
        }

        if let Some(file) = arg.strip_prefix('@') {
            return self.expand_response_file(&unquote(file), work_dir, depth);
        }

        let Some(flag) = arg.strip_prefix('-') else {
            self.files.push(unquote(arg));
            return Ok(());
        };

        let (name, value) = match flag.split_once(':') {
            Some((name, value)) => (name.to_ascii_lowercase(), value),
            None => (flag.to_ascii_lowercase(), ""),
        };

        match name.as_str() {
            "r" | "reference" => {
                self.references.extend(split_list(value, &[';', ',']));
            }
            "d" | "define" => {
                self.defines.extend(split_list(value, &[';', ',']));
            }
            "out" => {
                let output = unquote(value);
                self.assembly_name = Path::new(&output)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.output = Some(output);
            }
            "nowarn" => {
                self.suppressed.extend(split_list(value, &[',', ';']));
            }
            "unsafe" | "unsafe+" => self.allow_unsafe = true,
            "unsafe-" => self.allow_unsafe = false,
            _ => self.extra_flags.push(arg.to_string()),
        }
        Ok(())
    }

    fn expand_response_file(
        &mut self,
        file: &str,
        work_dir: &Path,
        depth: usize,
    ) -> anyhow::Result<()> {
        if depth >= MAX_RESPONSE_DEPTH {
            bail!("Response files nested too deeply at @{}", file);
        }

        let path = work_dir.join(file);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read response file {}", path.display()))?;
        for line in contents.lines() {
            self.parse_arg(line, work_dir, depth + 1)?;
        }
        Ok(())
    }

    /// Build options for one request from `work_dir`.
    pub fn into_options(
        self,
        work_dir: &Path,
        debug_symbols: DebugSymbolMode,
        output_reuse: OutputReuse,
    ) -> BuildOptions {
        BuildOptions {
            work_directory: work_dir.to_string_lossy().into_owned(),
            assembly_name: self.assembly_name,
            output: self.output.unwrap_or_default(),
            defines: self.defines,
            references: self.references,
            files: self.files,
            debug_symbols,
            output_reuse,
            allow_unsafe: self.allow_unsafe,
            extra_flags: self.extra_flags,
            suppressed: self.suppressed,
        }
    }
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

fn split_list(value: &str, separators: &[char]) -> Vec<String> {
    value
        .split(separators)
        .map(unquote)
        .filter(|item| !item.is_empty())
        .collect()
}

fn dedup(items: &mut Vec<String>) {
    let mut seen = FxHashSet::default();
    items.retain(|item| seen.insert(item.clone()));
}
