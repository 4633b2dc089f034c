use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const QUOTED_PREFIX: &str = "\"SLACK_ARCHIVE_";

fn source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Variable names that appear as whole string literals, e.g. `"SLACK_ARCHIVE_LOG"`.
/// Mentions in comments or partial prefixes used for formatting are ignored.
fn quoted_env_names(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices(QUOTED_PREFIX).filter_map(move |(start, _)| {
        let name_start = start + 1;
        let rest = &source[name_start..];
        let end = rest.find('"')?;
        let name = &rest[..end];
        let suffix = &name[QUOTED_PREFIX.len() - 1..];
        let valid = !suffix.is_empty()
            && suffix
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
        valid.then_some(name)
    })
}

fn render(names: &BTreeSet<&str>) -> String {
    let mut out = String::from("pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[\n");
    for name in names {
        out.push_str(&format!("    {name:?},\n"));
    }
    out.push_str("];\n");
    out
}

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    let sources = source_files(Path::new("src"))?
        .into_iter()
        .map(fs::read_to_string)
        .collect::<io::Result<Vec<_>>>()?;
    let names: BTreeSet<&str> = sources.iter().flat_map(|s| quoted_env_names(s)).collect();

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other("OUT_DIR not set"))?;
    fs::write(out_dir.join("env_allowlist.rs"), render(&names))
}
