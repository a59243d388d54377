//! Parse a project `.env` file into a key-value map. Application to the
//! process environment (and its precedence rules) happens in `lib.rs`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// `.env` location: `override_dir` when given, else the current directory.
/// `None` when no file exists there.
fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Strips one matching pair of surrounding quotes. Double-quoted values
/// support the `\"` escape; single-quoted values are taken verbatim.
fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].replace("\\\"", "\"");
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

/// Minimal `.env` grammar: `KEY=VALUE` lines, `#` comment lines, blank
/// lines. No multiline values or line continuations.
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote(value.trim()));
    }
    out
}

/// Loads `.env` from `override_dir` or the current directory. A missing file
/// is an empty map, not an error.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match dotenv_path(override_dir) {
        Some(path) => Ok(parse_dotenv(&std::fs::read_to_string(&path)?)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_pairs() {
        let m = parse_dotenv("FOO=bar\nBAZ=quux\n");
        assert_eq!(m.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(m.get("BAZ"), Some(&"quux".to_string()));
    }

    #[test]
    fn skips_comments_blanks_and_malformed() {
        let m = parse_dotenv("\n# comment\nKEY=val\nNOT_A_PAIR\n=anonymous\n  \n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("KEY"), Some(&"val".to_string()));
    }

    #[test]
    fn unquotes_values() {
        let m = parse_dotenv("A=\"hello world\"\nB='single'\nC=\"say \\\"hi\\\"\"\nD=\"\"\n");
        assert_eq!(m.get("A"), Some(&"hello world".to_string()));
        assert_eq!(m.get("B"), Some(&"single".to_string()));
        assert_eq!(m.get("C"), Some(&"say \"hi\"".to_string()));
        assert_eq!(m.get("D"), Some(&"".to_string()));
    }

    #[test]
    fn keeps_empty_values() {
        let m = parse_dotenv("KEY=\nOTHER=val\n");
        assert_eq!(m.get("KEY"), Some(&"".to_string()));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn reads_file_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "A=1\nB=2\n").unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(m.get("A"), Some(&"1".to_string()));
        assert_eq!(m.get("B"), Some(&"2".to_string()));
    }
}
