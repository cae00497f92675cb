//! `KEY="value"` files used for node/environment meta and credentials.

use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{ManifestError, Result};

/// Ordered variables; later inserts of an existing key keep its position.
pub type EnvVars = IndexMap<String, String>;

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_.\-]*)\s*=\s*(.*?)\s*$"#)
            .expect("Invalid env line regex pattern")
    })
}

fn unquote(raw: &str) -> String {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            let inner = &raw[1..raw.len() - 1];
            return if quote == '"' {
                unescape(inner)
            } else {
                inner.to_string()
            };
        }
    }
    // Unquoted values end at an inline comment.
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Undo the escapes [`env_line`] writes: `\\`, `\"`, `\n` and `\r`. Any
/// other backslash is kept as is.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(escaped @ ('"' | '\\')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// One `KEY="value"` line, escaped so that [`parse_env`] reads `value` back
/// unchanged, line breaks included.
pub fn env_line(key: &str, value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    format!("{key}=\"{escaped}\"\n")
}

/// Parse the contents of an env file.
pub fn parse_env(content: &str) -> EnvVars {
    let mut vars = EnvVars::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(caps) = line_pattern().captures(line) {
            vars.insert(caps[1].to_string(), unquote(&caps[2]));
        }
    }
    vars
}

/// Read an env file; a missing file yields no variables.
pub fn read_env_file(path: &Path) -> Result<EnvVars> {
    if !path.is_file() {
        return Ok(EnvVars::new());
    }
    debug!(path = %path.display(), "Loading env file");
    Ok(parse_env(&fs::read_to_string(path)?))
}

/// Interpret `--extra-vars`: inline `K=V K2=V2` pairs, or a path to an env
/// file when the value contains no `=`.
pub fn parse_extra_vars(spec: &str) -> Result<EnvVars> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(EnvVars::new());
    }
    if !spec.contains('=') {
        return read_env_file(Path::new(spec));
    }

    let mut vars = EnvVars::new();
    for pair in spec.split_whitespace() {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| ManifestError::InvalidExtraVars(pair.to_string()))?;
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
