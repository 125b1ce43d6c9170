//! Env-file loading for generator runs.
//!
//! A website can ship a `.env` and a `preview.env` at its root. Entries are
//! `KEY=VALUE` lines; values may reference other variables as `${VAR}` or
//! `${VAR:-default}`, resolved against what has been set so far and then the
//! worker's own environment.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{io_err, GeneratorError};

/// Ordered variables handed to the generator. Later inserts win.
pub type EnvVars = BTreeMap<String, String>;

/// Stands in for `${` while dotenvy parses, so its own substitution leaves
/// references for [`expand`], which knows the `:-default` form and the
/// variables set by earlier layers.
const DEFERRED: &str = "\u{e000}{";

/// Load `path` into `vars` if it exists. Returns whether a file was read.
pub async fn load_file(path: &Path, vars: &mut EnvVars) -> Result<bool, GeneratorError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no env file");
            return Ok(false);
        }
        Err(err) => return Err(io_err(path, err)),
    };
    for (key, raw) in parse(path, &contents)? {
        let value = expand(&raw, |name| {
            vars.get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
                .filter(|v| !v.is_empty())
        });
        vars.insert(key, value);
    }
    tracing::debug!(path = %path.display(), "env file loaded");
    Ok(true)
}

/// Parse env-file `contents` with dotenvy: quoting, escapes, `export` and
/// trailing comments follow dotenv syntax. `${...}` references come back
/// unexpanded. Lines dotenvy rejects are skipped with a warning.
pub fn parse(path: &Path, contents: &str) -> Result<Vec<(String, String)>, GeneratorError> {
    let guarded = contents.replace("${", DEFERRED);
    let mut entries = Vec::new();
    for item in dotenvy::from_read_iter(guarded.as_bytes()) {
        match item {
            Ok((key, value)) => entries.push((key, value.replace(DEFERRED, "${"))),
            Err(dotenvy::Error::Io(err)) => return Err(io_err(path, err)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping env file line")
            }
        }
    }
    Ok(entries)
}

/// Expand `${VAR}` and `${VAR:-default}` in `value`. Unknown variables
/// without a default expand to the empty string; an unterminated `${` is
/// kept literally.
pub fn expand<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &after[..end];
        let resolved = match inner.split_once(":-") {
            Some((name, default)) => lookup(name).unwrap_or_else(|| default.to_string()),
            None => lookup(inner).unwrap_or_default(),
        };
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    fn parse_str(contents: &str) -> Vec<(String, String)> {
        parse(Path::new(".env"), contents).unwrap()
    }

    #[test]
    fn parse_handles_comments_quotes_and_export() {
        let parsed = parse_str("# site settings\nexport A=1\nB=\"two words\"\nC='x'\nD=plain # trailing\n\n");
        assert_eq!(
            parsed,
            vec![
                ("A".into(), "1".into()),
                ("B".into(), "two words".into()),
                ("C".into(), "x".into()),
                ("D".into(), "plain".into()),
            ]
        );
    }

    #[test]
    fn quoted_value_may_carry_a_trailing_comment() {
        let parsed = parse_str("A=\"hello world\" # note\n");
        assert_eq!(parsed, vec![("A".into(), "hello world".into())]);
    }

    #[test]
    fn double_quotes_interpret_escapes() {
        let parsed = parse_str("B=\"line1\\nline2\"\nC=\"say \\\"hi\\\"\"\n");
        assert_eq!(
            parsed,
            vec![
                ("B".into(), "line1\nline2".into()),
                ("C".into(), "say \"hi\"".into()),
            ]
        );
    }

    #[test]
    fn references_survive_parsing_in_every_quote_style() {
        let parsed = parse_str("A=${HOST}/x\nB=\"${PORT:-80}\"\nC='${RAW}'\n");
        assert_eq!(
            parsed,
            vec![
                ("A".into(), "${HOST}/x".into()),
                ("B".into(), "${PORT:-80}".into()),
                ("C".into(), "${RAW}".into()),
            ]
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let parsed = parse_str("GOOD=1\nnot a pair\nALSO=2\n");
        assert_eq!(
            parsed,
            vec![("GOOD".into(), "1".into()), ("ALSO".into(), "2".into())]
        );
    }

    #[test]
    fn expand_resolves_plain_and_default_forms() {
        let env = lookup(&[("HOST", "cms.example.org")]);
        assert_eq!(expand("https://${HOST}/api", &env), "https://cms.example.org/api");
        assert_eq!(expand("${MISSING:-fallback}", &env), "fallback");
        assert_eq!(expand("${HOST:-fallback}", &env), "cms.example.org");
        assert_eq!(expand("[${MISSING}]", &env), "[]");
        assert_eq!(expand("broken ${HOST", &env), "broken ${HOST");
    }

    #[tokio::test]
    async fn load_file_sees_earlier_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "ROOT=/srv\nASSETS=${ROOT}/assets\n").unwrap();

        let mut vars = EnvVars::new();
        assert!(load_file(&path, &mut vars).await.unwrap());
        assert_eq!(vars.get("ASSETS").map(String::as_str), Some("/srv/assets"));
    }

    #[tokio::test]
    async fn load_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut vars = EnvVars::new();
        assert!(!load_file(&dir.path().join("preview.env"), &mut vars).await.unwrap());
        assert!(vars.is_empty());
    }
}
