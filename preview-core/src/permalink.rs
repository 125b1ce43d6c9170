//! Permalink helpers.
//!
//! Lookups compare permalinks without their trailing slash, so `/a/` and `/a`
//! address the same page. Callers may also smuggle generator variables into a
//! permalink as `/NAME=value/` segments; [`split_variables`] pulls them out.

use std::collections::BTreeMap;

/// Strip a single trailing slash. The site root `/` normalizes to `""`.
pub fn normalize(permalink: &str) -> &str {
    permalink.strip_suffix('/').unwrap_or(permalink)
}

/// Remove `/NAME=value` segments from `permalink`, returning the cleaned
/// permalink and the extracted variables.
///
/// `NAME` must look like an environment variable (`[A-Za-z_][A-Za-z0-9_]*`);
/// anything else is left in place. Runs of slashes left behind are collapsed.
pub fn split_variables(permalink: &str) -> (String, BTreeMap<String, String>) {
    let mut variables = BTreeMap::new();
    let mut cleaned = String::with_capacity(permalink.len());

    for (index, segment) in permalink.split('/').enumerate() {
        if index > 0 {
            if let Some((name, value)) = as_variable(segment) {
                variables.insert(name.to_string(), value.to_string());
                continue;
            }
            cleaned.push('/');
        }
        cleaned.push_str(segment);
    }

    while cleaned.contains("//") {
        cleaned = cleaned.replace("//", "/");
    }
    (cleaned, variables)
}

fn as_variable(segment: &str) -> Option<(&str, &str)> {
    let (name, value) = segment.split_once('=')?;
    if value.is_empty() || !is_variable_name(name) {
        return None;
    }
    Some((name, value))
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
