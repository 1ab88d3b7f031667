use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

/// Matches a quoted key whose name kept a stray `{` from a client-side
/// serialization bug, e.g. `{"{empresa":"ACME"}`. Only key position counts
/// (preceded by `{` or `,`), so string values are left alone.
fn broken_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([{,]\s*)"\{([^"{}]*)""#).expect("broken-key regex"))
}

/// Repairs the malformed JSON that some clients produce when serializing
/// multipart form fields, and guarantees the result parses as a JSON object.
///
/// Known artifacts handled: a stray leading `"{`, a stray trailing `}"`,
/// keys carrying a leading `{` inside the quotes, and a missing closing
/// brace. Anything still unparseable after repair collapses to `"{}"`;
/// request handling must never abort on a corrupted mapping payload.
///
/// Idempotent: input that already parses as a JSON object passes through
/// unchanged (modulo surrounding whitespace).
pub fn sanitize(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(s) => s.trim(),
        None => return "{}".to_string(),
    };
    if raw.is_empty() {
        return "{}".to_string();
    }

    let mut repaired = raw.to_string();

    // `"{...` -> `{...` and `...}"` -> `...}`
    if let Some(rest) = repaired.strip_prefix("\"{") {
        repaired = format!("{{{rest}");
    }
    if let Some(rest) = repaired.strip_suffix("}\"") {
        repaired = format!("{rest}}}");
    }

    repaired = broken_key_re()
        .replace_all(&repaired, "$1\"$2\"")
        .into_owned();

    if !repaired.ends_with('}') {
        repaired.push('}');
    }

    match serde_json::from_str::<serde_json::Value>(&repaired) {
        Ok(value) if value.is_object() => repaired,
        _ => {
            warn!(raw, "unrepairable mapping payload, defaulting to empty object");
            "{}".to_string()
        }
    }
}

/// Extracts the string-valued entries of a sanitized JSON object. Non-string
/// values are ignored rather than rejected, matching the leniency of
/// [`sanitize`].
pub fn parse_string_map(sanitized: &str) -> HashMap<String, String> {
    let value: serde_json::Value = match serde_json::from_str(sanitized) {
        Ok(v) => v,
        Err(_) => return HashMap::new(),
    };
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => HashMap::new(),
    }
}
