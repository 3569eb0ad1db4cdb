//! Field lookups over loosely shaped collaborator JSON.
//!
//! Paths are dotted (`"subject.subject_name"`); candidates are tried in the
//! order given and the first usable value wins.

use serde_json::Value;

pub fn lookup<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = v;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

fn as_i64_lenient(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn first_i64(v: &Value, paths: &[&str]) -> Option<i64> {
    paths
        .iter()
        .find_map(|p| lookup(v, p).and_then(as_i64_lenient))
}

pub fn first_str(v: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| {
        lookup(v, p)
            .and_then(|x| x.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

pub fn first_bool(v: &Value, paths: &[&str]) -> Option<bool> {
    paths.iter().find_map(|p| lookup(v, p).and_then(|x| x.as_bool()))
}

/// String id, accepting numeric ids too.
pub fn first_id(v: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| match lookup(v, p)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Human text for a warning that may arrive as a string or an object.
pub fn message_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        _ => first_str(v, &["message", "description", "detail", "issue"])
            .unwrap_or_else(|| v.to_string()),
    }
}
