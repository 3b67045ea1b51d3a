use crate::config;
use serde_json::Value;
use std::collections::BTreeSet;

/// Replaces every character outside printable ASCII with a single space.
pub fn sanitize_name(raw: &str) -> String {
    config::NON_PRINTABLE_ASCII_RE
        .replace_all(raw, " ")
        .into_owned()
}

/// Walks a taxonomy tree response and collects category ids from `id`
/// fields and from `s` slugs of the form `.../c:<id>`. Only numeric ids are
/// kept since the seed file holds integers.
pub fn collect_category_ids(value: &Value, out: &mut BTreeSet<u64>) {
    match value {
        Value::Object(map) => {
            if let Some(id) = map.get("id").and_then(value_as_id) {
                out.insert(id);
            }
            if let Some(slug) = map.get("s").and_then(Value::as_str) {
                if let Some((_, tail)) = slug.rsplit_once("c:") {
                    if let Ok(id) = tail.trim().parse::<u64>() {
                        out.insert(id);
                    }
                }
            }
            for child in map.values() {
                collect_category_ids(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_category_ids(item, out);
            }
        }
        _ => {}
    }
}

fn value_as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
