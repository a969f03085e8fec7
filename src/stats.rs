//! Flattening of component stats into a single key-value map.
//!
//! Nested objects join keys with `.`, array elements use their index:
//!
//! ```rust
//! use serde_json::json;
//! use tunevisor::stats::flatten;
//!
//! let flat = flatten(&json!({"pool": {"workers": 4}, "tasks": [{"runs": 2}]}));
//! assert_eq!(flat["pool.workers"], json!(4));
//! assert_eq!(flat["tasks.0.runs"], json!(2));
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Flattens any serializable stats value. A value that fails to serialize yields an empty map.
pub fn flatten<S: Serialize + ?Sized>(stats: &S) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    match serde_json::to_value(stats) {
        Ok(value) => walk(String::new(), value, &mut out),
        Err(e) => tracing::warn!(error = %e, "stats not serializable"),
    }
    out
}

fn walk(prefix: String, value: Value, out: &mut BTreeMap<String, Value>) {
    let key = |k: &str| {
        if prefix.is_empty() {
            k.to_string()
        } else {
            format!("{prefix}.{k}")
        }
    };
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk(key(&k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.into_iter().enumerate() {
                walk(key(&i.to_string()), v, out);
            }
        }
        leaf => {
            out.insert(prefix, leaf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_keep_their_key() {
        #[derive(Serialize)]
        struct S {
            hits: u64,
            rate: f64,
            name: &'static str,
            last: Option<String>,
        }
        let flat = flatten(&S {
            hits: 3,
            rate: 0.5,
            name: "cache",
            last: None,
        });
        assert_eq!(flat.len(), 4);
        assert_eq!(flat["hits"], json!(3));
        assert_eq!(flat["last"], Value::Null);
    }

    #[test]
    fn empty_containers_vanish() {
        let flat = flatten(&json!({"tasks": [], "nested": {}, "n": 1}));
        assert_eq!(flat.keys().collect::<Vec<_>>(), vec!["n"]);
    }
}
