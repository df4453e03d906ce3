//! Lookup helpers over fetched content records.
//!
//! Records are whatever JSON the content API returned; every accessor is
//! total and falls back to an empty/zero value instead of failing.

use serde_json::Value;

/// Node at a JSON-pointer path, `None` when any step is absent.
pub fn node<'a>(record: &'a Value, pointer: &str) -> Option<&'a Value> {
    record.pointer(pointer)
}

/// Text at a JSON-pointer path, `""` when absent or structured.
/// Numbers and booleans render their plain form.
pub fn text_at(record: &Value, pointer: &str) -> String {
    match record.pointer(pointer) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}

/// Integer at a JSON-pointer path, `0` when absent or non-numeric.
/// Numeric strings parse; floats truncate.
pub fn int_at(record: &Value, pointer: &str) -> i64 {
    match record.pointer(pointer) {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{int_at, node, text_at};

    #[test]
    fn node_walks_pointer_paths() {
        let record = serde_json::json!({"data": {"stat": {"view": 7}}});
        assert!(node(&record, "/data/stat").is_some());
        assert!(node(&record, "/data/missing").is_none());
    }

    #[test]
    fn text_at_defaults_and_coerces() {
        let record = serde_json::json!({"title": "hi", "aid": 170001, "ok": true});
        assert_eq!(text_at(&record, "/title"), "hi");
        assert_eq!(text_at(&record, "/aid"), "170001");
        assert_eq!(text_at(&record, "/ok"), "true");
        assert_eq!(text_at(&record, "/missing"), "");
        assert_eq!(text_at(&record, "/"), "");
    }

    #[test]
    fn int_at_defaults_and_coerces() {
        let record = serde_json::json!({"view": 15000, "room_id": "21452505", "rate": 9.9, "bad": "x"});
        assert_eq!(int_at(&record, "/view"), 15000);
        assert_eq!(int_at(&record, "/room_id"), 21452505);
        assert_eq!(int_at(&record, "/rate"), 9);
        assert_eq!(int_at(&record, "/bad"), 0);
        assert_eq!(int_at(&record, "/missing"), 0);
    }
}
