//! The `{success, data}` / `{success, error}` response envelope every
//! endpoint wraps its payload in.

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Wrap a successful result as `{"success":true,"data":<data>}`.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": data,
    }))
}

/// Wrap a unit success as `{"success":true,"data":null}`.
pub fn ok_empty() -> Json<Value> {
    ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_data_under_success_true() {
        let Json(value) = ok(json!({"id": 1}));
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["id"], 1);
    }

    #[test]
    fn empty_success_has_null_data() {
        let Json(value) = ok_empty();
        assert_eq!(value["success"], true);
        assert!(value["data"].is_null());
    }
}
