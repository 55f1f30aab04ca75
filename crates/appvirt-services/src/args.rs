//! Argument extraction shared by the services.

use appvirt_kernel::CallError;
use serde_json::Value;

/// A required string field.
pub(crate) fn require_str<'a>(args: &'a Value, field: &str, method: &str) -> Result<&'a str, CallError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::invalid_args(method, format!("missing required string field `{field}`")))
}

/// An optional string field.  Present but not a string is an error.
pub(crate) fn optional_str<'a>(
    args: &'a Value,
    field: &str,
    method: &str,
) -> Result<Option<&'a str>, CallError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(CallError::invalid_args(
            method,
            format!("field `{field}` must be a string"),
        )),
    }
}

/// An optional boolean field with a default.
pub(crate) fn optional_bool(args: &Value, field: &str, default: bool) -> bool {
    args.get(field).and_then(Value::as_bool).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_fields() {
        let args = json!({"id": "a", "n": 3, "flag": true});
        assert_eq!(require_str(&args, "id", "m").unwrap(), "a");
        assert!(require_str(&args, "n", "m").is_err());
        assert!(require_str(&args, "missing", "m").is_err());

        assert_eq!(optional_str(&args, "id", "m").unwrap(), Some("a"));
        assert_eq!(optional_str(&args, "missing", "m").unwrap(), None);
        assert!(optional_str(&args, "n", "m").is_err());

        assert!(optional_bool(&args, "flag", false));
        assert!(!optional_bool(&args, "missing", false));
    }
}
