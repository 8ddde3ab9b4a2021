//! Structured validation errors returned with HTTP 422.

use crate::reflect::{Model, TypeShape};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Status code of validation failures
pub const VALIDATION_STATUS: u16 = 422;

pub const MISSING: &str = "value_error.missing";
pub const JSON_DECODE: &str = "value_error.jsondecode";

/// One failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Path to the offending value, starting with its source (`body`, `query`, `path`)
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Map<String, Value>>,
}

impl ValidationError {
    pub fn new<S: AsRef<str>>(loc: &[S], msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            loc: loc.iter().map(|s| s.as_ref().to_string()).collect(),
            msg: msg.into(),
            kind: kind.into(),
            ctx: None,
        }
    }

    pub fn missing<S: AsRef<str>>(loc: &[S]) -> Self {
        Self::new(loc, "field required", MISSING)
    }

    pub fn with_ctx(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.ctx
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Convert a decoder failure using the position and category serde_json reports.
    pub fn from_json_error(root: &str, err: &serde_json::Error) -> Self {
        let (msg, kind) = match err.classify() {
            Category::Syntax => ("invalid JSON syntax".to_string(), JSON_DECODE),
            Category::Eof => ("unexpected end of JSON input".to_string(), JSON_DECODE),
            Category::Io => ("request body could not be read".to_string(), JSON_DECODE),
            Category::Data => (err.to_string(), "type_error"),
        };

        let mut error = Self::new(&[root], msg, kind);
        if err.line() > 0 {
            error = error
                .with_ctx("lineno", err.line())
                .with_ctx("colno", err.column());
        }
        error
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} ({})", self.loc.join("."), self.msg, self.kind)
    }
}

impl Model for ValidationError {
    fn shape() -> TypeShape {
        TypeShape::named("", "ValidationError")
            .field::<Vec<String>>("Loc", r#"json:"loc" validate:"required" description:"Location""#)
            .field::<String>("Msg", r#"json:"msg" validate:"required" description:"Message""#)
            .field::<String>("Type", r#"json:"type" validate:"required" description:"Error Type""#)
            .field::<Option<HashMap<String, Value>>>("Ctx", r#"json:"ctx" description:"Context""#)
    }
}

/// Body of a 422 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpValidationError {
    pub detail: Vec<ValidationError>,
}

impl HttpValidationError {
    pub fn new(detail: Vec<ValidationError>) -> Self {
        Self { detail }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Model for HttpValidationError {
    fn shape() -> TypeShape {
        TypeShape::named("", "HTTPValidationError")
            .field::<Vec<ValidationError>>("Detail", r#"json:"detail" description:"Detail""#)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let err = ValidationError::missing(&["body", "name"]);
        let body = HttpValidationError::new(vec![err]).to_value();
        assert_eq!(
            body,
            json!({"detail": [{"loc": ["body", "name"], "msg": "field required", "type": "value_error.missing"}]})
        );
    }

    #[test]
    fn test_ctx_is_serialized_when_present() {
        let err = ValidationError::new(&["query", "age"], "too large", "value_error.number.not_le")
            .with_ctx("limit_value", 150);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["ctx"]["limit_value"], json!(150));
        assert_eq!(value["type"], json!("value_error.number.not_le"));
    }

    #[test]
    fn test_from_json_syntax_error() {
        let err = serde_json::from_str::<Value>("{\"name\": }").unwrap_err();
        let converted = ValidationError::from_json_error("body", &err);
        assert_eq!(converted.loc, vec!["body"]);
        assert_eq!(converted.kind, JSON_DECODE);
        let ctx = converted.ctx.unwrap();
        assert_eq!(ctx["lineno"], json!(1));
        assert!(ctx["colno"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_from_json_eof_error() {
        let err = serde_json::from_str::<Value>("{\"name\": 1").unwrap_err();
        let converted = ValidationError::from_json_error("body", &err);
        assert_eq!(converted.kind, JSON_DECODE);
        assert_eq!(converted.msg, "unexpected end of JSON input");
    }

    #[test]
    fn test_from_data_error() {
        let err = serde_json::from_value::<u8>(json!("x")).unwrap_err();
        let converted = ValidationError::from_json_error("body", &err);
        assert_eq!(converted.kind, "type_error");
        assert!(converted.ctx.is_none());
    }
}
