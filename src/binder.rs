//! Validation and (un)marshalling of request and response values.
//!
//! Every route owns a request binder, a response binder and one binder per query
//! field. Bodies are validated against their [`Metadata`] tree by a [`JsonBinder`];
//! query fields arrive as raw strings and are parsed by the scalar binders, which
//! also enforce declared or type-implied bounds.

use crate::metadata::{MetaField, Metadata, MetadataCache};
use crate::reflect::{DataKind, ReflectKind};
use crate::route::QModel;
use crate::tags::Constraint;
use crate::validation::ValidationError;
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Serialized zero value of time fields
pub const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

/// Validate, encode and decode one kind of value
pub trait Binder: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>>;

    fn marshal(&self, value: &Value) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(value)
    }

    /// Decode raw input. Query binders receive the raw query string value.
    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>>;

    /// Value used when the input is absent
    fn new_value(&self) -> Value;
}

/// Binder for routes without a body
pub struct NothingBinder;

impl Binder for NothingBinder {
    fn name(&self) -> &'static str {
        "nothing"
    }

    fn validate(&self, _value: &Value) -> Result<(), Vec<ValidationError>> {
        Ok(())
    }

    fn unmarshal(&self, _raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        Ok(Value::Null)
    }

    fn new_value(&self) -> Value {
        Value::Null
    }
}

/// One end of a numeric range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound<T> {
    pub value: T,
    /// Exclusive comparison
    pub strict: bool,
}

impl<T> Bound<T> {
    pub fn inclusive(value: T) -> Self {
        Self {
            value,
            strict: false,
        }
    }

    pub fn exclusive(value: T) -> Self {
        Self { value, strict: true }
    }
}

/// Whether a signed value lies within the range.
pub fn signed_within(value: i64, lower: Bound<i64>, upper: Bound<i64>) -> Result<(), BoundViolation> {
    check_lower(value, lower)?;
    check_upper(value, upper)
}

/// Whether an unsigned value lies within the range.
pub fn unsigned_within(value: u64, lower: Bound<u64>, upper: Bound<u64>) -> Result<(), BoundViolation> {
    check_lower(value, lower)?;
    check_upper(value, upper)
}

/// Which side of a range was violated, and its limit
#[derive(Debug, Clone, PartialEq)]
pub struct BoundViolation {
    pub lower: bool,
    pub strict: bool,
    pub limit: f64,
}

impl BoundViolation {
    fn into_error(self, loc: &[String]) -> ValidationError {
        let limit = display_number(self.limit);
        let (msg, kind) = match (self.lower, self.strict) {
            (true, true) => (format!("ensure this value is greater than {}", limit), "value_error.number.not_gt"),
            (true, false) => (
                format!("ensure this value is greater than or equal to {}", limit),
                "value_error.number.not_ge",
            ),
            (false, true) => (format!("ensure this value is less than {}", limit), "value_error.number.not_lt"),
            (false, false) => (
                format!("ensure this value is less than or equal to {}", limit),
                "value_error.number.not_le",
            ),
        };
        ValidationError::new(loc, msg, kind).with_ctx("limit_value", number_value(self.limit))
    }
}

/// Numeric types a bound can be placed on
trait Limit: PartialOrd + Copy {
    fn as_f64(self) -> f64;
}

impl Limit for i64 {
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Limit for u64 {
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Limit for f64 {
    fn as_f64(self) -> f64 {
        self
    }
}

fn check_lower<T: Limit>(value: T, bound: Bound<T>) -> Result<(), BoundViolation> {
    let ok = if bound.strict {
        value > bound.value
    } else {
        value >= bound.value
    };
    if ok {
        Ok(())
    } else {
        Err(BoundViolation {
            lower: true,
            strict: bound.strict,
            limit: bound.value.as_f64(),
        })
    }
}

fn check_upper<T: Limit>(value: T, bound: Bound<T>) -> Result<(), BoundViolation> {
    let ok = if bound.strict {
        value < bound.value
    } else {
        value <= bound.value
    };
    if ok {
        Ok(())
    } else {
        Err(BoundViolation {
            lower: false,
            strict: bound.strict,
            limit: bound.value.as_f64(),
        })
    }
}

/// Lower bound of an integer range from a possibly fractional limit.
///
/// `> -0.5` admits the same integers as `>= 0`.
fn integer_lower<T>(limit: f64, strict: bool, cast: fn(f64) -> T) -> Bound<T> {
    if limit.fract() == 0.0 {
        Bound { value: cast(limit), strict }
    } else {
        Bound::inclusive(cast(limit.ceil()))
    }
}

fn integer_upper<T>(limit: f64, strict: bool, cast: fn(f64) -> T) -> Bound<T> {
    if limit.fract() == 0.0 {
        Bound { value: cast(limit), strict }
    } else {
        Bound::inclusive(cast(limit.floor()))
    }
}

/// A JSON integer outside the range of the field's Rust type.
fn integer_range_error(kind: ReflectKind, value: &Value, loc: &[String]) -> Option<ValidationError> {
    let violation = if let Some((min, max)) = kind.signed_bounds() {
        match value.as_i64() {
            Some(n) => signed_within(n, Bound::inclusive(min), Bound::inclusive(max)).err(),
            None => Some(BoundViolation {
                lower: false,
                strict: false,
                limit: max as f64,
            }),
        }
    } else {
        let max = kind.unsigned_max()?;
        match value.as_u64() {
            Some(n) => unsigned_within(n, Bound::inclusive(0), Bound::inclusive(max)).err(),
            None => Some(BoundViolation {
                lower: true,
                strict: false,
                limit: 0.0,
            }),
        }
    };
    violation.map(|v| v.into_error(loc))
}

fn display_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn raw_str<'a>(raw: &'a [u8], loc: &[String]) -> Result<&'a str, Vec<ValidationError>> {
    std::str::from_utf8(raw)
        .map(str::trim)
        .map_err(|_| vec![ValidationError::new(loc, "value is not valid UTF-8", "type_error.str")])
}

fn type_error(kind: DataKind, loc: &[String]) -> ValidationError {
    let (msg, tag) = match kind {
        DataKind::Integer => ("value is not a valid integer", "type_error.integer"),
        DataKind::Number => ("value is not a valid float", "type_error.float"),
        DataKind::String => ("str type expected", "type_error.str"),
        DataKind::Boolean => ("value could not be parsed to a boolean", "type_error.bool"),
        DataKind::Object => ("value is not a valid dict", "type_error.dict"),
        DataKind::Array => ("value is not a valid list", "type_error.list"),
    };
    ValidationError::new(loc, msg, tag)
}

fn kind_matches(kind: DataKind, value: &Value) -> bool {
    match kind {
        DataKind::Integer => value.is_i64() || value.is_u64(),
        DataKind::Number => value.is_number(),
        DataKind::String => value.is_string(),
        DataKind::Boolean => value.is_boolean(),
        DataKind::Object => value.is_object(),
        DataKind::Array => value.is_array(),
    }
}

fn base_kind(name: &str) -> Option<DataKind> {
    match name {
        "integer" => Some(DataKind::Integer),
        "number" => Some(DataKind::Number),
        "string" => Some(DataKind::String),
        "boolean" => Some(DataKind::Boolean),
        _ => None,
    }
}

/// Signed integer query field
pub struct IntBinder {
    loc: Vec<String>,
    lower: Bound<i64>,
    upper: Bound<i64>,
}

impl IntBinder {
    /// Bounds default to the range of `kind`, narrowed by `constraints`.
    pub fn new(loc: Vec<String>, kind: ReflectKind, constraints: &[Constraint]) -> Self {
        let (min, max) = kind.signed_bounds().unwrap_or((i64::MIN, i64::MAX));
        let mut lower = Bound::inclusive(min);
        let mut upper = Bound::inclusive(max);
        for c in constraints {
            match *c {
                Constraint::Gt(n) => lower = integer_lower(n, true, |v| v as i64),
                Constraint::Gte(n) | Constraint::Min(n) => lower = integer_lower(n, false, |v| v as i64),
                Constraint::Lt(n) => upper = integer_upper(n, true, |v| v as i64),
                Constraint::Lte(n) | Constraint::Max(n) => upper = integer_upper(n, false, |v| v as i64),
                _ => {}
            }
        }
        Self { loc, lower, upper }
    }
}

impl Binder for IntBinder {
    fn name(&self) -> &'static str {
        "int"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        let n = match (value.as_i64(), value.as_u64()) {
            (Some(n), _) => n,
            (None, Some(_)) => {
                return Err(vec![BoundViolation {
                    lower: false,
                    strict: self.upper.strict,
                    limit: self.upper.value as f64,
                }
                .into_error(&self.loc)])
            }
            _ => return Err(vec![type_error(DataKind::Integer, &self.loc)]),
        };
        signed_within(n, self.lower, self.upper).map_err(|v| vec![v.into_error(&self.loc)])
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        let s = raw_str(raw, &self.loc)?;
        s.parse::<i64>()
            .map(Value::from)
            .map_err(|_| vec![type_error(DataKind::Integer, &self.loc)])
    }

    fn new_value(&self) -> Value {
        Value::from(0)
    }
}

/// Unsigned integer query field
pub struct UintBinder {
    loc: Vec<String>,
    lower: Bound<u64>,
    upper: Bound<u64>,
}

impl UintBinder {
    pub fn new(loc: Vec<String>, kind: ReflectKind, constraints: &[Constraint]) -> Self {
        let mut lower = Bound::inclusive(0);
        let mut upper = Bound::inclusive(kind.unsigned_max().unwrap_or(u64::MAX));
        for c in constraints {
            match *c {
                Constraint::Gt(n) if n >= 0.0 => lower = integer_lower(n, true, |v| v as u64),
                Constraint::Gte(n) | Constraint::Min(n) if n >= 0.0 => {
                    lower = integer_lower(n, false, |v| v as u64)
                }
                Constraint::Lt(n) if n >= 0.0 => upper = integer_upper(n, true, |v| v as u64),
                Constraint::Lte(n) | Constraint::Max(n) if n >= 0.0 => {
                    upper = integer_upper(n, false, |v| v as u64)
                }
                _ => {}
            }
        }
        Self { loc, lower, upper }
    }
}

impl Binder for UintBinder {
    fn name(&self) -> &'static str {
        "uint"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        let n = match (value.as_u64(), value.as_i64()) {
            (Some(n), _) => n,
            (None, Some(_)) => {
                return Err(vec![BoundViolation {
                    lower: true,
                    strict: self.lower.strict,
                    limit: self.lower.value as f64,
                }
                .into_error(&self.loc)])
            }
            _ => return Err(vec![type_error(DataKind::Integer, &self.loc)]),
        };
        unsigned_within(n, self.lower, self.upper).map_err(|v| vec![v.into_error(&self.loc)])
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        let s = raw_str(raw, &self.loc)?;
        if let Ok(n) = s.parse::<u64>() {
            return Ok(Value::from(n));
        }
        // keep negatives so validation reports the bound instead of the type
        s.parse::<i64>()
            .map(Value::from)
            .map_err(|_| vec![type_error(DataKind::Integer, &self.loc)])
    }

    fn new_value(&self) -> Value {
        Value::from(0)
    }
}

/// Floating point query field
pub struct FloatBinder {
    loc: Vec<String>,
    lower: Bound<f64>,
    upper: Bound<f64>,
}

impl FloatBinder {
    pub fn new(loc: Vec<String>, constraints: &[Constraint]) -> Self {
        let mut lower = Bound::inclusive(f64::MIN);
        let mut upper = Bound::inclusive(f64::MAX);
        for c in constraints {
            match *c {
                Constraint::Gt(n) => lower = Bound::exclusive(n),
                Constraint::Gte(n) | Constraint::Min(n) => lower = Bound::inclusive(n),
                Constraint::Lt(n) => upper = Bound::exclusive(n),
                Constraint::Lte(n) | Constraint::Max(n) => upper = Bound::inclusive(n),
                _ => {}
            }
        }
        Self { loc, lower, upper }
    }
}

impl Binder for FloatBinder {
    fn name(&self) -> &'static str {
        "float"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        let n = value
            .as_f64()
            .ok_or_else(|| vec![type_error(DataKind::Number, &self.loc)])?;
        check_lower(n, self.lower)
            .and_then(|_| check_upper(n, self.upper))
            .map_err(|v| vec![v.into_error(&self.loc)])
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        let s = raw_str(raw, &self.loc)?;
        s.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| vec![type_error(DataKind::Number, &self.loc)])
    }

    fn new_value(&self) -> Value {
        Value::from(0.0)
    }
}

/// Boolean query field
pub struct BoolBinder {
    loc: Vec<String>,
}

impl BoolBinder {
    pub fn new(loc: Vec<String>) -> Self {
        Self { loc }
    }
}

impl Binder for BoolBinder {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        if value.is_boolean() {
            Ok(())
        } else {
            Err(vec![type_error(DataKind::Boolean, &self.loc)])
        }
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        match raw_str(raw, &self.loc)?.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "off" | "no" => Ok(Value::Bool(false)),
            _ => Err(vec![type_error(DataKind::Boolean, &self.loc)]),
        }
    }

    fn new_value(&self) -> Value {
        Value::Bool(false)
    }
}

/// String query field with optional length and membership constraints
pub struct StringBinder {
    loc: Vec<String>,
    constraints: Vec<Constraint>,
}

impl StringBinder {
    pub fn new(loc: Vec<String>, constraints: Vec<Constraint>) -> Self {
        Self { loc, constraints }
    }
}

impl Binder for StringBinder {
    fn name(&self) -> &'static str {
        "string"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        if !value.is_string() {
            return Err(vec![type_error(DataKind::String, &self.loc)]);
        }
        let mut errors = Vec::new();
        check_constraints(&self.constraints, value, &self.loc, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        let s = std::str::from_utf8(raw)
            .map_err(|_| vec![ValidationError::new(&self.loc, "value is not valid UTF-8", "type_error.str")])?;
        Ok(Value::String(s.to_string()))
    }

    fn new_value(&self) -> Value {
        Value::String(String::new())
    }
}

/// RFC 3339 timestamps; a bare `YYYY-MM-DD` date means midnight UTC
pub struct TimeBinder {
    loc: Vec<String>,
}

impl TimeBinder {
    pub fn new(loc: Vec<String>) -> Self {
        Self { loc }
    }

    fn parse(&self, s: &str) -> Result<DateTime<Utc>, Vec<ValidationError>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
            .ok_or_else(|| {
                vec![ValidationError::new(&self.loc, "invalid datetime format", "value_error.datetime")]
            })
    }
}

impl Binder for TimeBinder {
    fn name(&self) -> &'static str {
        "time"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        match value.as_str() {
            Some(s) => self.parse(s).map(|_| ()),
            None => Err(vec![type_error(DataKind::String, &self.loc)]),
        }
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        let s = raw_str(raw, &self.loc)?;
        let dt = self.parse(s)?;
        Ok(Value::String(dt.to_rfc3339()))
    }

    fn new_value(&self) -> Value {
        Value::String(ZERO_TIME.to_string())
    }
}

/// Checks one field of an object; `value` is `None` when the key is absent.
pub type FieldValidator = fn(&MetaField, Option<&Value>, &[String], &mut Vec<ValidationError>);

/// The default chain: required, kind, declared constraints.
pub fn default_validators() -> Vec<FieldValidator> {
    vec![validate_required, validate_kind, validate_constraints]
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(b) => !b,
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// A required field must be present and not hold its zero value.
///
/// Nullable fields only fail when absent or `null`.
pub fn validate_required(
    field: &MetaField,
    value: Option<&Value>,
    loc: &[String],
    errors: &mut Vec<ValidationError>,
) {
    if !field.is_required() {
        return;
    }
    let missing = match value {
        None => true,
        Some(v) if field.nullable => v.is_null(),
        Some(v) => is_zero(v),
    };
    if missing {
        errors.push(ValidationError::missing(loc));
    }
}

/// The JSON type of a present value must match the field kind, and integers must
/// fit the field's Rust type.
pub fn validate_kind(
    field: &MetaField,
    value: Option<&Value>,
    loc: &[String],
    errors: &mut Vec<ValidationError>,
) {
    let value = match value {
        Some(v) => v,
        None => return,
    };

    if value.is_null() {
        if !field.nullable && !field.is_required() {
            errors.push(ValidationError::new(
                loc,
                "none is not an allowed value",
                "type_error.none.not_allowed",
            ));
        }
        return;
    }

    if field.kind == DataKind::Object && field.shape.deref().kind == ReflectKind::Interface {
        return;
    }
    if !kind_matches(field.kind, value) {
        errors.push(type_error(field.kind, loc));
        return;
    }
    if field.kind == DataKind::Integer {
        if let Some(error) = integer_range_error(field.shape.deref().kind, value, loc) {
            errors.push(error);
            return;
        }
    }

    if field.format.as_deref() == Some("date-time") {
        if let Some(s) = value.as_str() {
            if DateTime::parse_from_rfc3339(s).is_err() {
                errors.push(ValidationError::new(loc, "invalid datetime format", "value_error.datetime"));
            }
        }
    }
}

/// Declared `validate` constraints hold for a present value.
pub fn validate_constraints(
    field: &MetaField,
    value: Option<&Value>,
    loc: &[String],
    errors: &mut Vec<ValidationError>,
) {
    if let Some(value) = value {
        if !value.is_null() {
            check_constraints(&field.constraints(), value, loc, errors);
        }
    }
}

fn check_constraints(
    constraints: &[Constraint],
    value: &Value,
    loc: &[String],
    errors: &mut Vec<ValidationError>,
) {
    for constraint in constraints {
        let error = match value {
            Value::Number(n) => n.as_f64().and_then(|n| check_number(constraint, n, value, loc)),
            Value::String(s) => check_length(constraint, s.chars().count(), "any_str", "characters", loc)
                .or_else(|| check_one_of(constraint, s, loc)),
            Value::Array(items) => check_length(constraint, items.len(), "list", "items", loc),
            _ => None,
        };
        if let Some(error) = error {
            errors.push(error);
        }
    }
}

fn check_number(constraint: &Constraint, n: f64, value: &Value, loc: &[String]) -> Option<ValidationError> {
    let result = match *constraint {
        Constraint::Gt(limit) => check_lower(n, Bound::exclusive(limit)),
        Constraint::Gte(limit) | Constraint::Min(limit) => check_lower(n, Bound::inclusive(limit)),
        Constraint::Lt(limit) => check_upper(n, Bound::exclusive(limit)),
        Constraint::Lte(limit) | Constraint::Max(limit) => check_upper(n, Bound::inclusive(limit)),
        Constraint::OneOf(_) => return check_one_of(constraint, &value.to_string(), loc),
        Constraint::Len(_) => Ok(()),
    };
    result.err().map(|v| v.into_error(loc))
}

fn check_length(
    constraint: &Constraint,
    len: usize,
    family: &str,
    unit: &str,
    loc: &[String],
) -> Option<ValidationError> {
    let (limit, ok, qualifier, suffix) = match *constraint {
        Constraint::Min(n) => (n as usize, len >= n as usize, "at least", "min"),
        Constraint::Max(n) => (n as usize, len <= n as usize, "at most", "max"),
        Constraint::Len(n) => (n, len == n, "exactly", "exact"),
        _ => return None,
    };
    if ok {
        return None;
    }

    let kind = match (family, suffix) {
        ("list", "min") => "value_error.list.min_items".to_string(),
        ("list", "max") => "value_error.list.max_items".to_string(),
        (_, "exact") => format!("value_error.{}.length", family),
        (_, s) => format!("value_error.{}.{}_length", family, s),
    };
    Some(
        ValidationError::new(
            loc,
            format!("ensure this value has {} {} {}", qualifier, limit, unit),
            kind,
        )
        .with_ctx("limit_value", limit),
    )
}

fn check_one_of(constraint: &Constraint, s: &str, loc: &[String]) -> Option<ValidationError> {
    let allowed = match constraint {
        Constraint::OneOf(allowed) => allowed,
        _ => return None,
    };
    if allowed.iter().any(|a| a == s) {
        return None;
    }
    let permitted = allowed
        .iter()
        .map(|a| format!("'{}'", a))
        .collect::<Vec<_>>()
        .join(", ");
    Some(
        ValidationError::new(
            loc,
            format!("value is not a valid enumeration member; permitted: {}", permitted),
            "type_error.enum",
        )
        .with_ctx("enum_values", allowed.clone()),
    )
}

/// Structural binder for JSON bodies and responses
pub struct JsonBinder {
    meta: Arc<Metadata>,
    cache: Arc<MetadataCache>,
    root: String,
    validators: Vec<FieldValidator>,
}

impl JsonBinder {
    /// `root` is the first element of every error location, e.g. `body`.
    pub fn new(meta: Arc<Metadata>, cache: Arc<MetadataCache>, root: &str) -> Self {
        Self {
            meta,
            cache,
            root: root.to_string(),
            validators: default_validators(),
        }
    }

    /// Replace the validator chain
    pub fn with_validators(mut self, validators: Vec<FieldValidator>) -> Self {
        self.validators = validators;
        self
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.meta
    }

    fn check_node(
        &self,
        meta: &Metadata,
        value: &Value,
        loc: &mut Vec<String>,
        errors: &mut Vec<ValidationError>,
    ) {
        match meta.kind {
            DataKind::Array => {
                let items = match value.as_array() {
                    Some(items) => items,
                    None => return errors.push(type_error(DataKind::Array, loc)),
                };
                if let Some(item) = meta.item_field() {
                    for (i, elem) in items.iter().enumerate() {
                        loc.push(i.to_string());
                        self.check_value(item, elem, loc, errors);
                        loc.pop();
                    }
                }
            }
            DataKind::Object => {
                if meta.shape.kind != ReflectKind::Struct {
                    return;
                }
                let object = match value.as_object() {
                    Some(object) => object,
                    None => return errors.push(type_error(DataKind::Object, loc)),
                };
                for field in &meta.fields {
                    let name = match field.json_name() {
                        Some(name) => name,
                        None => continue,
                    };
                    let slot = object.get(&name);
                    loc.push(name);
                    let before = errors.len();
                    for validator in &self.validators {
                        validator(field, slot, loc, errors);
                        if errors.len() > before {
                            break;
                        }
                    }
                    if let Some(v) = slot {
                        if errors.len() == before && !v.is_null() {
                            self.descend(field, v, loc, errors);
                        }
                    }
                    loc.pop();
                }
            }
            kind => {
                if !kind_matches(kind, value) {
                    errors.push(type_error(kind, loc));
                }
            }
        }
    }

    /// Check an element slot that has no key of its own.
    fn check_value(
        &self,
        field: &MetaField,
        value: &Value,
        loc: &mut Vec<String>,
        errors: &mut Vec<ValidationError>,
    ) {
        if value.is_null() {
            return;
        }
        if !kind_matches(field.kind, value) {
            errors.push(type_error(field.kind, loc));
            return;
        }
        self.descend(field, value, loc, errors);
    }

    fn descend(
        &self,
        field: &MetaField,
        value: &Value,
        loc: &mut Vec<String>,
        errors: &mut Vec<ValidationError>,
    ) {
        let item_ref = match &field.item_ref {
            Some(r) => r,
            None => return,
        };

        match field.kind {
            DataKind::Object => {
                if let Some(node) = self.cache.get(item_ref) {
                    self.check_node(&node, value, loc, errors);
                }
            }
            DataKind::Array => {
                let items = match value.as_array() {
                    Some(items) => items,
                    None => return,
                };
                match base_kind(item_ref) {
                    Some(kind) => {
                        for (i, elem) in items.iter().enumerate() {
                            if !elem.is_null() && !kind_matches(kind, elem) {
                                loc.push(i.to_string());
                                errors.push(type_error(kind, loc));
                                loc.pop();
                            }
                        }
                    }
                    None => {
                        if let Some(node) = self.cache.get(item_ref) {
                            for (i, elem) in items.iter().enumerate() {
                                if elem.is_null() {
                                    continue;
                                }
                                loc.push(i.to_string());
                                self.check_node(&node, elem, loc, errors);
                                loc.pop();
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Fill absent keys that declare a default value.
    pub fn apply_defaults(&self, value: &mut Value) {
        let mut visiting = HashSet::new();
        self.fill_defaults(&self.meta, value, &mut visiting);
    }

    fn fill_defaults(&self, meta: &Metadata, value: &mut Value, visiting: &mut HashSet<String>) {
        let object = match value.as_object_mut() {
            Some(object) if meta.kind == DataKind::Object => object,
            _ => return,
        };
        if !visiting.insert(meta.identity.clone()) {
            return;
        }

        for field in &meta.fields {
            let name = match field.json_name() {
                Some(name) => name,
                None => continue,
            };
            match object.get_mut(&name) {
                None => {
                    if let Some(default) = field.default_value() {
                        debug!("Applying default {} to {}", default, name);
                        object.insert(name, default);
                    }
                }
                Some(nested) if field.kind == DataKind::Object => {
                    if let Some(node) = field.item_ref.as_ref().and_then(|r| self.cache.get(r)) {
                        self.fill_defaults(&node, nested, visiting);
                    }
                }
                Some(_) => {}
            }
        }
        visiting.remove(&meta.identity);
    }

    fn skeleton(&self, meta: &Metadata, visiting: &mut HashSet<String>) -> Value {
        match meta.kind {
            DataKind::Array => Value::Array(Vec::new()),
            DataKind::Object => {
                let mut object = Map::new();
                if !visiting.insert(meta.identity.clone()) {
                    return Value::Object(object);
                }
                for field in &meta.fields {
                    if let Some(name) = field.json_name() {
                        let value = field
                            .default_value()
                            .unwrap_or_else(|| self.zero_value(field, visiting));
                        object.insert(name, value);
                    }
                }
                visiting.remove(&meta.identity);
                Value::Object(object)
            }
            DataKind::Integer => Value::from(0),
            DataKind::Number => Value::from(0.0),
            DataKind::String => Value::String(String::new()),
            DataKind::Boolean => Value::Bool(false),
        }
    }

    fn zero_value(&self, field: &MetaField, visiting: &mut HashSet<String>) -> Value {
        if field.nullable {
            return Value::Null;
        }
        match field.kind {
            DataKind::String if field.format.as_deref() == Some("date-time") => {
                Value::String(ZERO_TIME.to_string())
            }
            DataKind::String => Value::String(String::new()),
            DataKind::Integer => Value::from(0),
            DataKind::Number => Value::from(0.0),
            DataKind::Boolean => Value::Bool(false),
            DataKind::Array => Value::Array(Vec::new()),
            DataKind::Object => match field.item_ref.as_ref().and_then(|r| self.cache.get(r)) {
                Some(node) => self.skeleton(&node, visiting),
                None if field.shape.deref().kind == ReflectKind::Interface => Value::Null,
                None => Value::Object(Map::new()),
            },
        }
    }
}

impl Binder for JsonBinder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut loc = vec![self.root.clone()];
        self.check_node(&self.meta, value, &mut loc, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<Value, Vec<ValidationError>> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(vec![ValidationError::missing(&[self.root.as_str()])]);
        }
        let mut value: Value = serde_json::from_slice(raw)
            .map_err(|err| vec![ValidationError::from_json_error(&self.root, &err)])?;
        self.apply_defaults(&mut value);
        Ok(value)
    }

    fn new_value(&self) -> Value {
        let mut visiting = HashSet::new();
        self.skeleton(&self.meta, &mut visiting)
    }
}

/// Binder for one query or path field.
pub fn for_query(field: &QModel, source: &str) -> Arc<dyn Binder> {
    let loc = vec![source.to_string(), field.name.clone()];
    let target = field.shape.deref();
    let constraints = crate::tags::constraints(&field.tag);

    if target.is_time() {
        return Arc::new(TimeBinder::new(loc));
    }
    match target.kind {
        k if k.is_signed() => Arc::new(IntBinder::new(loc, k, &constraints)),
        k if k.is_unsigned() => Arc::new(UintBinder::new(loc, k, &constraints)),
        k if k.is_float() => Arc::new(FloatBinder::new(loc, &constraints)),
        ReflectKind::Bool => Arc::new(BoolBinder::new(loc)),
        _ => Arc::new(StringBinder::new(loc, constraints)),
    }
}

/// Binder for a request body or response value described by `meta`.
pub fn for_metadata(meta: Arc<Metadata>, cache: Arc<MetadataCache>, root: &str) -> Arc<dyn Binder> {
    // opaque objects are decoded but not checked
    if meta.is_model() || meta.kind == DataKind::Object {
        return Arc::new(JsonBinder::new(meta, cache, root));
    }

    let loc = vec![root.to_string()];
    let target = meta.shape.deref();
    match meta.kind {
        DataKind::Integer if target.kind.is_unsigned() => Arc::new(UintBinder::new(loc, target.kind, &[])),
        DataKind::Integer => Arc::new(IntBinder::new(loc, target.kind, &[])),
        DataKind::Number => Arc::new(FloatBinder::new(loc, &[])),
        DataKind::Boolean => Arc::new(BoolBinder::new(loc)),
        DataKind::String if target.is_time() => Arc::new(TimeBinder::new(loc)),
        DataKind::String => Arc::new(StringBinder::new(loc, Vec::new())),
        _ => Arc::new(NothingBinder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Model, TypeShape};
    use serde_json::json;

    struct Address;
    impl Model for Address {
        fn shape() -> TypeShape {
            TypeShape::named("app", "Address")
                .field::<String>("City", r#"json:"city" validate:"required""#)
        }
    }

    struct Account;
    impl Model for Account {
        fn shape() -> TypeShape {
            TypeShape::named("app", "Account")
                .field::<String>("Name", r#"json:"name" validate:"required,min=2,max=8""#)
                .field::<String>("Nick", r#"json:"nick""#)
                .field::<u8>("Age", r#"json:"age" validate:"lte=150""#)
                .field::<String>("Role", r#"json:"role" default:"member" validate:"oneof=member admin""#)
                .field::<Option<Address>>("Address", r#"json:"address""#)
                .field::<Vec<Address>>("History", r#"json:"history""#)
                .field::<Vec<i32>>("Scores", r#"json:"scores" validate:"max=3""#)
                .field::<Vec<Vec<i32>>>("Grid", r#"json:"grid""#)
        }
    }

    fn account_binder() -> JsonBinder {
        let cache = Arc::new(MetadataCache::new());
        let meta = cache.build::<Account>();
        JsonBinder::new(meta, cache, "body")
    }

    fn locs(errors: &[ValidationError]) -> Vec<String> {
        errors.iter().map(|e| e.loc.join(".")).collect()
    }

    #[test]
    fn test_required_field_enforced() {
        let binder = account_binder();

        let errors = binder.validate(&json!({"name": ""})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].loc, vec!["body", "name"]);
        assert_eq!(errors[0].kind, "value_error.missing");

        let errors = binder.validate(&json!({"nick": "x"})).unwrap_err();
        assert_eq!(locs(&errors), vec!["body.name"]);

        assert!(binder.validate(&json!({"name": "alice"})).is_ok());
    }

    #[test]
    fn test_kind_and_constraint_errors() {
        let binder = account_binder();
        let errors = binder
            .validate(&json!({"name": "a", "age": 200, "nick": 3, "role": "root", "scores": [1, 2, 3, 4]}))
            .unwrap_err();

        let kinds: Vec<&str> = errors.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "value_error.any_str.min_length",
                "type_error.str",
                "value_error.number.not_le",
                "type_error.enum",
                "value_error.list.max_items",
            ]
        );
        assert_eq!(errors[2].msg, "ensure this value is less than or equal to 150");
    }

    #[test]
    fn test_integer_field_fits_rust_type() {
        let binder = account_binder();

        let errors = binder.validate(&json!({"name": "alice", "age": 300})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].loc, vec!["body", "age"]);
        assert_eq!(errors[0].kind, "value_error.number.not_le");
        assert_eq!(errors[0].msg, "ensure this value is less than or equal to 255");

        let errors = binder.validate(&json!({"name": "alice", "age": -1})).unwrap_err();
        assert_eq!(errors[0].loc, vec!["body", "age"]);
        assert_eq!(errors[0].kind, "value_error.number.not_ge");
    }

    #[test]
    fn test_nested_objects_and_arrays() {
        let binder = account_binder();
        let errors = binder
            .validate(&json!({
                "name": "alice",
                "address": {"city": ""},
                "history": [{"city": "Oslo"}, {}],
                "scores": [1, "x"],
                "grid": [[1, 2], [3, "y"]],
            }))
            .unwrap_err();

        assert_eq!(
            locs(&errors),
            vec!["body.address.city", "body.history.1.city", "body.scores.1", "body.grid.1.1"]
        );
    }

    #[test]
    fn test_null_allowed_for_nullable_field() {
        let binder = account_binder();
        assert!(binder.validate(&json!({"name": "alice", "address": null})).is_ok());
        let errors = binder.validate(&json!({"name": "alice", "nick": null})).unwrap_err();
        assert_eq!(errors[0].kind, "type_error.none.not_allowed");
    }

    #[test]
    fn test_unmarshal_applies_defaults_and_reports_json_errors() {
        let binder = account_binder();
        let value = binder.unmarshal(br#"{"name": "alice"}"#).unwrap();
        assert_eq!(value["role"], json!("member"));

        let errors = binder.unmarshal(b"{\"name\": ").unwrap_err();
        assert_eq!(errors[0].kind, "value_error.jsondecode");
        assert_eq!(errors[0].loc, vec!["body"]);

        let errors = binder.unmarshal(b"  ").unwrap_err();
        assert_eq!(errors[0].kind, "value_error.missing");
    }

    #[test]
    fn test_new_value_skeleton() {
        let binder = account_binder();
        let value = binder.new_value();
        assert_eq!(value["name"], json!(""));
        assert_eq!(value["age"], json!(0));
        assert_eq!(value["role"], json!("member"));
        assert_eq!(value["address"], Value::Null);
        assert_eq!(value["history"], json!([]));
    }

    #[test]
    fn test_custom_validator_chain() {
        let binder = account_binder().with_validators(vec![validate_kind]);
        assert!(binder.validate(&json!({"name": ""})).is_ok());
        assert!(binder.validate(&json!({"name": 1})).is_err());
    }

    #[test]
    fn test_signed_and_unsigned_bounds() {
        assert!(signed_within(5, Bound::inclusive(5), Bound::inclusive(10)).is_ok());
        let violation = signed_within(5, Bound::exclusive(5), Bound::inclusive(10)).unwrap_err();
        assert!(violation.lower && violation.strict);
        assert!(unsigned_within(10, Bound::inclusive(0), Bound::inclusive(10)).is_ok());
        assert!(unsigned_within(10, Bound::inclusive(0), Bound::exclusive(10)).is_err());
    }

    #[test]
    fn test_int_binder_type_range_and_tags() {
        let loc = vec!["query".to_string(), "n".to_string()];
        let binder = IntBinder::new(loc.clone(), ReflectKind::I8, &[]);
        let value = binder.unmarshal(b"300").unwrap();
        let errors = binder.validate(&value).unwrap_err();
        assert_eq!(errors[0].kind, "value_error.number.not_le");
        assert_eq!(errors[0].loc, loc);

        let binder = IntBinder::new(loc.clone(), ReflectKind::I64, &[Constraint::Gt(0.0)]);
        assert!(binder.validate(&json!(0)).is_err());
        assert!(binder.validate(&json!(1)).is_ok());
        assert_eq!(binder.unmarshal(b"abc").unwrap_err()[0].kind, "type_error.integer");
    }

    #[test]
    fn test_fractional_limits_on_integers() {
        let loc = vec!["query".to_string(), "n".to_string()];
        let binder = IntBinder::new(loc.clone(), ReflectKind::I32, &[Constraint::Gt(-0.5)]);
        assert!(binder.validate(&json!(0)).is_ok());
        assert!(binder.validate(&json!(-1)).is_err());

        let binder = IntBinder::new(loc.clone(), ReflectKind::I32, &[Constraint::Lt(2.5)]);
        assert!(binder.validate(&json!(2)).is_ok());
        assert!(binder.validate(&json!(3)).is_err());

        let binder = UintBinder::new(loc, ReflectKind::U32, &[Constraint::Gte(1.5), Constraint::Lte(4.5)]);
        assert!(binder.validate(&json!(1)).is_err());
        assert!(binder.validate(&json!(2)).is_ok());
        assert!(binder.validate(&json!(4)).is_ok());
        assert!(binder.validate(&json!(5)).is_err());
    }

    #[test]
    fn test_uint_binder_rejects_negative() {
        let binder = UintBinder::new(vec!["query".into(), "n".into()], ReflectKind::U16, &[]);
        let value = binder.unmarshal(b"-1").unwrap();
        let errors = binder.validate(&value).unwrap_err();
        assert_eq!(errors[0].kind, "value_error.number.not_ge");
        assert!(binder.validate(&json!(65535)).is_ok());
        assert!(binder.validate(&json!(65536)).is_err());
    }

    #[test]
    fn test_scalar_unmarshal() {
        let loc = vec!["query".to_string(), "x".to_string()];
        assert_eq!(BoolBinder::new(loc.clone()).unmarshal(b"on").unwrap(), json!(true));
        assert!(BoolBinder::new(loc.clone()).unmarshal(b"maybe").is_err());
        assert_eq!(FloatBinder::new(loc.clone(), &[]).unmarshal(b"1.5").unwrap(), json!(1.5));
        assert_eq!(
            StringBinder::new(loc.clone(), Vec::new()).unmarshal(b" a b ").unwrap(),
            json!(" a b ")
        );

        let time = TimeBinder::new(loc);
        assert_eq!(
            time.unmarshal(b"2024-03-01T10:00:00+02:00").unwrap(),
            json!("2024-03-01T08:00:00+00:00")
        );
        assert_eq!(time.unmarshal(b"2024-03-01").unwrap(), json!("2024-03-01T00:00:00+00:00"));
        assert_eq!(time.unmarshal(b"yesterday").unwrap_err()[0].kind, "value_error.datetime");
    }

    #[test]
    fn test_factories() {
        let q = QModel::query("age", r#"validate:"gte=18""#, u32::shape(), false);
        let binder = for_query(&q, "query");
        assert_eq!(binder.name(), "uint");
        assert!(binder.validate(&json!(17)).is_err());

        let q = QModel::query("at", "", <chrono::DateTime<Utc>>::shape(), false);
        assert_eq!(for_query(&q, "query").name(), "time");

        let cache = Arc::new(MetadataCache::new());
        let meta = cache.build::<Account>();
        assert_eq!(for_metadata(meta, Arc::clone(&cache), "body").name(), "json");
        let meta = cache.build::<i32>();
        assert_eq!(for_metadata(meta, Arc::clone(&cache), "response").name(), "int");
        let meta = cache.build::<serde_json::Value>();
        let binder = for_metadata(meta, cache, "body");
        assert_eq!(binder.name(), "json");
        assert!(binder.validate(&json!([1, "x"])).is_ok());
    }

    #[test]
    fn test_nothing_binder() {
        let binder = NothingBinder;
        assert!(binder.validate(&json!({"any": 1})).is_ok());
        assert_eq!(binder.unmarshal(b"{}").unwrap(), Value::Null);
        assert_eq!(binder.marshal(&json!([1])).unwrap(), b"[1]".to_vec());
    }
}
