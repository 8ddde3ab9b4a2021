use crate::metadata::{format_of, MetaField, Metadata, MetadataCache};
use crate::reflect::DataKind;
use crate::route::QModel;
use crate::tags::{self, Constraint};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// Prefix of every component reference
pub const COMPONENTS_PREFIX: &str = "#/components/schemas/";

/// OpenAPI Schema object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The type of the schema (string, integer, object, array, etc.)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    /// Format hint (e.g., "int32", "double", "date-time", "binary")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Properties for object types, keyed by wire name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    /// Required property names for object types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    /// Items schema for array types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    /// Reference to a component schema
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Allowed values
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "exclusiveMinimum", skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<bool>,
    #[serde(rename = "exclusiveMaximum", skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<bool>,
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "minItems", skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(rename = "maxItems", skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

impl Schema {
    /// Schema of a bare data kind, e.g. `{"type": "integer", "format": "int64"}`
    pub fn of_kind(kind: DataKind, format: Option<&str>) -> Self {
        Self {
            schema_type: Some(kind.as_str().to_string()),
            format: format.map(str::to_string),
            ..Self::default()
        }
    }

    /// `{"$ref": "#/components/schemas/<identity>"}`
    pub fn reference(identity: &str) -> Self {
        Self {
            reference: Some(format!("{}{}", COMPONENTS_PREFIX, identity)),
            ..Self::default()
        }
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    fn apply_constraints(&mut self, kind: DataKind, constraints: &[Constraint]) {
        for constraint in constraints {
            match (constraint, kind) {
                (Constraint::Gt(n), _) => {
                    self.minimum = Some(*n);
                    self.exclusive_minimum = Some(true);
                }
                (Constraint::Gte(n), _) => self.minimum = Some(*n),
                (Constraint::Lt(n), _) => {
                    self.maximum = Some(*n);
                    self.exclusive_maximum = Some(true);
                }
                (Constraint::Lte(n), _) => self.maximum = Some(*n),
                (Constraint::Min(n), DataKind::String) => self.min_length = Some(*n as usize),
                (Constraint::Max(n), DataKind::String) => self.max_length = Some(*n as usize),
                (Constraint::Min(n), DataKind::Array) => self.min_items = Some(*n as usize),
                (Constraint::Max(n), DataKind::Array) => self.max_items = Some(*n as usize),
                (Constraint::Min(n), _) => self.minimum = Some(*n),
                (Constraint::Max(n), _) => self.maximum = Some(*n),
                (Constraint::Len(n), DataKind::Array) => {
                    self.min_items = Some(*n);
                    self.max_items = Some(*n);
                }
                (Constraint::Len(n), _) => {
                    self.min_length = Some(*n);
                    self.max_length = Some(*n);
                }
                (Constraint::OneOf(values), _) => {
                    self.enum_values = Some(values.iter().map(|v| enum_value(kind, v)).collect());
                }
            }
        }
    }
}

fn enum_value(kind: DataKind, raw: &str) -> Value {
    let parsed = match kind {
        DataKind::Integer => raw.parse::<i64>().ok().map(Value::from),
        DataKind::Number => raw.parse::<f64>().ok().map(Value::from),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Renders metadata nodes as OpenAPI schemas.
///
/// Nested models are always referenced, never inlined; [`components`](Self::components)
/// collects every node a set of roots can reach.
pub struct SchemaGenerator<'a> {
    cache: &'a MetadataCache,
}

impl<'a> SchemaGenerator<'a> {
    pub fn new(cache: &'a MetadataCache) -> Self {
        Self { cache }
    }

    /// Full schema of one node, as stored under `components.schemas`.
    pub fn model_schema(&self, meta: &Metadata) -> Schema {
        debug!("Generating schema for {}", meta.identity);
        let mut schema = Schema {
            title: Some(meta.name.clone()),
            description: Some(meta.description.clone()).filter(|d| !d.is_empty()),
            ..Schema::of_kind(meta.kind, meta.format.as_deref())
        };

        match meta.kind {
            DataKind::Object => {
                let mut properties = BTreeMap::new();
                let mut required = Vec::new();
                for field in &meta.fields {
                    let name = match field.json_name() {
                        Some(name) => name,
                        None => continue,
                    };
                    if field.is_required() {
                        required.push(name.clone());
                    }
                    properties.insert(name, self.field_schema(field));
                }
                if !properties.is_empty() || meta.is_model() {
                    schema.properties = Some(properties);
                }
                if !required.is_empty() {
                    schema.required = Some(required);
                }
            }
            DataKind::Array => {
                schema.items = Some(Box::new(match meta.item_field() {
                    Some(item) => self.item_schema(item),
                    None => Schema::default(),
                }));
            }
            _ => {}
        }
        schema
    }

    /// Schema of one property.
    pub fn field_schema(&self, field: &MetaField) -> Schema {
        let mut schema = match field.kind {
            DataKind::Object => match &field.item_ref {
                Some(identity) => return Schema::reference(identity),
                None => Schema::of_kind(DataKind::Object, None),
            },
            DataKind::Array => Schema {
                items: Some(Box::new(self.array_items(field))),
                ..Schema::of_kind(DataKind::Array, None)
            },
            kind => Schema::of_kind(kind, field.format.as_deref()),
        };

        schema.title = Some(field.name.clone());
        if field.description != field.name {
            schema.description = Some(field.description.clone());
        }
        schema.default = field.default_value();
        schema.apply_constraints(field.kind, &field.constraints());
        if field.nullable {
            schema.nullable = Some(true);
        }
        schema
    }

    /// Schema of a request or response body.
    pub fn body_schema(&self, meta: &Metadata) -> Schema {
        if meta.is_model() {
            Schema::reference(&meta.identity)
        } else {
            Schema::of_kind(meta.kind, meta.format.as_deref())
        }
    }

    /// Schema of a path or query parameter.
    pub fn parameter_schema(&self, param: &QModel) -> Schema {
        let format = if param.is_time() {
            Some("date-time")
        } else {
            format_of(param.shape.deref().kind)
        };
        let mut schema = Schema {
            title: Some(param.name.clone()),
            ..Schema::of_kind(param.kind, format)
        };
        schema.default = tags::default_value(&param.tag, param.kind);
        schema.apply_constraints(param.kind, &tags::constraints(&param.tag));
        schema
    }

    /// Every model reachable from `roots`, keyed by identity.
    pub fn components(&self, roots: &[Arc<Metadata>]) -> BTreeMap<String, Schema> {
        let mut schemas = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<Arc<Metadata>> = roots
            .iter()
            .filter(|m| m.is_model())
            .cloned()
            .collect();

        while let Some(meta) = queue.pop_front() {
            if !seen.insert(meta.identity.clone()) {
                continue;
            }
            schemas.insert(meta.identity.clone(), self.model_schema(&meta));

            let nested = meta
                .inner_fields
                .iter()
                .map(|inner| inner.name.as_str())
                .chain(meta.fields.iter().filter_map(|f| f.item_ref.as_deref()));
            for identity in nested {
                if seen.contains(identity) || is_base_name(identity) {
                    continue;
                }
                match self.cache.get(identity) {
                    Some(node) => queue.push_back(node),
                    None => debug!("No metadata cached for {}", identity),
                }
            }
        }
        schemas
    }

    fn item_schema(&self, item: &MetaField) -> Schema {
        match (item.kind, &item.item_ref) {
            (DataKind::Object, Some(identity)) => Schema::reference(identity),
            (DataKind::Array, _) => Schema {
                items: Some(Box::new(self.array_items(item))),
                ..Schema::of_kind(DataKind::Array, None)
            },
            (kind, _) => Schema::of_kind(kind, item.format.as_deref()),
        }
    }

    fn array_items(&self, field: &MetaField) -> Schema {
        match field.item_ref.as_deref() {
            Some(name) if is_base_name(name) => {
                let kind = base_kind(name);
                let format = field
                    .shape
                    .deref()
                    .elem_shape()
                    .and_then(|elem| format_of(elem.deref().kind));
                Schema::of_kind(kind, format)
            }
            Some(identity) => Schema::reference(identity),
            None => Schema::of_kind(DataKind::Object, None),
        }
    }
}

fn is_base_name(name: &str) -> bool {
    matches!(name, "integer" | "number" | "string" | "boolean")
}

fn base_kind(name: &str) -> DataKind {
    match name {
        "integer" => DataKind::Integer,
        "number" => DataKind::Number,
        "boolean" => DataKind::Boolean,
        _ => DataKind::String,
    }
}
