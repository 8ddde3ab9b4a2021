//! Decides where each handler argument is read from.
//!
//! Rules, checked in order for the argument at `index` (context excluded):
//!
//! 1. Arrays are only accepted as the JSON body: the last argument of a verb other
//!    than GET/DELETE.
//! 2. Time values are query fields wherever they appear.
//! 3. A struct that is not last is rejected on GET/DELETE; on other verbs it is the
//!    uploaded file when file-typed, otherwise its fields are read from the query.
//! 4. A struct in last position is expanded into query fields on GET/DELETE; on
//!    other verbs it is the uploaded file when file-typed, otherwise the JSON body.
//! 5. Scalars are query fields. Argument names are not available at runtime, so
//!    unnamed scalars are called `{TypeName}{index}`.

use crate::error::{Error, Result};
use crate::reflect::{DataKind, FieldShape, ReflectKind, TypeShape};
use crate::route::{HttpMethod, ParamBinding, QModel};
use crate::tags;
use log::debug;

/// Where the arguments of one route come from
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// One entry per argument
    pub bindings: Vec<ParamBinding>,
    pub query_fields: Vec<QModel>,
    /// Type of the JSON body
    pub request: Option<TypeShape>,
    pub body_index: Option<usize>,
    pub file_index: Option<usize>,
}

/// Classify the arguments of a route.
///
/// # Arguments
///
/// * `route` - Route identity, used in error messages
/// * `method` - HTTP method of the route
/// * `params` - Argument shapes after the context
/// * `names` - Explicit argument names; an empty or missing entry falls back to a
///   synthetic name
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] when an argument cannot be bound.
pub fn classify(
    route: &str,
    method: HttpMethod,
    params: &[TypeShape],
    names: &[String],
) -> Result<Classification> {
    let mut out = Classification::default();
    let invalid = |index: usize, message: &str| Error::InvalidParameter {
        route: route.to_string(),
        index,
        message: message.to_string(),
    };

    for (index, param) in params.iter().enumerate() {
        let is_last = index + 1 == params.len();
        let target = param.deref();
        let explicit = names.get(index).filter(|n| !n.is_empty());

        let binding = match target.data_kind() {
            DataKind::Array => {
                if !is_last || method.is_query_only() {
                    return Err(invalid(index, "query param not support array"));
                }
                out.request = Some(param.clone());
                out.body_index = Some(index);
                ParamBinding::Body
            }
            DataKind::Object if target.is_time() => {
                let name = explicit.cloned().unwrap_or_else(|| synthetic_name(&target, index));
                out.query_fields.push(QModel::query(&name, "", param.clone(), false));
                ParamBinding::Query(name)
            }
            DataKind::Object if target.kind != ReflectKind::Struct => {
                if !is_last || method.is_query_only() {
                    return Err(invalid(index, "opaque values can only be a request body"));
                }
                out.request = Some(param.clone());
                out.body_index = Some(index);
                ParamBinding::Body
            }
            DataKind::Object if !is_last => {
                if method.is_query_only() {
                    return Err(invalid(index, "multiple struct params unsupported"));
                }
                if target.is_file() {
                    mark_file(&mut out, index, &invalid)?
                } else {
                    expand(&target, index, &mut out.query_fields, &invalid)?
                }
            }
            DataKind::Object => {
                if method.is_query_only() {
                    expand(&target, index, &mut out.query_fields, &invalid)?
                } else if target.is_file() {
                    mark_file(&mut out, index, &invalid)?
                } else {
                    out.request = Some(param.clone());
                    out.body_index = Some(index);
                    ParamBinding::Body
                }
            }
            _ => {
                let name = explicit.cloned().unwrap_or_else(|| synthetic_name(&target, index));
                out.query_fields.push(QModel::query(&name, "", param.clone(), false));
                ParamBinding::Query(name)
            }
        };

        debug!("{} parameter {} bound as {:?}", route, index, binding);
        out.bindings.push(binding);
    }

    Ok(out)
}

fn synthetic_name(target: &TypeShape, index: usize) -> String {
    format!("{}{}", target.short_name(), index)
}

fn mark_file(
    out: &mut Classification,
    index: usize,
    invalid: &dyn Fn(usize, &str) -> Error,
) -> Result<ParamBinding> {
    if out.file_index.is_some() {
        return Err(invalid(index, "only one file parameter is supported"));
    }
    out.file_index = Some(index);
    Ok(ParamBinding::File)
}

/// Expand the exported fields of a struct into query fields.
fn expand(
    target: &TypeShape,
    index: usize,
    query_fields: &mut Vec<QModel>,
    invalid: &dyn Fn(usize, &str) -> Error,
) -> Result<ParamBinding> {
    let mut pairs = Vec::new();
    for field in query_struct_fields(target) {
        let json = match tags::json_name(&field.tag, &field.name) {
            Some(json) => json,
            None => continue,
        };

        let shape = field.shape();
        let field_target = shape.deref();
        if !field_target.is_time() {
            match field_target.data_kind() {
                DataKind::Array => return Err(invalid(index, "query param not support array")),
                DataKind::Object => {
                    return Err(invalid(index, "nested struct can not be a query param"))
                }
                _ => {}
            }
        }

        let name = tags::query_name(&field.tag, &field.name);
        let required = tags::is_required(&field.tag);
        query_fields.push(QModel::query(&name, &field.tag, shape, required));
        pairs.push((name, json));
    }
    Ok(ParamBinding::StructQuery(pairs))
}

/// Exported fields with embedded structs promoted
fn query_struct_fields(target: &TypeShape) -> Vec<FieldShape> {
    let mut fields = Vec::new();
    for field in &target.fields {
        if !field.exported {
            continue;
        }
        if field.anonymous {
            let embedded = field.shape().deref();
            if embedded.kind == ReflectKind::Struct && !embedded.is_time() {
                fields.extend(query_struct_fields(&embedded));
                continue;
            }
        }
        fields.push(field.clone());
    }
    fields
}
