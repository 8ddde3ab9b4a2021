//! Route model: HTTP methods, path templates and the resolved [`Route`].
//!
//! Templates use `:name` for a path parameter, `:name?` for an optional one and a
//! trailing `?name` segment for a query parameter, e.g. `/users/:id/?day`.

use crate::binder::Binder;
use crate::handler::ErasedHandler;
use crate::metadata::Metadata;
use crate::reflect::{DataKind, Model, TypeShape};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Separator between method and URL in a route identity
pub const ROUTE_ID_SEPARATOR: char = '|';

/// HTTP methods a route can be bound to, in verb matching order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
    Options,
}

impl HttpMethod {
    /// Every method, in the order method names are matched against
    pub const ALL: [HttpMethod; 6] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Patch,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Options,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Title-cased form used in method names, e.g. `Get` in `GetUser`.
    pub fn title(self) -> &'static str {
        match self {
            HttpMethod::Get => "Get",
            HttpMethod::Post => "Post",
            HttpMethod::Patch => "Patch",
            HttpMethod::Put => "Put",
            HttpMethod::Delete => "Delete",
            HttpMethod::Options => "Options",
        }
    }

    /// Mutating verbs must declare a request body.
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    /// Verbs whose struct parameters are read from the query string.
    pub fn is_query_only(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported HTTP method: {}", s))
    }
}

/// A path or query parameter
#[derive(Debug, Clone)]
pub struct QModel {
    pub name: String,
    /// Raw annotation string of the struct field the parameter came from
    pub tag: String,
    pub kind: DataKind,
    pub in_path: bool,
    pub required: bool,
    pub shape: TypeShape,
}

impl QModel {
    pub fn path(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            tag: String::new(),
            kind: DataKind::String,
            in_path: true,
            required,
            shape: String::shape(),
        }
    }

    pub fn query(name: &str, tag: &str, shape: TypeShape, required: bool) -> Self {
        let target = shape.deref();
        let kind = if target.is_time() {
            DataKind::String
        } else {
            target.data_kind()
        };
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
            kind,
            in_path: false,
            required,
            shape,
        }
    }

    pub fn is_time(&self) -> bool {
        self.shape.deref().is_time()
    }
}

/// Where a handler argument is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamBinding {
    /// A single query field
    Query(String),
    /// A struct assembled from query fields, as `(query name, json name)` pairs
    StructQuery(Vec<(String, String)>),
    /// The JSON request body
    Body,
    /// The uploaded file of a multipart request
    File,
}

/// A registered endpoint, read-only once the application is initialized
pub struct Route {
    pub method: HttpMethod,
    /// Absolute URL template, e.g. `/api/users/:id`
    pub url: String,
    pub relative_path: String,
    /// Handler or method name
    pub name: String,
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub path_fields: Vec<QModel>,
    pub query_fields: Vec<QModel>,
    pub request: Option<Arc<Metadata>>,
    pub response: Arc<Metadata>,
    /// One entry per handler argument
    pub bindings: Vec<ParamBinding>,
    pub handler: Arc<dyn ErasedHandler>,
    pub request_binder: Arc<dyn Binder>,
    pub response_binder: Arc<dyn Binder>,
    pub query_binders: HashMap<String, Arc<dyn Binder>>,
}

impl Route {
    /// Identity unique across the application, `METHOD|url`.
    pub fn id(&self) -> String {
        route_id(self.method, &self.url)
    }

    /// Identity with parameter names erased and query segments dropped.
    ///
    /// Two routes with the same key serve the same requests.
    pub fn key(&self) -> String {
        route_key(self.method, &self.url)
    }

    pub fn has_file(&self) -> bool {
        self.bindings.contains(&ParamBinding::File)
    }

    pub fn has_body(&self) -> bool {
        self.request.is_some()
    }

    /// URL in OpenAPI form
    pub fn openapi_path(&self) -> String {
        to_openapi_path(&self.url)
    }

    /// URL as bound on the mux, without query segments
    pub fn mux_path(&self) -> String {
        let path = self
            .url
            .split('/')
            .filter(|segment| !segment.starts_with('?'))
            .collect::<Vec<_>>()
            .join("/");
        if path.is_empty() {
            "/".to_string()
        } else {
            path
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("name", &self.name)
            .field("path_fields", &self.path_fields)
            .field("query_fields", &self.query_fields)
            .field("request", &self.request.as_ref().map(|m| &m.identity))
            .field("response", &self.response.identity)
            .field("bindings", &self.bindings)
            .finish()
    }
}

pub fn route_id(method: HttpMethod, url: &str) -> String {
    format!("{}{}{}", method.as_str(), ROUTE_ID_SEPARATOR, url)
}

/// `GET|/users/:id/?day` and `GET|/users/:no?` both have the key `GET|/users/{}`.
pub fn route_key(method: HttpMethod, url: &str) -> String {
    let segments: Vec<&str> = url
        .split('/')
        .filter(|s| !s.is_empty() && !s.starts_with('?'))
        .map(|s| if s.starts_with(':') { "{}" } else { s })
        .collect();
    route_id(method, &format!("/{}", segments.join("/")))
}

/// Convert a route template to OpenAPI form.
///
/// `:name` and `:name?` become `{name}`; leading `?name` segments are query
/// parameters and are dropped.
pub fn to_openapi_path(template: &str) -> String {
    let parts: Vec<String> = template
        .split('/')
        .filter(|part| !part.starts_with('?'))
        .map(|part| match part.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name.trim_end_matches('?')),
            None => part.to_string(),
        })
        .collect();

    let path = parts.join("/");
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

/// Parameters declared by a route template, in template order.
pub fn path_params(template: &str) -> (Vec<QModel>, Vec<QModel>) {
    let mut path_fields = Vec::new();
    let mut query_fields = Vec::new();
    for segment in template.split('/') {
        if let Some(name) = segment.strip_prefix(':') {
            match name.strip_suffix('?') {
                Some(optional) => path_fields.push(QModel::path(optional, false)),
                None => path_fields.push(QModel::path(name, true)),
            }
        } else if let Some(name) = segment.strip_prefix('?') {
            query_fields.push(QModel::query(name, "", String::shape(), false));
        }
    }
    (path_fields, query_fields)
}

/// Join a router prefix and a relative path into an absolute template.
pub fn join_path(prefix: &str, relative: &str) -> String {
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(relative.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}
