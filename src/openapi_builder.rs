use crate::config::{AppConfig, ContactConfig, LicenseConfig};
use crate::error::Result;
use crate::metadata::{Metadata, MetadataCache};
use crate::reflect::{DataKind, TypeShape};
use crate::route::{HttpMethod, QModel, Route};
use crate::schema_generator::{Schema, SchemaGenerator};
use crate::tags;
use crate::validation::HttpValidationError;
use log::debug;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Version written to the `openapi` field
pub const OPENAPI_VERSION: &str = "3.0.2";

const JSON_CONTENT: &str = "application/json";
const MULTIPART_CONTENT: &str = "multipart/form-data";

/// Name of the file part in multipart request bodies
pub const FILE_PART: &str = "file";

/// OpenAPI document builder
pub struct OpenApiBuilder {
    info: Info,
    cache: Arc<MetadataCache>,
    /// Paths collection (URL path -> PathItem)
    paths: BTreeMap<String, PathItem>,
    /// Request and response nodes of every registered route
    roots: Vec<Arc<Metadata>>,
    validation_error: Arc<Metadata>,
    error_response: Option<Arc<Metadata>>,
    /// Serialized document, dropped whenever the builder changes
    document: OnceCell<Arc<Vec<u8>>>,
}

/// OpenAPI Info object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseConfig>,
}

impl Info {
    pub fn new(title: &str, version: &str) -> Self {
        Self {
            title: title.to_string(),
            version: version.to_string(),
            description: None,
            contact: None,
            license: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            title: config.title.clone(),
            version: config.version.clone(),
            description: Some(config.description.clone()).filter(|d| !d.is_empty()),
            contact: config.contact.clone(),
            license: config.license.clone(),
        }
    }
}

/// OpenAPI PathItem object - all operations sharing one URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
}

impl PathItem {
    pub fn operation(&self, method: HttpMethod) -> Option<&Operation> {
        match method {
            HttpMethod::Get => self.get.as_ref(),
            HttpMethod::Post => self.post.as_ref(),
            HttpMethod::Patch => self.patch.as_ref(),
            HttpMethod::Put => self.put.as_ref(),
            HttpMethod::Delete => self.delete.as_ref(),
            HttpMethod::Options => self.options.as_ref(),
        }
    }

    fn slot(&mut self, method: HttpMethod) -> &mut Option<Operation> {
        match method {
            HttpMethod::Get => &mut self.get,
            HttpMethod::Post => &mut self.post,
            HttpMethod::Patch => &mut self.patch,
            HttpMethod::Put => &mut self.put,
            HttpMethod::Delete => &mut self.delete,
            HttpMethod::Options => &mut self.options,
        }
    }

    fn operations_mut(&mut self) -> impl Iterator<Item = &mut Operation> {
        [
            &mut self.get,
            &mut self.post,
            &mut self.patch,
            &mut self.put,
            &mut self.delete,
            &mut self.options,
        ]
        .into_iter()
        .flatten()
    }
}

/// OpenAPI Operation object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "operationId")]
    pub operation_id: String,
    /// Path parameters first, then query parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(rename = "requestBody", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    /// Keyed by status code, or `default`
    pub responses: BTreeMap<String, Response>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

/// OpenAPI Parameter object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// `path` or `query`
    #[serde(rename = "in")]
    pub location: String,
    pub required: bool,
    pub schema: Schema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// OpenAPI RequestBody object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub required: bool,
    /// Content types and their schemas
    pub content: BTreeMap<String, MediaType>,
}

/// OpenAPI MediaType object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaType {
    pub schema: Schema,
}

/// OpenAPI Response object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BTreeMap<String, MediaType>>,
}

impl Response {
    fn json(description: &str, schema: Schema) -> Self {
        Self {
            description: description.to_string(),
            content: Some(media(JSON_CONTENT, schema)),
        }
    }
}

/// OpenAPI Components object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub schemas: BTreeMap<String, Schema>,
}

/// Complete OpenAPI document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenApiDocument {
    pub openapi: String,
    pub info: Info,
    pub paths: BTreeMap<String, PathItem>,
    pub components: Components,
}

impl OpenApiDocument {
    pub fn operation(&self, path: &str, method: HttpMethod) -> Option<&Operation> {
        self.paths.get(path).and_then(|item| item.operation(method))
    }
}

fn media(content_type: &str, schema: Schema) -> BTreeMap<String, MediaType> {
    let mut content = BTreeMap::new();
    content.insert(content_type.to_string(), MediaType { schema });
    content
}

/// Stable operation id, e.g. `get_api_users_id` for `GET /api/users/:id`
pub fn operation_id(method: HttpMethod, url: &str) -> String {
    let mut id = method.as_str().to_lowercase();
    let mut last_underscore = false;
    for c in url.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
            last_underscore = false;
        } else if !last_underscore {
            id.push('_');
            last_underscore = true;
        }
    }
    id.trim_end_matches('_').to_string()
}

impl OpenApiBuilder {
    pub fn new(info: Info, cache: Arc<MetadataCache>) -> Self {
        debug!("Initializing OpenApiBuilder for {}", info.title);
        let validation_error = cache.build::<HttpValidationError>();
        Self {
            info,
            cache,
            paths: BTreeMap::new(),
            roots: Vec::new(),
            validation_error,
            error_response: None,
            document: OnceCell::new(),
        }
    }

    /// Add one route's operation to the document.
    pub fn register_from(&mut self, route: &Route) {
        debug!("Adding route: {} {}", route.method.as_str(), route.url);
        let generator = SchemaGenerator::new(&self.cache);

        let mut parameters: Vec<Parameter> = route
            .path_fields
            .iter()
            .map(|q| parameter(&generator, q, "path"))
            .collect();
        parameters.extend(
            route
                .query_fields
                .iter()
                .map(|q| parameter(&generator, q, "query")),
        );

        let mut responses = BTreeMap::new();
        responses.insert(
            "200".to_string(),
            Response::json("Successful Response", generator.body_schema(&route.response)),
        );
        responses.insert(
            "422".to_string(),
            Response::json(
                "Validation Error",
                Schema::reference(&self.validation_error.identity),
            ),
        );

        let operation = Operation {
            tags: route.tags.clone(),
            summary: Some(route.summary.clone()).filter(|s| !s.is_empty()),
            description: Some(route.description.clone()).filter(|s| !s.is_empty()),
            operation_id: operation_id(route.method, &route.url),
            parameters,
            request_body: request_body(&generator, route),
            responses,
            deprecated: route.deprecated,
        };

        let slot = self
            .paths
            .entry(route.openapi_path())
            .or_default()
            .slot(route.method);
        if slot.is_some() {
            debug!("Replacing operation {} {}", route.method.as_str(), route.url);
        }
        *slot = Some(operation);

        if let Some(request) = &route.request {
            self.roots.push(Arc::clone(request));
        }
        self.roots.push(Arc::clone(&route.response));
        self.document.take();
    }

    /// Document a custom error body under the `default` response of every operation.
    pub fn set_error_responder(&mut self, shape: &TypeShape) {
        self.error_response = Some(self.cache.get_or_build(shape));
        self.document.take();
    }

    /// Build the final OpenAPI document
    pub fn build(&self) -> OpenApiDocument {
        debug!("Building final OpenAPI document");
        let generator = SchemaGenerator::new(&self.cache);

        let mut paths = self.paths.clone();
        let mut roots = self.roots.clone();
        roots.push(Arc::clone(&self.validation_error));

        if let Some(error) = &self.error_response {
            let schema = generator.body_schema(error);
            for item in paths.values_mut() {
                for operation in item.operations_mut() {
                    operation
                        .responses
                        .insert("default".to_string(), Response::json("Error Response", schema.clone()));
                }
            }
            roots.push(Arc::clone(error));
        }

        OpenApiDocument {
            openapi: OPENAPI_VERSION.to_string(),
            info: self.info.clone(),
            paths,
            components: Components {
                schemas: generator.components(&roots),
            },
        }
    }

    /// Document as JSON bytes, built on first use.
    pub fn schema(&self) -> Result<Arc<Vec<u8>>> {
        self.document
            .get_or_try_init(|| -> Result<Arc<Vec<u8>>> {
                Ok(Arc::new(serde_json::to_vec(&self.build())?))
            })
            .map(Arc::clone)
    }
}

fn parameter(generator: &SchemaGenerator, q: &QModel, location: &str) -> Parameter {
    Parameter {
        name: q.name.clone(),
        location: location.to_string(),
        required: q.required,
        schema: generator.parameter_schema(q),
        description: tags::lookup(&q.tag, "description").map(str::to_string),
    }
}

fn request_body(generator: &SchemaGenerator, route: &Route) -> Option<RequestBody> {
    if route.method.is_query_only() {
        return None;
    }

    if route.has_file() {
        let mut form = match route.request.as_deref() {
            Some(request) if request.kind == DataKind::Object => generator.model_schema(request),
            _ => Schema::of_kind(DataKind::Object, None),
        };
        form.title = None;
        form.description = None;
        form.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(FILE_PART.to_string(), Schema::of_kind(DataKind::String, Some("binary")));
        form.required
            .get_or_insert_with(Vec::new)
            .insert(0, FILE_PART.to_string());
        return Some(RequestBody {
            required: true,
            content: media(MULTIPART_CONTENT, form),
        });
    }

    route.request.as_deref().map(|request| RequestBody {
        required: true,
        content: media(JSON_CONTENT, generator.body_schema(request)),
    })
}
