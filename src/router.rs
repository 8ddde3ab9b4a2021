//! Explicit route registration.
//!
//! ```
//! use fastapi_reflect::context::Context;
//! use fastapi_reflect::handler::HandlerError;
//! use fastapi_reflect::router::{RouteSpec, Router};
//!
//! fn get_version(_ctx: &mut Context) -> Result<String, HandlerError> {
//!     Ok("1.0".to_string())
//! }
//!
//! fn put_name(_ctx: &mut Context, name: Vec<String>) -> Result<usize, HandlerError> {
//!     Ok(name.len())
//! }
//!
//! let router = Router::new("/api")
//!     .tags(&["meta"])
//!     .get("/version", get_version)
//!     .route(RouteSpec::put("/names", put_name).summary("Replace names").deprecated(true));
//! assert_eq!(router.specs().len(), 2);
//! ```

use crate::binder::{self, Binder, NothingBinder};
use crate::classifier::classify;
use crate::error::{Error, Result};
use crate::handler::{erase, ErasedHandler, Handler, Signature};
use crate::metadata::MetadataCache;
use crate::route::{join_path, path_params, route_id, HttpMethod, Route};
use crate::scanner::illegal_response_kind;
use heck::{ToTitleCase, ToUpperCamelCase};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// One route before it is resolved against the metadata cache
#[derive(Clone)]
pub struct RouteSpec {
    pub method: HttpMethod,
    /// Path template relative to the router prefix
    pub path: String,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub deprecated: bool,
    /// Query names of the handler arguments, by position
    pub param_names: Vec<String>,
    pub handler: Arc<dyn ErasedHandler>,
}

macro_rules! verb_constructors {
    ($($fn_name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $fn_name<H, Args>(path: &str, handler: H) -> Self
            where
                H: Handler<Args>,
                Args: 'static,
            {
                Self::new(HttpMethod::$method, path, handler)
            }
        )*
    };
}

impl RouteSpec {
    pub fn new<H, Args>(method: HttpMethod, path: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        Self::from_erased(method, path, erase(handler))
    }

    pub fn from_erased(method: HttpMethod, path: &str, handler: Arc<dyn ErasedHandler>) -> Self {
        Self {
            method,
            path: path.to_string(),
            name: default_name(method, path),
            summary: String::new(),
            description: String::new(),
            deprecated: false,
            param_names: Vec::new(),
            handler,
        }
    }

    verb_constructors! {
        get => Get,
        post => Post,
        patch => Patch,
        put => Put,
        delete => Delete,
        options => Options,
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }

    /// Name the scalar arguments, in order. Empty strings keep the synthetic name.
    pub fn params(mut self, names: &[&str]) -> Self {
        self.param_names = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("name", &self.name)
            .finish()
    }
}

/// `GET /users/:id/posts` is named `GetUsersPosts`.
fn default_name(method: HttpMethod, path: &str) -> String {
    let mut name = method.title().to_string();
    for segment in path.split('/') {
        if segment.is_empty() || segment.starts_with(':') || segment.starts_with('?') {
            continue;
        }
        name.push_str(&segment.to_upper_camel_case());
    }
    name
}

/// A group of routes sharing a path prefix and tags
#[derive(Debug, Clone, Default)]
pub struct Router {
    prefix: String,
    tags: Vec<String>,
    specs: Vec<RouteSpec>,
}

macro_rules! verb_builders {
    ($($fn_name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $fn_name<H, Args>(self, path: &str, handler: H) -> Self
            where
                H: Handler<Args>,
                Args: 'static,
            {
                self.route(RouteSpec::new(HttpMethod::$method, path, handler))
            }
        )*
    };
}

impl Router {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            tags: Vec::new(),
            specs: Vec::new(),
        }
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub(crate) fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    verb_builders! {
        get => Get,
        post => Post,
        patch => Patch,
        put => Put,
        delete => Delete,
        options => Options,
    }

    pub fn route(mut self, spec: RouteSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn tag_list(&self) -> &[String] {
        &self.tags
    }

    pub fn specs(&self) -> &[RouteSpec] {
        &self.specs
    }

    /// Resolve every spec into a [`Route`].
    pub fn build(&self, cache: &Arc<MetadataCache>) -> Result<Vec<Route>> {
        self.specs
            .iter()
            .map(|spec| assemble(&self.prefix, &self.tags, spec, cache))
            .collect()
    }
}

fn check_signature(id: &str, signature: &Signature) -> Result<()> {
    let invalid = |message: &str| Error::InvalidRoute {
        route: id.to_string(),
        message: message.to_string(),
    };

    match signature.inputs.first() {
        Some(first) if first.deref().is_context() => {}
        _ => return Err(invalid("first parameter must be the request context")),
    }
    if signature.outputs.len() != 2 {
        return Err(invalid("handler must return a value and an error"));
    }
    if !signature.outputs[1].is_error() {
        return Err(invalid("last return value must be an error"));
    }
    Ok(())
}

/// Names for the handler arguments. Without explicit names, `?name` segments of the
/// template name the scalar arguments in order.
fn argument_names(spec: &RouteSpec, signature: &Signature, template_query: &[String]) -> Vec<String> {
    if !spec.param_names.is_empty() {
        return spec.param_names.clone();
    }

    let mut available = template_query.iter();
    signature
        .params()
        .iter()
        .map(|param| {
            let target = param.deref();
            if target.is_time() || target.data_kind().is_base() {
                available.next().cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .collect()
}

/// Resolve a spec into a [`Route`]: classify its arguments, build request and
/// response metadata and create the binders.
pub fn assemble(
    prefix: &str,
    tags: &[String],
    spec: &RouteSpec,
    cache: &Arc<MetadataCache>,
) -> Result<Route> {
    let url = join_path(prefix, &spec.path);
    let id = route_id(spec.method, &url);
    let signature = spec.handler.signature();
    check_signature(&id, &signature)?;

    let response_shape = &signature.outputs[0];
    if let Some(kind) = illegal_response_kind(response_shape) {
        return Err(Error::InvalidRoute {
            route: id,
            message: format!("{} can not be a response", kind),
        });
    }

    let (path_fields, mut query_fields) = path_params(&url);
    let template_query: Vec<String> = query_fields.iter().map(|q| q.name.clone()).collect();
    let names = argument_names(spec, &signature, &template_query);
    let classification = classify(&id, spec.method, signature.params(), &names)?;

    for field in classification.query_fields {
        match query_fields.iter_mut().find(|q| q.name == field.name) {
            Some(existing) => *existing = field,
            None => query_fields.push(field),
        }
    }

    let request = classification
        .request
        .as_ref()
        .map(|shape| cache.get_or_build(shape));
    let response = cache.get_or_build(response_shape);

    let request_binder: Arc<dyn Binder> = match &request {
        Some(meta) => binder::for_metadata(Arc::clone(meta), Arc::clone(cache), "body"),
        None => Arc::new(NothingBinder),
    };
    let response_binder = binder::for_metadata(Arc::clone(&response), Arc::clone(cache), "response");
    let query_binders: HashMap<String, Arc<dyn Binder>> = query_fields
        .iter()
        .map(|q| (q.name.clone(), binder::for_query(q, "query")))
        .collect();

    let summary = if spec.summary.is_empty() {
        spec.name.to_title_case()
    } else {
        spec.summary.clone()
    };

    debug!(
        "Assembled {} ({} query fields, request {}, response {})",
        id,
        query_fields.len(),
        request.as_ref().map_or("none", |m| m.identity.as_str()),
        response.identity
    );

    Ok(Route {
        method: spec.method,
        url,
        relative_path: spec.path.clone(),
        name: spec.name.clone(),
        summary,
        description: spec.description.clone(),
        tags: tags.to_vec(),
        deprecated: spec.deprecated,
        path_fields,
        query_fields,
        request,
        response,
        bindings: classification.bindings,
        handler: Arc::clone(&spec.handler),
        request_binder,
        response_binder,
        query_binders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::{HandlerError, Signature};
    use std::result::Result;
    use crate::reflect::{DataKind, Model, TypeShape};
    use crate::route::ParamBinding;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    impl Model for Note {
        fn shape() -> TypeShape {
            TypeShape::named("notes", "Note").field::<String>("title", r#"json:"title" validate:"required""#)
        }
    }

    fn get_note(_ctx: &mut Context, day: String, limit: u32) -> Result<Note, HandlerError> {
        Ok(Note {
            title: format!("{}:{}", day, limit),
        })
    }

    fn post_note(_ctx: &mut Context, note: Note) -> Result<i64, HandlerError> {
        Ok(note.title.len() as i64)
    }

    fn get_raw(_ctx: &mut Context) -> Result<HashMap<String, i32>, HandlerError> {
        Ok(HashMap::new())
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name(HttpMethod::Get, "/users/:id/posts"), "GetUsersPosts");
        assert_eq!(default_name(HttpMethod::Delete, "/user-info/?day"), "DeleteUserInfo");
        assert_eq!(default_name(HttpMethod::Post, ""), "Post");
    }

    #[test]
    fn test_assemble_get_route() {
        let cache = Arc::new(MetadataCache::new());
        let router = Router::new("/api").tags(&["notes"]).get("/notes/:id/?day", get_note);
        let routes = router.build(&cache).unwrap();

        let route = &routes[0];
        assert_eq!(route.id(), "GET|/api/notes/:id/?day");
        assert_eq!(route.mux_path(), "/api/notes/:id");
        assert_eq!(route.path_fields.len(), 1);
        let names: Vec<&str> = route.query_fields.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["day", "u321"]);
        assert!(route.request.is_none());
        assert_eq!(route.response.identity, "notes.Note");
        assert_eq!(route.request_binder.name(), "nothing");
        assert_eq!(route.query_binders["u321"].name(), "uint");
        assert_eq!(route.summary, "Get Notes");
        assert_eq!(route.tags, vec!["notes"]);
    }

    #[test]
    fn test_assemble_post_route() {
        let cache = Arc::new(MetadataCache::new());
        let spec = RouteSpec::post("/notes", post_note)
            .name("CreateNote")
            .summary("Create a note")
            .deprecated(true);
        let route = assemble("", &[], &spec, &cache).unwrap();

        assert_eq!(route.url, "/notes");
        assert_eq!(route.bindings, vec![ParamBinding::Body]);
        assert_eq!(route.request.as_ref().unwrap().identity, "notes.Note");
        assert_eq!(route.response.kind, DataKind::Integer);
        assert_eq!(route.request_binder.name(), "json");
        assert_eq!(route.response_binder.name(), "int");
        assert_eq!(route.summary, "Create a note");
        assert!(route.deprecated);
    }

    #[test]
    fn test_explicit_param_names() {
        let cache = Arc::new(MetadataCache::new());
        let spec = RouteSpec::get("/notes", get_note).params(&["day", "limit"]);
        let route = assemble("/v1", &[], &spec, &cache).unwrap();
        let names: Vec<&str> = route.query_fields.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["day", "limit"]);
    }

    #[test]
    fn test_map_response_is_rejected() {
        let cache = Arc::new(MetadataCache::new());
        let spec = RouteSpec::get("/raw", get_raw);
        let err = assemble("", &[], &spec, &cache).unwrap_err();
        assert!(err.to_string().contains("map can not be a response"));
    }

    struct Fixed(Signature);

    impl ErasedHandler for Fixed {
        fn signature(&self) -> Signature {
            self.0.clone()
        }

        fn call(
            &self,
            _ctx: &mut Context,
            _args: Vec<Value>,
        ) -> std::result::Result<Value, crate::handler::CallError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_signature_shape_is_checked() {
        let cache = Arc::new(MetadataCache::new());
        let no_context = Signature::new(vec![String::shape()], vec![String::shape(), HandlerError::shape()]);
        let spec = RouteSpec::from_erased(HttpMethod::Get, "/x", Arc::new(Fixed(no_context)));
        assert!(matches!(
            assemble("", &[], &spec, &cache),
            Err(Error::InvalidRoute { .. })
        ));

        let one_output = Signature::new(vec![Context::shape()], vec![String::shape()]);
        let spec = RouteSpec::from_erased(HttpMethod::Get, "/x", Arc::new(Fixed(one_output)));
        assert!(assemble("", &[], &spec, &cache).is_err());
    }
}
