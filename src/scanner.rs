//! Name-convention route discovery.
//!
//! A [`GroupRouter`] lists its methods as [`MethodDescriptor`]s. A method becomes a
//! route when its name starts or ends with an HTTP verb (`GetUser`, `UserGet`) and
//! its signature has the route shape: the request context first, a value and an
//! error returned. Other methods are skipped.
//!
//! # Example
//!
//! ```
//! use fastapi_reflect::context::Context;
//! use fastapi_reflect::handler::HandlerError;
//! use fastapi_reflect::path_schema::LowerCaseDash;
//! use fastapi_reflect::scanner::{scan, GroupRouter, MethodDescriptor};
//! use std::sync::Arc;
//!
//! struct Health;
//!
//! impl Health {
//!     fn get_server_time(&self, _ctx: &mut Context) -> Result<i64, HandlerError> {
//!         Ok(0)
//!     }
//! }
//!
//! impl GroupRouter for Health {
//!     fn prefix(&self) -> &str {
//!         "/health"
//!     }
//!
//!     fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
//!         vec![MethodDescriptor::new("GetServerTime", move |ctx: &mut Context| {
//!             self.get_server_time(ctx)
//!         })]
//!     }
//! }
//!
//! let specs = scan(Arc::new(Health), &LowerCaseDash).unwrap();
//! assert_eq!(specs[0].path, "server-time");
//! ```

use crate::error::{Error, Result};
use crate::handler::{erase, ErasedHandler, Handler, Signature};
use crate::path_schema::PathSchema;
use crate::reflect::{split_type_name, ReflectKind, TypeShape};
use crate::route::HttpMethod;
use crate::router::{RouteSpec, Router};
use heck::ToTitleCase;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Length of the shortest verb; route names must be longer.
const MIN_NAME_LEN: usize = 3;

/// A struct whose methods are routes
pub trait GroupRouter: Send + Sync + 'static {
    /// Path prefix shared by every route of the group
    fn prefix(&self) -> &str {
        ""
    }

    fn tags(&self) -> Vec<String>
    where
        Self: Sized,
    {
        vec![split_type_name(std::any::type_name::<Self>()).1]
    }

    /// Relative path overrides, keyed by method name
    fn paths(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn summaries(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn descriptions(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Names of deprecated methods
    fn deprecated(&self) -> HashSet<String> {
        HashSet::new()
    }

    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor>;
}

/// A method of a [`GroupRouter`]
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub signature: Signature,
    /// `None` for methods that are listed but not callable as routes
    pub handler: Option<Arc<dyn ErasedHandler>>,
    pub param_names: Vec<String>,
}

impl MethodDescriptor {
    pub fn new<H, Args>(name: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let handler = erase(handler);
        Self {
            name: name.to_string(),
            signature: handler.signature(),
            handler: Some(handler),
            param_names: Vec::new(),
        }
    }

    /// A method known only by its signature
    pub fn declared(name: &str, signature: Signature) -> Self {
        Self {
            name: name.to_string(),
            signature,
            handler: None,
            param_names: Vec::new(),
        }
    }

    pub fn params(mut self, names: &[&str]) -> Self {
        self.param_names = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// Verb named by a method, checked in [`HttpMethod::ALL`] order.
fn verb_of(name: &str) -> Option<HttpMethod> {
    if name.len() <= MIN_NAME_LEN || !name.starts_with(|c: char| c.is_uppercase()) {
        return None;
    }

    let matches: Vec<HttpMethod> = HttpMethod::ALL
        .iter()
        .copied()
        .filter(|m| name.starts_with(m.title()) || name.ends_with(m.title()))
        .collect();

    if matches.len() > 1 {
        warn!(
            "Method {} matches verbs {:?}, using {}",
            name, matches, matches[0]
        );
    }
    matches.first().copied()
}

/// Method name without its verb
pub fn strip_verb(name: &str, method: HttpMethod) -> &str {
    name.strip_prefix(method.title())
        .or_else(|| name.strip_suffix(method.title()))
        .unwrap_or(name)
}

/// Why `shape` can not be returned by a route, if it can't.
pub fn illegal_response_kind(shape: &TypeShape) -> Option<&'static str> {
    if shape.pointer_depth() >= 2 {
        return Some("double pointer");
    }
    match shape.deref().kind {
        ReflectKind::Interface => Some("interface"),
        ReflectKind::Func => Some("func"),
        ReflectKind::Chan => Some("chan"),
        ReflectKind::RawPointer => Some("raw pointer"),
        ReflectKind::Map => Some("map"),
        _ => None,
    }
}

/// Decide whether a method is a route and which verb it serves.
///
/// Returns `None` for methods that are not routes.
///
/// # Panics
///
/// Panics when a POST, PUT or PATCH method declares no body, or when its last
/// parameter is not a struct, array or slice. Both are mistakes in the router
/// itself and must stop the application from starting.
pub fn match_method(name: &str, signature: &Signature) -> Option<HttpMethod> {
    let method = verb_of(name)?;

    if signature.inputs.is_empty() || signature.outputs.len() != 2 {
        debug!("{} does not have the route shape", name);
        return None;
    }
    if !signature.inputs[0].deref().is_context() {
        debug!("{} does not take the context first", name);
        return None;
    }
    if !signature.outputs[1].is_error() {
        debug!("{} does not return an error last", name);
        return None;
    }

    let params = signature.params();
    if method.has_body() {
        let body = match params.last() {
            Some(body) => body,
            None => panic!("{} is a {} route but declares no request body", name, method),
        };
        let target = body.deref_once();
        if !matches!(
            target.kind,
            ReflectKind::Struct | ReflectKind::Slice | ReflectKind::Array
        ) {
            panic!(
                "{} parameter {} must be a struct, array or slice, found {}",
                name,
                params.len(),
                target.short_name()
            );
        }
    }

    if let Some(kind) = illegal_response_kind(&signature.outputs[0]) {
        warn!("{} returns a {}, which can not be a response", name, kind);
        return None;
    }

    Some(method)
}

/// Discover the routes of `router`.
///
/// Paths come from the `paths()` override or, failing that, from the verb-stripped
/// method name formatted by `schema`.
///
/// # Errors
///
/// Returns [`Error::InvalidRoute`] when a method matches the route shape but has no
/// handler attached.
pub fn scan<R: GroupRouter>(router: Arc<R>, schema: &dyn PathSchema) -> Result<Vec<RouteSpec>> {
    let paths = router.paths();
    let summaries = router.summaries();
    let descriptions = router.descriptions();
    let deprecated = router.deprecated();

    let mut specs = Vec::new();
    for descriptor in Arc::clone(&router).methods() {
        let name = descriptor.name.as_str();
        let method = match match_method(name, &descriptor.signature) {
            Some(method) => method,
            None => {
                debug!("Skipping {}", name);
                continue;
            }
        };

        let handler = descriptor.handler.clone().ok_or_else(|| Error::InvalidRoute {
            route: name.to_string(),
            message: "route method has no handler".to_string(),
        })?;

        let stripped = strip_verb(name, method);
        let path = paths
            .get(name)
            .cloned()
            .unwrap_or_else(|| schema.format(stripped));
        let summary = summaries
            .get(name)
            .cloned()
            .unwrap_or_else(|| stripped.to_title_case());

        let mut spec = RouteSpec::from_erased(method, &path, handler)
            .name(name)
            .summary(&summary)
            .deprecated(deprecated.contains(name));
        if let Some(description) = descriptions.get(name) {
            spec = spec.description(description);
        }
        spec.param_names = descriptor.param_names.clone();

        debug!("Found {} {} from {}", method, path, name);
        specs.push(spec);
    }

    Ok(specs)
}

/// Scan `router` into a [`Router`] carrying its prefix and tags.
pub fn into_router<R: GroupRouter>(router: Arc<R>, schema: &dyn PathSchema) -> Result<Router> {
    let prefix = router.prefix().to_string();
    let tags = router.tags();
    let specs = scan(router, schema)?;
    Ok(specs
        .into_iter()
        .fold(Router::new(&prefix).with_tags(tags), Router::route))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::HandlerError;
    use std::result::Result;
    use crate::path_schema::{Backslash, LowerCaseDash};
    use crate::reflect::Model;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Item {
        name: String,
    }

    impl Model for Item {
        fn shape() -> TypeShape {
            TypeShape::named("shop", "Item").field::<String>("name", r#"json:"name""#)
        }
    }

    fn sig(inputs: Vec<TypeShape>, outputs: Vec<TypeShape>) -> Signature {
        Signature::new(inputs, outputs)
    }

    fn ok_outputs() -> Vec<TypeShape> {
        vec![Item::shape(), HandlerError::shape()]
    }

    #[test]
    fn test_verb_prefix_and_suffix() {
        let s = sig(vec![Context::shape()], ok_outputs());
        assert_eq!(match_method("GetItem", &s), Some(HttpMethod::Get));
        assert_eq!(match_method("ItemGet", &s), Some(HttpMethod::Get));
        assert_eq!(match_method("DeleteItem", &s), Some(HttpMethod::Delete));
        assert_eq!(match_method("Get", &s), None);
        assert_eq!(match_method("getItem", &s), None);
        assert_eq!(match_method("FetchItem", &s), None);
    }

    #[test]
    fn test_first_verb_wins() {
        let s = sig(vec![Context::shape()], ok_outputs());
        assert_eq!(match_method("GetThenDelete", &s), Some(HttpMethod::Get));
        assert_eq!(match_method("DeleteItemGet", &s), Some(HttpMethod::Get));
    }

    #[test]
    fn test_shape_rejections() {
        let no_ctx = sig(vec![Item::shape()], ok_outputs());
        assert_eq!(match_method("GetItem", &no_ctx), None);

        let one_output = sig(vec![Context::shape()], vec![Item::shape()]);
        assert_eq!(match_method("GetItem", &one_output), None);

        let no_error = sig(vec![Context::shape()], vec![Item::shape(), Item::shape()]);
        assert_eq!(match_method("GetItem", &no_error), None);

        let no_inputs = sig(Vec::new(), ok_outputs());
        assert_eq!(match_method("GetItem", &no_inputs), None);

        let ptr_ctx = sig(vec![<Box<Context>>::shape()], ok_outputs());
        assert_eq!(match_method("GetItem", &ptr_ctx), Some(HttpMethod::Get));
    }

    #[test]
    fn test_illegal_response_kinds() {
        let map = sig(
            vec![Context::shape()],
            vec![<HashMap<String, i32>>::shape(), HandlerError::shape()],
        );
        assert_eq!(match_method("GetMap", &map), None);

        let double = sig(
            vec![Context::shape()],
            vec![<Option<Box<Item>>>::shape(), HandlerError::shape()],
        );
        assert_eq!(match_method("GetItem", &double), None);

        let single = sig(
            vec![Context::shape()],
            vec![<Option<Item>>::shape(), HandlerError::shape()],
        );
        assert_eq!(match_method("GetItem", &single), Some(HttpMethod::Get));

        assert_eq!(illegal_response_kind(&serde_json::Value::shape()), Some("interface"));
        assert_eq!(illegal_response_kind(&TypeShape::func()), Some("func"));
        assert_eq!(illegal_response_kind(&<Vec<Item>>::shape()), None);
    }

    #[test]
    #[should_panic(expected = "PostItem is a POST route but declares no request body")]
    fn test_post_without_body_panics() {
        let s = sig(vec![Context::shape()], ok_outputs());
        match_method("PostItem", &s);
    }

    #[test]
    #[should_panic(expected = "PutItem parameter 1 must be a struct")]
    fn test_put_scalar_body_panics() {
        let s = sig(vec![Context::shape(), String::shape()], ok_outputs());
        match_method("PutItem", &s);
    }

    #[test]
    fn test_mutating_bodies() {
        let s = sig(vec![Context::shape(), <Option<Item>>::shape()], ok_outputs());
        assert_eq!(match_method("PatchItem", &s), Some(HttpMethod::Patch));

        let s = sig(vec![Context::shape(), <Vec<Item>>::shape()], ok_outputs());
        assert_eq!(match_method("PostItems", &s), Some(HttpMethod::Post));

        // OPTIONS needs no body
        let s = sig(vec![Context::shape()], ok_outputs());
        assert_eq!(match_method("OptionsItem", &s), Some(HttpMethod::Options));
    }

    struct Shop;

    impl Shop {
        fn get_item(&self, _ctx: &mut Context, name: String) -> Result<Item, HandlerError> {
            Ok(Item { name })
        }

        fn post_item_batch(&self, _ctx: &mut Context, items: Vec<Item>) -> Result<usize, HandlerError> {
            Ok(items.len())
        }
    }

    impl GroupRouter for Shop {
        fn prefix(&self) -> &str {
            "/shop"
        }

        fn paths(&self) -> HashMap<String, String> {
            let mut paths = HashMap::new();
            paths.insert("GetItem".to_string(), "item/?name".to_string());
            paths
        }

        fn summaries(&self) -> HashMap<String, String> {
            let mut summaries = HashMap::new();
            summaries.insert("GetItem".to_string(), "Find an item".to_string());
            summaries
        }

        fn deprecated(&self) -> HashSet<String> {
            ["PostItemBatch".to_string()].into_iter().collect()
        }

        fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
            let get = Arc::clone(&self);
            let post = Arc::clone(&self);
            vec![
                MethodDescriptor::new("GetItem", move |ctx: &mut Context, name: String| {
                    get.get_item(ctx, name)
                }),
                MethodDescriptor::new("PostItemBatch", move |ctx: &mut Context, items: Vec<Item>| {
                    post.post_item_batch(ctx, items)
                }),
                MethodDescriptor::declared("Describe", sig(Vec::new(), Vec::new())),
            ]
        }
    }

    #[test]
    fn test_scan_router() {
        let specs = scan(Arc::new(Shop), &LowerCaseDash).unwrap();
        assert_eq!(specs.len(), 2);

        assert_eq!(specs[0].method, HttpMethod::Get);
        assert_eq!(specs[0].path, "item/?name");
        assert_eq!(specs[0].summary, "Find an item");
        assert!(!specs[0].deprecated);

        assert_eq!(specs[1].method, HttpMethod::Post);
        assert_eq!(specs[1].path, "item-batch");
        assert_eq!(specs[1].summary, "Item Batch");
        assert_eq!(specs[1].name, "PostItemBatch");
        assert!(specs[1].deprecated);
    }

    #[test]
    fn test_scan_with_other_schema() {
        let specs = scan(Arc::new(Shop), &Backslash).unwrap();
        assert_eq!(specs[1].path, "item/batch");
    }

    #[test]
    fn test_into_router_keeps_prefix_and_tags() {
        let router = into_router(Arc::new(Shop), &LowerCaseDash).unwrap();
        assert_eq!(router.prefix(), "/shop");
        assert_eq!(router.tag_list(), &["Shop".to_string()]);
        assert_eq!(router.specs().len(), 2);
    }

    struct Broken;

    impl GroupRouter for Broken {
        fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
            vec![MethodDescriptor::declared(
                "GetBroken",
                sig(vec![Context::shape()], ok_outputs()),
            )]
        }
    }

    #[test]
    fn test_route_without_handler_is_an_error() {
        let err = scan(Arc::new(Broken), &LowerCaseDash).unwrap_err();
        assert!(matches!(err, Error::InvalidRoute { .. }));
    }
}
