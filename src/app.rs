//! The application: routers in, mounted routes and an OpenAPI document out.
//!
//! ```
//! use fastapi_reflect::prelude::*;
//! use fastapi_reflect::mux::memory::{MemoryMux, MemoryRequest};
//! use fastapi_reflect::route::HttpMethod;
//!
//! fn ping(_ctx: &mut Context) -> Result<String, HandlerError> {
//!     Ok("pong".to_string())
//! }
//!
//! let mut app = App::new(AppConfig::default());
//! app.include_router(Router::new("/api").get("/ping", ping));
//! app.init().unwrap();
//!
//! let mut mux = MemoryMux::new();
//! app.mount(&mut mux).unwrap();
//! let response = mux.handle(MemoryRequest::new(HttpMethod::Get, "/api/ping"));
//! assert_eq!(response.status, 200);
//! assert_eq!(response.text(), "\"pong\"");
//! ```

use crate::config::AppConfig;
use crate::context::{CancelToken, Context, ContextPool};
use crate::dispatcher::{DispatchOptions, Dispatcher, ErrorResponder};
use crate::error::{Error, Result};
use crate::metadata::MetadataCache;
use crate::mux::{Mux, MuxContext, RouteHandler};
use crate::openapi_builder::{Info, OpenApiBuilder, OpenApiDocument};
use crate::route::{HttpMethod, Route};
use crate::router::Router;
use crate::scanner::{self, GroupRouter};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    config: AppConfig,
    cache: Arc<MetadataCache>,
    routers: Vec<Router>,
    routes: Vec<Arc<Route>>,
    root: CancelToken,
    pool: Arc<ContextPool>,
    options: DispatchOptions,
    /// Set by [`init`](Self::init)
    openapi: Option<OpenApiBuilder>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cache: Arc::new(MetadataCache::new()),
            routers: Vec::new(),
            routes: Vec::new(),
            root: CancelToken::new(),
            pool: Arc::new(ContextPool::new()),
            options: DispatchOptions::default(),
            openapi: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn include_router(&mut self, router: Router) -> &mut Self {
        debug!(
            "Including router {} with {} routes",
            router.prefix(),
            router.specs().len()
        );
        self.routers.push(router);
        self
    }

    /// Scan a convention-based router and include its routes.
    ///
    /// # Panics
    ///
    /// Panics when a mutating method declares no request body or a non-struct one.
    pub fn include_group<R: GroupRouter>(&mut self, group: Arc<R>) -> Result<&mut Self> {
        let schema = self.config.path_schema.schema();
        let router = scanner::into_router(group, schema.as_ref())?;
        Ok(self.include_router(router))
    }

    /// Render handler errors of every route with `responder`.
    pub fn set_error_responder(&mut self, responder: ErrorResponder) -> &mut Self {
        self.options.error_responder = Some(responder);
        self
    }

    /// Run `hook` on the context of every request right before its response is written.
    pub fn use_before_write<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.options.before_write.push(Arc::new(hook));
        self
    }

    /// Resolve every included route and build the OpenAPI document.
    ///
    /// Running it again after including more routers rebuilds everything.
    pub fn init(&mut self) -> Result<()> {
        let mut routes = Vec::new();
        let mut keys = HashSet::new();
        for router in &self.routers {
            for route in router.build(&self.cache)? {
                if !keys.insert(route.key()) {
                    return Err(Error::DuplicateRoute(route.id()));
                }
                routes.push(Arc::new(route));
            }
        }

        let mut openapi = OpenApiBuilder::new(Info::from_config(&self.config), Arc::clone(&self.cache));
        if let Some(responder) = &self.options.error_responder {
            openapi.set_error_responder(&responder.shape);
        }
        for route in &routes {
            openapi.register_from(route);
        }

        self.options.validate_response = !self.config.disable_response_validation;
        info!(
            "Initialized {} routes, {} cached models",
            routes.len(),
            self.cache.len()
        );
        self.routes = routes;
        self.openapi = Some(openapi);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.openapi.is_some()
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// OpenAPI document as JSON bytes.
    pub fn openapi(&self) -> Result<Arc<Vec<u8>>> {
        self.openapi.as_ref().ok_or(Error::NotInitialized)?.schema()
    }

    pub fn document(&self) -> Result<OpenApiDocument> {
        Ok(self.openapi.as_ref().ok_or(Error::NotInitialized)?.build())
    }

    /// Bind every route, and the OpenAPI endpoint when docs are enabled, on `mux`.
    pub fn mount(&self, mux: &mut dyn Mux) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let options = Arc::new(self.options.clone());
        for route in &self.routes {
            let path = route.mux_path();
            debug!("Mounting {} {}", route.method, path);
            let dispatcher = Dispatcher::new(
                Arc::clone(route),
                Arc::clone(&self.pool),
                self.root.clone(),
                Arc::clone(&options),
            );
            mux.bind_route(route.method, &path, dispatcher.into_handler())?;
        }

        if self.config.docs_enabled {
            let document: Value = serde_json::from_slice(&self.openapi()?)?;
            let handler: RouteHandler =
                Arc::new(move |ctx: &mut dyn MuxContext| ctx.json(200, &document));
            mux.bind_route(HttpMethod::Get, &self.config.openapi_url, handler)?;
        }

        info!("Mounted {} routes", self.routes.len());
        Ok(())
    }

    /// Initialize if needed, mount on `mux` and start listening on `addr`.
    pub fn serve(&mut self, mux: &mut dyn Mux, addr: &str) -> Result<()> {
        if !self.is_initialized() {
            self.init()?;
        }
        self.mount(mux)?;
        info!("Listening on {}", addr);
        mux.listen(addr)
    }

    /// Cancel the root token; every in-flight request observes the cancellation.
    pub fn shutdown(&self) {
        if self.root.cancel() {
            info!("Shutting down {}", self.config.title);
        }
    }

    /// [`shutdown`](Self::shutdown), then stop `mux` within the configured timeout.
    pub fn shutdown_mux(&self, mux: &mut dyn Mux) -> Result<()> {
        self.shutdown();
        mux.shutdown_with_timeout(Duration::from_secs(self.config.shutdown_timeout_secs))
    }

    pub fn root_token(&self) -> &CancelToken {
        &self.root
    }

    /// Contexts idle in the pool
    pub fn idle_contexts(&self) -> usize {
        self.pool.idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use crate::mux::memory::{MemoryMux, MemoryRequest};
    use crate::reflect::{Model, TypeShape};
    use crate::scanner::MethodDescriptor;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Memo {
        text: String,
    }

    impl Model for Memo {
        fn shape() -> TypeShape {
            TypeShape::named("memo", "Memo").field::<String>("Text", r#"json:"text" validate:"required""#)
        }
    }

    #[derive(Serialize)]
    struct Problem {
        reason: String,
    }

    impl Model for Problem {
        fn shape() -> TypeShape {
            TypeShape::named("memo", "Problem").field::<String>("Reason", r#"json:"reason""#)
        }
    }

    fn get_memo(_ctx: &mut Context) -> std::result::Result<Memo, HandlerError> {
        Ok(Memo {
            text: "hello".to_string(),
        })
    }

    fn post_memo(_ctx: &mut Context, memo: Memo) -> std::result::Result<usize, HandlerError> {
        if memo.text == "boom" {
            return Err(HandlerError::with_status(409, "conflict"));
        }
        Ok(memo.text.len())
    }

    struct Memos;

    impl GroupRouter for Memos {
        fn prefix(&self) -> &str {
            "/group"
        }

        fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
            vec![
                MethodDescriptor::new("GetMemo", get_memo),
                MethodDescriptor::new("PostMemo", post_memo),
            ]
        }
    }

    fn app() -> App {
        let mut app = App::new(AppConfig::default());
        app.include_router(Router::new("/memo").get("/", get_memo).post("/", post_memo));
        app
    }

    #[test]
    fn test_uninitialized() {
        let app = app();
        assert!(matches!(app.openapi(), Err(Error::NotInitialized)));
        assert!(matches!(app.mount(&mut MemoryMux::new()), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_init_and_mount() {
        let mut app = app();
        app.init().unwrap();
        assert_eq!(app.routes().len(), 2);

        let mut mux = MemoryMux::new();
        app.mount(&mut mux).unwrap();
        assert_eq!(mux.routes().len(), 3);

        let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/memo").json(&json!({"text": "abc"})));
        assert_eq!(response.status, 200);
        assert_eq!(response.json().unwrap(), json!(3));

        let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/memo").json(&json!({})));
        assert_eq!(response.status, 422);
        assert_eq!(response.json().unwrap()["detail"][0]["loc"], json!(["body", "text"]));
    }

    #[test]
    fn test_openapi_endpoint() {
        let mut app = app();
        app.init().unwrap();
        let mut mux = MemoryMux::new();
        app.mount(&mut mux).unwrap();

        let response = mux.handle(MemoryRequest::new(HttpMethod::Get, "/openapi.json"));
        assert_eq!(response.status, 200);
        let document = response.json().unwrap();
        assert_eq!(document["info"]["title"], json!("FastApi Reflect"));
        assert!(document["paths"]["/memo"]["post"]["responses"]["422"].is_object());
        assert!(document["components"]["schemas"]["memo.Memo"].is_object());
    }

    #[test]
    fn test_docs_disabled() {
        let config = AppConfig {
            docs_enabled: false,
            ..AppConfig::default()
        };
        let mut app = App::new(config);
        app.include_router(Router::new("/memo").get("/", get_memo));
        app.init().unwrap();

        let mut mux = MemoryMux::new();
        app.mount(&mut mux).unwrap();
        assert_eq!(mux.routes().len(), 1);
        assert_eq!(mux.handle(MemoryRequest::new(HttpMethod::Get, "/openapi.json")).status, 404);
    }

    #[test]
    fn test_duplicate_route() {
        let mut app = app();
        app.include_router(Router::new("/").get("/memo", get_memo));
        let err = app.init().unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute(ref id) if id == "GET|/memo"));
    }

    #[test]
    fn test_duplicate_route_after_normalizing() {
        let mut app = App::new(AppConfig::default());
        app.include_router(Router::new("/x").get("/items/?a", get_memo).get("/items/?b", get_memo));
        let err = app.init().unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute(ref id) if id == "GET|/x/items/?b"));

        let mut app = App::new(AppConfig::default());
        app.include_router(Router::new("/x").get("/u/:id", get_memo).get("/u/:no", get_memo));
        let err = app.init().unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute(ref id) if id == "GET|/x/u/:no"));

        let mut app = App::new(AppConfig::default());
        app.include_router(Router::new("/x").get("/u/:id", get_memo).get("/u/me", get_memo));
        app.init().unwrap();
        assert_eq!(app.routes().len(), 2);
    }

    #[test]
    fn test_include_group() {
        let mut app = App::new(AppConfig::default());
        app.include_group(Arc::new(Memos)).unwrap();
        app.init().unwrap();

        let ids: Vec<String> = app.routes().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["GET|/group/memo", "POST|/group/memo"]);
        assert_eq!(app.routes()[0].tags, vec!["Memos"]);
    }

    #[test]
    fn test_error_responder_and_hooks() {
        let mut app = app();
        app.set_error_responder(ErrorResponder::new(|err: &HandlerError| {
            (
                err.status,
                Problem {
                    reason: err.message.clone(),
                },
            )
        }));
        app.use_before_write(|ctx: &mut Context| ctx.set_header("X-Served-By", "memo"));
        app.init().unwrap();

        let document = app.document().unwrap();
        assert!(document.components.schemas.contains_key("memo.Problem"));

        let mut mux = MemoryMux::new();
        app.mount(&mut mux).unwrap();
        let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/memo").json(&json!({"text": "boom"})));
        assert_eq!(response.status, 409);
        assert_eq!(response.json().unwrap(), json!({"reason": "conflict"}));
        assert_eq!(response.header("x-served-by"), Some("memo"));
    }

    #[test]
    fn test_shutdown() {
        let mut app = app();
        app.init().unwrap();
        let mut mux = MemoryMux::new();
        app.mount(&mut mux).unwrap();

        app.shutdown_mux(&mut mux).unwrap();
        assert!(app.root_token().is_cancelled());
        assert!(mux.is_closed());
        assert_eq!(mux.handle(MemoryRequest::new(HttpMethod::Get, "/memo")).status, 503);
    }
}
