//! Runs one request through its route.
//!
//! The pipeline moves a pooled [`Context`] through the states of
//! [`DispatchState`]:
//!
//! ```text
//! Acquired -> PathBound -> QueryBound -> BodyValidated -> HandlerInvoked
//!          -> ResponseValidated -> Written -> Released
//! ```
//!
//! A failed check skips straight to `Written` with a 422 response and the handler
//! is never called. The request's cancellation token fires at `Written` whichever
//! way it was reached.

use crate::context::{CancelGuard, CancelToken, Context, ContextPool, DispatchState, RequestInfo};
use crate::error::Result;
use crate::handler::{CallError, HandlerError};
use crate::mux::{MuxContext, RouteHandler};
use crate::reflect::{Model, TypeShape};
use crate::route::{ParamBinding, Route};
use crate::validation::{HttpValidationError, ValidationError, VALIDATION_STATUS};
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Hook run on the context right before the response is written
pub type BeforeWrite = Arc<dyn Fn(&mut Context) + Send + Sync>;

type Render = Arc<dyn Fn(&HandlerError) -> (u16, Value) + Send + Sync>;

/// Application-wide rendering of handler errors, with the schema it produces
#[derive(Clone)]
pub struct ErrorResponder {
    pub shape: TypeShape,
    render: Render,
}

impl ErrorResponder {
    pub fn new<T, F>(render: F) -> Self
    where
        T: Model + Serialize,
        F: Fn(&HandlerError) -> (u16, T) + Send + Sync + 'static,
    {
        Self {
            shape: T::shape(),
            render: Arc::new(move |err| {
                let (status, body) = render(err);
                let body = serde_json::to_value(body).unwrap_or_else(|e| json!({ "detail": e.to_string() }));
                (status, body)
            }),
        }
    }

    pub fn respond(&self, err: &HandlerError) -> (u16, Value) {
        (self.render)(err)
    }
}

impl std::fmt::Debug for ErrorResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ErrorResponder")
            .field("shape", &self.shape.identity())
            .finish()
    }
}

/// Settings shared by the dispatchers of one application
#[derive(Clone, Default)]
pub struct DispatchOptions {
    pub validate_response: bool,
    pub error_responder: Option<ErrorResponder>,
    pub before_write: Vec<BeforeWrite>,
}

struct Reply {
    status: u16,
    body: Value,
}

impl Reply {
    fn invalid(errors: Vec<ValidationError>) -> Self {
        Self {
            status: VALIDATION_STATUS,
            body: HttpValidationError::new(errors).to_value(),
        }
    }

    fn detail(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "detail": message }),
        }
    }
}

/// Request pipeline of one route
pub struct Dispatcher {
    route: Arc<Route>,
    pool: Arc<ContextPool>,
    root: CancelToken,
    options: Arc<DispatchOptions>,
}

impl Dispatcher {
    pub fn new(
        route: Arc<Route>,
        pool: Arc<ContextPool>,
        root: CancelToken,
        options: Arc<DispatchOptions>,
    ) -> Self {
        Self {
            route,
            pool,
            root,
            options,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Wrap the dispatcher into a mux callback.
    pub fn into_handler(self) -> RouteHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |mux: &mut dyn MuxContext| dispatcher.dispatch(mux))
    }

    /// Serve one request end to end.
    pub fn dispatch(&self, mux: &mut dyn MuxContext) -> Result<()> {
        let mut ctx = self.pool.acquire();
        let token = self.root.child();
        let guard = CancelGuard::new(token.clone());

        let request = RequestInfo {
            method: mux.method().to_string(),
            path: mux.path().to_string(),
            headers: mux.headers(),
        };
        ctx.begin(&self.route.id(), request, token);

        let reply = self.run(&mut ctx, mux);
        ctx.set_status(reply.status);
        ctx.set_response(reply.body);
        for hook in &self.options.before_write {
            hook(&mut ctx);
        }

        for (key, value) in ctx.response_headers() {
            mux.header(key, value);
        }
        let body = ctx.response().cloned().unwrap_or(Value::Null);
        let written = mux.json(ctx.status(), &body);

        debug!("{} {} -> {}", ctx.request().method, ctx.request().path, ctx.status());
        ctx.advance(DispatchState::Written);
        drop(guard);
        written
    }

    fn run(&self, ctx: &mut Context, mux: &dyn MuxContext) -> Reply {
        if let Err(errors) = self.bind_path(ctx, mux) {
            return Reply::invalid(errors);
        }
        ctx.advance(DispatchState::PathBound);

        if let Err(errors) = self.bind_query(ctx, mux) {
            return Reply::invalid(errors);
        }
        ctx.advance(DispatchState::QueryBound);

        if let Err(errors) = self.bind_body(ctx, mux) {
            return Reply::invalid(errors);
        }
        ctx.advance(DispatchState::BodyValidated);

        let args = self.arguments(ctx);
        let handler = Arc::clone(&self.route.handler);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.call(ctx, args)));
        ctx.advance(DispatchState::HandlerInvoked);

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => return self.call_failed(err),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!("Handler of {} panicked: {}", self.route.id(), message);
                return Reply::detail(500, "Internal Server Error");
            }
        };

        if self.options.validate_response && !(value.is_null() && self.route.response.shape.is_pointer()) {
            if let Err(errors) = self.route.response_binder.validate(&value) {
                error!("Response of {} failed validation: {:?}", self.route.id(), errors);
                return Reply {
                    status: 500,
                    body: HttpValidationError::new(errors).to_value(),
                };
            }
        }
        ctx.advance(DispatchState::ResponseValidated);

        Reply {
            status: ctx.status(),
            body: value,
        }
    }

    fn bind_path(&self, ctx: &mut Context, mux: &dyn MuxContext) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        for field in &self.route.path_fields {
            match mux.params(&field.name) {
                Some(value) if !value.is_empty() => ctx.set_path_field(&field.name, value),
                _ if field.required => errors.push(ValidationError::missing(&["path", field.name.as_str()])),
                _ => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn bind_query(&self, ctx: &mut Context, mux: &dyn MuxContext) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        for field in &self.route.query_fields {
            let binder = match self.route.query_binders.get(&field.name) {
                Some(binder) => binder,
                None => continue,
            };
            match mux.query(&field.name) {
                Some(raw) => {
                    let checked = binder
                        .unmarshal(raw.as_bytes())
                        .and_then(|value| binder.validate(&value).map(|_| value));
                    match checked {
                        Ok(value) => ctx.set_query_field(&field.name, value),
                        Err(mut errs) => errors.append(&mut errs),
                    }
                }
                None if field.required => {
                    errors.push(ValidationError::missing(&["query", field.name.as_str()]))
                }
                None => {}
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        for binding in &self.route.bindings {
            if let ParamBinding::StructQuery(pairs) = binding {
                let value = self.struct_query(ctx, pairs);
                ctx.set_struct_query(value);
            }
        }
        Ok(())
    }

    /// Object assembled from query fields, keyed by serialized field name.
    fn struct_query(&self, ctx: &Context, pairs: &[(String, String)]) -> Value {
        let mut object = Map::new();
        for (query, json_name) in pairs {
            let value = match ctx.query_field(query) {
                Some(value) => value.clone(),
                None => self.absent_query(query),
            };
            object.insert(json_name.clone(), value);
        }
        Value::Object(object)
    }

    /// Value handed to the handler for a query field that was not sent.
    fn absent_query(&self, name: &str) -> Value {
        let field = self.route.query_fields.iter().find(|q| q.name == name);
        if field.map_or(false, |q| q.shape.is_pointer()) {
            return Value::Null;
        }
        self.route
            .query_binders
            .get(name)
            .map_or(Value::Null, |binder| binder.new_value())
    }

    fn bind_body(&self, ctx: &mut Context, mux: &dyn MuxContext) -> std::result::Result<(), Vec<ValidationError>> {
        if self.route.has_file() {
            match mux.file() {
                Some(file) => ctx.set_file(file),
                None => return Err(vec![ValidationError::missing(&["body", "file"])]),
            }
        }

        let request = match &self.route.request {
            Some(request) => request,
            None => return Ok(()),
        };

        let raw = mux.body();
        if raw.iter().all(u8::is_ascii_whitespace) && request.shape.is_pointer() {
            ctx.set_body(Value::Null);
            return Ok(());
        }

        let value = self.route.request_binder.unmarshal(raw)?;
        self.route.request_binder.validate(&value)?;
        ctx.set_body(value);
        Ok(())
    }

    fn arguments(&self, ctx: &Context) -> Vec<Value> {
        self.route
            .bindings
            .iter()
            .map(|binding| match binding {
                ParamBinding::Query(name) => ctx
                    .query_field(name)
                    .cloned()
                    .unwrap_or_else(|| self.absent_query(name)),
                ParamBinding::StructQuery(pairs) => self.struct_query(ctx, pairs),
                ParamBinding::Body => ctx.body().cloned().unwrap_or(Value::Null),
                ParamBinding::File => ctx
                    .file()
                    .and_then(|file| serde_json::to_value(file).ok())
                    .unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Location of argument `index` in error reports
    fn argument_loc(&self, index: usize) -> Vec<String> {
        match self.route.bindings.get(index) {
            Some(ParamBinding::Query(name)) => vec!["query".to_string(), name.clone()],
            Some(ParamBinding::StructQuery(_)) => vec!["query".to_string()],
            Some(ParamBinding::File) => vec!["body".to_string(), "file".to_string()],
            _ => vec!["body".to_string()],
        }
    }

    fn call_failed(&self, err: CallError) -> Reply {
        match err {
            CallError::Argument { index, path, source } => {
                warn!("{} argument {} rejected: {}", self.route.id(), index, source);
                let mut error = ValidationError::from_json_error("body", &source);
                error.loc = self.argument_loc(index);
                error.loc.extend(path);
                Reply::invalid(vec![error])
            }
            CallError::Handler(err) => match &self.options.error_responder {
                Some(responder) => {
                    let (status, body) = responder.respond(&err);
                    Reply { status, body }
                }
                None => Reply::detail(err.status, &err.message),
            },
            other => {
                error!("{} failed: {}", self.route.id(), other);
                Reply::detail(500, "Internal Server Error")
            }
        }
    }
}
