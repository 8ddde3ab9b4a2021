//! Per-request state.
//!
//! A [`Context`] is taken from a [`ContextPool`] when a request enters the
//! dispatcher and handed back once the response is written. The pool guard clears
//! every field on release, so nothing from one request can leak into the next.

use crate::handler::UploadedFile;
use crate::reflect::{Marker, Model, TypeShape};
use log::trace;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared key/value storage of one request
pub type Bag = Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>;

/// Progress of a request through the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DispatchState {
    Acquired,
    PathBound,
    QueryBound,
    BodyValidated,
    HandlerInvoked,
    ResponseValidated,
    Written,
    /// Back in the pool
    #[default]
    Released,
}

struct CancelInner {
    cancelled: AtomicBool,
    parent: Option<CancelToken>,
}

/// Cooperative cancellation signal.
///
/// A child observes the cancellation of any ancestor; cancelling a child leaves the
/// parent untouched.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Returns `true` for the call that actually cancelled the token.
    pub fn cancel(&self) -> bool {
        !self.inner.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .map_or(false, CancelToken::is_cancelled)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels its token when dropped, including during unwinding
pub struct CancelGuard(Option<CancelToken>);

impl CancelGuard {
    pub fn new(token: CancelToken) -> Self {
        Self(Some(token))
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }
}

/// Snapshot of the inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// Request-scoped state threaded through the dispatcher and into handlers
#[derive(Default)]
pub struct Context {
    state: DispatchState,
    route_id: String,
    request: RequestInfo,
    path_fields: HashMap<String, String>,
    query_fields: HashMap<String, Value>,
    struct_query: Option<Value>,
    body: Option<Value>,
    file: Option<UploadedFile>,
    response: Option<Value>,
    status: u16,
    response_headers: Vec<(String, String)>,
    cancel: Option<CancelToken>,
    bag: Bag,
}

impl Context {
    pub(crate) fn begin(&mut self, route_id: &str, request: RequestInfo, cancel: CancelToken) {
        self.route_id = route_id.to_string();
        self.request = request;
        self.cancel = Some(cancel);
        self.status = 200;
        self.advance(DispatchState::Acquired);
    }

    pub(crate) fn advance(&mut self, state: DispatchState) {
        trace!("{} {:?} -> {:?}", self.route_id, self.state, state);
        self.state = state;
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn path_field(&self, name: &str) -> Option<&str> {
        self.path_fields.get(name).map(String::as_str)
    }

    pub fn path_fields(&self) -> &HashMap<String, String> {
        &self.path_fields
    }

    pub(crate) fn set_path_field(&mut self, name: &str, value: String) {
        self.path_fields.insert(name.to_string(), value);
    }

    /// Decoded value of a query field
    pub fn query_field(&self, name: &str) -> Option<&Value> {
        self.query_fields.get(name)
    }

    /// Query field converted to `T`; `None` when absent or of another type.
    pub fn query_value<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.query_fields
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn query_fields(&self) -> &HashMap<String, Value> {
        &self.query_fields
    }

    pub(crate) fn set_query_field(&mut self, name: &str, value: Value) {
        self.query_fields.insert(name.to_string(), value);
    }

    pub fn struct_query(&self) -> Option<&Value> {
        self.struct_query.as_ref()
    }

    pub(crate) fn set_struct_query(&mut self, value: Value) {
        self.struct_query = Some(value);
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub(crate) fn set_body(&mut self, value: Value) {
        self.body = Some(value);
    }

    pub fn file(&self) -> Option<&UploadedFile> {
        self.file.as_ref()
    }

    pub(crate) fn set_file(&mut self, file: UploadedFile) {
        self.file = Some(file);
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub(crate) fn set_response(&mut self, value: Value) {
        self.response = Some(value);
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.response_headers
            .push((key.to_string(), value.to_string()));
    }

    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }

    /// Token cancelled once the response has been written
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone().unwrap_or_default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelToken::is_cancelled)
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.bag.write().insert(key.to_string(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.bag.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Handle to the key/value bag for work that outlives the handler call
    pub fn bag(&self) -> Bag {
        Arc::clone(&self.bag)
    }

    /// Clear every field before the context goes back to the pool.
    pub fn reset(&mut self) {
        self.route_id.clear();
        self.request = RequestInfo::default();
        self.path_fields.clear();
        self.query_fields.clear();
        self.struct_query = None;
        self.body = None;
        self.file = None;
        self.response = None;
        self.status = 0;
        self.response_headers.clear();
        self.cancel = None;
        // the old bag may still be held by background work
        self.bag = Bag::default();
        self.state = DispatchState::Released;
    }
}

impl Model for Context {
    fn shape() -> TypeShape {
        TypeShape::named("fastapi_reflect", "Context").with_marker(Marker::Context)
    }
}

/// Reusable request contexts
#[derive(Default)]
pub struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
}

impl ContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> PooledContext<'_> {
        let ctx = self.free.lock().pop().unwrap_or_default();
        PooledContext {
            ctx: Some(ctx),
            pool: self,
        }
    }

    /// Contexts waiting to be reused
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// A context on loan from a [`ContextPool`]; reset and returned on drop
pub struct PooledContext<'a> {
    ctx: Option<Box<Context>>,
    pool: &'a ContextPool,
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.reset();
            self.pool.free.lock().push(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_parent_chain() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(grandchild.cancel());
        assert!(!grandchild.cancel());
        assert!(!child.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
        assert!(root.child().is_cancelled());
    }

    #[test]
    fn test_cancel_guard_fires_on_drop() {
        let token = CancelToken::new();
        {
            let _guard = CancelGuard::new(token.clone());
            assert!(!token.is_cancelled());
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_guard_fires_on_panic() {
        let token = CancelToken::new();
        let inner = token.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = CancelGuard::new(inner);
            panic!("handler failed");
        });
        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_bag_roundtrip() {
        let ctx = Context::default();
        ctx.set("user", "alice".to_string());
        ctx.set("count", 3_u32);

        assert_eq!(ctx.get::<String>("user").as_deref().map(String::as_str), Some("alice"));
        assert_eq!(ctx.get::<u32>("count").map(|v| *v), Some(3));
        assert!(ctx.get::<i64>("count").is_none());
        assert!(ctx.get::<String>("missing").is_none());
    }

    #[test]
    fn test_bag_shared_with_background_work() {
        let ctx = Context::default();
        let bag = ctx.bag();
        std::thread::spawn(move || {
            bag.write().insert("done".to_string(), Arc::new(true));
        })
        .join()
        .unwrap();
        assert_eq!(ctx.get::<bool>("done").map(|v| *v), Some(true));
    }

    #[test]
    fn test_pool_resets_on_release() {
        let pool = ContextPool::new();
        {
            let mut ctx = pool.acquire();
            ctx.begin("GET|/x", RequestInfo::default(), CancelToken::new());
            ctx.set_path_field("id", "7".to_string());
            ctx.set_query_field("q", Value::from(1));
            ctx.set_body(Value::from("body"));
            ctx.set_response(Value::from("out"));
            ctx.set_header("x-a", "b");
            ctx.set("k", 1_i32);
            assert_eq!(ctx.state(), DispatchState::Acquired);
        }
        assert_eq!(pool.idle(), 1);

        let ctx = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert_eq!(ctx.state(), DispatchState::Released);
        assert!(ctx.path_field("id").is_none());
        assert!(ctx.query_field("q").is_none());
        assert!(ctx.body().is_none());
        assert!(ctx.response().is_none());
        assert!(ctx.response_headers().is_empty());
        assert!(ctx.get::<i32>("k").is_none());
        assert_eq!(ctx.route_id(), "");
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let mut ctx = Context::default();
        ctx.begin(
            "POST|/x",
            RequestInfo {
                method: "POST".to_string(),
                path: "/x".to_string(),
                headers,
            },
            CancelToken::new(),
        );
        assert_eq!(ctx.header("content-type"), Some("application/json"));
        assert_eq!(ctx.status(), 200);
    }
}
