//! In-process [`Mux`] that serves requests handed to it directly.
//!
//! ```
//! use fastapi_reflect::mux::memory::{MemoryMux, MemoryRequest};
//! use fastapi_reflect::mux::{Mux, MuxContext};
//! use fastapi_reflect::route::HttpMethod;
//! use std::sync::Arc;
//!
//! let mut mux = MemoryMux::new();
//! mux.bind_route(
//!     HttpMethod::Get,
//!     "/hello/:name",
//!     Arc::new(|ctx: &mut dyn MuxContext| {
//!         let name = ctx.params_or("name", "world");
//!         ctx.send_string(&format!("hello {}", name))
//!     }),
//! )
//! .unwrap();
//!
//! let response = mux.handle(MemoryRequest::new(HttpMethod::Get, "/hello/alice"));
//! assert_eq!(response.status, 200);
//! assert_eq!(response.text(), "hello alice");
//! ```

use super::{Mux, MuxContext, RouteHandler};
use crate::error::{Error, Result};
use crate::handler::UploadedFile;
use crate::route::HttpMethod;
use log::{debug, error, info};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
}

fn parse_pattern(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix(':') {
            Some(name) => match name.strip_suffix('?') {
                Some(name) => Segment::Param {
                    name: name.to_string(),
                    optional: true,
                },
                None => Segment::Param {
                    name: name.to_string(),
                    optional: false,
                },
            },
            None => Segment::Literal(s.to_string()),
        })
        .collect()
}

/// Match `path` against `pattern`, returning the bound parameters.
fn match_segments(pattern: &[Segment], path: &str) -> Option<HashMap<String, String>> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut params = HashMap::new();

    for (i, segment) in pattern.iter().enumerate() {
        match (segment, parts.get(i)) {
            (Segment::Literal(literal), Some(part)) if literal == part => {}
            (Segment::Literal(_), _) => return None,
            (Segment::Param { name, .. }, Some(part)) => {
                params.insert(name.clone(), decode_segment(part));
            }
            (Segment::Param { optional: true, .. }, None) => {}
            (Segment::Param { optional: false, .. }, None) => return None,
        }
    }

    if parts.len() > pattern.len() {
        return None;
    }
    Some(params)
}

/// Percent-decode a path segment. `+` is literal in paths.
fn decode_segment(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    form_urlencoded::parse(raw.as_bytes()).into_owned().collect()
}

/// A request handed to [`MemoryMux::handle`]
#[derive(Debug, Clone)]
pub struct MemoryRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Vec<u8>,
    pub file: Option<UploadedFile>,
}

impl MemoryRequest {
    /// `target` may carry a query string, e.g. `/users?page=2`.
    pub fn new(method: HttpMethod, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            body: Vec::new(),
            file: None,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(self, value: &Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string())
    }

    pub fn file(mut self, file: UploadedFile) -> Self {
        self.file = Some(file);
        self.header("Content-Type", "multipart/form-data")
    }
}

/// What a handler wrote
#[derive(Debug, Clone, Default)]
pub struct MemoryResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MemoryResponse {
    fn with_detail(status: u16, detail: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: json!({ "detail": detail }).to_string().into_bytes(),
        }
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn set_header(&mut self, key: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        self.headers.push((key.to_string(), value.to_string()));
    }
}

struct MemoryContext {
    request: MemoryRequest,
    method: String,
    params: HashMap<String, String>,
    response: MemoryResponse,
}

impl MuxContext for MemoryContext {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.request.path
    }

    fn query(&self, key: &str) -> Option<String> {
        self.request.query.get(key).cloned()
    }

    fn params(&self, key: &str) -> Option<String> {
        self.params.get(key).cloned()
    }

    fn get_header(&self, key: &str) -> Option<String> {
        self.request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    }

    fn headers(&self) -> HashMap<String, String> {
        self.request.headers.clone()
    }

    fn body(&self) -> &[u8] {
        &self.request.body
    }

    fn file(&self) -> Option<UploadedFile> {
        self.request.file.clone()
    }

    fn status(&mut self, code: u16) {
        self.response.status = code;
    }

    fn json(&mut self, code: u16, value: &Value) -> Result<()> {
        self.response.body = serde_json::to_vec(value)?;
        self.response.status = code;
        self.response.set_header("Content-Type", "application/json");
        Ok(())
    }

    fn send_string(&mut self, body: &str) -> Result<()> {
        self.response.body = body.as_bytes().to_vec();
        self.response.set_header("Content-Type", "text/plain; charset=utf-8");
        Ok(())
    }

    fn send_stream(&mut self, reader: &mut dyn Read, size: Option<usize>) -> Result<()> {
        let mut body = Vec::new();
        match size {
            Some(size) => {
                reader.take(size as u64).read_to_end(&mut body)?;
            }
            None => {
                reader.read_to_end(&mut body)?;
            }
        }
        self.response.body = body;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.response.body.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn header(&mut self, key: &str, value: &str) {
        self.response.set_header(key, value);
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.request.cookies.get(name).cloned()
    }

    fn set_cookie(&mut self, name: &str, value: &str) {
        self.response
            .headers
            .push(("Set-Cookie".to_string(), format!("{}={}", name, value)));
    }

    fn redirect(&mut self, location: &str, code: u16) -> Result<()> {
        self.response.status = code;
        self.response.set_header("Location", location);
        Ok(())
    }
}

struct Binding {
    method: HttpMethod,
    path: String,
    segments: Vec<Segment>,
    handler: RouteHandler,
}

/// Mux that dispatches [`MemoryRequest`]s without a network listener
#[derive(Default)]
pub struct MemoryMux {
    bindings: Vec<Binding>,
    addr: Option<String>,
    closed: bool,
}

impl MemoryMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound `(method, path)` pairs in binding order
    pub fn routes(&self) -> Vec<(HttpMethod, String)> {
        self.bindings
            .iter()
            .map(|b| (b.method, b.path.clone()))
            .collect()
    }

    pub fn address(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Serve one request.
    pub fn handle(&self, request: MemoryRequest) -> MemoryResponse {
        if self.closed {
            return MemoryResponse::with_detail(503, "Service Unavailable");
        }

        let mut path_matched = false;
        let mut found = None;
        for binding in &self.bindings {
            if let Some(params) = match_segments(&binding.segments, &request.path) {
                path_matched = true;
                if binding.method == request.method {
                    found = Some((binding, params));
                    break;
                }
            }
        }

        let (binding, params) = match found {
            Some(found) => found,
            None if path_matched => return MemoryResponse::with_detail(405, "Method Not Allowed"),
            None => return MemoryResponse::with_detail(404, "Not Found"),
        };

        let mut ctx = MemoryContext {
            method: request.method.as_str().to_string(),
            request,
            params,
            response: MemoryResponse {
                status: 200,
                ..MemoryResponse::default()
            },
        };

        match (binding.handler)(&mut ctx) {
            Ok(()) => ctx.response,
            Err(err) => {
                error!("{} {} failed: {}", binding.method, binding.path, err);
                MemoryResponse::with_detail(500, &err.to_string())
            }
        }
    }
}

impl Mux for MemoryMux {
    fn bind_route(&mut self, method: HttpMethod, path: &str, handler: RouteHandler) -> Result<()> {
        if self
            .bindings
            .iter()
            .any(|b| b.method == method && b.path == path)
        {
            return Err(Error::MuxError(format!("{} {} is already bound", method, path)));
        }
        debug!("Binding {} {}", method, path);
        self.bindings.push(Binding {
            method,
            path: path.to_string(),
            segments: parse_pattern(path),
            handler,
        });
        Ok(())
    }

    fn listen(&mut self, addr: &str) -> Result<()> {
        if self.closed {
            return Err(Error::MuxError("mux has been shut down".to_string()));
        }
        info!("Serving {} routes in memory as {}", self.bindings.len(), addr);
        self.addr = Some(addr.to_string());
        Ok(())
    }

    fn shutdown_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        debug!("Shutting down memory mux (timeout {:?})", timeout);
        self.closed = true;
        Ok(())
    }
}
