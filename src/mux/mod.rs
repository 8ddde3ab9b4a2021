//! Contract between the framework and the HTTP engine serving it.
//!
//! An adapter implements [`Mux`] for its server and [`MuxContext`] for its
//! per-request handle. [`memory::MemoryMux`] is an in-process adapter that needs no
//! network and is used by the test suite.

pub mod memory;

use crate::error::Result;
use crate::handler::UploadedFile;
use crate::route::HttpMethod;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// Callback bound to a method and path
pub type RouteHandler = Arc<dyn Fn(&mut dyn MuxContext) -> Result<()> + Send + Sync>;

/// One request as seen by the framework
pub trait MuxContext {
    fn method(&self) -> &str;

    fn path(&self) -> &str;

    fn query(&self, key: &str) -> Option<String>;

    fn query_or(&self, key: &str, fallback: &str) -> String {
        self.query(key).unwrap_or_else(|| fallback.to_string())
    }

    /// Path parameter bound by the route template
    fn params(&self, key: &str) -> Option<String>;

    fn params_or(&self, key: &str, fallback: &str) -> String {
        self.params(key).unwrap_or_else(|| fallback.to_string())
    }

    fn get_header(&self, key: &str) -> Option<String>;

    fn headers(&self) -> HashMap<String, String>;

    /// Raw request body; for multipart requests, the JSON part
    fn body(&self) -> &[u8];

    /// File part of a multipart request
    fn file(&self) -> Option<UploadedFile>;

    fn status(&mut self, code: u16);

    fn json(&mut self, code: u16, value: &Value) -> Result<()>;

    fn send_string(&mut self, body: &str) -> Result<()>;

    fn send_stream(&mut self, reader: &mut dyn Read, size: Option<usize>) -> Result<()>;

    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Set a response header
    fn header(&mut self, key: &str, value: &str);

    fn cookie(&self, name: &str) -> Option<String>;

    fn set_cookie(&mut self, name: &str, value: &str);

    fn redirect(&mut self, location: &str, code: u16) -> Result<()>;
}

/// An HTTP engine routes are mounted on
pub trait Mux: Send {
    fn bind_route(&mut self, method: HttpMethod, path: &str, handler: RouteHandler) -> Result<()>;

    fn listen(&mut self, addr: &str) -> Result<()>;

    fn shutdown_with_timeout(&mut self, timeout: Duration) -> Result<()>;
}
