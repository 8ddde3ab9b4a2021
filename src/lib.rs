//! FastAPI Reflect - typed HTTP handlers with request validation and OpenAPI
//! documentation derived from the handlers' own types.
//!
//! Models describe their shape once through the [`reflect::Model`] trait. From that
//! description the framework builds schema metadata, classifies every handler
//! argument as a path, query, body or file parameter, validates traffic in both
//! directions and renders an OpenAPI 3 document.
//!
//! # Architecture
//!
//! 1. [`reflect`] and [`tags`] - type shapes and field annotations
//! 2. [`metadata`] - the schema metadata arena, keyed by type identity
//! 3. [`scanner`] and [`router`] - routes from method-name conventions or explicit registration
//! 4. [`classifier`] - parameter roles inferred from a handler signature
//! 5. [`binder`] and [`validation`] - decoding, validation and 422 error bodies
//! 6. [`schema_generator`], [`openapi_builder`] and [`serializer`] - the OpenAPI document
//! 7. [`context`] and [`dispatcher`] - the per-request pipeline
//! 8. [`mux`] - the contract with the HTTP engine
//! 9. [`app`] - wiring it all together
//!
//! # Example Usage
//!
//! ```
//! use fastapi_reflect::prelude::*;
//! use fastapi_reflect::mux::memory::{MemoryMux, MemoryRequest};
//! use fastapi_reflect::route::HttpMethod;
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greeting {
//!     name: String,
//! }
//!
//! impl Model for Greeting {
//!     fn shape() -> TypeShape {
//!         TypeShape::named("demo", "Greeting")
//!             .field::<String>("Name", r#"json:"name" validate:"required""#)
//!     }
//! }
//!
//! fn greet(_ctx: &mut Context, greeting: Greeting) -> Result<String, HandlerError> {
//!     Ok(format!("hello {}", greeting.name))
//! }
//!
//! let mut app = App::new(AppConfig::default());
//! app.include_router(Router::new("/demo").post("/greet", greet));
//! app.init().unwrap();
//!
//! let mut mux = MemoryMux::new();
//! app.mount(&mut mux).unwrap();
//!
//! let ok = mux.handle(MemoryRequest::new(HttpMethod::Post, "/demo/greet").json(&json!({"name": "ann"})));
//! assert_eq!(ok.json().unwrap(), json!("hello ann"));
//!
//! let invalid = mux.handle(MemoryRequest::new(HttpMethod::Post, "/demo/greet").json(&json!({})));
//! assert_eq!(invalid.status, 422);
//! ```

pub mod app;
pub mod binder;
pub mod classifier;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod mux;
pub mod openapi_builder;
pub mod path_schema;
pub mod reflect;
pub mod route;
pub mod router;
pub mod scanner;
pub mod schema_generator;
pub mod serializer;
pub mod tags;
pub mod validation;

/// The types most applications need.
pub mod prelude {
    pub use crate::app::App;
    pub use crate::config::{init_logging, AppConfig};
    pub use crate::context::Context;
    pub use crate::dispatcher::ErrorResponder;
    pub use crate::handler::{HandlerError, UploadedFile};
    pub use crate::path_schema::PathSchemaKind;
    pub use crate::reflect::{Model, TypeShape};
    pub use crate::router::{RouteSpec, Router};
    pub use crate::scanner::{GroupRouter, MethodDescriptor};
}

pub use app::App;
pub use error::{Error, Result};
