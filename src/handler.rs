//! Typed request handlers.
//!
//! Any function or closure `Fn(&mut Context, A1, .., An) -> Result<R, HandlerError>`
//! with up to four arguments is a [`Handler`]. Argument types are deserialized from
//! JSON values assembled by the dispatcher; the return value is serialized back.
//!
//! ```
//! use fastapi_reflect::context::Context;
//! use fastapi_reflect::handler::{erase, HandlerError};
//!
//! fn get_greeting(_ctx: &mut Context, name: String) -> Result<String, HandlerError> {
//!     Ok(format!("hello {}", name))
//! }
//!
//! let handler = erase(get_greeting);
//! assert_eq!(handler.signature().inputs.len(), 2);
//! ```

use crate::context::Context;
use crate::reflect::{Marker, Model, TypeShape};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_path_to_error::Segment;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Status used for handler errors that do not pick one
pub const DEFAULT_ERROR_STATUS: u16 = 500;

/// Error returned by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub status: u16,
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: DEFAULT_ERROR_STATUS,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::new(format!("{:#}", err))
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl Model for HandlerError {
    fn shape() -> TypeShape {
        TypeShape::named("", "error").with_marker(Marker::Error)
    }
}

/// A file received in a multipart request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: &str, content_type: &str, content: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            content,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl Model for UploadedFile {
    fn shape() -> TypeShape {
        TypeShape::named("fastapi_reflect", "UploadedFile").with_marker(Marker::File)
    }
}

/// Why a handler call did not produce a response value
#[derive(Debug)]
pub enum CallError {
    /// Argument `index` could not be decoded into its declared type
    Argument {
        index: usize,
        /// Field path inside the argument, e.g. `["items", "0", "n"]`
        path: Vec<String>,
        source: serde_json::Error,
    },
    Arity {
        expected: usize,
        got: usize,
    },
    Handler(HandlerError),
    /// The return value could not be encoded
    Encode(serde_json::Error),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CallError::Argument { index, path, source } if !path.is_empty() => {
                write!(f, "argument {} field {} could not be decoded: {}", index, path.join("."), source)
            }
            CallError::Argument { index, source, .. } => {
                write!(f, "argument {} could not be decoded: {}", index, source)
            }
            CallError::Arity { expected, got } => {
                write!(f, "expected {} arguments, got {}", expected, got)
            }
            CallError::Handler(err) => write!(f, "handler error: {}", err),
            CallError::Encode(err) => write!(f, "response could not be encoded: {}", err),
        }
    }
}

impl std::error::Error for CallError {}

/// Parameter and return types of a handler, context and error included
#[derive(Debug, Clone)]
pub struct Signature {
    pub inputs: Vec<TypeShape>,
    pub outputs: Vec<TypeShape>,
}

impl Signature {
    pub fn new(inputs: Vec<TypeShape>, outputs: Vec<TypeShape>) -> Self {
        Self { inputs, outputs }
    }

    /// Shapes of the arguments after the context
    pub fn params(&self) -> &[TypeShape] {
        self.inputs.get(1..).unwrap_or(&[])
    }

    /// Shape of the success value
    pub fn response(&self) -> Option<&TypeShape> {
        self.outputs.first()
    }
}

/// A typed handler function
pub trait Handler<Args>: Send + Sync + 'static {
    /// Argument shapes, context excluded
    fn inputs() -> Vec<TypeShape>;

    fn output() -> TypeShape;

    fn call(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Value, CallError>;
}

fn decode<T: DeserializeOwned>(index: usize, value: Value) -> Result<T, CallError> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        let path = err
            .path()
            .iter()
            .filter_map(|segment| match segment {
                Segment::Seq { index } => Some(index.to_string()),
                Segment::Map { key } => Some(key.clone()),
                Segment::Enum { variant } => Some(variant.clone()),
                _ => None,
            })
            .collect();
        CallError::Argument {
            index,
            path,
            source: err.into_inner(),
        }
    })
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn(&mut Context, $($arg,)*) -> Result<R, HandlerError> + Send + Sync + 'static,
            R: Model + Serialize,
            $($arg: Model + DeserializeOwned,)*
        {
            fn inputs() -> Vec<TypeShape> {
                vec![$($arg::shape(),)*]
            }

            fn output() -> TypeShape {
                R::shape()
            }

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn call(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Value, CallError> {
                let expected = Self::inputs().len();
                if args.len() != expected {
                    return Err(CallError::Arity {
                        expected,
                        got: args.len(),
                    });
                }

                let mut args = args.into_iter().enumerate();
                $(
                    let $arg: $arg = match args.next() {
                        Some((index, value)) => decode(index, value)?,
                        None => unreachable!(),
                    };
                )*

                let out = (self)(ctx, $($arg,)*).map_err(CallError::Handler)?;
                serde_json::to_value(out).map_err(CallError::Encode)
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);

/// A handler with its argument types erased
pub trait ErasedHandler: Send + Sync {
    fn signature(&self) -> Signature;

    fn call(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Value, CallError>;
}

struct HandlerBox<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> ErasedHandler for HandlerBox<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn signature(&self) -> Signature {
        let mut inputs = vec![Context::shape()];
        inputs.extend(H::inputs());
        Signature::new(inputs, vec![H::output(), HandlerError::shape()])
    }

    fn call(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Value, CallError> {
        self.handler.call(ctx, args)
    }
}

/// Box a typed handler behind [`ErasedHandler`].
pub fn erase<H, Args>(handler: H) -> Arc<dyn ErasedHandler>
where
    H: Handler<Args>,
    Args: 'static,
{
    Arc::new(HandlerBox {
        handler,
        _args: PhantomData,
    })
}
