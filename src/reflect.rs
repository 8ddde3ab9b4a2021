//! Type shapes and the kind mapper.
//!
//! Rust has no runtime reflection, so every model type describes itself through the
//! [`Model`] trait. The resulting [`TypeShape`] plays the role of a reflected type
//! handle: it carries a [`ReflectKind`], a package-qualified name, struct fields and
//! an element type for pointers, slices and maps.
//!
//! Field and element types are stored as `fn() -> TypeShape` so that a type may refer
//! to itself (`struct Node { children: Vec<Node> }`) without building an infinite value.
//!
//! # Example
//!
//! ```
//! use fastapi_reflect::reflect::{DataKind, Model, TypeShape};
//!
//! struct User {
//!     name: String,
//!     age: u8,
//! }
//!
//! impl Model for User {
//!     fn shape() -> TypeShape {
//!         TypeShape::structure::<Self>()
//!             .field::<String>("name", r#"json:"name" validate:"required""#)
//!             .field::<u8>("age", r#"json:"age" validate:"lte=150""#)
//!     }
//! }
//!
//! let shape = User::shape();
//! assert_eq!(shape.data_kind(), DataKind::Object);
//! assert_eq!(shape.fields.len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Lazily resolved type handle
pub type ShapeFn = fn() -> TypeShape;

/// Language-level kind of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    F32,
    F64,
    Char,
    String,
    Struct,
    /// `Option<T>`, `Box<T>`, `Arc<T>`
    Pointer,
    /// `Vec<T>`, `VecDeque<T>`
    Slice,
    /// `[T; N]`
    Array,
    Map,
    /// Values whose shape is only known at runtime, such as `serde_json::Value`.
    Interface,
    Func,
    Chan,
    RawPointer,
}

impl ReflectKind {
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ReflectKind::I8
                | ReflectKind::I16
                | ReflectKind::I32
                | ReflectKind::I64
                | ReflectKind::I128
                | ReflectKind::Isize
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ReflectKind::U8
                | ReflectKind::U16
                | ReflectKind::U32
                | ReflectKind::U64
                | ReflectKind::U128
                | ReflectKind::Usize
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, ReflectKind::F32 | ReflectKind::F64)
    }

    /// Inclusive value range of a signed integer kind, clamped to `i64`.
    pub fn signed_bounds(self) -> Option<(i64, i64)> {
        match self {
            ReflectKind::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ReflectKind::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ReflectKind::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ReflectKind::I64 | ReflectKind::I128 | ReflectKind::Isize => {
                Some((i64::MIN, i64::MAX))
            }
            _ => None,
        }
    }

    /// Inclusive upper bound of an unsigned integer kind, clamped to `u64`.
    pub fn unsigned_max(self) -> Option<u64> {
        match self {
            ReflectKind::U8 => Some(u8::MAX as u64),
            ReflectKind::U16 => Some(u16::MAX as u64),
            ReflectKind::U32 => Some(u32::MAX as u64),
            ReflectKind::U64 | ReflectKind::U128 | ReflectKind::Usize => Some(u64::MAX),
            _ => None,
        }
    }
}

/// The six OpenAPI data kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Integer => "integer",
            DataKind::Number => "number",
            DataKind::String => "string",
            DataKind::Boolean => "boolean",
            DataKind::Object => "object",
            DataKind::Array => "array",
        }
    }

    /// Base kinds are leaves of a schema tree.
    pub fn is_base(self) -> bool {
        matches!(
            self,
            DataKind::Integer | DataKind::Number | DataKind::String | DataKind::Boolean
        )
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a language-level kind to its data kind.
pub fn kind_of(kind: ReflectKind) -> DataKind {
    match kind {
        ReflectKind::Slice | ReflectKind::Array | ReflectKind::Chan => DataKind::Array,
        ReflectKind::String | ReflectKind::Char => DataKind::String,
        ReflectKind::Bool => DataKind::Boolean,
        k if k.is_integer() => DataKind::Integer,
        ReflectKind::F32 | ReflectKind::F64 => DataKind::Number,
        _ => DataKind::Object,
    }
}

/// Special roles a type can play in a handler signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    None,
    /// Point in time, carried as an RFC 3339 string.
    Time,
    /// Multipart file upload.
    File,
    /// The request context passed as first handler argument.
    Context,
    /// The error half of a handler's return value.
    Error,
}

/// One field of a struct shape
#[derive(Debug, Clone)]
pub struct FieldShape {
    pub name: String,
    /// Raw annotation string, e.g. `json:"name" validate:"required"`
    pub tag: String,
    pub ty: ShapeFn,
    pub exported: bool,
    /// Embedded field whose members are promoted into the parent.
    pub anonymous: bool,
}

impl FieldShape {
    pub fn shape(&self) -> TypeShape {
        (self.ty)()
    }
}

/// Reflected description of a type
#[derive(Debug, Clone)]
pub struct TypeShape {
    pub kind: ReflectKind,
    /// Short name, empty for anonymous structs and unnamed containers
    pub name: String,
    /// Module path the type was declared in
    pub package: String,
    pub elem: Option<ShapeFn>,
    pub fields: Vec<FieldShape>,
    pub description: Option<String>,
    pub marker: Marker,
}

impl TypeShape {
    fn bare(kind: ReflectKind) -> Self {
        Self {
            kind,
            name: String::new(),
            package: String::new(),
            elem: None,
            fields: Vec::new(),
            description: None,
            marker: Marker::None,
        }
    }

    /// A scalar type such as `i32` or `String`.
    pub fn primitive(kind: ReflectKind, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::bare(kind)
        }
    }

    /// A named struct whose identity is derived from `T`'s type path.
    pub fn structure<T: ?Sized>() -> Self {
        let (package, name) = split_type_name(std::any::type_name::<T>());
        Self::named(&package, &name)
    }

    /// A named struct with an explicit package and name.
    pub fn named(package: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            package: package.to_string(),
            ..Self::bare(ReflectKind::Struct)
        }
    }

    /// An inline struct with no name of its own.
    pub fn anonymous() -> Self {
        Self::bare(ReflectKind::Struct)
    }

    pub fn pointer(elem: ShapeFn) -> Self {
        Self {
            elem: Some(elem),
            ..Self::bare(ReflectKind::Pointer)
        }
    }

    pub fn slice(elem: ShapeFn) -> Self {
        Self {
            elem: Some(elem),
            ..Self::bare(ReflectKind::Slice)
        }
    }

    pub fn array(elem: ShapeFn) -> Self {
        Self {
            elem: Some(elem),
            ..Self::bare(ReflectKind::Array)
        }
    }

    pub fn map(value: ShapeFn) -> Self {
        Self {
            elem: Some(value),
            ..Self::bare(ReflectKind::Map)
        }
    }

    pub fn interface(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::bare(ReflectKind::Interface)
        }
    }

    pub fn func() -> Self {
        Self::bare(ReflectKind::Func)
    }

    pub fn chan(elem: ShapeFn) -> Self {
        Self {
            elem: Some(elem),
            ..Self::bare(ReflectKind::Chan)
        }
    }

    pub fn raw_pointer(elem: ShapeFn) -> Self {
        Self {
            elem: Some(elem),
            ..Self::bare(ReflectKind::RawPointer)
        }
    }

    /// Add an exported field of type `F`.
    pub fn field<F: Model>(self, name: &str, tag: &str) -> Self {
        self.field_with(name, tag, F::shape)
    }

    /// Add an exported field with an explicit type handle, typically an inline
    /// anonymous struct: `.field_with("inner", "", || TypeShape::anonymous().field::<i32>("a", ""))`.
    pub fn field_with(mut self, name: &str, tag: &str, ty: ShapeFn) -> Self {
        self.fields.push(FieldShape {
            name: name.to_string(),
            tag: tag.to_string(),
            ty,
            exported: true,
            anonymous: false,
        });
        self
    }

    /// Embed `F`, promoting its fields into this struct.
    pub fn embed<F: Model>(mut self) -> Self {
        let name = F::shape().name;
        self.fields.push(FieldShape {
            name,
            tag: String::new(),
            ty: F::shape,
            exported: true,
            anonymous: true,
        });
        self
    }

    /// Add a field that is never serialized and stays out of the schema.
    pub fn hidden_field<F: Model>(mut self, name: &str) -> Self {
        self.fields.push(FieldShape {
            name: name.to_string(),
            tag: String::new(),
            ty: F::shape,
            exported: false,
            anonymous: false,
        });
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = marker;
        self
    }

    pub fn data_kind(&self) -> DataKind {
        kind_of(self.kind)
    }

    pub fn elem_shape(&self) -> Option<TypeShape> {
        self.elem.map(|f| f())
    }

    /// Follow pointer indirection down to the first non-pointer type.
    pub fn deref(&self) -> TypeShape {
        let mut current = self.clone();
        while current.kind == ReflectKind::Pointer {
            match current.elem_shape() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }

    /// Follow at most one level of pointer indirection.
    pub fn deref_once(&self) -> TypeShape {
        if self.kind == ReflectKind::Pointer {
            if let Some(inner) = self.elem_shape() {
                return inner;
            }
        }
        self.clone()
    }

    pub fn pointer_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.clone();
        while current.kind == ReflectKind::Pointer {
            depth += 1;
            match current.elem_shape() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        depth
    }

    pub fn is_pointer(&self) -> bool {
        self.kind == ReflectKind::Pointer
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == ReflectKind::Struct && self.name.is_empty()
    }

    pub fn is_time(&self) -> bool {
        self.marker == Marker::Time
    }

    pub fn is_file(&self) -> bool {
        self.marker == Marker::File
    }

    pub fn is_context(&self) -> bool {
        self.marker == Marker::Context
    }

    pub fn is_error(&self) -> bool {
        self.marker == Marker::Error
    }

    /// Name used when the type has to be mentioned, falling back to the data kind.
    pub fn short_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.kind {
            ReflectKind::Pointer => self
                .elem_shape()
                .map(|inner| inner.short_name())
                .unwrap_or_else(|| "object".to_string()),
            ReflectKind::Slice | ReflectKind::Array => self
                .elem_shape()
                .map(|inner| format!("{}List", inner.short_name()))
                .unwrap_or_else(|| "array".to_string()),
            _ => self.data_kind().as_str().to_string(),
        }
    }

    /// Package-qualified identity used as cache key and schema name.
    ///
    /// Named structs yield `package.Name`, base kinds yield their data kind name and
    /// containers derive theirs from the element. Anonymous structs yield an empty
    /// string: their identity is assigned by whoever declares them.
    pub fn identity(&self) -> String {
        match self.kind {
            ReflectKind::Struct if self.name.is_empty() => String::new(),
            ReflectKind::Struct | ReflectKind::Interface => qualify(&self.package, &self.name),
            ReflectKind::Pointer => self
                .elem_shape()
                .map(|inner| inner.identity())
                .unwrap_or_default(),
            ReflectKind::Slice | ReflectKind::Array | ReflectKind::Chan => self
                .elem_shape()
                .map(|inner| format!("{}List", inner.identity()))
                .unwrap_or_else(|| "array".to_string()),
            _ => self.data_kind().as_str().to_string(),
        }
    }
}

/// Join a module path and a short type name into a schema-safe identity.
pub fn qualify(package: &str, name: &str) -> String {
    let name = sanitize(name);
    if package.is_empty() {
        name
    } else {
        format!("{}.{}", package.replace("::", "."), name)
    }
}

fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '<' | ',' => out.push('_'),
            '>' | ' ' | '&' | '\'' => {}
            '[' | ']' | ';' | '(' | ')' => out.push('_'),
            _ => out.push(c),
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Split a full type path such as `app::models::Page<app::models::User>` into its
/// module path (`app::models`) and a short name with generic arguments kept but
/// stripped of their own paths (`Page<User>`).
pub fn split_type_name(full: &str) -> (String, String) {
    let head_end = full.find('<').unwrap_or(full.len());
    let head = &full[..head_end];
    let (package, short) = match head.rfind("::") {
        Some(i) => (&head[..i], &head[i + 2..]),
        None => ("", head),
    };
    (
        package.to_string(),
        format!("{}{}", short, strip_paths(&full[head_end..])),
    )
}

fn strip_paths(generics: &str) -> String {
    let mut out = String::new();
    let mut token = String::new();
    for c in generics.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            token.push(c);
        } else {
            out.push_str(last_segment(&token));
            token.clear();
            out.push(c);
        }
    }
    out.push_str(last_segment(&token));
    out
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Types that can describe their own shape
pub trait Model {
    fn shape() -> TypeShape;
}

macro_rules! impl_primitive_model {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Model for $ty {
                fn shape() -> TypeShape {
                    TypeShape::primitive(ReflectKind::$kind, stringify!($ty))
                }
            }
        )*
    };
}

impl_primitive_model! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    i128 => I128,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    u128 => U128,
    usize => Usize,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => String,
}

impl<T: Model> Model for Vec<T> {
    fn shape() -> TypeShape {
        TypeShape::slice(T::shape)
    }
}

impl<T: Model> Model for VecDeque<T> {
    fn shape() -> TypeShape {
        TypeShape::slice(T::shape)
    }
}

impl<T: Model, const N: usize> Model for [T; N] {
    fn shape() -> TypeShape {
        TypeShape::array(T::shape)
    }
}

impl<T: Model> Model for Option<T> {
    fn shape() -> TypeShape {
        TypeShape::pointer(T::shape)
    }
}

impl<T: Model> Model for Box<T> {
    fn shape() -> TypeShape {
        TypeShape::pointer(T::shape)
    }
}

impl<T: Model> Model for Arc<T> {
    fn shape() -> TypeShape {
        TypeShape::pointer(T::shape)
    }
}

impl<K, V: Model> Model for HashMap<K, V> {
    fn shape() -> TypeShape {
        TypeShape::map(V::shape)
    }
}

impl<K, V: Model> Model for BTreeMap<K, V> {
    fn shape() -> TypeShape {
        TypeShape::map(V::shape)
    }
}

impl Model for serde_json::Value {
    fn shape() -> TypeShape {
        TypeShape::interface("Value")
    }
}

impl Model for chrono::DateTime<chrono::Utc> {
    fn shape() -> TypeShape {
        TypeShape::named("chrono", "DateTime").with_marker(Marker::Time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        _children: Vec<Node>,
    }

    impl Model for Node {
        fn shape() -> TypeShape {
            TypeShape::structure::<Self>().field::<Vec<Node>>("children", "")
        }
    }

    #[test]
    fn test_kind_of_is_total() {
        let cases = vec![
            (ReflectKind::Slice, DataKind::Array),
            (ReflectKind::Array, DataKind::Array),
            (ReflectKind::Chan, DataKind::Array),
            (ReflectKind::String, DataKind::String),
            (ReflectKind::Char, DataKind::String),
            (ReflectKind::Bool, DataKind::Boolean),
            (ReflectKind::I8, DataKind::Integer),
            (ReflectKind::Usize, DataKind::Integer),
            (ReflectKind::U128, DataKind::Integer),
            (ReflectKind::F32, DataKind::Number),
            (ReflectKind::F64, DataKind::Number),
            (ReflectKind::Struct, DataKind::Object),
            (ReflectKind::Pointer, DataKind::Object),
            (ReflectKind::Interface, DataKind::Object),
            (ReflectKind::Map, DataKind::Object),
            (ReflectKind::Func, DataKind::Object),
            (ReflectKind::RawPointer, DataKind::Object),
        ];

        for (kind, expected) in cases {
            assert_eq!(kind_of(kind), expected, "kind {:?}", kind);
        }
    }

    #[test]
    fn test_split_type_name() {
        let (package, name) = split_type_name("app::models::User");
        assert_eq!(package, "app::models");
        assert_eq!(name, "User");

        let (package, name) = split_type_name("app::Page<app::models::User>");
        assert_eq!(package, "app");
        assert_eq!(name, "Page<User>");

        let (package, name) = split_type_name("User");
        assert_eq!(package, "");
        assert_eq!(name, "User");
    }

    #[test]
    fn test_identity_of_named_and_generic_struct() {
        assert_eq!(TypeShape::named("app::models", "User").identity(), "app.models.User");
        assert_eq!(TypeShape::named("app", "Page<User>").identity(), "app.Page_User");
        assert_eq!(TypeShape::anonymous().identity(), "");
    }

    #[test]
    fn test_identity_of_containers() {
        assert_eq!(<Vec<i32>>::shape().identity(), "integerList");
        assert_eq!(<Option<String>>::shape().identity(), "string");
        assert_eq!(<Vec<Vec<bool>>>::shape().identity(), "booleanListList");
    }

    #[test]
    fn test_deref_and_pointer_depth() {
        let shape = <Option<Box<u32>>>::shape();
        assert_eq!(shape.pointer_depth(), 2);
        assert_eq!(shape.deref().kind, ReflectKind::U32);
        assert_eq!(shape.deref_once().kind, ReflectKind::Pointer);
    }

    #[test]
    fn test_self_referential_shape_is_lazy() {
        let shape = Node::shape();
        assert_eq!(shape.fields.len(), 1);

        let children = shape.fields[0].shape();
        assert_eq!(children.kind, ReflectKind::Slice);
        assert_eq!(children.elem_shape().unwrap().name, "Node");
    }

    #[test]
    fn test_time_marker() {
        let shape = <chrono::DateTime<chrono::Utc>>::shape();
        assert!(shape.is_time());
        assert_eq!(shape.data_kind(), DataKind::Object);
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(ReflectKind::I8.signed_bounds(), Some((-128, 127)));
        assert_eq!(ReflectKind::U16.unsigned_max(), Some(65535));
        assert_eq!(ReflectKind::String.signed_bounds(), None);
    }
}
