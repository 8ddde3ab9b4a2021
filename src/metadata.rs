//! Schema metadata for model types.
//!
//! A [`MetadataCache`] is an arena of [`Metadata`] nodes addressed by type identity.
//! Fields refer to other nodes by identity through [`MetaField::item_ref`], never by
//! pointer, so self-referential and mutually-referential models are plain lookups.

use crate::reflect::{qualify, DataKind, Model, ReflectKind, TypeShape};
use crate::tags::{self, Constraint};
use log::{debug, warn};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Field names of the framework's own marker types; such fields never reach a schema.
pub const MARKER_FIELDS: [&str; 2] = ["BaseModel", "BaseRouter"];

/// Joins a declaring type's identity and a field name when naming inline structs.
pub const ANONYMOUS_CONNECTOR: char = '_';

/// Name of the single field describing the element of an array node.
pub const ARRAY_ITEM_FIELD: &str = "items";

/// One field of a model
#[derive(Debug, Clone)]
pub struct MetaField {
    pub name: String,
    /// Raw annotation string
    pub tag: String,
    pub kind: DataKind,
    pub description: String,
    /// Identity of the related node (object or array-of-object), or a base kind name
    /// for arrays of scalars
    pub item_ref: Option<String>,
    pub exported: bool,
    pub anonymous: bool,
    /// OpenAPI format hint such as `int64` or `date-time`
    pub format: Option<String>,
    /// Declared behind `Option`/`Box`, so `null` is acceptable on the wire
    pub nullable: bool,
    pub shape: TypeShape,
}

impl MetaField {
    /// Name used on the wire; `None` when the field is never serialized.
    pub fn json_name(&self) -> Option<String> {
        tags::json_name(&self.tag, &self.name)
    }

    pub fn is_required(&self) -> bool {
        tags::is_required(&self.tag)
    }

    pub fn default_value(&self) -> Option<Value> {
        tags::default_value(&self.tag, self.kind)
    }

    pub fn constraints(&self) -> Vec<Constraint> {
        tags::constraints(&self.tag)
    }
}

/// A nested model discovered while walking a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerField {
    /// Identity of the nested node
    pub name: String,
    pub kind: DataKind,
    /// Nesting level relative to the walked type, always at least 1
    pub depth: usize,
    /// Field through which the node was reached
    pub field: String,
}

/// Schema description of one model type
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Package-qualified name, the cache key
    pub identity: String,
    pub name: String,
    pub kind: DataKind,
    pub description: String,
    pub format: Option<String>,
    pub fields: Vec<MetaField>,
    pub inner_fields: Vec<InnerField>,
    pub shape: TypeShape,
}

impl Metadata {
    fn leaf(shape: &TypeShape, kind: DataKind, format: Option<String>) -> Self {
        Self {
            identity: kind.as_str().to_string(),
            name: kind.as_str().to_string(),
            kind,
            description: shape
                .description
                .clone()
                .unwrap_or_else(|| kind.as_str().to_string()),
            format,
            fields: Vec::new(),
            inner_fields: Vec::new(),
            shape: shape.clone(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&MetaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_base(&self) -> bool {
        self.kind.is_base()
    }

    /// Struct and array nodes are emitted as named schemas.
    pub fn is_model(&self) -> bool {
        match self.kind {
            DataKind::Array => true,
            DataKind::Object => self.shape.kind == ReflectKind::Struct,
            _ => false,
        }
    }

    /// Element description of an array node.
    pub fn item_field(&self) -> Option<&MetaField> {
        if self.kind == DataKind::Array {
            self.fields.first()
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Arena {
    nodes: Vec<Arc<Metadata>>,
    index: HashMap<String, usize>,
}

/// Arena of metadata nodes keyed by type identity.
///
/// Safe for concurrent use; at most one node exists per identity.
#[derive(Default)]
pub struct MetadataCache {
    arena: RwLock<Arena>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Metadata>> {
        let arena = self.arena.read();
        arena
            .index
            .get(identity)
            .map(|&i| Arc::clone(&arena.nodes[i]))
    }

    /// Store `meta`, replacing any node with the same identity.
    pub fn set(&self, meta: Metadata) -> Arc<Metadata> {
        let meta = Arc::new(meta);
        let mut arena = self.arena.write();
        match arena.index.get(&meta.identity).copied() {
            Some(i) => {
                debug!("Replacing metadata for {}", meta.identity);
                arena.nodes[i] = Arc::clone(&meta);
            }
            None => {
                let i = arena.nodes.len();
                arena.index.insert(meta.identity.clone(), i);
                arena.nodes.push(Arc::clone(&meta));
            }
        }
        meta
    }

    pub fn len(&self) -> usize {
        self.arena.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities in insertion order.
    pub fn identities(&self) -> Vec<String> {
        self.arena
            .read()
            .nodes
            .iter()
            .map(|m| m.identity.clone())
            .collect()
    }

    /// Metadata for `shape`, walking it only when it is not cached yet.
    pub fn get_or_build(&self, shape: &TypeShape) -> Arc<Metadata> {
        MetadataBuilder::new(self).build(shape)
    }

    /// Same as [`get_or_build`](Self::get_or_build).
    pub fn build_from_type(&self, shape: &TypeShape) -> Arc<Metadata> {
        self.get_or_build(shape)
    }

    /// Walk `shape` again and overwrite every node it reaches.
    pub fn rebuild(&self, shape: &TypeShape) -> Arc<Metadata> {
        MetadataBuilder::new(self).overwrite().build(shape)
    }

    pub fn build<T: Model>(&self) -> Arc<Metadata> {
        self.get_or_build(&T::shape())
    }
}

/// OpenAPI format hint for a scalar kind.
pub fn format_of(kind: ReflectKind) -> Option<&'static str> {
    match kind {
        ReflectKind::I8
        | ReflectKind::I16
        | ReflectKind::I32
        | ReflectKind::U8
        | ReflectKind::U16
        | ReflectKind::U32 => Some("int32"),
        ReflectKind::I64
        | ReflectKind::I128
        | ReflectKind::Isize
        | ReflectKind::U64
        | ReflectKind::U128
        | ReflectKind::Usize => Some("int64"),
        ReflectKind::F32 => Some("float"),
        ReflectKind::F64 => Some("double"),
        _ => None,
    }
}

fn is_opaque(kind: ReflectKind) -> bool {
    matches!(
        kind,
        ReflectKind::Interface
            | ReflectKind::Map
            | ReflectKind::Func
            | ReflectKind::Chan
            | ReflectKind::RawPointer
            | ReflectKind::Pointer
    )
}

/// Kind, reference and format of a value slot
struct Described {
    kind: DataKind,
    item_ref: Option<String>,
    format: Option<String>,
}

/// Walks type shapes and fills a [`MetadataCache`]
pub struct MetadataBuilder<'a> {
    cache: &'a MetadataCache,
    /// Identities walked (or being walked) by this builder
    visited: HashSet<String>,
    /// Identities whose walk has not finished yet
    in_progress: Vec<String>,
    /// Names synthesized for inline structs during this walk
    synthesized: HashSet<String>,
    overwrite: bool,
}

impl<'a> MetadataBuilder<'a> {
    pub fn new(cache: &'a MetadataCache) -> Self {
        Self {
            cache,
            visited: HashSet::new(),
            in_progress: Vec::new(),
            synthesized: HashSet::new(),
            overwrite: false,
        }
    }

    /// Walk nodes even when they are cached and replace them.
    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    /// Build the metadata tree of `shape`.
    ///
    /// Scalars, maps and opaque values yield a field-less node of the mapped kind that
    /// is not stored in the cache.
    pub fn build(&mut self, shape: &TypeShape) -> Arc<Metadata> {
        let root = shape.deref();
        debug!("Building metadata for {}", root.short_name());

        if root.is_time() {
            return Arc::new(Metadata::leaf(
                &root,
                DataKind::String,
                Some("date-time".to_string()),
            ));
        }
        if root.is_file() {
            return Arc::new(Metadata::leaf(
                &root,
                DataKind::String,
                Some("binary".to_string()),
            ));
        }

        let kind = root.data_kind();
        let identity = match kind {
            DataKind::Array => {
                let identity = root.identity();
                self.build_array_node(&root, &identity, 0);
                identity
            }
            DataKind::Object if root.kind == ReflectKind::Struct => {
                let identity = if root.is_anonymous() {
                    warn!("Building metadata for an anonymous root struct");
                    qualify(&root.package, "Anonymous")
                } else {
                    root.identity()
                };
                self.build_struct(&root, &identity, 0);
                identity
            }
            _ => {
                let format = format_of(root.kind).map(str::to_string);
                return Arc::new(Metadata::leaf(&root, kind, format));
            }
        };

        self.cache
            .get(&identity)
            .unwrap_or_else(|| Arc::new(Metadata::leaf(&root, kind, None)))
    }

    /// Returns `true` when the node has to be walked now.
    fn enter(&mut self, identity: &str) -> bool {
        if self.in_progress.iter().any(|id| id == identity) {
            debug!("Circular reference to {}", identity);
            return false;
        }
        if self.visited.contains(identity) {
            return false;
        }
        if !self.overwrite && self.cache.get(identity).is_some() {
            debug!("Metadata for {} found in cache", identity);
            return false;
        }
        self.visited.insert(identity.to_string());
        self.in_progress.push(identity.to_string());
        true
    }

    fn leave(&mut self) {
        self.in_progress.pop();
    }

    fn build_struct(&mut self, shape: &TypeShape, identity: &str, depth: usize) {
        if !self.enter(identity) {
            return;
        }

        let mut fields = Vec::new();
        let mut inner = Vec::new();
        self.collect_fields(shape, identity, depth, &mut fields, &mut inner);
        self.leave();

        debug!(
            "Built {} with {} fields and {} inner models",
            identity,
            fields.len(),
            inner.len()
        );
        self.cache.set(Metadata {
            identity: identity.to_string(),
            name: if shape.name.is_empty() {
                identity.to_string()
            } else {
                shape.name.clone()
            },
            kind: DataKind::Object,
            description: shape
                .description
                .clone()
                .unwrap_or_else(|| shape.short_name()),
            format: None,
            fields,
            inner_fields: relative_to(inner, identity, depth),
            shape: shape.clone(),
        });
    }

    /// Build a node for an array type; its single field describes the element.
    fn build_array_node(&mut self, shape: &TypeShape, identity: &str, depth: usize) {
        if !self.enter(identity) {
            return;
        }

        let mut inner = Vec::new();
        let item = match shape.elem_shape() {
            Some(elem) => {
                let described = self.describe(identity, "Item", &elem, depth, &mut inner);
                Some(MetaField {
                    name: ARRAY_ITEM_FIELD.to_string(),
                    tag: String::new(),
                    kind: described.kind,
                    description: elem.short_name(),
                    item_ref: described.item_ref,
                    exported: true,
                    anonymous: false,
                    format: described.format,
                    nullable: elem.is_pointer(),
                    shape: elem,
                })
            }
            None => None,
        };
        self.leave();

        self.cache.set(Metadata {
            identity: identity.to_string(),
            name: shape.short_name(),
            kind: DataKind::Array,
            description: shape
                .description
                .clone()
                .unwrap_or_else(|| shape.short_name()),
            format: None,
            fields: item.into_iter().collect(),
            inner_fields: relative_to(inner, identity, depth),
            shape: shape.clone(),
        });
    }

    fn collect_fields(
        &mut self,
        shape: &TypeShape,
        owner: &str,
        depth: usize,
        fields: &mut Vec<MetaField>,
        inner: &mut Vec<InnerField>,
    ) {
        for field in &shape.fields {
            if !field.exported || MARKER_FIELDS.contains(&field.name.as_str()) {
                continue;
            }

            let field_shape = field.shape();
            let target = field_shape.deref();
            if MARKER_FIELDS.contains(&target.name.as_str()) {
                continue;
            }

            if field.anonymous
                && target.kind == ReflectKind::Struct
                && !target.is_time()
                && !target.is_file()
            {
                // embedded struct: promote its members
                self.collect_fields(&target, owner, depth, fields, inner);
                continue;
            }

            if tags::json_name(&field.tag, &field.name).is_none() {
                continue;
            }

            let described = self.describe(owner, &field.name, &field_shape, depth, inner);
            fields.push(MetaField {
                name: field.name.clone(),
                tag: field.tag.clone(),
                kind: described.kind,
                description: tags::description(&field.tag, &field.name),
                item_ref: described.item_ref,
                exported: field.exported,
                anonymous: field.anonymous,
                format: described.format,
                nullable: field_shape.is_pointer(),
                shape: field_shape,
            });
        }
    }

    fn describe(
        &mut self,
        owner: &str,
        label: &str,
        shape: &TypeShape,
        depth: usize,
        inner: &mut Vec<InnerField>,
    ) -> Described {
        let target = shape.deref();
        if target.is_time() {
            return Described {
                kind: DataKind::String,
                item_ref: None,
                format: Some("date-time".to_string()),
            };
        }
        if target.is_file() {
            return Described {
                kind: DataKind::String,
                item_ref: None,
                format: Some("binary".to_string()),
            };
        }

        let kind = target.data_kind();
        match kind {
            DataKind::Object => Described {
                kind,
                item_ref: self.object_ref(owner, label, &target, depth, inner),
                format: None,
            },
            DataKind::Array => Described {
                kind,
                item_ref: self.array_item_ref(owner, label, &target, depth, inner),
                format: None,
            },
            _ => Described {
                kind,
                item_ref: None,
                format: format_of(target.kind).map(str::to_string),
            },
        }
    }

    /// Walk a nested struct and return its identity; opaque objects have none.
    fn object_ref(
        &mut self,
        owner: &str,
        label: &str,
        target: &TypeShape,
        depth: usize,
        inner: &mut Vec<InnerField>,
    ) -> Option<String> {
        if is_opaque(target.kind) {
            return None;
        }

        let child = if target.is_anonymous() {
            self.synthesize(owner, label)
        } else {
            target.identity()
        };
        self.build_struct(target, &child, depth + 1);
        self.record_inner(inner, &child, DataKind::Object, depth + 1, label);
        Some(child)
    }

    fn array_item_ref(
        &mut self,
        owner: &str,
        label: &str,
        array: &TypeShape,
        depth: usize,
        inner: &mut Vec<InnerField>,
    ) -> Option<String> {
        let elem = array.elem_shape()?.deref_once();
        if elem.is_time() || elem.is_file() {
            return Some(DataKind::String.as_str().to_string());
        }

        match elem.data_kind() {
            DataKind::Object => self.object_ref(owner, label, &elem, depth, inner),
            DataKind::Array => {
                let child = self.synthesize(owner, &format!("{}{}Item", label, ANONYMOUS_CONNECTOR));
                self.build_array_node(&elem, &child, depth + 1);
                self.record_inner(inner, &child, DataKind::Array, depth + 1, label);
                Some(child)
            }
            base => Some(base.as_str().to_string()),
        }
    }

    /// Name an inline type after its declaring type and field.
    ///
    /// Nested inline structs can produce the same name through different paths
    /// (`A.x_y` and `A.x.y`); a repeated name gets a numeric suffix.
    fn synthesize(&mut self, owner: &str, label: &str) -> String {
        let base = format!("{}{}{}", owner, ANONYMOUS_CONNECTOR, label);
        let mut name = base.clone();
        let mut n = 2;
        while self.synthesized.contains(&name) {
            name = format!("{}{}{}", base, ANONYMOUS_CONNECTOR, n);
            n += 1;
        }
        if name != base {
            warn!("Inline type name {} already used, renamed to {}", base, name);
        }
        self.synthesized.insert(name.clone());
        name
    }

    fn record_inner(
        &self,
        inner: &mut Vec<InnerField>,
        identity: &str,
        kind: DataKind,
        depth: usize,
        field: &str,
    ) {
        push_unique(
            inner,
            InnerField {
                name: identity.to_string(),
                kind,
                depth,
                field: field.to_string(),
            },
        );

        // a node still being walked has no cached inner fields yet
        if let Some(child) = self.cache.get(identity) {
            for nested in &child.inner_fields {
                push_unique(
                    inner,
                    InnerField {
                        depth: nested.depth + depth,
                        ..nested.clone()
                    },
                );
            }
        }
    }
}

fn push_unique(inner: &mut Vec<InnerField>, field: InnerField) {
    if !inner.iter().any(|f| f.name == field.name) {
        inner.push(field);
    }
}

/// Rebase depths recorded while walking at `depth` so the owner sits at 0.
fn relative_to(inner: Vec<InnerField>, owner: &str, depth: usize) -> Vec<InnerField> {
    inner
        .into_iter()
        .filter(|f| f.name != owner)
        .map(|f| InnerField {
            depth: f.depth.saturating_sub(depth).max(1),
            ..f
        })
        .collect()
}
