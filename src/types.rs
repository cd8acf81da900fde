//! Structural descriptions of native values.
//!
//! A [`TypeDeclaration`] is what the translator turns into wire messages and what the dispatcher
//! uses to check values while marshalling. Rust types describe themselves through [`Model`].

use std::{
    any::TypeId,
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde_value::Value;

mod model;

pub use model::{Empty, Model};

/// The native scalar kinds a declaration can hold.
///
/// Only the first four have a wire type. The rest exist so Rust types which can't be carried
/// on the wire are described honestly and rejected when the schema is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Integer,
    Float,
    String,
    Boolean,
    LargeInteger,
    UnsignedInteger,
    Char,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
            Self::LargeInteger => write!(f, "64-bit integer"),
            Self::UnsignedInteger => write!(f, "unsigned integer"),
            Self::Char => write!(f, "char"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeDeclaration {
    Scalar(ScalarKind),
    Record(Arc<RecordType>),
    Collection(Box<TypeDeclaration>),
    /// Resolved on use. This is how a [`Model`] refers to other models without building them eagerly.
    Deferred(fn() -> TypeDeclaration),
}

impl TypeDeclaration {
    pub const INTEGER: Self = Self::Scalar(ScalarKind::Integer);
    pub const FLOAT: Self = Self::Scalar(ScalarKind::Float);
    pub const STRING: Self = Self::Scalar(ScalarKind::String);
    pub const BOOLEAN: Self = Self::Scalar(ScalarKind::Boolean);

    pub fn collection(element: TypeDeclaration) -> Self {
        Self::Collection(Box::new(element))
    }

    /// Follow [`TypeDeclaration::Deferred`] until a concrete declaration is reached.
    pub fn resolve(&self) -> Cow<'_, TypeDeclaration> {
        let mut resolved = match self {
            Self::Deferred(declare) => declare(),
            other => return Cow::Borrowed(other),
        };
        while let Self::Deferred(declare) = resolved {
            resolved = declare();
        }
        Cow::Owned(resolved)
    }

    pub fn as_record(&self) -> Option<Arc<RecordType>> {
        match self.resolve().as_ref() {
            Self::Record(record) => Some(record.clone()),
            _ => None,
        }
    }

    pub fn is_record(&self) -> bool {
        self.as_record().is_some()
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.resolve().as_ref(), Self::Collection(_))
    }

    /// A short human readable name used in error messages.
    pub fn describe(&self) -> String {
        match self.resolve().as_ref() {
            Self::Scalar(kind) => kind.to_string(),
            Self::Record(record) => record.name().to_string(),
            Self::Collection(element) => format!("list of {}", element.describe()),
            Self::Deferred(_) => "unresolved type".into(),
        }
    }
}

/// The identity of a record. The model registry deduplicates by this, never by structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    /// Declared by a Rust type through [`Model`].
    Native(TypeId),
    /// A wrapper built by the endpoint registry. Endpoint names are unique so these are too.
    Synthesized(Cow<'static, str>),
    /// Built by hand with [`Record::declared`], unique per construction.
    Declared(u64),
}

#[derive(Debug, Clone)]
pub struct RecordType {
    id: RecordId,
    name: Cow<'static, str>,
    fields: Vec<Field>,
}

impl RecordType {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    name: Cow<'static, str>,
    ty: TypeDeclaration,
    default: Option<DefaultValue>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDeclaration {
        &self.ty
    }

    pub fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// The native value used when a field with a default is absent from a wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultValue(Value);

impl DefaultValue {
    pub fn from_native(value: Value) -> Self {
        Self(value)
    }

    pub fn empty_list() -> Self {
        Self(Value::Seq(Vec::new()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<i32> for DefaultValue {
    fn from(v: i32) -> Self {
        Self(Value::I32(v))
    }
}

impl From<f64> for DefaultValue {
    fn from(v: f64) -> Self {
        Self(Value::F64(v))
    }
}

impl From<bool> for DefaultValue {
    fn from(v: bool) -> Self {
        Self(Value::Bool(v))
    }
}

impl From<&str> for DefaultValue {
    fn from(v: &str) -> Self {
        Self(Value::String(v.to_string()))
    }
}

impl From<String> for DefaultValue {
    fn from(v: String) -> Self {
        Self(Value::String(v))
    }
}

static NEXT_DECLARED_ID: AtomicU64 = AtomicU64::new(0);

/// Builder for record declarations.
///
/// ```rust
/// use autorpc::types::{Model, Record, TypeDeclaration};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Item {
///     id: i32,
///     name: String,
/// }
///
/// impl Model for Item {
///     fn declaration() -> TypeDeclaration {
///         Record::of::<Self>("Item")
///             .field::<i32>("id")
///             .field::<String>("name")
///             .build()
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Record {
    id: RecordId,
    name: Cow<'static, str>,
    fields: Vec<Field>,
}

impl Record {
    /// A record whose identity is the Rust type `T`.
    pub fn of<T: 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_id(RecordId::Native(TypeId::of::<T>()), name)
    }

    /// A record with a fresh identity. Clone the built declaration to reuse it.
    pub fn declared(name: impl Into<Cow<'static, str>>) -> Self {
        let id = NEXT_DECLARED_ID.fetch_add(1, Ordering::Relaxed);
        Self::with_id(RecordId::Declared(id), name)
    }

    pub(crate) fn synthesized(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Self::with_id(RecordId::Synthesized(name.clone()), name)
    }

    fn with_id(id: RecordId, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field<T: Model>(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.push(name, T::reference(), None)
    }

    pub fn field_or<T: Model>(
        self,
        name: impl Into<Cow<'static, str>>,
        default: impl Into<DefaultValue>,
    ) -> Self {
        self.push(name, T::reference(), Some(default.into()))
    }

    pub fn field_with(self, name: impl Into<Cow<'static, str>>, ty: TypeDeclaration) -> Self {
        self.push(name, ty, None)
    }

    pub fn field_with_default(
        self,
        name: impl Into<Cow<'static, str>>,
        ty: TypeDeclaration,
        default: impl Into<DefaultValue>,
    ) -> Self {
        self.push(name, ty, Some(default.into()))
    }

    fn push(
        mut self,
        name: impl Into<Cow<'static, str>>,
        ty: TypeDeclaration,
        default: Option<DefaultValue>,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            default,
        });
        self
    }

    pub fn build(self) -> TypeDeclaration {
        TypeDeclaration::Record(Arc::new(RecordType {
            id: self.id,
            name: self.name,
            fields: self.fields,
        }))
    }
}
