use std::{borrow::Cow, collections::BTreeSet, fmt, sync::Arc};

use serde::Serialize;
use specta::Type;

use crate::{
    handler::{Handler, HandlerFn},
    types::{Record, RecordType, TypeDeclaration},
    SchemaError,
};

/// How many messages flow in each direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Type)]
#[serde(rename_all = "camelCase")]
#[specta(rename_all = "camelCase")]
pub enum Cardinality {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl Cardinality {
    pub fn from_flags(request_streamed: bool, response_streamed: bool) -> Self {
        match (request_streamed, response_streamed) {
            (false, false) => Self::Unary,
            (false, true) => Self::ServerStreaming,
            (true, false) => Self::ClientStreaming,
            (true, true) => Self::BidiStreaming,
        }
    }

    pub fn request_streamed(&self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    pub fn response_streamed(&self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::ServerStreaming => write!(f, "server streaming"),
            Self::ClientStreaming => write!(f, "client streaming"),
            Self::BidiStreaming => write!(f, "bidirectional streaming"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Cow<'static, str>,
    pub ty: Option<TypeDeclaration>,
}

/// The declared parameter and return types of a handler.
///
/// Typed handlers fill this in from their Rust types. Dynamic handlers describe themselves and
/// may leave types out, which makes registration fail unless explicit types are given.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns: Option<TypeDeclaration>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<Cow<'static, str>>, ty: TypeDeclaration) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: Some(ty),
        });
        self
    }

    pub fn untyped_param(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: None,
        });
        self
    }

    pub fn returns(mut self, ty: TypeDeclaration) -> Self {
        self.returns = Some(ty);
        self
    }
}

/// Optional overrides passed when registering an endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    pub(crate) request_type: Option<TypeDeclaration>,
    pub(crate) response_type: Option<TypeDeclaration>,
    pub(crate) request_streamed: Option<bool>,
    pub(crate) response_streamed: Option<bool>,
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this record as the request message instead of inferring one.
    pub fn request_type(mut self, ty: TypeDeclaration) -> Self {
        self.request_type = Some(ty);
        self
    }

    /// Use this record as the response message instead of inferring one.
    pub fn response_type(mut self, ty: TypeDeclaration) -> Self {
        self.response_type = Some(ty);
        self
    }

    /// Assert the request direction is streamed. Must agree with the handler.
    pub fn request_streamed(mut self, streamed: bool) -> Self {
        self.request_streamed = Some(streamed);
        self
    }

    /// Assert the response direction is streamed. Must agree with the handler.
    pub fn response_streamed(mut self, streamed: bool) -> Self {
        self.response_streamed = Some(streamed);
        self
    }
}

/// How the request record maps onto the handler's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestShape {
    /// The record is the handler's only argument.
    Record,
    /// Each named field is one positional argument.
    Arguments(Vec<String>),
}

/// How the handler's return value maps onto the response record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResponseShape {
    Record,
    /// The value is stored in the single named field.
    Wrapped(String),
}

/// Build an anonymous record from `(field name, type)` pairs. Every field is required.
pub fn synthesize_record<I, N>(name: impl Into<Cow<'static, str>>, fields: I) -> TypeDeclaration
where
    I: IntoIterator<Item = (N, TypeDeclaration)>,
    N: Into<Cow<'static, str>>,
{
    fields
        .into_iter()
        .fold(Record::synthesized(name), |record, (name, ty)| {
            record.field_with(name, ty)
        })
        .build()
}

/// One registered handler with its request and response records.
pub struct Endpoint {
    name: Cow<'static, str>,
    pub(crate) handler: HandlerFn,
    request: Arc<RecordType>,
    response: Arc<RecordType>,
    pub(crate) request_shape: RequestShape,
    pub(crate) response_shape: ResponseShape,
    cardinality: Cardinality,
}

impl Endpoint {
    pub(crate) fn new(
        name: Cow<'static, str>,
        handler: Handler,
        options: EndpointOptions,
    ) -> Result<Self, SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidSignature {
            endpoint: name.to_string(),
            reason,
        };

        if !is_identifier(&name) {
            return Err(invalid(format!(
                "'{name}' can't be used as an rpc name, use letters, digits and underscores"
            )));
        }

        let cardinality = handler.cardinality();
        if let Some(streamed) = options.request_streamed {
            if streamed != cardinality.request_streamed() {
                return Err(invalid(format!(
                    "the request is marked as {}streamed but the handler is {cardinality}",
                    if streamed { "" } else { "not " }
                )));
            }
        }
        if let Some(streamed) = options.response_streamed {
            if streamed != cardinality.response_streamed() {
                return Err(invalid(format!(
                    "the response is marked as {}streamed but the handler is {cardinality}",
                    if streamed { "" } else { "not " }
                )));
            }
        }

        let params = named_params(&name, &handler)?;
        if cardinality.request_streamed() && params.len() != 1 {
            return Err(invalid(format!(
                "a {cardinality} handler takes exactly one parameter, found {}",
                params.len()
            )));
        }

        let (request, request_shape) = match options.request_type {
            Some(ty) => {
                let record = ty.as_record().ok_or_else(|| {
                    invalid(format!(
                        "the request type must be a record, found {}",
                        ty.describe()
                    ))
                })?;
                let direct = match params.as_slice() {
                    [param] => param.ty.as_ref().map_or(true, TypeDeclaration::is_record),
                    _ => false,
                };

                if direct {
                    (record, RequestShape::Record)
                } else {
                    for param in &params {
                        if record.field(&param.name).is_none() {
                            return Err(invalid(format!(
                                "parameter '{}' has no matching field in '{}'",
                                param.name,
                                record.name()
                            )));
                        }
                    }
                    let names = params.iter().map(|p| p.name.to_string()).collect();
                    (record, RequestShape::Arguments(names))
                }
            }
            None => {
                let mut fields = Vec::with_capacity(params.len());
                for param in &params {
                    let ty = param.ty.clone().ok_or_else(|| SchemaError::MissingAnnotation {
                        endpoint: name.to_string(),
                        subject: format!("parameter '{}'", param.name),
                    })?;
                    fields.push((param.name.clone(), ty));
                }

                let single_record = match fields.as_slice() {
                    [(_, ty)] => ty.as_record(),
                    _ => None,
                };
                match single_record {
                    Some(record) => (record, RequestShape::Record),
                    None => {
                        let names = fields.iter().map(|(n, _)| n.to_string()).collect();
                        let decl = synthesize_record(format!("{name}_Request"), fields);
                        (synthesized(decl)?, RequestShape::Arguments(names))
                    }
                }
            }
        };

        let returns = handler.signature.returns;
        let (response, response_shape) = match options.response_type {
            Some(ty) => {
                let record = ty.as_record().ok_or_else(|| {
                    invalid(format!(
                        "the response type must be a record, found {}",
                        ty.describe()
                    ))
                })?;

                match returns {
                    Some(returns) if !returns.is_record() => match record.fields() {
                        [field] => {
                            let field = field.name().to_string();
                            (record, ResponseShape::Wrapped(field))
                        }
                        _ => {
                            return Err(invalid(format!(
                                "the handler returns {} which can only be wrapped by a record with one field",
                                returns.describe()
                            )))
                        }
                    },
                    _ => (record, ResponseShape::Record),
                }
            }
            None => {
                let returns = returns.ok_or_else(|| SchemaError::MissingAnnotation {
                    endpoint: name.to_string(),
                    subject: "the return type".into(),
                })?;

                match returns.as_record() {
                    Some(record) => (record, ResponseShape::Record),
                    None => {
                        let decl = synthesize_record(
                            format!("{name}_Response"),
                            [("result", returns)],
                        );
                        (
                            synthesized(decl)?,
                            ResponseShape::Wrapped("result".into()),
                        )
                    }
                }
            }
        };

        Ok(Self {
            name,
            handler: handler.func,
            request,
            response,
            request_shape,
            response_shape,
            cardinality,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_type(&self) -> TypeDeclaration {
        TypeDeclaration::Record(self.request.clone())
    }

    pub fn response_type(&self) -> TypeDeclaration {
        TypeDeclaration::Record(self.response.clone())
    }

    pub fn request_record(&self) -> &Arc<RecordType> {
        &self.request
    }

    pub fn response_record(&self) -> &Arc<RecordType> {
        &self.response
    }

    pub fn request_streamed(&self) -> bool {
        self.cardinality.request_streamed()
    }

    pub fn response_streamed(&self) -> bool {
        self.cardinality.response_streamed()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("request", &self.request.name())
            .field("response", &self.response.name())
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

fn synthesized(decl: TypeDeclaration) -> Result<Arc<RecordType>, SchemaError> {
    decl.as_record().ok_or_else(|| SchemaError::UnsupportedType {
        ty: decl.describe(),
        reason: "synthesized types are always records".into(),
    })
}

/// The handler's parameters with the names given through [`Handler::params`] applied.
fn named_params(endpoint: &str, handler: &Handler) -> Result<Vec<Param>, SchemaError> {
    let mut params = handler.signature.params.clone();
    let Some(names) = &handler.names else {
        return Ok(params);
    };

    if names.len() < params.len() {
        return Err(SchemaError::MissingAnnotation {
            endpoint: endpoint.to_string(),
            subject: format!("the name of parameter {}", names.len() + 1),
        });
    }
    if names.len() > params.len() {
        return Err(SchemaError::InvalidSignature {
            endpoint: endpoint.to_string(),
            reason: format!(
                "{} parameter names were given for {} parameters",
                names.len(),
                params.len()
            ),
        });
    }

    let mut seen = BTreeSet::new();
    for (param, name) in params.iter_mut().zip(names) {
        if !is_identifier(name) {
            return Err(SchemaError::InvalidSignature {
                endpoint: endpoint.to_string(),
                reason: format!("parameter name '{name}' can't be used as a field name"),
            });
        }
        if !seen.insert(name.clone()) {
            return Err(SchemaError::InvalidSignature {
                endpoint: endpoint.to_string(),
                reason: format!("parameter name '{name}' is used more than once"),
            });
        }
        param.name = name.clone();
    }
    Ok(params)
}

/// Whether `name` is a valid proto identifier.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
