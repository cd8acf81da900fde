//! Runtime dispatch of wire calls to registered handlers.
//!
//! A [`CallAdapter`] is built once per endpoint from the compiled schema. Every call, whatever
//! its cardinality, goes through [`CallAdapter::call`]: the request is one message or a stream of
//! them and the response is one future message or a stream of them.

use std::{fmt, sync::Arc};

use futures::{future::BoxFuture, stream::BoxStream, FutureExt, StreamExt};
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use serde_value::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    endpoint::{Endpoint, RequestShape, ResponseShape},
    handler::HandlerFn,
    marshal::{decode_record, encode_record},
    stream::Cancellable,
    translate::Translator,
    types::RecordType,
    wire::{compiler::method_cardinality, CompiledSchema},
    CallError, Cardinality, DispatchError, MarshalError,
};

mod servicer;

pub use servicer::Servicer;

pub type MessageStream = BoxStream<'static, Result<DynamicMessage, CallError>>;

/// Per call state handed over by the transport.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context which is cancelled together with `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub enum CallInput {
    Unary(DynamicMessage),
    Streaming(MessageStream),
}

impl fmt::Debug for CallInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(message) => f.debug_tuple("Unary").field(message).finish(),
            Self::Streaming(_) => f.debug_tuple("Streaming").finish_non_exhaustive(),
        }
    }
}

pub enum CallOutput {
    Unary(BoxFuture<'static, Result<DynamicMessage, CallError>>),
    Streaming(MessageStream),
}

impl fmt::Debug for CallOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => f.debug_tuple("Unary").finish_non_exhaustive(),
            Self::Streaming(_) => f.debug_tuple("Streaming").finish_non_exhaustive(),
        }
    }
}

/// Marshals calls for a single endpoint.
#[derive(Clone)]
pub struct CallAdapter(Arc<AdapterInner>);

struct AdapterInner {
    name: String,
    handler: HandlerFn,
    cardinality: Cardinality,
    request: Arc<RecordType>,
    request_descriptor: MessageDescriptor,
    request_shape: RequestShape,
    response: Arc<RecordType>,
    response_descriptor: MessageDescriptor,
    response_shape: ResponseShape,
}

impl CallAdapter {
    /// Pair an endpoint with its compiled method and messages.
    pub fn new(endpoint: &Endpoint, schema: &CompiledSchema) -> Result<Self, DispatchError> {
        let method = schema
            .method(endpoint.name())
            .ok_or_else(|| DispatchError::UnknownEndpoint(endpoint.name().to_string()))?;

        let compiled = method_cardinality(&method);
        if compiled != endpoint.cardinality() {
            return Err(DispatchError::CardinalityMismatch {
                method: endpoint.name().to_string(),
                compiled,
                registered: endpoint.cardinality(),
            });
        }

        let descriptor = |record: &RecordType, compiled: MessageDescriptor| {
            let name = Translator::message_name(record);
            if compiled.name() == name {
                Ok(compiled)
            } else {
                Err(DispatchError::MissingMessage(name))
            }
        };
        let request_descriptor = descriptor(endpoint.request_record(), method.input())?;
        let response_descriptor = descriptor(endpoint.response_record(), method.output())?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "built {} adapter for '{}' ({} -> {})",
            endpoint.cardinality(),
            endpoint.name(),
            request_descriptor.full_name(),
            response_descriptor.full_name()
        );

        Ok(Self(Arc::new(AdapterInner {
            name: endpoint.name().to_string(),
            handler: endpoint.handler.clone(),
            cardinality: endpoint.cardinality(),
            request: endpoint.request_record().clone(),
            request_descriptor,
            request_shape: endpoint.request_shape.clone(),
            response: endpoint.response_record().clone(),
            response_descriptor,
            response_shape: endpoint.response_shape.clone(),
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.0.cardinality
    }

    pub fn request_descriptor(&self) -> &MessageDescriptor {
        &self.0.request_descriptor
    }

    pub fn response_descriptor(&self) -> &MessageDescriptor {
        &self.0.response_descriptor
    }

    /// Run one call.
    ///
    /// Fails straight away if the input doesn't fit the endpoint's cardinality or a unary request
    /// can't be converted. Everything after that is reported through the returned output.
    pub fn call(&self, input: CallInput, ctx: CallContext) -> Result<CallOutput, CallError> {
        #[cfg(feature = "tracing")]
        tracing::debug!("dispatching {} call to '{}'", self.0.cardinality, self.0.name);

        let this = self.clone();
        let output = match (&self.0.handler, input) {
            (HandlerFn::Unary(func), CallInput::Unary(request)) => {
                let fut = func(self.arguments(&request)?);
                CallOutput::Unary(async move { this.response(fut.await?) }.boxed())
            }
            (HandlerFn::ServerStreaming(func), CallInput::Unary(request)) => {
                let responses = func(self.arguments(&request)?);
                CallOutput::Streaming(
                    Cancellable::new(responses, ctx.token.clone())
                        .map(move |item| item.and_then(|value| this.response(value)))
                        .boxed(),
                )
            }
            (HandlerFn::ClientStreaming(func), CallInput::Streaming(requests)) => {
                let fut = func(self.inbound(requests, &ctx));
                CallOutput::Unary(
                    async move {
                        let value = fut.await?;
                        // Cancellation cuts the request stream short, so whatever the handler
                        // made of it isn't the answer to the call.
                        if ctx.is_cancelled() {
                            return Err(CallError::Cancelled);
                        }
                        this.response(value)
                    }
                    .boxed(),
                )
            }
            (HandlerFn::BidiStreaming(func), CallInput::Streaming(requests)) => {
                let responses = func(self.inbound(requests, &ctx));
                CallOutput::Streaming(
                    Cancellable::new(responses, ctx.token.clone())
                        .map(move |item| item.and_then(|value| this.response(value)))
                        .boxed(),
                )
            }
            _ => {
                return Err(CallError::WrongCardinality {
                    method: self.0.name.clone(),
                    cardinality: self.0.cardinality,
                })
            }
        };

        Ok(output)
    }

    /// Call a unary endpoint.
    pub async fn unary(
        &self,
        request: DynamicMessage,
        ctx: CallContext,
    ) -> Result<DynamicMessage, CallError> {
        match self.call(CallInput::Unary(request), ctx)? {
            CallOutput::Unary(fut) => fut.await,
            CallOutput::Streaming(_) => Err(self.wrong_cardinality()),
        }
    }

    /// Call a server streaming endpoint.
    pub fn server_streaming(
        &self,
        request: DynamicMessage,
        ctx: CallContext,
    ) -> Result<MessageStream, CallError> {
        match self.call(CallInput::Unary(request), ctx)? {
            CallOutput::Streaming(stream) => Ok(stream),
            CallOutput::Unary(_) => Err(self.wrong_cardinality()),
        }
    }

    /// Call a client streaming endpoint.
    pub async fn client_streaming(
        &self,
        requests: MessageStream,
        ctx: CallContext,
    ) -> Result<DynamicMessage, CallError> {
        match self.call(CallInput::Streaming(requests), ctx)? {
            CallOutput::Unary(fut) => fut.await,
            CallOutput::Streaming(_) => Err(self.wrong_cardinality()),
        }
    }

    /// Call a bidirectional streaming endpoint.
    pub fn bidi_streaming(
        &self,
        requests: MessageStream,
        ctx: CallContext,
    ) -> Result<MessageStream, CallError> {
        match self.call(CallInput::Streaming(requests), ctx)? {
            CallOutput::Streaming(stream) => Ok(stream),
            CallOutput::Unary(_) => Err(self.wrong_cardinality()),
        }
    }

    fn wrong_cardinality(&self) -> CallError {
        CallError::WrongCardinality {
            method: self.0.name.clone(),
            cardinality: self.0.cardinality,
        }
    }

    fn request_value(&self, request: &DynamicMessage) -> Result<Value, CallError> {
        let expected = &self.0.request_descriptor;
        if request.descriptor().full_name() != expected.full_name() {
            return Err(CallError::Marshal(MarshalError::WrongMessage {
                expected: expected.full_name().to_string(),
                found: request.descriptor().full_name().to_string(),
            }));
        }

        Ok(decode_record(request, &self.0.request)?)
    }

    /// The handler's positional arguments for one request.
    fn arguments(&self, request: &DynamicMessage) -> Result<Vec<Value>, CallError> {
        let value = self.request_value(request)?;
        match &self.0.request_shape {
            RequestShape::Record => Ok(vec![value]),
            RequestShape::Arguments(names) => {
                let Value::Map(mut fields) = value else {
                    return Err(self.not_a_record());
                };
                names
                    .iter()
                    .map(|name| {
                        fields.remove(&Value::String(name.clone())).ok_or_else(|| {
                            CallError::Marshal(MarshalError::MissingField {
                                message: self.0.request.name().to_string(),
                                field: name.clone(),
                            })
                        })
                    })
                    .collect()
            }
        }
    }

    /// Convert a request stream into the native stream a streaming handler consumes.
    fn inbound(
        &self,
        requests: MessageStream,
        ctx: &CallContext,
    ) -> BoxStream<'static, Result<Value, CallError>> {
        let this = self.clone();
        Cancellable::new(requests, ctx.token.clone())
            .map(move |request| {
                let mut arguments = this.arguments(&request?)?;
                match arguments.pop() {
                    Some(value) if arguments.is_empty() => Ok(value),
                    _ => Err(this.not_a_record()),
                }
            })
            .boxed()
    }

    fn response(&self, value: Value) -> Result<DynamicMessage, CallError> {
        let value = match &self.0.response_shape {
            ResponseShape::Record => value,
            ResponseShape::Wrapped(field) => {
                Value::Map([(Value::String(field.clone()), value)].into_iter().collect())
            }
        };

        let result = encode_record(value, &self.0.response, &self.0.response_descriptor);
        #[cfg(feature = "tracing")]
        if let Err(err) = &result {
            tracing::error!("error encoding response of '{}': {err}", self.0.name);
        }
        Ok(result?)
    }

    fn not_a_record(&self) -> CallError {
        CallError::Marshal(MarshalError::NotARecord {
            message: self.0.request.name().to_string(),
            found: "a value without fields".into(),
        })
    }
}

impl fmt::Debug for CallAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallAdapter")
            .field("name", &self.0.name)
            .field("cardinality", &self.0.cardinality)
            .field("request", &self.0.request_descriptor.full_name())
            .field("response", &self.0.response_descriptor.full_name())
            .finish()
    }
}
