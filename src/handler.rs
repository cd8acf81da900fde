//! Type-erased handlers.
//!
//! A [`Handler`] is built from a plain Rust function or closure whose parameters and return value
//! implement [`Model`]. The types are captured into a [`Signature`] for schema inference, and the
//! function is erased into one of four shapes working on [`serde_value::Value`]s so the dispatcher
//! can call it without knowing anything about it.

use std::{borrow::Cow, fmt, future::Future, marker::PhantomData, sync::Arc};

use futures::{future::BoxFuture, stream::BoxStream, FutureExt, Stream, StreamExt, TryStreamExt};
use serde_value::Value;

use crate::{
    endpoint::{Cardinality, Param, Signature},
    stream::Streaming,
    types::{Model, TypeDeclaration},
    CallError, HandlerError, MarshalError,
};

pub(crate) type Inbound = BoxStream<'static, Result<Value, CallError>>;
pub(crate) type Outbound = BoxStream<'static, Result<Value, CallError>>;

type UnaryFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, CallError>> + Send + Sync;
type ServerStreamingFn = dyn Fn(Vec<Value>) -> Outbound + Send + Sync;
type ClientStreamingFn = dyn Fn(Inbound) -> BoxFuture<'static, Result<Value, CallError>> + Send + Sync;
type BidiStreamingFn = dyn Fn(Inbound) -> Outbound + Send + Sync;

#[derive(Clone)]
pub(crate) enum HandlerFn {
    Unary(Arc<UnaryFn>),
    ServerStreaming(Arc<ServerStreamingFn>),
    ClientStreaming(Arc<ClientStreamingFn>),
    BidiStreaming(Arc<BidiStreamingFn>),
}

impl HandlerFn {
    pub(crate) fn cardinality(&self) -> Cardinality {
        match self {
            Self::Unary(_) => Cardinality::Unary,
            Self::ServerStreaming(_) => Cardinality::ServerStreaming,
            Self::ClientStreaming(_) => Cardinality::ClientStreaming,
            Self::BidiStreaming(_) => Cardinality::BidiStreaming,
        }
    }
}

/// This exists solely to make Rust shut up about unconstrained generic types
pub struct Marker<A, R>(PhantomData<(A, R)>);

/// A function which can be called with positional arguments decoded from native values.
///
/// Implemented for every `Fn` taking up to six [`Model`] parameters.
pub trait HandlerFunction<TMarker>: Send + Sync + 'static {
    type Result;

    /// The declared types of the parameters, in order.
    fn params() -> Vec<TypeDeclaration>;

    fn exec(&self, args: Vec<Value>) -> Result<Self::Result, MarshalError>;
}

impl<F, R> HandlerFunction<Marker<(), R>> for F
where
    F: Fn() -> R + Send + Sync + 'static,
{
    type Result = R;

    fn params() -> Vec<TypeDeclaration> {
        Vec::new()
    }

    fn exec(&self, _: Vec<Value>) -> Result<Self::Result, MarshalError> {
        Ok(self())
    }
}

macro_rules! impl_handler_function {
    ($($arg:ident),+) => {
        impl<F, R, $($arg),+> HandlerFunction<Marker<($($arg,)+), R>> for F
        where
            F: Fn($($arg),+) -> R + Send + Sync + 'static,
            $($arg: Model,)+
        {
            type Result = R;

            fn params() -> Vec<TypeDeclaration> {
                vec![$($arg::reference()),+]
            }

            #[allow(non_snake_case)]
            fn exec(&self, args: Vec<Value>) -> Result<Self::Result, MarshalError> {
                let ($($arg,)+) = Value::Seq(args).deserialize_into::<($($arg,)+)>()?;
                Ok(self($($arg),+))
            }
        }
    };
}

impl_handler_function!(A1);
impl_handler_function!(A1, A2);
impl_handler_function!(A1, A2, A3);
impl_handler_function!(A1, A2, A3, A4);
impl_handler_function!(A1, A2, A3, A4, A5);
impl_handler_function!(A1, A2, A3, A4, A5, A6);

fn to_value<O: Model>(value: O) -> Result<Value, CallError> {
    serde_value::to_value(value).map_err(|err| CallError::Marshal(err.into()))
}

fn from_value<T: Model>(value: Value) -> Result<T, CallError> {
    value
        .deserialize_into::<T>()
        .map_err(|err| CallError::Marshal(err.into()))
}

fn typed_params(types: Vec<TypeDeclaration>) -> Vec<Param> {
    types
        .into_iter()
        .enumerate()
        .map(|(i, ty)| Param {
            name: Cow::Owned(format!("arg{i}")),
            ty: Some(ty),
        })
        .collect()
}

/// An erased handler together with everything known about its signature.
#[derive(Clone)]
pub struct Handler {
    pub(crate) signature: Signature,
    pub(crate) func: HandlerFn,
    pub(crate) names: Option<Vec<Cow<'static, str>>>,
}

impl Handler {
    /// A handler taking positional arguments and returning one value.
    ///
    /// ```rust
    /// use autorpc::{Handler, HandlerError};
    ///
    /// async fn add(a: i32, b: i32) -> Result<i32, HandlerError> {
    ///     Ok(a + b)
    /// }
    ///
    /// let handler = Handler::unary(add).params(["a", "b"]);
    /// ```
    pub fn unary<F, TMarker, Fut, O>(func: F) -> Self
    where
        F: HandlerFunction<TMarker, Result = Fut>,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
        O: Model,
    {
        let signature = Signature {
            params: typed_params(F::params()),
            returns: Some(O::reference()),
        };
        let func = HandlerFn::Unary(Arc::new(move |args: Vec<Value>| match func.exec(args) {
            Ok(fut) => async move { to_value(fut.await?) }.boxed(),
            Err(err) => futures::future::ready(Err(CallError::Marshal(err))).boxed(),
        }));

        Self {
            signature,
            func,
            names: None,
        }
    }

    /// A handler taking positional arguments and returning a stream of values.
    pub fn server_streaming<F, TMarker, S, O>(func: F) -> Self
    where
        F: HandlerFunction<TMarker, Result = S>,
        S: Stream<Item = Result<O, HandlerError>> + Send + 'static,
        O: Model,
    {
        let signature = Signature {
            params: typed_params(F::params()),
            returns: Some(O::reference()),
        };
        let func = HandlerFn::ServerStreaming(Arc::new(move |args: Vec<Value>| match func.exec(args) {
            Ok(stream) => stream
                .map(|item| item.map_err(CallError::from).and_then(to_value))
                .boxed(),
            Err(err) => futures::stream::once(async move { Err(CallError::Marshal(err)) }).boxed(),
        }));

        Self {
            signature,
            func,
            names: None,
        }
    }

    /// A handler consuming a stream of requests and returning one value.
    pub fn client_streaming<F, Fut, I, O>(func: F) -> Self
    where
        F: Fn(Streaming<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
        I: Model,
        O: Model,
    {
        let signature = Signature {
            params: typed_params(vec![I::reference()]),
            returns: Some(O::reference()),
        };
        let func = HandlerFn::ClientStreaming(Arc::new(move |inbound: Inbound| {
            let (requests, error) = Streaming::new(inbound.and_then(|v| async move { from_value(v) }));
            let fut = func(requests);
            async move {
                let result = fut.await;
                // A request which couldn't be decoded wins over whatever the handler made of
                // the shortened stream.
                if let Some(err) = error.take() {
                    return Err(err);
                }
                to_value(result?)
            }
            .boxed()
        }));

        Self {
            signature,
            func,
            names: None,
        }
    }

    /// A handler consuming a stream of requests and producing a stream of responses.
    pub fn bidi_streaming<F, S, I, O>(func: F) -> Self
    where
        F: Fn(Streaming<I>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<O, HandlerError>> + Send + 'static,
        I: Model,
        O: Model,
    {
        let signature = Signature {
            params: typed_params(vec![I::reference()]),
            returns: Some(O::reference()),
        };
        let func = HandlerFn::BidiStreaming(Arc::new(move |inbound: Inbound| {
            let (requests, error) = Streaming::new(inbound.and_then(|v| async move { from_value(v) }));
            let responses = func(requests).map(|item| item.map_err(CallError::from).and_then(to_value));
            let trailer = futures::stream::once(async move { error.take() })
                .filter_map(|err| async move { err.map(Err) });
            responses.chain(trailer).boxed()
        }));

        Self {
            signature,
            func,
            names: None,
        }
    }

    /// A unary handler working on native values directly, described by an explicit signature.
    pub fn dynamic_unary<F>(signature: Signature, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync + 'static,
    {
        Self {
            signature,
            func: HandlerFn::Unary(Arc::new(move |args: Vec<Value>| {
                func(args).map(|r| r.map_err(CallError::from)).boxed()
            })),
            names: None,
        }
    }

    pub fn dynamic_server_streaming<F>(signature: Signature, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> BoxStream<'static, Result<Value, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            signature,
            func: HandlerFn::ServerStreaming(Arc::new(move |args: Vec<Value>| {
                func(args).map_err(CallError::from).boxed()
            })),
            names: None,
        }
    }

    pub fn dynamic_client_streaming<F>(signature: Signature, func: F) -> Self
    where
        F: Fn(Streaming<Value>) -> BoxFuture<'static, Result<Value, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            signature,
            func: HandlerFn::ClientStreaming(Arc::new(move |inbound: Inbound| {
                let (requests, error) = Streaming::new(inbound);
                let fut = func(requests);
                async move {
                    let result = fut.await;
                    match error.take() {
                        Some(err) => Err(err),
                        None => result.map_err(CallError::from),
                    }
                }
                .boxed()
            })),
            names: None,
        }
    }

    pub fn dynamic_bidi_streaming<F>(signature: Signature, func: F) -> Self
    where
        F: Fn(Streaming<Value>) -> BoxStream<'static, Result<Value, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            signature,
            func: HandlerFn::BidiStreaming(Arc::new(move |inbound: Inbound| {
                let (requests, error) = Streaming::new(inbound);
                let trailer = futures::stream::once(async move { error.take() })
                    .filter_map(|err| async move { err.map(Err) });
                func(requests).map_err(CallError::from).chain(trailer).boxed()
            })),
            names: None,
        }
    }

    /// Name the parameters, in order. These become the field names of a synthesized request.
    ///
    /// Registration fails if the number of names doesn't match the number of parameters.
    pub fn params<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Cow<'static, str>>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn cardinality(&self) -> Cardinality {
        self.func.cardinality()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("cardinality", &self.cardinality())
            .field("params", &self.signature.params.len())
            .finish()
    }
}
