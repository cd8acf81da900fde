//! The seam between a [`Servicer`] and whatever carries calls to it.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use futures::{future::BoxFuture, FutureExt, Stream, StreamExt};
use prost_reflect::DynamicMessage;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    dispatch::{CallAdapter, CallContext, MessageStream, Servicer},
    wire, CallError, HandlerError, ServeConfig,
};

/// A server framework a [`Servicer`] can be registered with.
pub trait Transport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply the serving options which belong to the transport, like the worker pool size.
    /// Called before anything is registered.
    fn configure(&mut self, config: &ServeConfig) -> Result<(), Self::Error> {
        let _ = config;
        Ok(())
    }

    fn register_servicer(&mut self, servicer: Servicer) -> Result<(), Self::Error>;

    fn bind(&mut self, host: &str, port: u16) -> Result<(), Self::Error>;

    fn start(&mut self) -> Result<(), Self::Error>;

    /// Resolves once the transport has shut down.
    fn await_termination(&mut self) -> BoxFuture<'_, Result<(), Self::Error>>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("a servicer is already registered")]
    AlreadyRegistered,
    #[error("no servicer has been registered")]
    NoServicer,
    #[error("the transport has not been bound to an address")]
    NotBound,
    #[error("the transport has already been started")]
    AlreadyStarted,
}

/// An in-process transport.
///
/// Calls are made through a [`LocalChannel`] and each one runs on its own task. At most
/// `max_concurrent_calls` run at once, the rest wait for a free worker. Cloning gives another
/// handle to the same transport.
#[derive(Clone)]
pub struct LocalTransport {
    shared: Arc<Shared>,
}

struct Shared {
    servicer: OnceLock<Servicer>,
    address: OnceLock<(String, u16)>,
    started: AtomicBool,
    workers: Arc<Semaphore>,
    pool_size: AtomicUsize,
    shutdown: CancellationToken,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(10)
    }
}

impl LocalTransport {
    pub fn new(max_concurrent_calls: usize) -> Self {
        let pool_size = max_concurrent_calls.max(1);
        Self {
            shared: Arc::new(Shared {
                servicer: OnceLock::new(),
                address: OnceLock::new(),
                started: AtomicBool::new(false),
                workers: Arc::new(Semaphore::new(pool_size)),
                pool_size: AtomicUsize::new(pool_size),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn from_config(config: &ServeConfig) -> Self {
        Self::new(config.get_max_concurrent_calls())
    }

    /// A client for this transport. Calls fail with [`CallError::Unavailable`] until it is started.
    pub fn channel(&self) -> LocalChannel {
        LocalChannel {
            shared: self.shared.clone(),
        }
    }

    /// The number of calls which can run at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.shared.pool_size.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn address(&self) -> Option<(&str, u16)> {
        self.shared
            .address
            .get()
            .map(|(host, port)| (host.as_str(), *port))
    }

    /// Stop accepting calls and cancel the ones in flight.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("shutting down local transport");

        self.shared.workers.close();
        self.shared.shutdown.cancel();
    }
}

impl Transport for LocalTransport {
    type Error = TransportError;

    fn configure(&mut self, config: &ServeConfig) -> Result<(), Self::Error> {
        if self.shared.started.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        // Nothing runs before start, so every permit is still available to resize with.
        let wanted = config.get_max_concurrent_calls().max(1);
        let current = self.shared.pool_size.swap(wanted, Ordering::SeqCst);
        if wanted > current {
            self.shared.workers.add_permits(wanted - current);
        } else {
            self.shared.workers.forget_permits(current - wanted);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("local transport pool resized from {current} to {wanted} workers");

        Ok(())
    }

    fn register_servicer(&mut self, servicer: Servicer) -> Result<(), Self::Error> {
        self.shared
            .servicer
            .set(servicer)
            .map_err(|_| TransportError::AlreadyRegistered)
    }

    fn bind(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        if self.shared.started.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        // Rebinding before start just keeps the first address.
        let _ = self.shared.address.set((host.to_string(), port));
        Ok(())
    }

    fn start(&mut self) -> Result<(), Self::Error> {
        let servicer = self
            .shared
            .servicer
            .get()
            .ok_or(TransportError::NoServicer)?;
        let (host, port) = self.address().ok_or(TransportError::NotBound)?;
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        #[cfg(feature = "tracing")]
        tracing::info!("serving '{}' on {host}:{port}", servicer.name());
        #[cfg(not(feature = "tracing"))]
        let _ = (servicer, host, port);

        Ok(())
    }

    fn await_termination(&mut self) -> BoxFuture<'_, Result<(), Self::Error>> {
        let shutdown = self.shared.shutdown.clone();
        async move {
            shutdown.cancelled().await;
            Ok(())
        }
        .boxed()
    }
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport")
            .field("servicer", &self.shared.servicer.get())
            .field("address", &self.shared.address.get())
            .field("started", &self.shared.started.load(Ordering::SeqCst))
            .field("max_concurrent_calls", &self.max_concurrent_calls())
            .finish()
    }
}

/// Issues calls of any cardinality to a [`LocalTransport`] by method name.
#[derive(Clone)]
pub struct LocalChannel {
    shared: Arc<Shared>,
}

impl LocalChannel {
    /// Build a request message for `method` from a JSON object.
    pub fn request(
        &self,
        method: &str,
        json: serde_json::Value,
    ) -> Result<DynamicMessage, CallError> {
        let adapter = self.adapter(method)?;
        Ok(wire::from_json(adapter.request_descriptor(), json)?)
    }

    pub async fn unary(
        &self,
        method: &str,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, CallError> {
        let (adapter, permit, ctx) = self.prepare(method).await?;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let token = ctx.token().clone();
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(CallError::Cancelled),
                result = adapter.unary(request, ctx) => result,
            }
        });

        let result = handle.await.unwrap_or_else(|err| {
            Err(CallError::Handler(HandlerError::new(format!(
                "the call failed to complete: {err}"
            ))))
        });
        log_failure(method, &result);
        result
    }

    /// Call a unary method with JSON in and out.
    pub async fn unary_json(
        &self,
        method: &str,
        json: serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        let request = self.request(method, json)?;
        let response = self.unary(method, request).await?;
        Ok(wire::to_json(&response)?)
    }

    pub async fn server_streaming(
        &self,
        method: &str,
        request: DynamicMessage,
    ) -> Result<MessageStream, CallError> {
        let (adapter, permit, ctx) = self.prepare(method).await?;
        let responses = adapter.server_streaming(request, ctx.clone())?;
        Ok(forward(responses, permit, ctx))
    }

    pub async fn client_streaming<S>(
        &self,
        method: &str,
        requests: S,
    ) -> Result<DynamicMessage, CallError>
    where
        S: Stream<Item = DynamicMessage> + Send + 'static,
    {
        let (adapter, permit, ctx) = self.prepare(method).await?;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let token = ctx.token().clone();
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(CallError::Cancelled),
                result = adapter.client_streaming(requests.map(Ok).boxed(), ctx) => result,
            }
        });

        let result = handle.await.unwrap_or_else(|err| {
            Err(CallError::Handler(HandlerError::new(format!(
                "the call failed to complete: {err}"
            ))))
        });
        log_failure(method, &result);
        result
    }

    pub async fn bidi_streaming<S>(
        &self,
        method: &str,
        requests: S,
    ) -> Result<MessageStream, CallError>
    where
        S: Stream<Item = DynamicMessage> + Send + 'static,
    {
        let (adapter, permit, ctx) = self.prepare(method).await?;
        let responses = adapter.bidi_streaming(requests.map(Ok).boxed(), ctx.clone())?;
        Ok(forward(responses, permit, ctx))
    }

    fn adapter(&self, method: &str) -> Result<CallAdapter, CallError> {
        let servicer = self.shared.servicer.get().ok_or(CallError::Unavailable)?;
        Ok(servicer.method(method)?.clone())
    }

    async fn prepare(
        &self,
        method: &str,
    ) -> Result<(CallAdapter, OwnedSemaphorePermit, CallContext), CallError> {
        if !self.shared.started.load(Ordering::SeqCst) || self.shared.shutdown.is_cancelled() {
            return Err(CallError::Unavailable);
        }
        let adapter = self.adapter(method)?;
        let permit = self
            .shared
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CallError::Unavailable)?;
        let ctx = CallContext::with_token(self.shared.shutdown.child_token());
        Ok((adapter, permit, ctx))
    }
}

impl fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChannel").finish_non_exhaustive()
    }
}

/// Drive a response stream on its own worker, handing each message over as soon as it's ready.
///
/// Dropping the returned stream cancels the call.
fn forward(
    mut responses: MessageStream,
    permit: OwnedSemaphorePermit,
    ctx: CallContext,
) -> MessageStream {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _permit = permit;
        loop {
            let item = tokio::select! {
                _ = tx.closed() => None,
                item = responses.next() => item,
            };
            let Some(item) = item else {
                break;
            };

            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
        // The caller may have gone away before the handler finished.
        ctx.cancel();
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

fn log_failure<T>(method: &str, result: &Result<T, CallError>) {
    #[cfg(feature = "tracing")]
    if let Err(err) = result {
        tracing::error!("call to '{method}' failed: {err}");
    }
    #[cfg(not(feature = "tracing"))]
    let _ = (method, result);
}
