use crate::config::DispatchConfig;
use crate::dispatch::completion::Completion;
use crate::dispatch::handle::ResultHandle;
use crate::dispatch::invoker::{InvocationMode, PipelineInvoker};
use crate::error::DispatchError;
use crate::exchange::convert::FromValue;
use crate::exchange::listener::CompletionListener;
use crate::exchange::{Exchange, ExchangePattern, Headers};
use crate::logger::{self, Component};
use crate::pool::WorkerPool;
use crate::processor::registry::DestinationResolver;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The entry point for sending exchanges to named destinations.
///
/// Synchronous operations are `async fn`s that resolve once the exchange has completed,
/// including any work the destination scheduled. Asynchronous operations are plain functions
/// that hand the exchange to a worker and return a [`ResultHandle`] straight away.
///
/// Both forms report failures with the same [`DispatchError`] that is stored on the exchange
/// and given to listeners.
///
/// # Examples
/// ```rust
/// use idemio_dispatch::config::WorkerPoolConfig;
/// use idemio_dispatch::dispatch::template::DispatchTemplate;
/// use idemio_dispatch::error::ProcessingError;
/// use idemio_dispatch::exchange::Exchange;
/// use idemio_dispatch::pool::WorkerPool;
/// use idemio_dispatch::processor::processor_fn;
/// use idemio_dispatch::processor::registry::DestinationRegistry;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = DestinationRegistry::new();
/// registry
///     .register("echo", processor_fn("echo", |exchange: &mut Exchange| {
///         let body = exchange
///             .message()
///             .body_as::<String>()
///             .map_err(ProcessingError::from_error)?
///             .unwrap_or_default();
///         exchange.message_mut().set_body(format!("{body}{body}"));
///         Ok(())
///     }))
///     .unwrap();
///
/// let pool = WorkerPool::new(&WorkerPoolConfig::new("default", 4));
/// let template = DispatchTemplate::new(Arc::new(registry), pool);
///
/// let handle = template.async_request_body::<String>("echo", "Hi");
/// assert_eq!(handle.get().await.unwrap().as_deref(), Some("HiHi"));
/// template.shutdown().await;
/// # }
/// ```
pub struct DispatchTemplate {
    resolver: Arc<dyn DestinationResolver>,
    invoker: PipelineInvoker,
}

impl DispatchTemplate {
    /// Creates a template that runs destinations without a dedicated pool on `pool`.
    pub fn new(resolver: Arc<dyn DestinationResolver>, pool: WorkerPool) -> Self {
        Self {
            resolver,
            invoker: PipelineInvoker::new(pool),
        }
    }

    /// Creates a template whose shared pool is sized by `config.pool`.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    pub fn from_config(config: &DispatchConfig, resolver: Arc<dyn DestinationResolver>) -> Self {
        Self::new(resolver, WorkerPool::new(&config.pool))
    }

    pub fn pool(&self) -> &WorkerPool {
        self.invoker.default_pool()
    }

    /// Sends `exchange` to `destination` and waits for it to complete.
    ///
    /// # Errors
    /// Returns the failure the exchange completed with.
    pub async fn send(
        &self,
        destination: &str,
        exchange: Exchange,
    ) -> Result<Arc<Exchange>, DispatchError> {
        let completion = Arc::new(Completion::new(*exchange.id()));
        match self.resolver.resolve(destination) {
            Ok(target) => {
                self.invoker
                    .invoke(exchange, &target, InvocationMode::Sync, completion.clone())
                    .await
            }
            Err(err) => reject(exchange, err, &completion),
        }
        let exchange = completion.wait().await;
        match exchange.failure() {
            Some(err) => Err(err.clone()),
            None => Ok(exchange),
        }
    }

    /// Sends a one-way exchange carrying `body`.
    pub async fn send_body(
        &self,
        destination: &str,
        body: impl Into<Value>,
    ) -> Result<Arc<Exchange>, DispatchError> {
        self.send(destination, one_way(body)).await
    }

    /// Sends a fresh one-way exchange after `populate` has filled it in.
    pub async fn send_with(
        &self,
        destination: &str,
        populate: impl FnOnce(&mut Exchange),
    ) -> Result<Arc<Exchange>, DispatchError> {
        self.send(destination, populated(populate)).await
    }

    /// Sends a request-reply exchange and converts the reply body to `T`.
    pub async fn request_body<T>(
        &self,
        destination: &str,
        body: impl Into<Value>,
    ) -> Result<Option<T>, DispatchError>
    where
        T: FromValue,
    {
        self.request_body_and_headers(destination, body, Headers::default())
            .await
    }

    pub async fn request_body_and_headers<T>(
        &self,
        destination: &str,
        body: impl Into<Value>,
        headers: Headers,
    ) -> Result<Option<T>, DispatchError>
    where
        T: FromValue,
    {
        let exchange = self.send(destination, request_reply(body, headers)).await?;
        Ok(exchange.message().body_as::<T>()?)
    }

    /// Hands `exchange` to `destination` and returns without waiting.
    pub fn async_send(&self, destination: &str, exchange: Exchange) -> ResultHandle<Arc<Exchange>> {
        self.dispatch(destination, exchange, |exchange| Ok(exchange.clone()))
    }

    pub fn async_send_body(
        &self,
        destination: &str,
        body: impl Into<Value>,
    ) -> ResultHandle<Arc<Exchange>> {
        self.async_send(destination, one_way(body))
    }

    pub fn async_send_with(
        &self,
        destination: &str,
        populate: impl FnOnce(&mut Exchange),
    ) -> ResultHandle<Arc<Exchange>> {
        self.async_send(destination, populated(populate))
    }

    /// Sends a request-reply exchange without waiting. The handle resolves to the reply body
    /// converted to `T`, or to `DispatchError::TypeConversion` if it cannot be converted.
    pub fn async_request_body<T>(&self, destination: &str, body: impl Into<Value>) -> ResultHandle<Option<T>>
    where
        T: FromValue + Send + Sync + 'static,
    {
        self.async_request_body_and_headers(destination, body, Headers::default())
    }

    pub fn async_request_body_and_header<T>(
        &self,
        destination: &str,
        body: impl Into<Value>,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> ResultHandle<Option<T>>
    where
        T: FromValue + Send + Sync + 'static,
    {
        let mut headers = Headers::default();
        headers.insert(name.into(), value.into());
        self.async_request_body_and_headers(destination, body, headers)
    }

    pub fn async_request_body_and_headers<T>(
        &self,
        destination: &str,
        body: impl Into<Value>,
        headers: Headers,
    ) -> ResultHandle<Option<T>>
    where
        T: FromValue + Send + Sync + 'static,
    {
        self.dispatch(destination, request_reply(body, headers), |exchange| {
            Ok(exchange.message().body_as::<T>()?)
        })
    }

    /// Hands `exchange` to `destination` with `listener` attached before dispatch begins.
    pub fn async_callback(
        &self,
        destination: &str,
        mut exchange: Exchange,
        listener: impl CompletionListener + 'static,
    ) -> ResultHandle<Arc<Exchange>> {
        attach(&mut exchange, listener);
        self.async_send(destination, exchange)
    }

    pub fn async_callback_with(
        &self,
        destination: &str,
        populate: impl FnOnce(&mut Exchange),
        listener: impl CompletionListener + 'static,
    ) -> ResultHandle<Arc<Exchange>> {
        self.async_callback(destination, populated(populate), listener)
    }

    /// Sends a one-way exchange with `listener` attached. One-way exchanges have no reply, so
    /// the handle resolves to `None` on success.
    pub fn async_callback_send_body(
        &self,
        destination: &str,
        body: impl Into<Value>,
        listener: impl CompletionListener + 'static,
    ) -> ResultHandle<Option<Value>> {
        self.callback_body(destination, one_way(body), listener)
    }

    /// Sends a request-reply exchange with `listener` attached. The handle resolves to the
    /// reply body.
    pub fn async_callback_request_body(
        &self,
        destination: &str,
        body: impl Into<Value>,
        listener: impl CompletionListener + 'static,
    ) -> ResultHandle<Option<Value>> {
        self.callback_body(destination, request_reply(body, Headers::default()), listener)
    }

    /// Stops the shared pool and waits for the work already on it.
    pub async fn shutdown(&self) {
        let pool = self.invoker.default_pool();
        pool.shutdown();
        pool.drain().await;
    }

    fn callback_body(
        &self,
        destination: &str,
        mut exchange: Exchange,
        listener: impl CompletionListener + 'static,
    ) -> ResultHandle<Option<Value>> {
        attach(&mut exchange, listener);
        self.dispatch(destination, exchange, |exchange| {
            Ok(match exchange.pattern() {
                ExchangePattern::OneWay => None,
                ExchangePattern::RequestReply => exchange.message().body().cloned(),
            })
        })
    }

    fn dispatch<T, F>(&self, destination: &str, exchange: Exchange, extract: F) -> ResultHandle<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Arc<Exchange>) -> Result<T, DispatchError> + Send + 'static,
    {
        let handle = ResultHandle::with_extractor(*exchange.id(), move |exchange: &Arc<Exchange>| {
            match exchange.failure() {
                Some(err) => Err(err.clone()),
                None => extract(exchange),
            }
        });
        let completion = handle.completion().clone();
        match self.resolver.resolve(destination) {
            Ok(target) => self.invoker.submit(exchange, &target, completion),
            Err(err) => reject(exchange, err, &completion),
        }
        handle
    }
}

impl Debug for DispatchTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTemplate")
            .field("pool", self.invoker.default_pool())
            .finish()
    }
}

fn one_way(body: impl Into<Value>) -> Exchange {
    Exchange::create(ExchangePattern::OneWay, Some(body.into()), Headers::default())
}

fn request_reply(body: impl Into<Value>, headers: Headers) -> Exchange {
    Exchange::create(ExchangePattern::RequestReply, Some(body.into()), headers)
}

fn populated(populate: impl FnOnce(&mut Exchange)) -> Exchange {
    let mut exchange = Exchange::new(ExchangePattern::OneWay);
    populate(&mut exchange);
    exchange
}

fn attach(exchange: &mut Exchange, listener: impl CompletionListener + 'static) {
    if let Err(err) = exchange.add_listener(listener) {
        logger::warn(Component::Template, Some(exchange.id()), err.to_string());
    }
}

/// Completes an exchange that could not be dispatched, so listeners and handles observe the
/// failure like any other.
fn reject(mut exchange: Exchange, err: DispatchError, completion: &Completion) {
    logger::debug(Component::Template, Some(exchange.id()), err.to_string());
    exchange.set_failure(err);
    if let Err(err) = completion.complete(exchange) {
        logger::error(Component::Template, Some(completion.exchange_id()), err.to_string());
    }
}
