use crate::dispatch::completion::Completion;
use crate::dispatch::latch::Latch;
use crate::error::DispatchError;
use crate::exchange::Exchange;
use crate::exchange::convert::{FromValue, convert};
use crate::exchange::listener::CompletionListener;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Resolved values that carry a message body.
pub trait ExtractBody {
    fn extract_body(&self) -> Option<&Value>;
}

impl ExtractBody for Arc<Exchange> {
    fn extract_body(&self) -> Option<&Value> {
        self.message().body()
    }
}

impl ExtractBody for Option<Value> {
    fn extract_body(&self) -> Option<&Value> {
        self.as_ref()
    }
}

/// The eventual result of an asynchronous dispatch.
///
/// The handle resolves exactly once, when the exchange completes or is cancelled. Every
/// clone observes the same value, and reading it any number of times returns the same result.
///
/// # Examples
/// ```rust,no_run
/// # use idemio_dispatch::dispatch::template::DispatchTemplate;
/// # async fn example(template: DispatchTemplate) -> Result<(), idemio_dispatch::error::DispatchError> {
/// let handle = template.async_request_body::<String>("echo", "Hi");
/// // ... other work ...
/// let reply = handle.get().await?;
/// assert_eq!(reply.as_deref(), Some("HiHi"));
/// # Ok(())
/// # }
/// ```
pub struct ResultHandle<T> {
    slot: Arc<Latch<Result<T, DispatchError>>>,
    completion: Arc<Completion>,
}

impl<T> ResultHandle<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a handle and the coordinator that resolves it. `extract` runs once, on the
    /// terminal exchange.
    pub(crate) fn with_extractor<F>(exchange_id: Uuid, extract: F) -> Self
    where
        F: FnOnce(&Arc<Exchange>) -> Result<T, DispatchError> + Send + 'static,
    {
        let slot = Arc::new(Latch::new());
        let resolved = slot.clone();
        let completion = Completion::with_resolver(
            exchange_id,
            Box::new(move |exchange: &Arc<Exchange>| {
                // A cancelled handle is already resolved.
                let _ = resolved.set(extract(exchange));
            }),
        );
        Self {
            slot,
            completion: Arc::new(completion),
        }
    }

    pub(crate) fn completion(&self) -> &Arc<Completion> {
        &self.completion
    }

    pub fn exchange_id(&self) -> &Uuid {
        self.completion.exchange_id()
    }

    /// Waits for the result.
    pub async fn get(&self) -> Result<T, DispatchError>
    where
        T: Clone,
    {
        self.slot.wait().await.clone()
    }

    /// Waits at most `timeout` for the result.
    ///
    /// # Errors
    /// Returns `DispatchError::Timeout` if the result is not available in time. The exchange
    /// keeps running and a later `get` returns its result.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, DispatchError>
    where
        T: Clone,
    {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::timeout(timeout)),
        }
    }

    /// The result if already available.
    pub fn try_get(&self) -> Option<Result<T, DispatchError>>
    where
        T: Clone,
    {
        self.slot.get().cloned()
    }

    pub fn is_done(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Waits for the result and converts its body to `U`.
    ///
    /// # Errors
    /// Returns the dispatch failure if the exchange failed, or `DispatchError::TypeConversion`
    /// if the body cannot be converted.
    pub async fn try_extract<U>(&self) -> Result<Option<U>, DispatchError>
    where
        T: ExtractBody,
        U: FromValue,
    {
        match self.slot.wait().await {
            Ok(value) => Ok(convert(value.extract_body())?),
            Err(err) => Err(err.clone()),
        }
    }

    /// Registers a listener on the exchange behind this handle.
    ///
    /// # Errors
    /// Returns `DispatchError::LateRegistration` if the exchange already completed. The
    /// listener has been invoked with the terminal state by then.
    pub fn add_listener(&self, listener: impl CompletionListener + 'static) -> Result<(), DispatchError> {
        self.completion.register(listener)
    }

    /// Cancels the dispatch if it has not completed yet.
    ///
    /// The handle resolves to `DispatchError::Cancelled` immediately. Processors already
    /// running are not interrupted; when the exchange completes it does so with the same
    /// failure, so listeners never see a success.
    pub fn cancel(&self) -> bool {
        if !self.completion.cancel() {
            return false;
        }
        let _ = self
            .slot
            .set(Err(DispatchError::cancelled(*self.completion.exchange_id())));
        true
    }
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            completion: self.completion.clone(),
        }
    }
}

impl<T> Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("exchange_id", self.completion.exchange_id())
            .field("done", &self.slot.get().is_some())
            .finish()
    }
}
