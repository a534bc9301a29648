pub mod registry;

use crate::dispatch::invoker::ProcessContext;
use crate::error::ProcessingError;
use crate::exchange::Exchange;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub type SharedProcessor = Arc<dyn Processor>;

/// The logic behind a destination.
///
/// A processor has exclusive access to the exchange for the duration of `process`. Work that
/// should happen later, or in parallel, is scheduled through the [`ProcessContext`]; the
/// exchange does not complete until every scheduled unit has finished.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        exchange: &mut Exchange,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessingError>;

    fn name(&self) -> &str;
}

/// A processor backed by a synchronous closure. Built with [`processor_fn`].
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), ProcessingError> + Send + Sync + 'static,
{
    async fn process(
        &self,
        exchange: &mut Exchange,
        _ctx: &ProcessContext,
    ) -> Result<(), ProcessingError> {
        (self.f)(exchange)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps a closure as a [`Processor`].
///
/// # Examples
/// ```rust
/// use idemio_dispatch::error::ProcessingError;
/// use idemio_dispatch::exchange::Exchange;
/// use idemio_dispatch::processor::processor_fn;
///
/// let echo = processor_fn("echo", |exchange: &mut Exchange| {
///     let body = exchange
///         .message()
///         .body_as::<String>()
///         .map_err(ProcessingError::from_error)?
///         .unwrap_or_default();
///     exchange.message_mut().set_body(format!("{body}{body}"));
///     Ok(())
/// });
/// ```
pub fn processor_fn<F>(name: impl Into<String>, f: F) -> FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), ProcessingError> + Send + Sync + 'static,
{
    FnProcessor {
        name: name.into(),
        f,
    }
}

/// Hands the exchange to `next` once at least `delay` has elapsed.
///
/// The wait happens on a timer, so no worker is held while delaying.
pub struct Delay {
    delay: Duration,
    next: SharedProcessor,
}

impl Delay {
    pub fn new(delay: Duration, next: impl Processor + 'static) -> Self {
        Self::shared(delay, Arc::new(next))
    }

    pub fn shared(delay: Duration, next: SharedProcessor) -> Self {
        Self { delay, next }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl Processor for Delay {
    async fn process(
        &self,
        _exchange: &mut Exchange,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessingError> {
        ctx.schedule(self.delay, self.next.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "delay"
    }
}
