use crate::dispatch::completion::Completion;
use crate::error::{DispatchError, ProcessingError};
use crate::exchange::Exchange;
use crate::logger::{self, Component};
use crate::pool::pending::PendingWork;
use crate::pool::{Task, WorkerPool};
use crate::processor::SharedProcessor;
use crate::processor::registry::Destination;
use futures_util::FutureExt;
use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// The processor runs on the caller's task and `invoke` returns after completion.
    Sync,
    /// The processor runs on a worker and `invoke` returns immediately.
    Async,
}

/// Runs a destination's processor against an exchange and drives it to completion.
#[derive(Debug, Clone)]
pub struct PipelineInvoker {
    default_pool: WorkerPool,
}

impl PipelineInvoker {
    pub fn new(default_pool: WorkerPool) -> Self {
        Self { default_pool }
    }

    pub fn default_pool(&self) -> &WorkerPool {
        &self.default_pool
    }

    /// Invokes `destination` with `exchange`.
    ///
    /// `completion` receives the exchange once the processor and all work it scheduled have
    /// finished. In `Sync` mode this call returns only after that has happened.
    pub async fn invoke(
        &self,
        exchange: Exchange,
        destination: &Destination,
        mode: InvocationMode,
        completion: Arc<Completion>,
    ) {
        match mode {
            InvocationMode::Sync => {
                let in_flight = self.in_flight(exchange, destination, completion.clone());
                in_flight.pending.enter();
                in_flight.run(destination.processor().clone()).await;
                completion.wait().await;
            }
            InvocationMode::Async => self.submit(exchange, destination, completion),
        }
    }

    /// Hands `exchange` to the destination's pool without waiting.
    pub fn submit(&self, exchange: Exchange, destination: &Destination, completion: Arc<Completion>) {
        let in_flight = self.in_flight(exchange, destination, completion);
        let pool = in_flight.pool.clone();
        in_flight.spawn(&pool, Duration::ZERO, destination.processor().clone());
    }

    fn in_flight(
        &self,
        exchange: Exchange,
        destination: &Destination,
        completion: Arc<Completion>,
    ) -> Arc<InFlight> {
        let pool = destination
            .pool()
            .unwrap_or(&self.default_pool)
            .clone();
        logger::debug(
            Component::Invoker,
            Some(exchange.id()),
            format!(
                "Dispatching to '{}' on worker pool '{}'",
                destination.name(),
                pool.name()
            ),
        );
        Arc::new(InFlight {
            exchange_id: *exchange.id(),
            exchange: Mutex::new(Some(exchange)),
            pending: PendingWork::new(),
            completion,
            pool,
        })
    }
}

/// An exchange that is being processed.
///
/// Every unit of work touching the exchange is counted in `pending`. The unit that brings the
/// count back to zero hands the exchange to the completion coordinator.
pub(crate) struct InFlight {
    exchange_id: Uuid,
    exchange: Mutex<Option<Exchange>>,
    pending: PendingWork,
    completion: Arc<Completion>,
    pool: WorkerPool,
}

impl InFlight {
    fn spawn(self: &Arc<Self>, pool: &WorkerPool, delay: Duration, processor: SharedProcessor) {
        self.pending.enter();
        let run = self.clone();
        let rejected = self.clone();
        pool.submit(
            Task::new(async move { run.run(processor).await })
                .on_reject(move |err| async move { rejected.reject(err).await }),
            delay,
        );
    }

    async fn run(self: Arc<Self>, processor: SharedProcessor) {
        let ctx = ProcessContext {
            in_flight: self.clone(),
        };
        {
            let mut guard = self.exchange.lock().await;
            if let Some(exchange) = guard.as_mut() {
                if exchange.is_failed() || self.completion.is_cancelled() {
                    logger::debug(
                        Component::Invoker,
                        Some(&self.exchange_id),
                        format!("Skipping '{}', exchange failed or cancelled", processor.name()),
                    );
                } else {
                    let result = AssertUnwindSafe(processor.process(exchange, &ctx))
                        .catch_unwind()
                        .await;
                    let failure = match result {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err),
                        Err(payload) => Some(ProcessingError::panicked(processor.name(), payload)),
                    };
                    if let Some(err) = failure {
                        logger::debug(
                            Component::Invoker,
                            Some(&self.exchange_id),
                            format!("Processor '{}' failed: {}", processor.name(), err),
                        );
                        exchange.set_failure(DispatchError::processing_error(&self.exchange_id, err));
                    }
                }
            }
        }
        self.leave().await;
    }

    async fn reject(&self, err: DispatchError) {
        {
            let mut guard = self.exchange.lock().await;
            if let Some(exchange) = guard.as_mut() {
                if !exchange.is_failed() {
                    exchange.set_failure(err);
                }
            }
        }
        self.leave().await;
    }

    async fn leave(&self) {
        if !self.pending.leave() {
            return;
        }
        let exchange = self.exchange.lock().await.take();
        match exchange {
            Some(exchange) => {
                if let Err(err) = self.completion.complete(exchange) {
                    logger::error(Component::Invoker, Some(&self.exchange_id), err.to_string());
                }
            }
            None => logger::error(
                Component::Invoker,
                Some(&self.exchange_id),
                "Exchange was already handed to the coordinator",
            ),
        }
    }
}

/// Handed to a processor while it runs. Used to schedule further work on the same exchange.
///
/// Scheduled work gets exclusive access to the exchange once it starts, and the exchange only
/// completes after all of it has finished.
pub struct ProcessContext {
    in_flight: Arc<InFlight>,
}

impl ProcessContext {
    pub fn exchange_id(&self) -> &Uuid {
        &self.in_flight.exchange_id
    }

    /// The pool the current destination runs on.
    pub fn pool(&self) -> &WorkerPool {
        &self.in_flight.pool
    }

    /// Runs `processor` on the current pool once at least `delay` has elapsed.
    pub fn schedule(&self, delay: Duration, processor: SharedProcessor) {
        self.in_flight.spawn(&self.in_flight.pool, delay, processor);
    }

    /// Runs `processor` on `pool` once at least `delay` has elapsed.
    pub fn schedule_on(&self, pool: &WorkerPool, delay: Duration, processor: SharedProcessor) {
        self.in_flight.spawn(pool, delay, processor);
    }
}

impl Debug for ProcessContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("exchange_id", &self.in_flight.exchange_id)
            .field("pool", &self.in_flight.pool.name())
            .field("pending", &self.in_flight.pending.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::exchange::{ExchangePattern, Headers};
    use crate::processor::{Delay, Processor, processor_fn};
    use crate::status::ExchangeState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Instant;

    fn pool(name: &str, workers: usize) -> WorkerPool {
        WorkerPool::new(&WorkerPoolConfig::new(name, workers))
    }

    fn append(suffix: &'static str) -> SharedProcessor {
        Arc::new(processor_fn("append", move |exchange: &mut Exchange| {
            let body = exchange
                .message()
                .body_as::<String>()
                .map_err(ProcessingError::from_error)?
                .unwrap_or_default();
            exchange.message_mut().set_body(format!("{}{}", body, suffix));
            Ok(())
        }))
    }

    fn exchange(body: &str) -> Exchange {
        Exchange::create(ExchangePattern::RequestReply, Some(json!(body)), Headers::default())
    }

    fn destination(name: &str, processor: SharedProcessor) -> Destination {
        Destination::new(name, processor)
    }

    struct FanOut {
        children: usize,
    }

    #[async_trait]
    impl Processor for FanOut {
        async fn process(
            &self,
            _exchange: &mut Exchange,
            ctx: &ProcessContext,
        ) -> Result<(), ProcessingError> {
            for i in 0..self.children {
                ctx.schedule(Duration::from_millis(10 * (i as u64 + 1)), append("!"));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "fan-out"
        }
    }

    struct Explode;

    #[async_trait]
    impl Processor for Explode {
        async fn process(
            &self,
            _exchange: &mut Exchange,
            _ctx: &ProcessContext,
        ) -> Result<(), ProcessingError> {
            panic!("processor failure")
        }

        fn name(&self) -> &str {
            "explode"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_invoke_waits_for_nested_work() {
        let invoker = PipelineInvoker::new(pool("default", 4));
        let exchange = exchange("Hello");
        let completion = Arc::new(Completion::new(*exchange.id()));
        let start = destination(
            "start",
            Arc::new(Delay::shared(Duration::from_millis(100), append(" World"))),
        );

        let started = Instant::now();
        invoker
            .invoke(exchange, &start, InvocationMode::Sync, completion.clone())
            .await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        let completed = completion.get().unwrap();
        assert_eq!(completed.state(), ExchangeState::Completed);
        assert_eq!(completed.message().body(), Some(&json!("Hello World")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_invoke_returns_before_completion() {
        let invoker = PipelineInvoker::new(pool("default", 4));
        let exchange = exchange("Hello");
        let completion = Arc::new(Completion::new(*exchange.id()));
        let start = destination(
            "start",
            Arc::new(Delay::shared(Duration::from_millis(100), append(" World"))),
        );

        invoker
            .invoke(exchange, &start, InvocationMode::Async, completion.clone())
            .await;
        assert!(!completion.is_complete());

        let completed = completion.wait().await;
        assert_eq!(completed.message().body(), Some(&json!("Hello World")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_joins_all_scheduled_work() {
        let invoker = PipelineInvoker::new(pool("default", 2));
        let exchange = exchange("Hi");
        let completion = Arc::new(Completion::new(*exchange.id()));
        let fan_out = destination("fan-out", Arc::new(FanOut { children: 3 }));

        invoker.submit(exchange, &fan_out, completion.clone());

        let completed = completion.wait().await;
        assert_eq!(completed.message().body(), Some(&json!("Hi!!!")));
        assert_eq!(invoker.default_pool().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_processor_error_fails_the_exchange() {
        let invoker = PipelineInvoker::new(pool("default", 1));
        let exchange = exchange("Hello");
        let completion = Arc::new(Completion::new(*exchange.id()));
        let error = destination(
            "error",
            Arc::new(processor_fn("error", |_: &mut Exchange| {
                Err(ProcessingError::new("Damn forced by unit test"))
            })),
        );

        invoker
            .invoke(exchange, &error, InvocationMode::Sync, completion.clone())
            .await;

        let completed = completion.get().unwrap();
        assert_eq!(completed.state(), ExchangeState::Failed);
        let cause = completed.failure().unwrap().processing_cause().unwrap();
        assert_eq!(cause.message(), "Damn forced by unit test");
    }

    #[tokio::test]
    async fn test_panicking_processor_fails_the_exchange() {
        let invoker = PipelineInvoker::new(pool("default", 1));
        let exchange = exchange("Hello");
        let completion = Arc::new(Completion::new(*exchange.id()));

        invoker.submit(exchange, &destination("explode", Arc::new(Explode)), completion.clone());

        let completed = completion.wait().await;
        let cause = completed.failure().unwrap().processing_cause().unwrap();
        assert_eq!(cause.message(), "Processor 'explode' panicked: processor failure");

        let next = self::exchange("Hi");
        let completion = Arc::new(Completion::new(*next.id()));
        invoker.submit(next, &destination("append", append("!")), completion.clone());
        assert_eq!(completion.wait().await.message().body(), Some(&json!("Hi!")));
    }

    #[tokio::test]
    async fn test_dedicated_pool_is_used() {
        let invoker = PipelineInvoker::new(pool("default", 1));
        let threads = pool("threads", 5);
        let exchange = exchange("Bye");
        let completion = Arc::new(Completion::new(*exchange.id()));
        let observed = Arc::new(std::sync::Mutex::new(None));

        struct PoolName(Arc<std::sync::Mutex<Option<String>>>);

        #[async_trait]
        impl Processor for PoolName {
            async fn process(
                &self,
                _exchange: &mut Exchange,
                ctx: &ProcessContext,
            ) -> Result<(), ProcessingError> {
                *self.0.lock().unwrap() = Some(ctx.pool().name().to_string());
                Ok(())
            }

            fn name(&self) -> &str {
                "pool-name"
            }
        }

        let dest = destination("threads", Arc::new(PoolName(observed.clone()))).with_pool(threads);
        invoker.submit(exchange, &dest, completion.clone());
        completion.wait().await;

        assert_eq!(observed.lock().unwrap().as_deref(), Some("threads"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_skips_work_not_yet_started() {
        let invoker = PipelineInvoker::new(pool("default", 4));
        let exchange = exchange("Hello");
        let completion = Arc::new(Completion::new(*exchange.id()));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = calls.clone();
        let record: SharedProcessor = Arc::new(processor_fn("record", move |_: &mut Exchange| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));
        let start = destination(
            "start",
            Arc::new(Delay::shared(Duration::from_millis(100), record)),
        );

        invoker.submit(exchange, &start, completion.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(completion.cancel());

        let completed = completion.wait().await;
        assert!(matches!(completed.failure(), Some(DispatchError::Cancelled { .. })));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_pool_rejects_the_exchange() {
        let default = pool("default", 1);
        default.shutdown();
        let invoker = PipelineInvoker::new(default);
        let exchange = exchange("Hello");
        let completion = Arc::new(Completion::new(*exchange.id()));

        invoker.submit(exchange, &destination("append", append("!")), completion.clone());

        let completed = completion.wait().await;
        assert!(matches!(
            completed.failure(),
            Some(DispatchError::PoolShutdown { pool }) if pool == "default"
        ));
    }
}
