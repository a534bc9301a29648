use crate::dispatch::latch::Latch;
use crate::error::DispatchError;
use crate::exchange::Exchange;
use crate::exchange::listener::{CompletionListener, Outcome};
use crate::logger::{self, Component};
use std::fmt::{Debug, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Publishes the terminal exchange to the result handle of the dispatch that created it. Runs
/// after the listeners.
pub(crate) type Resolver = Box<dyn FnOnce(&Arc<Exchange>) + Send>;

struct Registrations {
    listeners: Vec<Box<dyn CompletionListener>>,
    cancelled: bool,
}

/// The completion coordinator for one exchange.
///
/// `complete` is the single point where an exchange is declared done. It freezes the exchange,
/// invokes every listener with the same terminal state and then resolves the result handle.
/// Listeners registered on the exchange before dispatch run first, followed by listeners
/// registered through [`Completion::register`], each group in registration order.
///
/// [`Completion::wait`] wakes as soon as the exchange is frozen, possibly while listeners are
/// still running.
pub struct Completion {
    exchange_id: Uuid,
    completed: AtomicBool,
    registrations: Mutex<Registrations>,
    terminal: Latch<Arc<Exchange>>,
    resolver: Mutex<Option<Resolver>>,
}

impl Completion {
    pub fn new(exchange_id: Uuid) -> Self {
        Self {
            exchange_id,
            completed: AtomicBool::new(false),
            registrations: Mutex::new(Registrations {
                listeners: Vec::new(),
                cancelled: false,
            }),
            terminal: Latch::new(),
            resolver: Mutex::new(None),
        }
    }

    pub(crate) fn with_resolver(exchange_id: Uuid, resolver: Resolver) -> Self {
        let completion = Self::new(exchange_id);
        *completion.lock_resolver() = Some(resolver);
        completion
    }

    pub fn exchange_id(&self) -> &Uuid {
        &self.exchange_id
    }

    /// Declares the exchange done.
    ///
    /// # Errors
    /// Returns `DispatchError::DoubleCompletion` if this exchange was already completed. The
    /// first completion is left untouched and the passed exchange is dropped without notifying
    /// anyone.
    pub fn complete(&self, mut exchange: Exchange) -> Result<Arc<Exchange>, DispatchError> {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            logger::error(
                Component::Coordinator,
                Some(&self.exchange_id),
                "Exchange completed more than once",
            );
            return Err(DispatchError::double_completion(self.exchange_id));
        }

        let mut listeners = exchange.take_listeners();
        let exchange = {
            let mut registrations = self.lock_registrations();
            if registrations.cancelled {
                exchange.set_failure(DispatchError::cancelled(self.exchange_id));
            }
            exchange.mark_completed();
            listeners.append(&mut registrations.listeners);
            let exchange = Arc::new(exchange);
            if self.terminal.set(exchange.clone()).is_err() {
                logger::error(
                    Component::Coordinator,
                    Some(&self.exchange_id),
                    "Terminal exchange was already published",
                );
            }
            exchange
        };

        logger::debug(
            Component::Coordinator,
            Some(&self.exchange_id),
            format!(
                "Exchange {}, notifying {} listener(s)",
                exchange.state(),
                listeners.len()
            ),
        );

        for listener in listeners {
            notify(listener, &exchange);
        }
        let resolver = self.lock_resolver().take();
        if let Some(resolve) = resolver {
            resolve(&exchange);
        }
        Ok(exchange)
    }

    /// Registers a listener for this exchange.
    ///
    /// # Errors
    /// Returns `DispatchError::LateRegistration` if the exchange has already completed. The
    /// listener has been invoked with the terminal state by the time this returns.
    pub fn register(&self, listener: impl CompletionListener + 'static) -> Result<(), DispatchError> {
        let terminal = {
            let mut registrations = self.lock_registrations();
            match self.terminal.get() {
                None => {
                    registrations.listeners.push(Box::new(listener));
                    return Ok(());
                }
                Some(exchange) => exchange.clone(),
            }
        };
        notify(Box::new(listener), &terminal);
        Err(DispatchError::late_registration(self.exchange_id))
    }

    /// Requests cancellation. Returns `false` if the exchange already completed or was already
    /// cancelled. Running processors are not interrupted, but work that has not started yet is
    /// skipped. The exchange completes with a `Cancelled` failure once the running work
    /// finishes.
    pub fn cancel(&self) -> bool {
        let mut registrations = self.lock_registrations();
        if self.terminal.get().is_some() || registrations.cancelled {
            return false;
        }
        registrations.cancelled = true;
        logger::debug(
            Component::Coordinator,
            Some(&self.exchange_id),
            "Cancellation requested",
        );
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lock_registrations().cancelled
    }

    pub fn is_complete(&self) -> bool {
        self.terminal.get().is_some()
    }

    /// The terminal exchange, if completed.
    pub fn get(&self) -> Option<Arc<Exchange>> {
        self.terminal.get().cloned()
    }

    /// Waits for the terminal exchange.
    pub async fn wait(&self) -> Arc<Exchange> {
        self.terminal.wait().await.clone()
    }

    fn lock_registrations(&self) -> MutexGuard<'_, Registrations> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_resolver(&self) -> MutexGuard<'_, Option<Resolver>> {
        self.resolver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for Completion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("exchange_id", &self.exchange_id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn notify(listener: Box<dyn CompletionListener>, exchange: &Exchange) {
    let outcome = Outcome::of(exchange);
    if catch_unwind(AssertUnwindSafe(|| listener.on_complete(outcome))).is_err() {
        logger::error(
            Component::Coordinator,
            Some(exchange.id()),
            "Completion listener panicked",
        );
    }
}
