use crate::error::DispatchError;
use crate::exchange::Exchange;

/// The terminal state of an exchange as delivered to listeners.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Success(&'a Exchange),
    Failure(&'a Exchange, &'a DispatchError),
}

impl<'a> Outcome<'a> {
    pub(crate) fn of(exchange: &'a Exchange) -> Self {
        match exchange.failure() {
            Some(err) => Outcome::Failure(exchange, err),
            None => Outcome::Success(exchange),
        }
    }

    pub fn exchange(&self) -> &'a Exchange {
        match self {
            Outcome::Success(exchange) | Outcome::Failure(exchange, _) => exchange,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn failure(&self) -> Option<&'a DispatchError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(_, err) => Some(err),
        }
    }
}

/// Receives the terminal state of an exchange exactly once.
///
/// Any `FnOnce(Outcome<'_>)` closure is a listener:
///
/// ```rust
/// use idemio_dispatch::exchange::{Exchange, ExchangePattern};
/// use idemio_dispatch::exchange::listener::Outcome;
///
/// let mut exchange = Exchange::new(ExchangePattern::OneWay);
/// exchange
///     .add_listener(|outcome: Outcome<'_>| {
///         if let Outcome::Failure(_, err) = outcome {
///             eprintln!("exchange failed: {}", err);
///         }
///     })
///     .unwrap();
/// ```
pub trait CompletionListener: Send + Sync {
    fn on_complete(self: Box<Self>, outcome: Outcome<'_>);
}

impl<F> CompletionListener for F
where
    F: for<'a> FnOnce(Outcome<'a>) + Send + Sync,
{
    fn on_complete(self: Box<Self>, outcome: Outcome<'_>) {
        (*self)(outcome)
    }
}
