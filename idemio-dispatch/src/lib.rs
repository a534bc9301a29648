//! Asynchronous exchange dispatch with a single, observable completion per exchange.
//!
//! A [`DispatchTemplate`] sends an [`Exchange`] to a named destination, either waiting for it
//! (`send`, `request_body`) or returning a [`ResultHandle`] immediately (`async_*`). However
//! an exchange finishes, the same terminal state reaches the handle and every registered
//! [`CompletionListener`](exchange::listener::CompletionListener) exactly once.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod logger;
pub mod pool;
pub mod processor;
pub mod status;

pub use dispatch::handle::ResultHandle;
pub use dispatch::template::DispatchTemplate;
pub use error::{DispatchError, ProcessingError};
pub use exchange::{Exchange, ExchangePattern, Message};
