pub mod convert;
pub mod listener;

use crate::error::DispatchError;
use crate::exchange::convert::{FromValue, TypeConversionError, convert};
use crate::exchange::listener::{CompletionListener, Outcome};
use crate::status::ExchangeState;
use fnv::FnvBuildHasher;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

pub type Headers = HashMap<String, Value, FnvBuildHasher>;

/// Whether a reply message is expected from the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangePattern {
    /// Only the input message matters.
    OneWay,
    /// The destination is expected to produce an output message.
    RequestReply,
}

/// Headers plus an optional body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    headers: Headers,
    body: Option<Value>,
}

impl Message {
    pub fn new(body: Option<Value>, headers: Headers) -> Self {
        Self { headers, body }
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = Some(body.into());
    }

    pub fn take_body(&mut self) -> Option<Value> {
        self.body.take()
    }

    /// Converts the body to `T`. A missing or null body yields `Ok(None)`.
    pub fn body_as<T>(&self) -> Result<Option<T>, TypeConversionError>
    where
        T: FromValue,
    {
        convert(self.body.as_ref())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Converts the header `name` to `T`. A missing or null header yields `Ok(None)`.
    pub fn header_as<T>(&self, name: &str) -> Result<Option<T>, TypeConversionError>
    where
        T: FromValue,
    {
        convert(self.headers.get(name))
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }
}

/// The unit of work carried through dispatch.
///
/// An exchange is owned by whichever context is processing it. Once the completion
/// coordinator has performed the single completion write it is frozen behind an `Arc` and
/// only read from then on.
///
/// # Examples
/// ```rust
/// use idemio_dispatch::exchange::{Exchange, ExchangePattern, Headers};
///
/// let mut headers = Headers::default();
/// headers.insert("foo".to_string(), 123.into());
/// let mut exchange = Exchange::create(ExchangePattern::RequestReply, Some("Hello".into()), headers);
///
/// exchange.message_mut().set_body("Hello World");
/// assert_eq!(exchange.input().body_as::<String>().unwrap().as_deref(), Some("Hello"));
/// assert_eq!(exchange.message().body_as::<String>().unwrap().as_deref(), Some("Hello World"));
/// assert_eq!(exchange.message().header_as::<i64>("foo").unwrap(), Some(123));
/// ```
pub struct Exchange {
    id: Uuid,
    pattern: ExchangePattern,
    state: ExchangeState,
    input: Message,
    output: Option<Message>,
    failure: Option<DispatchError>,
    listeners: Vec<Box<dyn CompletionListener>>,
}

impl Exchange {
    pub fn new(pattern: ExchangePattern) -> Self {
        Self::create(pattern, None, Headers::default())
    }

    pub fn create(pattern: ExchangePattern, body: Option<Value>, headers: Headers) -> Self {
        Self {
            id: Uuid::new_v4(),
            pattern,
            state: ExchangeState::InFlight,
            input: Message::new(body, headers),
            output: None,
            failure: None,
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: ExchangePattern) {
        self.pattern = pattern;
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn input(&self) -> &Message {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Message {
        &mut self.input
    }

    pub fn output(&self) -> Option<&Message> {
        self.output.as_ref()
    }

    pub fn set_output(&mut self, output: Message) {
        self.output = Some(output);
    }

    /// The current message: the output if one was produced, otherwise the input.
    pub fn message(&self) -> &Message {
        self.output.as_ref().unwrap_or(&self.input)
    }

    /// The message a processor should write to.
    ///
    /// On a `RequestReply` exchange the output is created on first access as a copy of the
    /// input, so headers carry over to the reply. On a `OneWay` exchange the input is mutated
    /// in place.
    pub fn message_mut(&mut self) -> &mut Message {
        match self.pattern {
            ExchangePattern::OneWay => self.output.as_mut().unwrap_or(&mut self.input),
            ExchangePattern::RequestReply => {
                let input = &self.input;
                self.output.get_or_insert_with(|| input.clone())
            }
        }
    }

    pub fn set_failure(&mut self, error: impl Into<DispatchError>) {
        self.failure = Some(error.into());
    }

    pub fn failure(&self) -> Option<&DispatchError> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Registers a listener to be invoked once this exchange completes.
    ///
    /// # Errors
    /// Returns `DispatchError::LateRegistration` if the exchange has already completed. The
    /// listener is invoked with the terminal state before this returns, so the notification
    /// is never lost.
    pub fn add_listener(
        &mut self,
        listener: impl CompletionListener + 'static,
    ) -> Result<(), DispatchError> {
        if self.state.is_complete() {
            Box::new(listener).on_complete(Outcome::of(self));
            return Err(DispatchError::late_registration(self.id));
        }
        self.listeners.push(Box::new(listener));
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn take_listeners(&mut self) -> Vec<Box<dyn CompletionListener>> {
        std::mem::take(&mut self.listeners)
    }

    pub(crate) fn mark_completed(&mut self) {
        self.state = if self.failure.is_some() {
            ExchangeState::Failed
        } else {
            ExchangeState::Completed
        };
    }
}

impl Debug for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("state", &self.state)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("failure", &self.failure)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
