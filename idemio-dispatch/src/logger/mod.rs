use log::Level;
use serde::Serialize;
use std::panic::Location;
use uuid::Uuid;

const TARGET: &str = "idemio_dispatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Component {
    Template,
    Invoker,
    Coordinator,
    WorkerPool,
    Registry,
    Config,
}

/// A structured log line. Serialized to JSON and handed to the `log` facade.
#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    timestamp: String,
    level: &'static str,
    thread: Option<&'a str>,
    file: &'a str,
    line: u32,
    exchange_id: Option<Uuid>,
    component: Component,
    message: &'a str,
}

impl<'a> LogEntry<'a> {
    fn new(
        level: Level,
        component: Component,
        thread: Option<&'a str>,
        exchange_id: Option<&Uuid>,
        message: &'a str,
        location: &'a Location<'a>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_str(),
            thread,
            file: location.file(),
            line: location.line(),
            exchange_id: exchange_id.copied(),
            component,
            message,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or(String::from("Error serializing log entry"))
    }
}

/// Installs `env_logger` as the global logger. Defaults to `info` unless `RUST_LOG` is set.
/// Calling it again after a logger is installed returns an error and changes nothing.
pub fn init() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
}

#[track_caller]
pub(crate) fn log(
    level: Level,
    component: Component,
    exchange_id: Option<&Uuid>,
    message: impl AsRef<str>,
) {
    if !log::log_enabled!(target: TARGET, level) {
        return;
    }
    let location = Location::caller();
    let thread = std::thread::current();
    let entry = LogEntry::new(
        level,
        component,
        thread.name(),
        exchange_id,
        message.as_ref(),
        location,
    );
    log::log!(target: TARGET, level, "{}", entry.to_json());
}

#[track_caller]
pub(crate) fn error(component: Component, exchange_id: Option<&Uuid>, message: impl AsRef<str>) {
    log(Level::Error, component, exchange_id, message)
}

#[track_caller]
pub(crate) fn warn(component: Component, exchange_id: Option<&Uuid>, message: impl AsRef<str>) {
    log(Level::Warn, component, exchange_id, message)
}

#[track_caller]
pub(crate) fn info(component: Component, exchange_id: Option<&Uuid>, message: impl AsRef<str>) {
    log(Level::Info, component, exchange_id, message)
}

#[track_caller]
pub(crate) fn debug(component: Component, exchange_id: Option<&Uuid>, message: impl AsRef<str>) {
    log(Level::Debug, component, exchange_id, message)
}

#[track_caller]
pub(crate) fn trace(component: Component, exchange_id: Option<&Uuid>, message: impl AsRef<str>) {
    log(Level::Trace, component, exchange_id, message)
}
