use std::fmt::{Display, Formatter};

/// Lifecycle of an exchange. The transition out of `InFlight` happens exactly once, at the
/// completion write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    InFlight,
    Completed,
    Failed,
}

impl ExchangeState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExchangeState::InFlight)
    }

    pub fn is_complete(&self) -> bool {
        !self.is_in_flight()
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExchangeState::Failed)
    }
}

impl Display for ExchangeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExchangeState::InFlight => "in-flight",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}
