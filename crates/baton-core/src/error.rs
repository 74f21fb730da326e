use std::fmt;

use crate::owner::Owner;

/// Why a transfer request was refused. Nothing changed; retry when fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRejection {
    /// The gate has not been started (or was stopped).
    NotStarted,
    /// `Owner::None` is never a valid target.
    InvalidTarget,
    /// The target already owns the tick.
    AlreadyOwner(Owner),
    /// No collaborator is registered for the target.
    NotRegistered(Owner),
    /// The host reports it cannot provide frames right now.
    HostUnavailable,
    /// Readiness flags that were still false.
    ConditionsUnmet(Vec<&'static str>),
}

impl fmt::Display for TransferRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferRejection::NotStarted => f.write_str("arbitration gate is not running"),
            TransferRejection::InvalidTarget => f.write_str("cannot transfer to no owner"),
            TransferRejection::AlreadyOwner(o) => write!(f, "{o} already owns the tick"),
            TransferRejection::NotRegistered(o) => write!(f, "no {o} registered"),
            TransferRejection::HostUnavailable => f.write_str("host cannot provide frames"),
            TransferRejection::ConditionsUnmet(flags) => {
                write!(f, "conditions not met: {}", flags.join(", "))
            }
        }
    }
}

impl std::error::Error for TransferRejection {}

/// Why `HandoffCoordinator::start` refused to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    NoHost,
    AlreadyStarted,
    /// Stopped coordinators are not restartable.
    Stopped,
    /// Warmup was begun and has not opened yet.
    WarmupPending,
    Rejected(TransferRejection),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::NoHost => f.write_str("no host producer registered"),
            StartError::AlreadyStarted => f.write_str("handoff already started"),
            StartError::Stopped => f.write_str("handoff was stopped"),
            StartError::WarmupPending => f.write_str("warmup gate is still closed"),
            StartError::Rejected(r) => write!(f, "initial owner rejected: {r}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

/// An invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, msg: impl Into<String>) -> Self {
        Self { field, message: msg.into() }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid handoff config `{}`: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_name_the_cause() {
        assert_eq!(
            TransferRejection::AlreadyOwner(Owner::Host).to_string(),
            "host already owns the tick"
        );
        assert_eq!(
            TransferRejection::ConditionsUnmet(vec!["projection_ready", "cadence_stable"]).to_string(),
            "conditions not met: projection_ready, cadence_stable"
        );
    }

    #[test]
    fn start_error_exposes_rejection_as_source() {
        use std::error::Error;
        let e = StartError::Rejected(TransferRejection::NotRegistered(Owner::Host));
        assert!(e.source().is_some());
        assert!(StartError::NoHost.source().is_none());
    }
}
