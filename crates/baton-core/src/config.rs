use std::time::Duration;

use crate::cadence::CadenceThresholds;
use crate::error::ConfigError;
use crate::recovery::RecoverySettings;
use crate::safety_net::SafetyNetSettings;
use crate::warmup::WarmupSettings;

/// Handoff coordinator configuration.
///
/// Defaults are tuned for a 60 Hz surface under a browser-like scheduler that
/// drops inactive surfaces to roughly 10 Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffConfig {
    /// Receiver silence that counts as a stall.
    pub stall_timeout: Duration,
    /// Consecutive stalls before giving up (`Degraded`).
    pub max_recovery_retries: u32,
    /// Wall-clock stall poll cadence.
    pub stall_poll_interval: Duration,
    /// Time spent in `Recovered` before monitoring resumes.
    pub recovery_grace: Duration,
    /// Re-request the handoff after a recovery once the receiver is ready again.
    pub retry_transfer_after_recovery: bool,

    pub warmup_stable_frames: u32,
    pub warmup_healthy_threshold: Duration,
    pub warmup_timeout: Duration,

    pub safety_net_stable_frames: u32,
    pub safety_net_stable_interval: Duration,
    pub safety_net_timeout: Duration,

    pub cadence: CadenceThresholds,

    /// Lines kept by the diagnostics log created by `HandoffCoordinator::with_config`.
    pub diagnostics_capacity: usize,
    /// Record and emit per-tick debug lines.
    pub debug_logging: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_millis(500),
            max_recovery_retries: 3,
            stall_poll_interval: Duration::from_millis(100),
            recovery_grace: Duration::from_millis(250),
            retry_transfer_after_recovery: true,

            warmup_stable_frames: 15,
            warmup_healthy_threshold: Duration::from_millis(25),
            warmup_timeout: Duration::from_millis(3000),

            safety_net_stable_frames: 30,
            safety_net_stable_interval: Duration::from_millis(50),
            safety_net_timeout: Duration::from_millis(5000),

            cadence: CadenceThresholds::default(),

            diagnostics_capacity: 256,
            debug_logging: false,
        }
    }
}

impl HandoffConfig {
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("stall_timeout", self.stall_timeout)?;
        non_zero("stall_poll_interval", self.stall_poll_interval)?;
        non_zero("warmup_healthy_threshold", self.warmup_healthy_threshold)?;
        non_zero("warmup_timeout", self.warmup_timeout)?;
        non_zero("safety_net_stable_interval", self.safety_net_stable_interval)?;
        non_zero("safety_net_timeout", self.safety_net_timeout)?;

        if self.max_recovery_retries == 0 {
            return Err(ConfigError::new("max_recovery_retries", "must be at least 1"));
        }
        if self.warmup_stable_frames == 0 {
            return Err(ConfigError::new("warmup_stable_frames", "must be at least 1"));
        }
        if self.safety_net_stable_frames == 0 {
            return Err(ConfigError::new("safety_net_stable_frames", "must be at least 1"));
        }
        if self.stall_poll_interval > self.stall_timeout {
            return Err(ConfigError::new(
                "stall_poll_interval",
                format!(
                    "{:?} is longer than stall_timeout {:?}; stalls would be detected late",
                    self.stall_poll_interval, self.stall_timeout
                ),
            ));
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::new("diagnostics_capacity", "must be at least 1"));
        }

        self.cadence.validate()
    }

    pub fn recovery_settings(&self) -> RecoverySettings {
        RecoverySettings {
            stall_timeout: self.stall_timeout,
            max_retries: self.max_recovery_retries,
            poll_interval: self.stall_poll_interval,
            grace: self.recovery_grace,
        }
    }

    pub fn warmup_settings(&self) -> WarmupSettings {
        WarmupSettings {
            stable_frames: self.warmup_stable_frames,
            healthy_threshold: self.warmup_healthy_threshold,
            timeout: self.warmup_timeout,
        }
    }

    pub fn safety_net_settings(&self) -> SafetyNetSettings {
        SafetyNetSettings {
            stable_frames: self.safety_net_stable_frames,
            stable_interval: self.safety_net_stable_interval,
            timeout: self.safety_net_timeout,
        }
    }
}

fn non_zero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::new(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(HandoffConfig::default().validate().is_ok());
    }

    #[test]
    fn defaults_match_component_defaults() {
        let c = HandoffConfig::default();
        assert_eq!(c.recovery_settings(), RecoverySettings::default());
        assert_eq!(c.warmup_settings(), WarmupSettings::default());
        assert_eq!(c.safety_net_settings(), SafetyNetSettings::default());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let c = HandoffConfig { stall_timeout: Duration::ZERO, ..Default::default() };
        assert_eq!(c.validate().unwrap_err().field, "stall_timeout");
    }

    #[test]
    fn zero_retries_is_rejected() {
        let c = HandoffConfig { max_recovery_retries: 0, ..Default::default() };
        assert_eq!(c.validate().unwrap_err().field, "max_recovery_retries");
    }

    #[test]
    fn poll_slower_than_timeout_is_rejected() {
        let c = HandoffConfig {
            stall_poll_interval: Duration::from_millis(800),
            ..Default::default()
        };
        assert_eq!(c.validate().unwrap_err().field, "stall_poll_interval");
    }
}
