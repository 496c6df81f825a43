//! Automatic reconnection after unexpected link loss.
//!
//! The supervisor remembers the last connected scale and retries it a fixed
//! number of times with a fixed delay. Every explicit connect or disconnect
//! bumps an epoch so a loop that is sleeping or waiting for the connect lock
//! notices it has been superseded and stops.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};
use crate::error::Result;

/// Bounded, fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReconnectPolicy {
    /// Attempts after a link loss before giving up.
    pub max_attempts: u32,
    /// Delay before each attempt.
    pub delay: Duration,
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
    }
}

/// How a reconnect loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOutcome {
    /// An attempt succeeded.
    Reconnected {
        /// Attempt number that succeeded.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// An explicit connect or disconnect took over.
    Superseded,
}

/// Target of a reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReconnectPlan {
    pub(crate) device_id: String,
    pub(crate) epoch: u64,
}

#[derive(Debug, Default)]
struct SupervisorState {
    enabled: bool,
    armed: bool,
    last_device_id: Option<String>,
    attempts: u32,
    epoch: u64,
}

pub(crate) struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    state: Mutex<SupervisorState>,
}

impl ReconnectSupervisor {
    pub(crate) fn new(policy: ReconnectPolicy, enabled: bool) -> Self {
        Self {
            policy,
            state: Mutex::new(SupervisorState {
                enabled,
                ..SupervisorState::default()
            }),
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Record an explicit connect. Any running loop is superseded.
    pub(crate) fn remember(&self, device_id: &str) {
        let mut state = self.state.lock();
        state.last_device_id = Some(device_id.to_string());
        state.armed = false;
        state.attempts = 0;
        state.epoch += 1;
    }

    /// Record a successful connection.
    pub(crate) fn connected(&self) {
        let mut state = self.state.lock();
        state.armed = true;
        state.attempts = 0;
    }

    /// Record an explicit disconnect. Must run before the link is touched.
    pub(crate) fn disarm(&self) {
        let mut state = self.state.lock();
        state.armed = false;
        state.last_device_id = None;
        state.attempts = 0;
        state.epoch += 1;
        debug!("Auto-reconnect disarmed");
    }

    /// Claim a reconnect after a link loss, if one is due.
    pub(crate) fn plan(&self) -> Option<ReconnectPlan> {
        let mut state = self.state.lock();
        if !(state.enabled && state.armed) {
            return None;
        }
        let device_id = state.last_device_id.clone()?;
        state.armed = false;
        Some(ReconnectPlan {
            device_id,
            epoch: state.epoch,
        })
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }

    /// Run the retry loop for `epoch`, calling `attempt` with the attempt number.
    pub(crate) async fn run<F, Fut>(&self, epoch: u64, mut attempt: F) -> ReconnectOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            let number = {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return ReconnectOutcome::Superseded;
                }
                if state.attempts >= self.policy.max_attempts {
                    warn!("Giving up after {} reconnect attempts", state.attempts);
                    return ReconnectOutcome::Exhausted {
                        attempts: state.attempts,
                    };
                }
                state.attempts += 1;
                state.attempts
            };

            info!(
                "Reconnect attempt {}/{} in {:?}",
                number, self.policy.max_attempts, self.policy.delay
            );
            tokio::time::sleep(self.policy.delay).await;

            if !self.is_current(epoch) {
                return ReconnectOutcome::Superseded;
            }

            match attempt(number).await {
                Ok(()) => return ReconnectOutcome::Reconnected { attempts: number },
                Err(e) => {
                    if !self.is_current(epoch) {
                        return ReconnectOutcome::Superseded;
                    }
                    warn!("Reconnect attempt {} failed: {}", number, e);
                }
            }
        }
    }
}
