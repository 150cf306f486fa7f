use std::time::Duration;

use tracing::{debug, warn};

use crate::apply::{ExecutionContext, LocalProcessContext};
use crate::error::DiscoveryError;

/// Finds the execution context registered under a label.
pub trait ContextLocator {
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NotFound`] when no context carries `label`.
    fn locate(&self, label: &str) -> Result<Box<dyn ExecutionContext>, DiscoveryError>;
}

/// Resolves the label as a program name on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathLocator;

impl ContextLocator for PathLocator {
    fn locate(&self, label: &str) -> Result<Box<dyn ExecutionContext>, DiscoveryError> {
        let program = which::which(label).map_err(|error| DiscoveryError::NotFound {
            label: label.to_string(),
            detail: error.to_string(),
        })?;
        debug!(label, program = %program.display(), "execution context found");
        Ok(Box::new(LocalProcessContext::new(label, program)))
    }
}

/// Retry policy for context discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Try `locator` up to `policy.attempts` times, sleeping `policy.backoff`
/// between failures.
///
/// # Errors
///
/// Returns [`DiscoveryError::Exhausted`] once every attempt has failed.
pub fn discover_with_retry(
    locator: &dyn ContextLocator,
    label: &str,
    policy: DiscoveryPolicy,
) -> Result<Box<dyn ExecutionContext>, DiscoveryError> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match locator.locate(label) {
            Ok(context) => return Ok(context),
            Err(error) => {
                warn!(label, attempt, attempts, %error, "execution context not available");
                if attempt < attempts {
                    std::thread::sleep(policy.backoff);
                }
            }
        }
    }
    Err(DiscoveryError::Exhausted {
        label: label.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::cell::Cell;
    use std::time::Duration;

    use super::{ContextLocator, DiscoveryPolicy, PathLocator, discover_with_retry};
    use crate::apply::ExecutionContext;
    use crate::apply::tests::ScriptedContext;
    use crate::error::DiscoveryError;

    struct FlakyLocator {
        failures: Cell<u32>,
        calls: Cell<u32>,
    }

    impl ContextLocator for FlakyLocator {
        fn locate(&self, label: &str) -> Result<Box<dyn ExecutionContext>, DiscoveryError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(DiscoveryError::NotFound {
                    label: label.to_string(),
                    detail: "not running yet".to_string(),
                });
            }
            Ok(Box::new(ScriptedContext::default()))
        }
    }

    const fn policy(attempts: u32) -> DiscoveryPolicy {
        DiscoveryPolicy {
            attempts,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let locator = FlakyLocator {
            failures: Cell::new(2),
            calls: Cell::new(0),
        };
        let context = discover_with_retry(&locator, "terraform", policy(5)).expect("discover");
        assert_eq!(context.label(), "terraform");
        assert_eq!(locator.calls.get(), 3);
    }

    #[test]
    fn gives_up_after_the_configured_attempts() {
        let locator = FlakyLocator {
            failures: Cell::new(10),
            calls: Cell::new(0),
        };
        let error = discover_with_retry(&locator, "terraform", policy(5))
            .err()
            .expect("must fail");
        assert!(matches!(error, DiscoveryError::Exhausted { attempts: 5, .. }));
        assert_eq!(locator.calls.get(), 5);
    }

    #[test]
    fn path_locator_reports_missing_programs() {
        let error = PathLocator
            .locate("stratus-definitely-missing-backend")
            .err()
            .expect("must fail");
        assert!(matches!(error, DiscoveryError::NotFound { .. }));
    }
}
