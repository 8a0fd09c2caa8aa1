//! Duplicate-owner detection for the connection manager.
//!
//! Exactly one [`ConnectionManager`](crate::manager::ConnectionManager)
//! should be alive per application. Each manager holds an
//! [`InstanceGuard`]; when more than one guard is alive on the same
//! [`InstanceRegistry`] an error is logged. Nothing is torn down
//! automatically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error};

static GLOBAL: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();

/// Counts live owners of a shared resource.
#[derive(Debug)]
pub struct InstanceRegistry {
    label: &'static str,
    live: AtomicUsize,
}

impl InstanceRegistry {
    /// Create a registry. `label` names the guarded resource in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            live: AtomicUsize::new(0),
        }
    }

    /// Process-wide registry for hosts that do not inject their own.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new("connection-manager"))))
    }

    /// Record a new live owner and return the live count.
    pub fn report_instantiation(&self) -> usize {
        let count = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        if count > 1 {
            error!(
                resource = self.label,
                live = count,
                "multiple live instances detected; only one owner is expected"
            );
        } else {
            debug!(resource = self.label, "instance registered");
        }
        count
    }

    /// Record an owner going away and return the live count.
    pub fn report_teardown(&self) -> usize {
        let prev = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Current live count.
    pub fn count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Report an instantiation and return a guard that reports the teardown
    /// when dropped.
    pub fn guard(self: &Arc<Self>) -> InstanceGuard {
        let _ = self.report_instantiation();
        InstanceGuard {
            registry: Arc::clone(self),
        }
    }
}

/// Reports teardown to its [`InstanceRegistry`] on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    registry: Arc<InstanceRegistry>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = self.registry.report_teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::logging::capture_logs;
    use tracing::Level;

    #[test]
    fn counts_up_and_down() {
        let reg = InstanceRegistry::new("test");
        assert_eq!(reg.report_instantiation(), 1);
        assert_eq!(reg.report_instantiation(), 2);
        assert_eq!(reg.report_teardown(), 1);
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn teardown_saturates_at_zero() {
        let reg = InstanceRegistry::new("test");
        assert_eq!(reg.report_teardown(), 0);
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn second_instance_logs_error() {
        let (logs, _guard) = capture_logs();
        let reg = Arc::new(InstanceRegistry::new("test"));
        let _a = reg.guard();
        assert_eq!(logs.count_at_level(Level::ERROR), 0);
        let _b = reg.guard();
        assert_eq!(logs.count_at_level(Level::ERROR), 1);
        assert!(logs.has_message("multiple live instances"));

        let events = logs.events();
        let report = events
            .iter()
            .find(|e| e.level == Level::ERROR)
            .unwrap();
        assert_eq!(report.field("resource"), Some("test"));
        assert_eq!(report.field("live"), Some("2"));
    }

    #[test]
    fn guard_reports_teardown_on_drop() {
        let reg = Arc::new(InstanceRegistry::new("test"));
        let guard = reg.guard();
        assert_eq!(reg.count(), 1);
        drop(guard);
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn sequential_owners_do_not_log() {
        let (logs, _guard) = capture_logs();
        let reg = Arc::new(InstanceRegistry::new("test"));
        drop(reg.guard());
        drop(reg.guard());
        assert_eq!(logs.count_at_level(Level::ERROR), 0);
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&InstanceRegistry::global(), &InstanceRegistry::global()));
    }
}
