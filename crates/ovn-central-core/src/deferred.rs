//! Deferred service restarts and hooks.
//!
//! When automatic restarts are disabled, disruptive actions produced by a
//! configuration change are queued here until an operator releases them or
//! automatic restarts are enabled again.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RestartError;

/// Hook installing rotated TLS material.
pub const TLS_ROTATION_HOOK: &str = "tls-rotation";

/// Kind of deferred action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferredAction {
    /// Restart a service.
    Restart,
    /// Re-run a reconciliation hook.
    Hook,
}

impl fmt::Display for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredAction::Restart => write!(f, "restart"),
            DeferredAction::Hook => write!(f, "hook"),
        }
    }
}

/// A pending action suppressed by the restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEvent {
    pub action: DeferredAction,
    /// Service or hook name.
    pub target: String,
    /// Change that caused the action.
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent queue of deferred events, in creation order.
///
/// At most one entry exists per (action, target).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredQueue {
    events: Vec<DeferredEvent>,
}

impl DeferredQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event, or update the reason of an existing one.
    ///
    /// Returns `true` when a new entry was created.
    pub fn enqueue(
        &mut self,
        action: DeferredAction,
        target: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = self
            .events
            .iter_mut()
            .find(|e| e.action == action && e.target == target)
        {
            existing.reason = reason.to_string();
            return false;
        }
        self.events.push(DeferredEvent {
            action,
            target: target.to_string(),
            reason: reason.to_string(),
            created_at: now,
        });
        true
    }

    /// Remove the entry for (action, target), if any.
    pub fn remove(&mut self, action: DeferredAction, target: &str) -> Option<DeferredEvent> {
        let index = self
            .events
            .iter()
            .position(|e| e.action == action && e.target == target)?;
        Some(self.events.remove(index))
    }

    /// Whether an entry for (action, target) is queued.
    pub fn contains(&self, action: DeferredAction, target: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.action == action && e.target == target)
    }

    /// All events in creation order.
    pub fn events(&self) -> &[DeferredEvent] {
        &self.events
    }

    /// Targets of queued events of one kind, in creation order.
    pub fn targets(&self, action: DeferredAction) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Restarts services on this unit.
pub trait ServiceManager {
    /// Restart one service.
    fn restart(&mut self, service: &str) -> Result<(), RestartError>;
}

/// Runs a deferred hook by name.
pub trait HookRunner {
    /// Run one hook.
    fn run_hook(&mut self, hook: &str) -> Result<(), RestartError>;
}

/// Which queued restarts to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartSelector {
    All,
    Services(BTreeSet<String>),
}

impl RestartSelector {
    /// Build a selector from a comma separated list; empty means all.
    pub fn parse(list: &str) -> Self {
        let services: BTreeSet<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if services.is_empty() {
            RestartSelector::All
        } else {
            RestartSelector::Services(services)
        }
    }

    fn selects(&self, service: &str) -> bool {
        match self {
            RestartSelector::All => true,
            RestartSelector::Services(set) => set.contains(service),
        }
    }
}

/// How a configuration change was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDisposition {
    /// Restarted immediately.
    Restarted,
    /// Queued for later. `new_entry` is false when it was already queued.
    Queued { new_entry: bool },
    /// Immediate restart failed; the change is queued so it is not lost.
    RestartFailed(RestartError),
}

/// Result of releasing queued events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub hooks_run: Vec<String>,
    pub restarted: Vec<String>,
    /// Entries that failed and stay queued.
    pub failures: Vec<RestartError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies the restart policy to configuration changes.
pub struct DeferredRestartScheduler<'a> {
    queue: &'a mut DeferredQueue,
    auto_restart: bool,
}

impl<'a> DeferredRestartScheduler<'a> {
    /// Create a scheduler over a persisted queue.
    pub fn new(queue: &'a mut DeferredQueue, auto_restart: bool) -> Self {
        Self {
            queue,
            auto_restart,
        }
    }

    /// Handle a change requiring `service` to restart.
    pub fn on_config_change(
        &mut self,
        service: &str,
        reason: &str,
        services: &mut dyn ServiceManager,
    ) -> ChangeDisposition {
        if !self.auto_restart {
            let new_entry = self
                .queue
                .enqueue(DeferredAction::Restart, service, reason, Utc::now());
            if new_entry {
                tracing::info!(%service, %reason, "restart deferred");
            } else {
                tracing::debug!(%service, %reason, "restart already deferred");
            }
            return ChangeDisposition::Queued { new_entry };
        }

        match services.restart(service) {
            Ok(()) => {
                tracing::info!(%service, %reason, "service restarted");
                ChangeDisposition::Restarted
            }
            Err(err) => {
                tracing::error!(%service, error = %err, "service restart failed, queueing");
                self.queue
                    .enqueue(DeferredAction::Restart, service, reason, Utc::now());
                ChangeDisposition::RestartFailed(err)
            }
        }
    }

    /// Queue a hook for later execution. Returns `true` if it was not queued yet.
    pub fn defer_hook(&mut self, hook: &str, reason: &str) -> bool {
        let added = self
            .queue
            .enqueue(DeferredAction::Hook, hook, reason, Utc::now());
        if added {
            tracing::info!(%hook, %reason, "hook deferred");
        }
        added
    }

    /// Pending events in creation order.
    pub fn list_pending(&self) -> &[DeferredEvent] {
        self.queue.events()
    }

    /// Release queued events.
    ///
    /// Hooks run first when `run_hooks` is set, then the selected restarts in
    /// creation order. Each entry is removed only once it succeeded; a failure
    /// is reported and does not stop the others.
    pub fn run_pending(
        &mut self,
        selector: &RestartSelector,
        run_hooks: bool,
        services: &mut dyn ServiceManager,
        hooks: &mut dyn HookRunner,
    ) -> RunReport {
        let mut report = RunReport::default();

        if run_hooks {
            for hook in self.queue.targets(DeferredAction::Hook) {
                match hooks.run_hook(&hook) {
                    Ok(()) => {
                        tracing::info!(%hook, "deferred hook run");
                        self.queue.remove(DeferredAction::Hook, &hook);
                        report.hooks_run.push(hook);
                    }
                    Err(err) => {
                        tracing::error!(%hook, error = %err, "deferred hook failed");
                        report.failures.push(err);
                    }
                }
            }
        }

        for service in self.queue.targets(DeferredAction::Restart) {
            if !selector.selects(&service) {
                continue;
            }
            match services.restart(&service) {
                Ok(()) => {
                    tracing::info!(%service, "deferred restart done");
                    self.queue.remove(DeferredAction::Restart, &service);
                    report.restarted.push(service);
                }
                Err(err) => {
                    tracing::error!(%service, error = %err, "deferred restart failed");
                    report.failures.push(err);
                }
            }
        }

        report
    }

    /// Restart `names` now, clearing any queued restart for them.
    pub fn restart_now(&mut self, names: &[String], services: &mut dyn ServiceManager) -> RunReport {
        let mut report = RunReport::default();
        for service in names {
            match services.restart(service) {
                Ok(()) => {
                    tracing::info!(%service, "service restarted on request");
                    self.queue.remove(DeferredAction::Restart, service);
                    report.restarted.push(service.clone());
                }
                Err(err) => {
                    tracing::error!(%service, error = %err, "service restart failed");
                    report.failures.push(err);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeServices {
        restarted: Vec<String>,
        failing: BTreeSet<String>,
    }

    impl ServiceManager for FakeServices {
        fn restart(&mut self, service: &str) -> Result<(), RestartError> {
            if self.failing.contains(service) {
                return Err(RestartError::new(service, "unit failed to start"));
            }
            self.restarted.push(service.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeHooks {
        run: Vec<String>,
    }

    impl HookRunner for FakeHooks {
        fn run_hook(&mut self, hook: &str) -> Result<(), RestartError> {
            self.run.push(hook.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_repeated_changes_collapse() {
        let mut queue = DeferredQueue::new();
        let mut services = FakeServices::default();
        let mut scheduler = DeferredRestartScheduler::new(&mut queue, false);

        let dispositions: Vec<_> = ["config changed", "ovn-northd.conf", "probe changed"]
            .into_iter()
            .map(|reason| scheduler.on_config_change("ovn-northd", reason, &mut services))
            .collect();
        assert_eq!(
            dispositions,
            vec![
                ChangeDisposition::Queued { new_entry: true },
                ChangeDisposition::Queued { new_entry: false },
                ChangeDisposition::Queued { new_entry: false },
            ]
        );

        let pending = scheduler.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target, "ovn-northd");
        assert_eq!(pending[0].reason, "probe changed");
        assert!(services.restarted.is_empty());
    }

    #[test]
    fn test_auto_restart_does_not_enqueue() {
        let mut queue = DeferredQueue::new();
        let mut services = FakeServices::default();
        let mut scheduler = DeferredRestartScheduler::new(&mut queue, true);

        assert_eq!(
            scheduler.on_config_change("ovn-northd", "config changed", &mut services),
            ChangeDisposition::Restarted
        );
        assert!(queue.is_empty());
        assert_eq!(services.restarted, vec!["ovn-northd".to_string()]);
    }

    #[test]
    fn test_failed_auto_restart_is_kept() {
        let mut queue = DeferredQueue::new();
        let mut services = FakeServices {
            failing: ["ovn-northd".to_string()].into(),
            ..Default::default()
        };
        let mut scheduler = DeferredRestartScheduler::new(&mut queue, true);

        let disposition = scheduler.on_config_change("ovn-northd", "config changed", &mut services);
        assert!(matches!(disposition, ChangeDisposition::RestartFailed(_)));
        assert!(queue.contains(DeferredAction::Restart, "ovn-northd"));
    }

    #[test]
    fn test_run_pending_keeps_failures() {
        let mut queue = DeferredQueue::new();
        let now = Utc::now();
        for service in ["ovn-northd", "ovn-ovsdb-server-nb", "ovn-ovsdb-server-sb"] {
            queue.enqueue(DeferredAction::Restart, service, "config changed", now);
        }
        let mut services = FakeServices {
            failing: ["ovn-ovsdb-server-nb".to_string()].into(),
            ..Default::default()
        };
        let mut hooks = FakeHooks::default();
        let mut scheduler = DeferredRestartScheduler::new(&mut queue, false);

        let report = scheduler.run_pending(&RestartSelector::All, false, &mut services, &mut hooks);
        assert_eq!(report.restarted, vec!["ovn-northd", "ovn-ovsdb-server-sb"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(queue.targets(DeferredAction::Restart), vec!["ovn-ovsdb-server-nb"]);
    }

    #[test]
    fn test_run_pending_drains_on_success() {
        let mut queue = DeferredQueue::new();
        let now = Utc::now();
        queue.enqueue(DeferredAction::Restart, "ovn-northd", "config changed", now);
        queue.enqueue(DeferredAction::Hook, TLS_ROTATION_HOOK, "certificate v2", now);
        let mut services = FakeServices::default();
        let mut hooks = FakeHooks::default();
        let mut scheduler = DeferredRestartScheduler::new(&mut queue, false);

        let report = scheduler.run_pending(&RestartSelector::All, true, &mut services, &mut hooks);
        assert!(report.is_success());
        assert_eq!(hooks.run, vec![TLS_ROTATION_HOOK.to_string()]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_selector_limits_restarts_and_hooks_stay() {
        let mut queue = DeferredQueue::new();
        let now = Utc::now();
        queue.enqueue(DeferredAction::Restart, "ovn-northd", "config changed", now);
        queue.enqueue(DeferredAction::Restart, "ovn-ovsdb-server-sb", "config changed", now);
        queue.enqueue(DeferredAction::Hook, TLS_ROTATION_HOOK, "certificate v2", now);
        let mut services = FakeServices::default();
        let mut hooks = FakeHooks::default();
        let mut scheduler = DeferredRestartScheduler::new(&mut queue, false);

        let selector = RestartSelector::parse("ovn-northd, ");
        let report = scheduler.run_pending(&selector, false, &mut services, &mut hooks);
        assert_eq!(report.restarted, vec!["ovn-northd"]);
        assert!(hooks.run.is_empty());
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(DeferredAction::Hook, TLS_ROTATION_HOOK));
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(RestartSelector::parse(""), RestartSelector::All);
        assert_eq!(RestartSelector::parse(" , "), RestartSelector::All);
        assert_eq!(
            RestartSelector::parse("a,b"),
            RestartSelector::Services(["a".to_string(), "b".to_string()].into())
        );
    }
}
