//! Controller — the long-running work loop around the reconciler.
//!
//! Triggers come from four places: the store's change feed, the periodic
//! resync, per-policy wake-ups requested by earlier passes (condition
//! thresholds and step deadlines), and backoff after a failed pass. Each
//! trigger enqueues a policy; at most one pass per policy runs at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use mendgrid_core::PolicyName;
use mendgrid_health::policies_for_node_change;
use mendgrid_state::StoreEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::ReconcileResult;
use crate::reconciler::{PassResult, Reconciler};

/// How long to sleep when no wake-up is pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Every policy is re-enqueued at this interval.
    pub resync_interval: Duration,
    /// Delay before retrying a policy whose pass failed.
    pub error_backoff: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            error_backoff: Duration::from_secs(10),
        }
    }
}

type PassOutcome = (PolicyName, ReconcileResult<Option<PassResult>>);

/// Bookkeeping for serialized per-policy passes.
#[derive(Default)]
struct WorkQueue {
    /// Policies with a pass in progress.
    running: HashSet<PolicyName>,
    /// Policies triggered while running; they run again once finished.
    dirty: HashSet<PolicyName>,
    /// Pending timer wake-ups.
    wakeups: HashMap<PolicyName, Instant>,
}

impl WorkQueue {
    fn schedule(&mut self, name: PolicyName, at: Instant) {
        self.wakeups
            .entry(name)
            .and_modify(|existing| *existing = (*existing).min(at))
            .or_insert(at);
    }

    fn next_wakeup(&self) -> Option<Instant> {
        self.wakeups.values().min().copied()
    }

    fn take_due(&mut self, now: Instant) -> Vec<PolicyName> {
        let due: Vec<_> = self
            .wakeups
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &due {
            self.wakeups.remove(name);
        }
        due
    }
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, settings: ControllerSettings) -> Self {
        Self {
            reconciler,
            settings,
        }
    }

    /// Run until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.reconciler.store().subscribe();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PassOutcome>();
        let mut queue = WorkQueue::default();

        // The first tick fires immediately and performs the initial sync.
        let mut resync = tokio::time::interval(self.settings.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            resync_secs = self.settings.resync_interval.as_secs(),
            "controller started"
        );

        loop {
            let deadline = queue
                .next_wakeup()
                .unwrap_or_else(|| Instant::now() + IDLE_WAIT);

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
                _ = resync.tick() => {
                    debug!("periodic resync");
                    self.enqueue_all(&mut queue, &done_tx);
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event, &mut queue, &done_tx),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store events lagged, resyncing all policies");
                        self.enqueue_all(&mut queue, &done_tx);
                    }
                    Err(RecvError::Closed) => {
                        warn!("store event feed closed");
                        break;
                    }
                },
                Some((name, result)) = done_rx.recv() => {
                    self.finish(&mut queue, name, result, &done_tx);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    for name in queue.take_due(Instant::now()) {
                        debug!(policy = %name, "scheduled re-check");
                        self.enqueue(&mut queue, name, &done_tx);
                    }
                }
            }
        }
    }

    fn handle_event(
        &self,
        event: StoreEvent,
        queue: &mut WorkQueue,
        done_tx: &mpsc::UnboundedSender<PassOutcome>,
    ) {
        match event {
            StoreEvent::Node { old, new } => {
                let policies = match self.reconciler.store().list_policies() {
                    Ok(policies) => policies,
                    Err(e) => {
                        error!(error = %e, "failed to list policies for node event");
                        return;
                    }
                };
                for name in policies_for_node_change(&policies, old.as_deref(), new.as_deref()) {
                    self.enqueue(queue, name, done_tx);
                }
            }
            StoreEvent::Policy { name } => self.enqueue(queue, name, done_tx),
            // Our own status writes; reacting would only loop.
            StoreEvent::PolicyStatus { .. } => {}
            StoreEvent::LegacyCheck | StoreEvent::Cluster => self.enqueue_all(queue, done_tx),
        }
    }

    fn enqueue_all(&self, queue: &mut WorkQueue, done_tx: &mpsc::UnboundedSender<PassOutcome>) {
        match self.reconciler.store().list_policies() {
            Ok(policies) => {
                for policy in policies {
                    self.enqueue(queue, policy.name, done_tx);
                }
            }
            Err(e) => error!(error = %e, "failed to list policies"),
        }
    }

    /// Start a pass for `name`, or mark it dirty if one is running.
    fn enqueue(
        &self,
        queue: &mut WorkQueue,
        name: PolicyName,
        done_tx: &mpsc::UnboundedSender<PassOutcome>,
    ) {
        if queue.running.contains(&name) {
            queue.dirty.insert(name);
            return;
        }
        // A fresh pass supersedes any scheduled re-check.
        queue.wakeups.remove(&name);
        queue.running.insert(name.clone());

        let reconciler = Arc::clone(&self.reconciler);
        let done_tx = done_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = reconciler.reconcile(&name);
            let _ = done_tx.send((name, result));
        });
    }

    fn finish(
        &self,
        queue: &mut WorkQueue,
        name: PolicyName,
        result: ReconcileResult<Option<PassResult>>,
        done_tx: &mpsc::UnboundedSender<PassOutcome>,
    ) {
        queue.running.remove(&name);

        match result {
            Ok(Some(pass)) => {
                debug!(
                    policy = %name,
                    phase = pass.status.phase.as_str(),
                    written = pass.status_written,
                    requeue_at = ?pass.requeue_at,
                    "pass completed"
                );
                if let Some(at) = pass.requeue_at {
                    let delay = at.saturating_sub(self.reconciler.clock().now());
                    queue.schedule(name.clone(), Instant::now() + Duration::from_secs(delay));
                }
            }
            Ok(None) => {
                queue.wakeups.remove(&name);
                queue.dirty.remove(&name);
                return;
            }
            Err(e) => {
                error!(policy = %name, error = %e, transient = e.is_transient(), "reconciliation pass failed");
                queue.schedule(name.clone(), Instant::now() + self.settings.error_backoff);
            }
        }

        if queue.dirty.remove(&name) {
            self.enqueue(queue, name, done_tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mendgrid_core::{
        ConditionStatus, LabelSelector, MinHealthy, Node, NodeCondition, Phase, Policy, PolicySpec,
        TemplateRef, UnhealthyCondition,
    };
    use mendgrid_health::SystemClock;
    use mendgrid_state::StateStore;

    use crate::external::{StoreLegacyCheckDetector, StoreRemediationClient, StoreUpgradeChecker};
    use crate::reconciler::ReconcilerSettings;

    fn controller(store: &StateStore) -> Controller {
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(SystemClock),
            Arc::new(StoreUpgradeChecker::new(store.clone())),
            Arc::new(StoreLegacyCheckDetector::new(store.clone())),
            Arc::new(StoreRemediationClient::new(store.clone())),
            ReconcilerSettings::default(),
        );
        Controller::new(
            Arc::new(reconciler),
            ControllerSettings {
                resync_interval: Duration::from_secs(3600),
                error_backoff: Duration::from_millis(50),
            },
        )
    }

    fn broken_node(name: &str) -> Node {
        Node {
            name: name.to_string(),
            labels: [("pool".to_string(), "batch".to_string())].into(),
            conditions: vec![NodeCondition {
                type_: "Ready".to_string(),
                status: ConditionStatus::False,
                last_transition_time: 0,
            }],
        }
    }

    fn batch_policy() -> Policy {
        Policy::new(
            "batch",
            PolicySpec {
                selector: LabelSelector::from_labels([("pool", "batch")]),
                unhealthy_conditions: vec![UnhealthyCondition {
                    type_: "Ready".to_string(),
                    status: ConditionStatus::False,
                    duration: "1s".to_string(),
                }],
                min_healthy: Some(MinHealthy::Count(0)),
                remediation_template: Some(TemplateRef {
                    kind: "RebootTemplate".to_string(),
                    api_version: "remediation.mendgrid.io/v1alpha1".to_string(),
                    name: "reboot".to_string(),
                    namespace: None,
                }),
                ..Default::default()
            },
        )
    }

    async fn wait_for_phase(store: &StateStore, name: &str, phase: Phase) {
        for _ in 0..200 {
            if store
                .get_policy(name)
                .unwrap()
                .is_some_and(|p| p.status.phase == phase)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("policy {name} never reached {phase:?}");
    }

    #[test]
    fn work_queue_keeps_earliest_wakeup() {
        let mut queue = WorkQueue::default();
        let now = Instant::now();
        queue.schedule("a".to_string(), now + Duration::from_secs(10));
        queue.schedule("a".to_string(), now + Duration::from_secs(5));
        queue.schedule("b".to_string(), now + Duration::from_secs(20));
        assert_eq!(queue.next_wakeup(), Some(now + Duration::from_secs(5)));

        let due = queue.take_due(now + Duration::from_secs(6));
        assert_eq!(due, vec!["a".to_string()]);
        assert_eq!(queue.next_wakeup(), Some(now + Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn initial_sync_reconciles_existing_policies() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&broken_node("batch-0")).unwrap();
        store.create_policy(&batch_policy()).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&store).run(shutdown_rx));

        wait_for_phase(&store, "batch", Phase::Remediating).await;
        assert_eq!(store.list_remediations().unwrap().len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn node_event_wakes_matching_policy() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_policy(&batch_policy()).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&store).run(shutdown_rx));
        wait_for_phase(&store, "batch", Phase::Enabled).await;

        store.put_node(&broken_node("batch-7")).unwrap();
        wait_for_phase(&store, "batch", Phase::Remediating).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cluster_flag_pauses_all_policies() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&broken_node("batch-0")).unwrap();
        store.create_policy(&batch_policy()).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&store).run(shutdown_rx));
        wait_for_phase(&store, "batch", Phase::Remediating).await;

        store.set_cluster_upgrading(true).unwrap();
        wait_for_phase(&store, "batch", Phase::Paused).await;

        store.set_cluster_upgrading(false).unwrap();
        wait_for_phase(&store, "batch", Phase::Remediating).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
