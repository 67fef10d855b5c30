//! Reconcile loop driver.
//!
//! Watches the store, feeds record keys into a [`WorkQueue`], and runs a pool
//! of workers that each take one key at a time. The queue guarantees a key is
//! never reconciled by two workers at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use metal_api::{reason, Assignment, ConditionType, Kind, Managed, ObjectKey};
use metal_reconcile::{Action, FailureTracker, WorkQueue};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{AssignmentClient, DeviceClient, Outcome, Reconciler};
use crate::config::ControllerConfig;
use crate::error::{ReconcileError, RetryClass};
use crate::provider::{AssignmentApi, DeviceApi};
use crate::secrets::DataSource;
use crate::store::{ObjectStore, WatchEvent};

/// Last seen `(generation, deleting)` per record.
type SeenState = HashMap<ObjectKey, (i64, bool)>;

pub struct ControllerWorker {
    store: Arc<dyn ObjectStore>,
    devices: Reconciler<DeviceClient>,
    assignments: Reconciler<AssignmentClient>,
    queue: Arc<WorkQueue<ObjectKey>>,
    failures: Mutex<FailureTracker<ObjectKey>>,
    seen: Mutex<SeenState>,
    config: ControllerConfig,
}

impl ControllerWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        device_api: Arc<dyn DeviceApi>,
        assignment_api: Arc<dyn AssignmentApi>,
        data: Arc<dyn DataSource>,
        config: ControllerConfig,
    ) -> Self {
        let devices = Reconciler::new(
            DeviceClient::new(device_api, data),
            Arc::clone(&store),
            &config,
        );
        let assignments = Reconciler::new(
            AssignmentClient::new(assignment_api, Arc::clone(&store)),
            Arc::clone(&store),
            &config,
        );
        Self {
            store,
            devices,
            assignments,
            queue: Arc::new(WorkQueue::new()),
            failures: Mutex::new(FailureTracker::new()),
            seen: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    fn failures(&self) -> MutexGuard<'_, FailureTracker<ObjectKey>> {
        self.failures.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn seen(&self) -> MutexGuard<'_, SeenState> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run until shutdown is signaled. Turns already in flight finish first.
    #[instrument(skip(self, shutdown))]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.config.workers, "Starting controller");

        // Subscribe before listing so nothing falls between the two.
        let mut events = self.store.subscribe();
        self.enqueue_all().await;

        let handles: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let worker = Arc::clone(&self);
                tokio::spawn(async move { worker.work(id).await })
            })
            .collect();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch stream lagged, resyncing");
                        self.enqueue_all().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("watch stream closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Controller shutting down");
                        break;
                    }
                }
            }
        }

        self.queue.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("Controller stopped");
    }

    async fn work(&self, id: usize) {
        debug!(worker = id, "worker started");
        while let Some(key) = self.queue.get().await {
            let action = self.reconcile_key(&key).await;
            self.queue.done(&key);
            match action {
                Action::Requeue(delay) => self.queue.add_after(key, delay),
                Action::AwaitChange => self.queue.forget(&key),
                Action::Forget => {
                    self.queue.forget(&key);
                    self.failures().clear(&key);
                    self.seen().remove(&key);
                }
            }
        }
        debug!(worker = id, "worker stopped");
    }

    /// Run one turn for `key` and decide what happens next.
    pub async fn reconcile_key(&self, key: &ObjectKey) -> Action {
        let result = match key.kind {
            Kind::Device => self.devices.reconcile(&key.name).await,
            Kind::Assignment => self.assignments.reconcile(&key.name).await,
            Kind::VirtualNetwork => return Action::Forget,
        };
        self.next_action(key, result)
    }

    fn next_action(&self, key: &ObjectKey, result: Result<Outcome, ReconcileError>) -> Action {
        let err = match result {
            Ok(Outcome::Converged) => {
                self.failures().clear(key);
                return Action::Requeue(self.config.poll_interval);
            }
            Ok(Outcome::Transitioning) => {
                self.failures().clear(key);
                return Action::Requeue(self.config.transition_interval);
            }
            Ok(Outcome::Removed) => return Action::Forget,
            Err(err) => err,
        };

        match err.retry_class() {
            RetryClass::Immediate => {
                debug!(key = %key, "record changed mid-turn, retrying");
                Action::immediate()
            }
            RetryClass::AwaitChange => {
                info!(key = %key, reason = err.reason(), "waiting for the record to change");
                Action::AwaitChange
            }
            RetryClass::Backoff => {
                let attempt = self.failures().record_failure(key);
                let delay = self.config.backoff.delay(attempt);
                debug!(
                    key = %key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying with backoff"
                );
                Action::Requeue(delay)
            }
        }
    }

    async fn enqueue_all(&self) {
        for kind in Kind::MANAGED {
            match self.store.list(kind, None).await {
                Ok(records) => {
                    for record in records {
                        let key = record.key();
                        self.seen().insert(
                            key.clone(),
                            (record.metadata.generation, record.metadata.is_deleting()),
                        );
                        self.queue.add(key);
                    }
                }
                Err(e) => error!(kind = %kind, error = %e, "failed to list records"),
            }
        }
    }

    async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Removed { key } => {
                self.seen().remove(&key);
                self.queue.forget(&key);
                if key.kind != Kind::Assignment {
                    self.wake_waiting_assignments(&key).await;
                }
            }
            WatchEvent::Applied {
                key,
                generation,
                deleting,
            } => {
                if Kind::MANAGED.contains(&key.kind) {
                    // Status-only writes leave generation alone and are
                    // not worth a turn.
                    let previous = self.seen().insert(key.clone(), (generation, deleting));
                    if previous != Some((generation, deleting)) {
                        self.queue.add(key.clone());
                    }
                }
                if key.kind != Kind::Assignment {
                    self.wake_waiting_assignments(&key).await;
                }
            }
        }
    }

    /// Enqueue assignments blocked on a reference, since `changed` may be
    /// what they were waiting for.
    async fn wake_waiting_assignments(&self, changed: &ObjectKey) {
        let records = match self.store.list(Kind::Assignment, None).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to list assignments for fan-out");
                return;
            }
        };

        for record in records {
            let Ok(assignment) = record.into_typed::<Assignment>() else {
                continue;
            };
            let waiting = matches!(
                assignment.conditions().reason(ConditionType::Synced),
                Some(reason::REFERENCE_NOT_READY | reason::REFERENCE_AMBIGUOUS)
            );
            if waiting {
                debug!(
                    changed = %changed,
                    assignment = %assignment.metadata.name,
                    "re-checking references"
                );
                self.queue.add(ObjectKey::new(Kind::Assignment, &assignment.metadata.name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FakeProvider;
    use crate::secrets::StaticDataSource;
    use crate::store::MemoryStore;

    fn worker() -> ControllerWorker {
        let fake = Arc::new(FakeProvider::new());
        ControllerWorker::new(
            Arc::new(MemoryStore::new()),
            fake.clone(),
            fake,
            Arc::new(StaticDataSource::new()),
            ControllerConfig::default(),
        )
    }

    fn key() -> ObjectKey {
        ObjectKey::new(Kind::Device, "db-1")
    }

    #[test]
    fn test_outcome_scheduling() {
        let w = worker();
        assert_eq!(
            w.next_action(&key(), Ok(Outcome::Converged)),
            Action::Requeue(w.config.poll_interval)
        );
        assert_eq!(
            w.next_action(&key(), Ok(Outcome::Transitioning)),
            Action::Requeue(w.config.transition_interval)
        );
        assert_eq!(w.next_action(&key(), Ok(Outcome::Removed)), Action::Forget);
    }

    #[test]
    fn test_error_scheduling() {
        let w = worker();
        assert_eq!(
            w.next_action(&key(), Err(ReconcileError::Conflict)),
            Action::immediate()
        );
        assert_eq!(
            w.next_action(&key(), Err(ReconcileError::InvalidSpec("x".into()))),
            Action::AwaitChange
        );

        let Action::Requeue(delay) =
            w.next_action(&key(), Err(ReconcileError::ProviderTransient("503".into())))
        else {
            panic!("expected requeue");
        };
        assert!(delay <= w.config.backoff.max);
        assert_eq!(w.failures().failures(&key()), 1);

        w.next_action(&key(), Ok(Outcome::Converged));
        assert_eq!(w.failures().failures(&key()), 0);
    }

    #[tokio::test]
    async fn test_status_only_events_are_ignored() {
        let w = worker();
        let applied = |generation, deleting| WatchEvent::Applied {
            key: key(),
            generation,
            deleting,
        };

        w.handle_event(applied(1, false)).await;
        assert_eq!(w.queue.len(), 1);
        let taken = w.queue.get().await.unwrap();
        w.queue.done(&taken);

        w.handle_event(applied(1, false)).await;
        assert!(w.queue.is_empty());

        w.handle_event(applied(2, false)).await;
        w.handle_event(applied(2, true)).await;
        assert_eq!(w.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_virtual_network_keys_are_forgotten() {
        let w = worker();
        let action = w
            .reconcile_key(&ObjectKey::new(Kind::VirtualNetwork, "backend"))
            .await;
        assert_eq!(action, Action::Forget);
    }
}
