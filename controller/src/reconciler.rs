use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use socketsync_common::{
    ControllerStatus, DesiredState, PollRecord, ReconcilePlan, ReconcileResult,
    ReconciliationEngine, SocketView, SyncConfig, KEY_FORCE_UPDATE, KEY_LAST_CHECK, PATH_SOCKETS,
};

use crate::{dispatcher::ActuatorDispatcher, store::RemoteStateClient};

/// Owns the socket engine and drives one reconciliation pass at a time.
pub struct Reconciler {
    engine: ReconciliationEngine,
    store: Arc<dyn RemoteStateClient>,
    dispatcher: Arc<ActuatorDispatcher>,
    timezone: Tz,
    last_poll_epoch: Option<i64>,
    status: watch::Sender<ControllerStatus>,
}

impl Reconciler {
    pub fn new(
        sync: &SyncConfig,
        store: Arc<dyn RemoteStateClient>,
        dispatcher: Arc<ActuatorDispatcher>,
        timezone: Tz,
    ) -> Self {
        let engine = ReconciliationEngine::new(sync);
        let (status, _) = watch::channel(status_of(&engine, None, None));
        Self {
            engine,
            store,
            dispatcher,
            timezone,
            last_poll_epoch: None,
            status,
        }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.engine.poll_interval_secs()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    /// One pass. Remote failures abort the pass and leave tracked state as is.
    pub async fn reconcile(&mut self, issue_changes: bool) -> ReconcileResult {
        let desired = match self.fetch_desired().await {
            Ok(desired) => desired,
            Err(err) => {
                warn!("socket poll aborted: {err:#}");
                let result = ReconcileResult::aborted();
                self.publish_status(result);
                return result;
            }
        };

        let plan = self.engine.apply(&desired, issue_changes);
        self.log_plan(&plan, &desired);

        let signals_sent = self.dispatcher.execute(&plan.commands).await;

        if plan.clear_force_flag {
            self.clear_force_flag().await;
        }

        self.record_poll().await;

        let result = ReconcileResult {
            changed: plan.is_changed(),
            signals_sent,
            forced: plan.clear_force_flag,
            interval_changed: plan.interval_change.is_some(),
            aborted: false,
        };
        self.publish_status(result);
        result
    }

    async fn fetch_desired(&self) -> anyhow::Result<DesiredState> {
        let document = self
            .store
            .get(PATH_SOCKETS)
            .await?
            .unwrap_or(Value::Null);
        DesiredState::from_document(&document).context("malformed sockets document")
    }

    fn log_plan(&self, plan: &ReconcilePlan, desired: &DesiredState) {
        if let Some(raw) = &desired.unrecognized_force {
            warn!("ignoring {KEY_FORCE_UPDATE} value {raw}, treating as not set");
        }
        for socket in &plan.changed {
            let state = if desired.socket(*socket) { "on" } else { "off" };
            info!("socket {socket} update: {state}");
        }
        if let Some(change) = plan.interval_change {
            info!(
                "poll interval changed from {} to {} seconds",
                change.previous_secs, change.current_secs
            );
        }
        if let Some(rejected) = plan.rejected_interval {
            warn!(
                "ignoring poll interval {rejected}, keeping {} seconds",
                self.engine.poll_interval_secs()
            );
        }
        if plan.clear_force_flag {
            let states: Vec<bool> = self
                .engine
                .sockets()
                .iter()
                .map(|socket| socket.actual)
                .collect();
            info!("forcing socket sync: {states:?}");
        }
    }

    async fn clear_force_flag(&self) {
        // A failed reset leaves the remote flag set, so the resync repeats next pass.
        match self.store.put(PATH_SOCKETS, KEY_FORCE_UPDATE, json!(0)).await {
            Ok(_) => info!("reset {KEY_FORCE_UPDATE} to 0"),
            Err(err) => warn!("failed to reset {KEY_FORCE_UPDATE}: {err:#}"),
        }
    }

    async fn record_poll(&mut self) {
        let now = Utc::now().with_timezone(&self.timezone);
        let record = PollRecord::new(&now);
        self.last_poll_epoch = Some(record.timestamp_epoch);

        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(err) => {
                warn!("poll record serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = self.store.put(PATH_SOCKETS, KEY_LAST_CHECK, value).await {
            warn!("failed to write {KEY_LAST_CHECK}: {err:#}");
        }
    }

    fn publish_status(&self, result: ReconcileResult) {
        self.status.send_replace(status_of(
            &self.engine,
            self.last_poll_epoch,
            Some(result),
        ));
    }
}

fn status_of(
    engine: &ReconciliationEngine,
    last_poll_epoch: Option<i64>,
    last_result: Option<ReconcileResult>,
) -> ControllerStatus {
    ControllerStatus {
        sockets: engine
            .sockets()
            .iter()
            .map(|socket| SocketView {
                id: socket.id.get(),
                on: socket.actual,
            })
            .collect(),
        poll_interval_secs: engine.poll_interval_secs(),
        last_poll_epoch,
        last_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::tests::{quiet_rf, RecordingSender},
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use socketsync_common::{rf_code, SocketId};

    struct Harness {
        store: Arc<MemoryStore>,
        sender: Arc<RecordingSender>,
        reconciler: Reconciler,
    }

    fn harness(sockets: Value) -> Harness {
        let store = Arc::new(MemoryStore::with_root(json!({ "sockets": sockets })));
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = Arc::new(ActuatorDispatcher::new(sender.clone(), &quiet_rf()));
        let reconciler = Reconciler::new(
            &SyncConfig::default(),
            store.clone(),
            dispatcher,
            chrono_tz::UTC,
        );
        Harness {
            store,
            sender,
            reconciler,
        }
    }

    fn sockets(values: [u8; 5], force: u8, interval: i64) -> Value {
        json!({
            "socket1": values[0],
            "socket2": values[1],
            "socket3": values[2],
            "socket4": values[3],
            "socket5": values[4],
            "forceUpdate": force,
            "rpiSyncInterval": interval,
        })
    }

    fn code(socket: u8, on: bool) -> u32 {
        rf_code(SocketId::new(socket).unwrap(), on)
    }

    async fn force_resets(store: &MemoryStore) -> usize {
        store
            .writes()
            .await
            .iter()
            .filter(|write| write.key == KEY_FORCE_UPDATE)
            .count()
    }

    #[tokio::test]
    async fn signals_exactly_the_diverged_sockets() {
        let mut h = harness(sockets([1, 0, 1, 0, 1], 0, 1));

        let result = h.reconciler.reconcile(true).await;

        assert!(result.changed);
        assert_eq!(result.signals_sent, 2);
        assert_eq!(h.sender.codes(), vec![code(2, false), code(4, false)]);
    }

    #[tokio::test]
    async fn repeated_pass_without_remote_change_sends_nothing() {
        let mut h = harness(sockets([0, 0, 0, 0, 0], 0, 1));

        h.reconciler.reconcile(true).await;
        let sent_after_first = h.sender.codes().len();
        let second = h.reconciler.reconcile(true).await;

        assert_eq!(sent_after_first, 5);
        assert!(!second.changed);
        assert_eq!(second.signals_sent, 0);
        assert_eq!(h.sender.codes().len(), sent_after_first);
    }

    #[tokio::test]
    async fn startup_pass_seeds_state_silently() {
        let mut h = harness(sockets([1, 0, 0, 1, 0], 0, 1));

        let result = h.reconciler.reconcile(false).await;

        assert!(result.changed);
        assert_eq!(result.signals_sent, 0);
        assert!(h.sender.codes().is_empty());
        assert!(!h.reconciler.engine().actual(SocketId::new(2).unwrap()));
    }

    #[tokio::test]
    async fn force_flag_resends_all_and_is_cleared_once() {
        let mut h = harness(sockets([1, 0, 1, 0, 1], 0, 1));
        h.reconciler.reconcile(false).await;
        h.store
            .put(PATH_SOCKETS, KEY_FORCE_UPDATE, json!(1))
            .await
            .unwrap();

        let result = h.reconciler.reconcile(true).await;

        assert!(result.forced);
        assert!(!result.changed);
        assert_eq!(
            h.sender.codes(),
            vec![
                code(1, true),
                code(2, false),
                code(3, true),
                code(4, false),
                code(5, true),
            ]
        );
        assert_eq!(
            h.store.get("/sockets/forceUpdate").await.unwrap(),
            Some(json!(0))
        );
        // One write is the test's own set-to-1.
        assert_eq!(force_resets(&h.store).await, 2);

        let next = h.reconciler.reconcile(true).await;
        assert!(!next.forced);
        assert_eq!(force_resets(&h.store).await, 2);
    }

    #[tokio::test]
    async fn interval_change_is_picked_up_without_restart() {
        let mut h = harness(sockets([1, 1, 1, 1, 1], 0, 5));
        h.reconciler.reconcile(true).await;
        assert_eq!(h.reconciler.poll_interval_secs(), 5);

        h.store
            .put(PATH_SOCKETS, "rpiSyncInterval", json!(30))
            .await
            .unwrap();
        let result = h.reconciler.reconcile(true).await;

        assert!(result.interval_changed);
        assert_eq!(h.reconciler.poll_interval_secs(), 30);
        assert_eq!(h.reconciler.subscribe().borrow().poll_interval_secs, 30);
    }

    #[tokio::test]
    async fn writes_poll_record_after_each_pass() {
        let mut h = harness(sockets([1, 1, 1, 1, 1], 0, 1));

        h.reconciler.reconcile(true).await;

        let record = h.store.get("/sockets/rpiLastCheck").await.unwrap().unwrap();
        let record: PollRecord = serde_json::from_value(record).unwrap();
        assert!(record.timestamp_epoch > 0);
        assert_eq!(
            h.reconciler.subscribe().borrow().last_poll_epoch,
            Some(record.timestamp_epoch)
        );
    }

    #[tokio::test]
    async fn malformed_document_aborts_without_touching_state() {
        let mut h = harness(json!({ "socket1": 0 }));

        let result = h.reconciler.reconcile(true).await;

        assert!(result.aborted);
        assert!(h.sender.codes().is_empty());
        assert!(h.store.writes().await.is_empty());
        assert!(SocketId::all().all(|socket| h.reconciler.engine().actual(socket)));
    }

    struct UnreachableStore;

    #[async_trait]
    impl RemoteStateClient for UnreachableStore {
        async fn get(&self, _path: &str) -> anyhow::Result<Option<Value>> {
            anyhow::bail!("connection refused")
        }

        async fn put(&self, _path: &str, _key: &str, _value: Value) -> anyhow::Result<Value> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn unexpected_force_value_still_syncs_sockets() {
        let mut document = sockets([1, 0, 1, 1, 1], 0, 1);
        document["forceUpdate"] = json!("1");
        let mut h = harness(document);

        let result = h.reconciler.reconcile(true).await;

        assert!(!result.aborted);
        assert!(!result.forced);
        assert_eq!(h.sender.codes(), vec![code(2, false)]);
        assert_eq!(force_resets(&h.store).await, 0);
    }

    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl RemoteStateClient for ReadOnlyStore {
        async fn get(&self, path: &str) -> anyhow::Result<Option<Value>> {
            self.inner.get(path).await
        }

        async fn put(&self, _path: &str, _key: &str, _value: Value) -> anyhow::Result<Value> {
            anyhow::bail!("permission denied")
        }
    }

    #[tokio::test]
    async fn failed_force_reset_repeats_resync_next_pass() {
        let store = ReadOnlyStore {
            inner: MemoryStore::with_root(json!({ "sockets": sockets([1, 1, 1, 1, 1], 1, 1) })),
        };
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = Arc::new(ActuatorDispatcher::new(sender.clone(), &quiet_rf()));
        let mut reconciler = Reconciler::new(
            &SyncConfig::default(),
            Arc::new(store),
            dispatcher,
            chrono_tz::UTC,
        );

        let first = reconciler.reconcile(true).await;
        let second = reconciler.reconcile(true).await;

        assert!(first.forced);
        assert!(second.forced);
        let codes = sender.codes();
        assert_eq!(codes.len(), 10);
        assert_eq!(&codes[..5], &codes[5..]);
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_no_change() {
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = Arc::new(ActuatorDispatcher::new(sender.clone(), &quiet_rf()));
        let mut reconciler = Reconciler::new(
            &SyncConfig::default(),
            Arc::new(UnreachableStore),
            dispatcher,
            chrono_tz::UTC,
        );

        let result = reconciler.reconcile(true).await;

        assert!(result.aborted);
        assert!(!result.changed);
        assert!(sender.codes().is_empty());
    }
}
