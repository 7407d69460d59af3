use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::RwLock;

use sentinel_types::{LogDetails, LogLevel, LogOrigin, LogRecord};

use crate::listeners::{lock, ListenerRegistry, Subscription};

pub const DEFAULT_CLIENT_LOG_CAPACITY: usize = 100;
pub const DEFAULT_SERVER_LOG_CAPACITY: usize = 200;

/// Capacity-bounded record buffer kept in chronological order.
///
/// Overflow evicts the chronologically oldest record (by timestamp, then id),
/// not the earliest inserted one, so a late wall-clock read never pushes out
/// a newer record.
#[derive(Debug, Clone)]
pub struct BoundedLog {
    capacity: usize,
    records: Vec<LogRecord>,
}

impl BoundedLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts `record` at its chronological position. Returns the evicted
    /// record when the buffer was full; that may be `record` itself if it is
    /// older than everything retained.
    pub fn push(&mut self, record: LogRecord) -> Option<LogRecord> {
        let at = self
            .records
            .partition_point(|existing| LogRecord::chronological(existing, &record).is_le());
        self.records.insert(at, record);
        if self.records.len() > self.capacity {
            return Some(self.records.remove(0));
        }
        None
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Defensive copy, ascending by timestamp.
    pub fn to_vec(&self) -> Vec<LogRecord> {
        self.records.clone()
    }
}

struct ClientState {
    log: BoundedLog,
    pending: VecDeque<LogRecord>,
    dispatching: bool,
}

/// Local-origin store with synchronous listener fan-out.
///
/// Listeners see records in exactly the order they were appended. When no
/// dispatch is running, `append` notifies every listener before it returns.
/// An append made from inside a listener (or from another thread while a
/// dispatch is running) is queued and delivered by the running dispatch
/// right after the current record, so notifications never overtake each
/// other and a listener that logs cannot recurse.
pub struct ClientLogStore {
    state: Mutex<ClientState>,
    listeners: ListenerRegistry,
}

impl ClientLogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ClientState {
                log: BoundedLog::new(capacity),
                pending: VecDeque::new(),
                dispatching: false,
            }),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.state).log.capacity()
    }

    pub fn append(
        &self,
        message: impl Into<String>,
        level: impl Into<Option<LogLevel>>,
        details: Option<LogDetails>,
    ) -> LogRecord {
        let record = LogRecord::new(
            message,
            level.into().unwrap_or_default(),
            LogOrigin::Local,
            details,
        );
        {
            let mut state = lock(&self.state);
            state.log.push(record.clone());
            state.pending.push_back(record.clone());
            if state.dispatching {
                return record;
            }
            state.dispatching = true;
        }
        self.drain_pending();
        record
    }

    /// Records a deliberate navigation made by the routing layer.
    pub fn record_navigation(&self, path: &str) -> LogRecord {
        let mut details = LogDetails::new();
        details.insert("path".to_string(), json!(path));
        self.append(format!("Navigated to {path}"), LogLevel::Action, Some(details))
    }

    pub fn list(&self) -> Vec<LogRecord> {
        lock(&self.state).log.to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn drain_pending(&self) {
        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.pending.pop_front() {
                    Some(record) => record,
                    None => {
                        state.dispatching = false;
                        return;
                    }
                }
            };
            self.listeners.notify(&next);
        }
    }
}

impl Default for ClientLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_LOG_CAPACITY)
    }
}

/// Remote-origin store shared by concurrent request handlers. Insert and
/// eviction happen under one write guard.
#[derive(Clone)]
pub struct ServerLogStore {
    log: Arc<RwLock<BoundedLog>>,
}

impl ServerLogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(RwLock::new(BoundedLog::new(capacity))),
        }
    }

    pub async fn append(
        &self,
        message: impl Into<String>,
        level: impl Into<Option<LogLevel>>,
        details: Option<LogDetails>,
    ) -> LogRecord {
        let record = LogRecord::new(
            message,
            level.into().unwrap_or_default(),
            LogOrigin::Remote,
            details,
        );
        self.log.write().await.push(record.clone());
        tracing::info!(
            target: "sentinel.server_log",
            level = record.level.as_str(),
            details = ?record.details,
            "[Server Log - {}]: {}",
            record.level.as_str().to_ascii_uppercase(),
            record.message
        );
        record
    }

    pub async fn list(&self) -> Vec<LogRecord> {
        self.log.read().await.to_vec()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }

    pub async fn capacity(&self) -> usize {
        self.log.read().await.capacity()
    }

    /// Startup entries announcing that the log service is live.
    pub async fn seed_startup_entries(&self) {
        self.append("Project Sentinel server initialized.", LogLevel::Info, None)
            .await;
        let mut details = LogDetails::new();
        details.insert("service".to_string(), json!("LoggerAPI"));
        self.append(
            "Log monitoring service started.",
            LogLevel::Success,
            Some(details),
        )
        .await;
    }
}

impl Default for ServerLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record_at(offset_secs: i64, message: &str) -> LogRecord {
        LogRecord::at(
            Utc::now() + Duration::seconds(offset_secs),
            message,
            LogLevel::Info,
            LogOrigin::Local,
            None,
        )
    }

    #[test]
    fn bounded_log_evicts_oldest_by_timestamp_not_insertion() {
        let mut log = BoundedLog::new(2);
        log.push(record_at(10, "newest"));
        log.push(record_at(5, "middle"));
        let evicted = log.push(record_at(-5, "late but old"));

        assert_eq!(evicted.map(|r| r.message), Some("late but old".to_string()));
        let messages = log.records().iter().map(|r| r.message.as_str()).collect::<Vec<_>>();
        assert_eq!(messages, vec!["middle", "newest"]);
    }

    #[test]
    fn bounded_log_treats_zero_capacity_as_one() {
        let mut log = BoundedLog::new(0);
        log.push(record_at(0, "a"));
        log.push(record_at(1, "b"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].message, "b");
    }

    #[test]
    fn append_defaults_to_info() {
        let store = ClientLogStore::new(10);
        let record = store.append("loaded", None, None);
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.glyph(), "ℹ️");
        assert_eq!(record.origin, LogOrigin::Local);
    }

    #[test]
    fn client_store_respects_capacity_and_orders_ascending() {
        let store = ClientLogStore::new(3);
        for i in 0..5 {
            store.append(format!("entry {i}"), LogLevel::Debug, None);
        }
        let listed = store.list();
        assert_eq!(listed.len(), 3);
        assert!(listed
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(listed[2].message, "entry 4");
    }

    #[test]
    fn listeners_run_before_append_returns() {
        let store = ClientLogStore::new(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let subs = (0..3)
            .map(|_| {
                let calls = calls.clone();
                store.subscribe(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();
        let _failing = store.subscribe(|_| panic!("boom"));

        store.append("hello", LogLevel::Action, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        subs[0].unsubscribe();
        store.append("again", LogLevel::Action, None);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reentrant_append_is_delivered_after_current_record() {
        let store = Arc::new(ClientLogStore::new(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&store);
        let _echo = store.subscribe(move |record| {
            if record.message == "first" {
                if let Some(store) = weak.upgrade() {
                    store.append("from listener", LogLevel::Debug, None);
                }
            }
        });
        let seen_by_second = seen.clone();
        let _recorder = store.subscribe(move |record| {
            seen_by_second
                .lock()
                .expect("lock")
                .push(record.message.clone());
        });

        store.append("first", LogLevel::Info, None);

        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["first".to_string(), "from listener".to_string()]
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn record_navigation_carries_path_detail() {
        let store = ClientLogStore::default();
        let record = store.record_navigation("/roadmap");
        assert_eq!(record.message, "Navigated to /roadmap");
        assert_eq!(record.level, LogLevel::Action);
        assert_eq!(
            record.details.and_then(|d| d.get("path").cloned()),
            Some(json!("/roadmap"))
        );
    }

    #[tokio::test]
    async fn server_store_seeds_startup_entries() {
        let store = ServerLogStore::default();
        store.seed_startup_entries().await;
        let listed = store.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message, "Project Sentinel server initialized.");
        assert_eq!(listed[1].level, LogLevel::Success);
        assert!(listed.iter().all(|r| r.origin == LogOrigin::Remote));
        assert_eq!(store.capacity().await, DEFAULT_SERVER_LOG_CAPACITY);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_server_appends_never_exceed_capacity() {
        let store = ServerLogStore::new(50);
        let mut tasks = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..40 {
                    store
                        .append(format!("worker {worker} entry {i}"), None, None)
                        .await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }
        let listed = store.list().await;
        assert_eq!(listed.len(), 50);
        assert!(listed
            .windows(2)
            .all(|w| LogRecord::chronological(&w[0], &w[1]).is_le()));
    }
}
