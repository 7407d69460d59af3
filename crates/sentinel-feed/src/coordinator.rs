//! Keeps the displayed feed in sync with both log origins.
//!
//! Triggers: initial load, the polling timer, manual refresh, and local
//! appends delivered through the client store subscription. Pause
//! suppresses the timer and subscription paths only. Fetch failures become
//! view state plus one local error entry; they never propagate to callers.
//!
//! The view lock is never held while appending to the client store, since
//! the append re-enters the subscription listener synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use sentinel_core::{ClientLogStore, LogSettings, Subscription};
use sentinel_types::{LogLevel, LogRecord};

use crate::client::{FetchError, RemoteLogSource};
use crate::reconcile::{displayed_remote, merge_record, reconcile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub display_cap: usize,
    pub poll_interval: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self::from(&LogSettings::default())
    }
}

impl From<&LogSettings> for FeedSettings {
    fn from(settings: &LogSettings) -> Self {
        Self {
            display_cap: settings.display_cap.max(1),
            poll_interval: settings.poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub records: Vec<LogRecord>,
    pub paused: bool,
    pub loading: bool,
    pub error: Option<String>,
    /// Number of user clears so far; renderers compare it to spot a clear.
    pub clears: u64,
    pub revision: u64,
}

#[derive(Default)]
struct FeedView {
    displayed: Vec<LogRecord>,
    paused: bool,
    loading: bool,
    error: Option<String>,
    clears: u64,
    revision: u64,
}

struct FeedShared {
    view: Mutex<FeedView>,
    changes: watch::Sender<u64>,
    display_cap: usize,
}

impl FeedShared {
    fn view(&self) -> MutexGuard<'_, FeedView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, apply: impl FnOnce(&mut FeedView) -> R) -> R {
        let (out, revision) = {
            let mut view = self.view();
            let out = apply(&mut view);
            view.revision += 1;
            (out, view.revision)
        };
        self.changes.send_replace(revision);
        out
    }

    fn merge_local(&self, record: &LogRecord) {
        let revision = {
            let mut view = self.view();
            if view.paused {
                return;
            }
            view.displayed = merge_record(&view.displayed, record, self.display_cap);
            view.revision += 1;
            view.revision
        };
        self.changes.send_replace(revision);
    }
}

pub struct FeedCoordinator {
    shared: Arc<FeedShared>,
    store: Arc<ClientLogStore>,
    source: Arc<dyn RemoteLogSource>,
    settings: FeedSettings,
    subscription: Subscription,
    recording_failure: AtomicBool,
}

impl FeedCoordinator {
    pub fn new(
        store: Arc<ClientLogStore>,
        source: Arc<dyn RemoteLogSource>,
        settings: FeedSettings,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        let shared = Arc::new(FeedShared {
            view: Mutex::new(FeedView::default()),
            changes,
            display_cap: settings.display_cap.max(1),
        });

        let listener_shared: Weak<FeedShared> = Arc::downgrade(&shared);
        let subscription = store.subscribe(move |record| {
            if let Some(shared) = listener_shared.upgrade() {
                shared.merge_local(record);
            }
        });

        Self {
            shared,
            store,
            source,
            settings,
            subscription,
            recording_failure: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> FeedSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<ClientLogStore> {
        &self.store
    }

    /// Shows the client store contents, then pulls the remote window.
    pub async fn initialize(&self) {
        let local = self.store.list();
        let cap = self.shared.display_cap;
        self.shared.update(|view| {
            view.displayed = reconcile(&[], &[], &local, cap);
            view.loading = true;
        });
        let fetched = self.source.fetch_logs().await;
        match fetched {
            Ok(remote) => self.shared.update(|view| {
                view.displayed = reconcile(&view.displayed, &remote, &[], cap);
                view.loading = false;
                view.error = None;
            }),
            Err(err) => self.record_failure(&err),
        }
    }

    /// Timer-triggered sync. Returns `false` without fetching while paused.
    pub async fn poll(&self) -> bool {
        if self.is_paused() {
            return false;
        }
        self.shared.update(|view| view.loading = true);
        let fetched = self.source.fetch_logs().await;
        self.apply_poll(fetched);
        true
    }

    fn apply_poll(&self, fetched: Result<Vec<LogRecord>, FetchError>) {
        let cap = self.shared.display_cap;
        match fetched {
            Ok(remote) => self.shared.update(|view| {
                view.loading = false;
                view.error = None;
                if !view.paused {
                    view.displayed = reconcile(&view.displayed, &remote, &[], cap);
                }
            }),
            Err(err) => self.record_failure(&err),
        }
    }

    /// Manual sync. Runs even while paused and folds in the full client
    /// store contents, so a cleared view regains local history.
    pub async fn refresh(&self) {
        self.store
            .append("Manually refreshing logs.", LogLevel::Action, None);
        self.shared.update(|view| view.loading = true);
        let fetched = self.source.fetch_logs().await;
        let cap = self.shared.display_cap;
        match fetched {
            Ok(remote) => {
                let local = self.store.list();
                self.shared.update(|view| {
                    view.displayed = reconcile(&view.displayed, &remote, &local, cap);
                    view.loading = false;
                    view.error = None;
                });
            }
            Err(err) => {
                self.record_failure(&err);
                let local = self.store.list();
                self.shared.update(|view| {
                    let remote = displayed_remote(&view.displayed);
                    view.displayed = reconcile(&view.displayed, &remote, &local, cap);
                });
            }
        }
    }

    /// Empties the view. Neither store is touched apart from the audit entry.
    pub fn clear(&self) {
        self.shared.update(|view| {
            view.displayed.clear();
            view.clears += 1;
        });
        self.store.append("Logs cleared by user.", LogLevel::Action, None);
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.update(|view| view.paused = paused);
        tracing::debug!(paused, "feed pause toggled");
    }

    pub fn toggle_pause(&self) -> bool {
        self.shared.update(|view| {
            view.paused = !view.paused;
            view.paused
        })
    }

    pub fn is_paused(&self) -> bool {
        self.shared.view().paused
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let view = self.shared.view();
        FeedSnapshot {
            records: view.displayed.clone(),
            paused: view.paused,
            loading: view.loading,
            error: view.error.clone(),
            clears: view.clears,
            revision: view.revision,
        }
    }

    /// Wakes whenever the view changes; the value is the new revision.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Stops receiving local appends. The view keeps its last contents.
    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }

    /// Starts the polling timer. The first tick fires one period from now.
    pub fn spawn_polling(self: &Arc<Self>) -> PollingHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let coordinator = Arc::downgrade(self);
        let period = self.settings.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if coordinator.is_paused() {
                    continue;
                }
                coordinator.shared.update(|view| view.loading = true);
                let fetched = coordinator.source.fetch_logs().await;
                if cancelled.is_cancelled() {
                    tracing::debug!("discarding fetch that completed after polling stopped");
                    coordinator.shared.update(|view| view.loading = false);
                    break;
                }
                coordinator.apply_poll(fetched);
            }
        });

        PollingHandle {
            token,
            task: Some(task),
        }
    }

    fn record_failure(&self, err: &FetchError) {
        let indicator = format!("Failed to fetch server logs: {err}");
        tracing::warn!(error = %err, "remote log fetch failed");
        self.shared.update(|view| {
            view.loading = false;
            view.error = Some(indicator);
        });
        if self.recording_failure.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store.append(
            format!("Error fetching server logs: {err}"),
            LogLevel::Error,
            None,
        );
        self.recording_failure.store(false, Ordering::Release);
    }
}

impl Drop for FeedCoordinator {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Owner of a running polling timer. Dropping it stops the timer.
#[must_use = "dropping the handle stops polling"]
pub struct PollingHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the timer and waits for any in-flight fetch to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "polling task ended abnormally");
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
