//! Dashboard state for the `top` front end.
//!
//! The render loop owns a [`Dashboard`] and a [`RefreshHandle`]. Cluster
//! queries run on a background task so a slow ECS call never blocks key
//! handling or redraws.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::aws::ClusterSource;
use crate::output::{ServiceFormatter, Tables};

/// Outcome of one query+format pass. Errors are already rendered for display.
pub type RefreshResult = Result<Tables, String>;

/// Everything the dashboard draws.
#[derive(Debug, Clone)]
pub struct Dashboard {
    /// Cluster being watched
    pub cluster: String,
    /// Most recent successfully rendered tables
    pub tables: Tables,
    /// Whether a refresh is in flight
    pub refreshing: bool,
    /// Error from the most recent refresh, cleared by the next success
    pub last_error: Option<String>,
    /// When the tables were last replaced
    pub last_refresh: Option<DateTime<Local>>,
    tick: u64,
    refresh_ticks: u64,
}

impl Dashboard {
    /// Creates an empty dashboard that refreshes every `refresh_interval`,
    /// counted in whole seconds (at least one).
    pub fn new(cluster: impl Into<String>, refresh_interval: Duration) -> Self {
        Self {
            cluster: cluster.into(),
            tables: Tables::default(),
            refreshing: false,
            last_error: None,
            last_refresh: None,
            tick: 0,
            refresh_ticks: refresh_interval.as_secs().max(1),
        }
    }

    /// Fraction of the refresh interval elapsed, in `0.0..1.0`.
    pub fn progress(&self) -> f64 {
        self.tick as f64 / self.refresh_ticks as f64
    }

    /// Advances the gauge by one second. Returns true when it wraps, which is
    /// when the next refresh is due.
    pub fn on_tick(&mut self) -> bool {
        self.tick += 1;
        if self.tick >= self.refresh_ticks {
            self.tick = 0;
            true
        } else {
            false
        }
    }

    pub fn begin_refresh(&mut self) {
        self.refreshing = true;
    }

    /// Stores a refresh outcome. A failure keeps the previous tables.
    pub fn apply(&mut self, result: RefreshResult) {
        self.refreshing = false;
        match result {
            Ok(tables) => {
                self.tables = tables;
                self.last_error = None;
                self.last_refresh = Some(Local::now());
            }
            Err(err) => {
                warn!(cluster = %self.cluster, error = %err, "dashboard refresh failed");
                self.last_error = Some(err);
            }
        }
    }

    pub fn services_title(&self) -> &'static str {
        if self.refreshing {
            "Services (refreshing)"
        } else {
            "Services"
        }
    }

    pub fn gauge_title(&self) -> String {
        if let Some(err) = &self.last_error {
            return format!("Error: {err}");
        }
        match self.last_refresh {
            Some(at) => format!("{} | Last refresh: {}", self.cluster, at.format("%H:%M:%S")),
            None => format!("{} | Loading...", self.cluster),
        }
    }
}

/// Connection to the background refresh task.
///
/// Both channels hold a single message: a request made while one is already
/// queued is dropped, and the task waits for the render loop to pick up each
/// result before starting another pass.
pub struct RefreshHandle {
    requests: mpsc::Sender<()>,
    results: mpsc::Receiver<RefreshResult>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Asks for a refresh. Returns false when one is already queued.
    pub fn request(&self) -> bool {
        self.requests.try_send(()).is_ok()
    }

    /// Returns a finished refresh without waiting.
    pub fn try_result(&mut self) -> Option<RefreshResult> {
        self.results.try_recv().ok()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts the background task that lists `cluster` and renders its tables
/// each time a refresh is requested.
pub fn spawn_refresh_worker(
    source: Arc<dyn ClusterSource>,
    cluster: String,
    formatter: ServiceFormatter,
) -> RefreshHandle {
    let (request_tx, mut request_rx) = mpsc::channel::<()>(1);
    let (result_tx, result_rx) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        while request_rx.recv().await.is_some() {
            debug!(%cluster, "refreshing dashboard");
            let result = refresh(source.as_ref(), &cluster, &formatter).await;
            if result_tx.send(result).await.is_err() {
                break;
            }
        }
    });

    RefreshHandle {
        requests: request_tx,
        results: result_rx,
        task,
    }
}

/// One query+format pass.
pub async fn refresh(
    source: &dyn ClusterSource,
    cluster: &str,
    formatter: &ServiceFormatter,
) -> RefreshResult {
    let services = source
        .list_services(cluster)
        .await
        .map_err(|err| format!("{err:#}"))?;
    formatter
        .render_tables(&services)
        .map_err(|err| err.to_string())
}
