//! Cold-start mitigation for a backend host that sleeps when idle.
//!
//! A periodic probe of the health endpoint keeps the host warm while the
//! client is alive, and [`KeepAlive::wake_up`] fires a burst of probes when
//! a request has already failed for lack of connectivity.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use reqwest::Method;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::request::join_url;
use crate::api::{ApiError, ApiRequest, Transport};
use crate::config::ApiSettings;

/// Shortest probe period; `interval_at` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub struct KeepAlive {
    transport: Arc<dyn Transport>,
    health_url: String,
    interval: Duration,
    probe_timeout: Duration,
    probe_count: usize,
    settle: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAlive {
    pub fn new(transport: Arc<dyn Transport>, settings: &ApiSettings) -> Self {
        Self {
            transport,
            health_url: join_url(&settings.base_url, &settings.health_path),
            interval: settings.keep_alive_interval().max(MIN_INTERVAL),
            probe_timeout: settings.probe_timeout(),
            probe_count: settings.wake_probe_count.max(1),
            settle: settings.wake_settle(),
            timer: Mutex::new(None),
        }
    }

    /// Start the periodic probe unless it already runs. Returns `true` only
    /// for the call that started it.
    ///
    /// Needs a Tokio runtime; without one nothing is started.
    pub fn ensure_started(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if timer.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, keep-alive not started");
            return false;
        };

        let prober = self.prober();
        let period = self.interval;
        *timer = Some(runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                match prober.probe().await {
                    Ok(()) => debug!(url = %prober.url, "Keep-alive probe ok"),
                    Err(e) => debug!(url = %prober.url, error = %e, "Keep-alive probe failed"),
                }
            }
        }));
        info!(interval_secs = period.as_secs(), "Keep-alive started");
        true
    }

    /// Fire several probes in parallel, let the host settle, then test
    /// connectivity once more. The final probe decides the result.
    pub async fn wake_up(&self) -> Result<(), ApiError> {
        let prober = self.prober();
        info!(url = %prober.url, probes = self.probe_count, "Waking up backend");

        let results = join_all((0..self.probe_count).map(|_| prober.probe())).await;
        let answered = results.iter().filter(|r| r.is_ok()).count();
        debug!(answered, "Wake-up probes settled");

        tokio::time::sleep(self.settle).await;

        match prober.probe().await {
            Ok(()) => {
                info!("Backend is awake");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Backend still unreachable after wake-up");
                Err(e)
            }
        }
    }

    fn prober(&self) -> Prober {
        Prober {
            transport: Arc::clone(&self.transport),
            url: self.health_url.clone(),
            timeout: self.probe_timeout,
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}

/// Unauthenticated GET against the health endpoint.
struct Prober {
    transport: Arc<dyn Transport>,
    url: String,
    timeout: Duration,
}

impl Prober {
    async fn probe(&self) -> Result<(), ApiError> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let request = ApiRequest {
            method: Method::GET,
            url: self.url.clone(),
            headers,
            body: None,
        };

        let response = tokio::time::timeout(self.timeout, self.transport.send(&request))
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))??;
        if response.is_success() {
            Ok(())
        } else {
            Err(ApiError::from_status(response.status, &response.status_text, &response.body))
        }
    }
}
