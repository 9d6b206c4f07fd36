use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, FetchOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Loading,
    Success,
    Error,
}

/// What a call-site exposes to its view.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub status: Status,
    /// Last good payload. Kept when a later request fails.
    pub data: Option<Value>,
    pub error: Option<ApiError>,
    /// Incremented on every data or error write.
    pub revision: u64,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            data: None,
            error: None,
            revision: 0,
        }
    }
}

impl ResourceState {
    pub fn is_loading(&self) -> bool {
        self.status == Status::Loading
    }
}

/// How a fetch on a call-site settled, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fresh payload from the backend.
    Network(Value),
    /// Served from the response cache without network I/O.
    Cached(Value),
    /// A newer request on the same call-site (or disposal) took over;
    /// nothing was written.
    Superseded,
    /// Dependencies did not change, nothing was fetched.
    Unchanged,
}

/// One logical consumer of a resource.
///
/// At most one request per subscription is in flight: starting a new one
/// aborts the previous, and a result from an older generation is dropped
/// even if it finished first. Dropping the subscription cancels whatever is
/// pending without touching the cache or the exposed state.
pub struct Subscription {
    shared: Arc<Shared>,
}

struct Shared {
    client: ApiClient,
    path: String,
    options: FetchOptions,
    control: Mutex<Control>,
    state: watch::Sender<ResourceState>,
}

struct Control {
    generation: u64,
    in_flight: Option<AbortHandle>,
    dependencies: Vec<Value>,
    disposed: bool,
}

enum Start {
    Cached(Value),
    Run(u64, AbortRegistration),
    Disposed,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel the in-flight request and claim the next generation.
    fn supersede(control: &mut Control) -> u64 {
        if let Some(handle) = control.in_flight.take() {
            handle.abort();
        }
        control.generation += 1;
        control.generation
    }

    /// Synchronous half of a load: serve from cache, or claim a generation
    /// and enter `Loading`.
    fn start(&self, use_cache: bool) -> Start {
        let cached = if use_cache && self.options.cache {
            let key = self.client.cache_key(&self.path, &self.options);
            self.client.cache().get(&key)
        } else {
            None
        };

        let mut control = self.lock();
        if control.disposed {
            return Start::Disposed;
        }
        let generation = Self::supersede(&mut control);

        if let Some(payload) = cached {
            self.write_success(payload.clone());
            return Start::Cached(payload);
        }

        let (handle, registration) = AbortHandle::new_pair();
        control.in_flight = Some(handle);
        self.state.send_modify(|state| state.status = Status::Loading);
        Start::Run(generation, registration)
    }

    async fn run(&self, generation: u64, registration: AbortRegistration) -> Result<FetchOutcome, ApiError> {
        let epoch = self.client.cache().epoch();
        let request = self.client.build_request(&self.path, &self.options);
        let work = self.client.execute(
            &request,
            self.client.timeout_for(&self.options),
            self.client.retry_for(&self.options),
        );

        let Ok(result) = Abortable::new(work, registration).await else {
            debug!(path = %self.path, generation, "Request superseded");
            return Ok(FetchOutcome::Superseded);
        };

        let mut control = self.lock();
        if control.disposed || control.generation != generation {
            debug!(path = %self.path, generation, "Discarding result of superseded request");
            return Ok(FetchOutcome::Superseded);
        }
        control.in_flight = None;

        match result {
            Ok(payload) => {
                if self.options.cache {
                    let key = self.client.cache_key(&self.path, &self.options);
                    self.client.cache().insert_if_current(key, payload.clone(), epoch);
                }
                self.write_success(payload.clone());
                Ok(FetchOutcome::Network(payload))
            }
            Err(e) => {
                self.write_error(e.clone());
                Err(e)
            }
        }
    }

    async fn load(&self, use_cache: bool) -> Result<FetchOutcome, ApiError> {
        match self.start(use_cache) {
            Start::Cached(payload) => Ok(FetchOutcome::Cached(payload)),
            Start::Run(generation, registration) => self.run(generation, registration).await,
            Start::Disposed => Ok(FetchOutcome::Superseded),
        }
    }

    fn load_in_background(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(path = %self.path, "No async runtime, skipping immediate fetch");
            return;
        };
        if let Start::Run(generation, registration) = self.start(true) {
            let shared = Arc::clone(self);
            runtime.spawn(async move {
                if let Err(e) = shared.run(generation, registration).await {
                    debug!(path = %shared.path, error = %e, "Initial fetch failed");
                }
            });
        }
    }

    fn write_success(&self, payload: Value) {
        self.state.send_modify(|state| {
            state.status = Status::Success;
            state.data = Some(payload);
            state.error = None;
            state.revision += 1;
        });
    }

    fn write_error(&self, error: ApiError) {
        self.state.send_modify(|state| {
            state.status = Status::Error;
            state.error = Some(error);
            state.revision += 1;
        });
    }

    fn dispose(&self) {
        let mut control = self.lock();
        control.disposed = true;
        Self::supersede(&mut control);
    }
}

impl Subscription {
    pub fn options(&self) -> &FetchOptions {
        &self.shared.options
    }

    /// Cache-aware load: a fresh cached payload settles immediately.
    pub async fn fetch(&self) -> Result<FetchOutcome, ApiError> {
        self.shared.load(true).await
    }

    /// Go to the network regardless of the cache. The result still
    /// populates the cache when caching is enabled.
    pub async fn refetch(&self) -> Result<FetchOutcome, ApiError> {
        self.shared.load(false).await
    }

    /// Replace the dependency list, refetching when it changed by value.
    pub async fn set_dependencies(&self, dependencies: Vec<Value>) -> Result<FetchOutcome, ApiError> {
        {
            let mut control = self.shared.lock();
            if control.dependencies == dependencies {
                return Ok(FetchOutcome::Unchanged);
            }
            debug!(path = %self.shared.path, "Dependencies changed");
            control.dependencies = dependencies;
        }
        self.shared.load(false).await
    }

    /// Overwrite the exposed data locally, e.g. for an optimistic update.
    /// No network I/O and no cache write.
    pub fn mutate(&self, value: Value) {
        self.shared.state.send_if_modified(|state| {
            if state.status == Status::Success && state.data.as_ref() == Some(&value) {
                return false;
            }
            state.status = Status::Success;
            state.data = Some(value);
            state.error = None;
            state.revision += 1;
            true
        });
    }

    pub fn state(&self) -> ResourceState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<ResourceState> {
        self.shared.state.subscribe()
    }

    /// Current data deserialized into `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, ApiError> {
        match self.shared.state.borrow().data {
            Some(ref value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ApiError::InvalidResponse(e.to_string())),
            None => Ok(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl ApiClient {
    /// Declare interest in a resource.
    ///
    /// With `options.immediate` the initial load starts right away (served
    /// synchronously from cache when possible, otherwise spawned on the
    /// current Tokio runtime).
    pub fn subscribe(&self, path: &str, options: FetchOptions) -> Subscription {
        let (state, _) = watch::channel(ResourceState::default());
        let shared = Arc::new(Shared {
            client: self.clone(),
            path: path.to_string(),
            control: Mutex::new(Control {
                generation: 0,
                in_flight: None,
                dependencies: options.dependencies.clone(),
                disposed: false,
            }),
            options,
            state,
        });

        if shared.options.immediate {
            shared.load_in_background();
        }
        Subscription { shared }
    }
}
