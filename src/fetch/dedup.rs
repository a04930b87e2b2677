// Request deduplication: at most one outstanding call per endpoint.
//
// The first caller for an endpoint creates a shared, abortable, deadline-bounded
// request and spawns a task that drives it; later callers join the same shared
// result until it resolves. The in-flight entry is removed when the request
// settles or is cancelled, so the next call after that issues a fresh request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{AbortHandle, Abortable, BoxFuture, Shared};

use super::{FetchError, TelemetryFetcher};
use crate::models::Sample;

type SharedResult = Shared<BoxFuture<'static, Result<Sample, FetchError>>>;
type InFlightTable = Arc<Mutex<HashMap<String, InFlightEntry>>>;

struct InFlightEntry {
    request_id: u64,
    result: SharedResult,
    abort: AbortHandle,
}

fn lock_table(table: &Mutex<HashMap<String, InFlightEntry>>) -> MutexGuard<'_, HashMap<String, InFlightEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A caller's view of an outstanding request. Clones observe the same result.
#[derive(Clone)]
pub struct PendingFetch {
    request_id: u64,
    endpoint: String,
    result: SharedResult,
    abort: AbortHandle,
    table: InFlightTable,
}

impl PendingFetch {
    /// Id of the underlying network request (shared by every joined caller).
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Abort the underlying call. Every caller joined to it resolves with
    /// `FetchError::Cancelled`, and the endpoint is free for a fresh request at once.
    pub fn cancel(&self) {
        self.abort.abort();
        let mut table = lock_table(&self.table);
        if table
            .get(&self.endpoint)
            .is_some_and(|e| e.request_id == self.request_id)
        {
            table.remove(&self.endpoint);
        }
    }

    pub async fn wait(self) -> Result<Sample, FetchError> {
        self.result.await
    }
}

pub struct RequestDeduper<F> {
    fetcher: Arc<F>,
    in_flight: InFlightTable,
    next_request_id: Arc<AtomicU64>,
    network_calls: Arc<AtomicU64>,
}

impl<F> Clone for RequestDeduper<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            in_flight: self.in_flight.clone(),
            next_request_id: self.next_request_id.clone(),
            network_calls: self.network_calls.clone(),
        }
    }
}

impl<F: TelemetryFetcher> RequestDeduper<F> {
    pub fn new(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(0)),
            network_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start (or join) the request for `endpoint`. The `timeout` only applies when
    /// this call starts the request; a joined request keeps its original deadline.
    pub fn fetch_once(&self, endpoint: &str, timeout: Duration) -> PendingFetch {
        let mut table = lock_table(&self.in_flight);
        if let Some(entry) = table.get(endpoint) {
            tracing::trace!(endpoint, request_id = entry.request_id, "joining in-flight request");
            return PendingFetch {
                request_id: entry.request_id,
                endpoint: endpoint.to_string(),
                result: entry.result.clone(),
                abort: entry.abort.clone(),
                table: self.in_flight.clone(),
            };
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (abort, registration) = AbortHandle::new_pair();
        let fetcher = self.fetcher.clone();
        let cleanup_table = self.in_flight.clone();
        let owned_endpoint = endpoint.to_string();

        let result = async move {
            let call = tokio::time::timeout(timeout, fetcher.fetch(&owned_endpoint));
            let outcome = match Abortable::new(call, registration).await {
                Ok(Ok(result)) => result,
                Ok(Err(_elapsed)) => Err(FetchError::Timeout),
                Err(_aborted) => Err(FetchError::Cancelled),
            };
            let mut table = lock_table(&cleanup_table);
            if table
                .get(&owned_endpoint)
                .is_some_and(|e| e.request_id == request_id)
            {
                table.remove(&owned_endpoint);
            }
            outcome
        }
        .boxed()
        .shared();

        table.insert(
            endpoint.to_string(),
            InFlightEntry {
                request_id,
                result: result.clone(),
                abort: abort.clone(),
            },
        );
        drop(table);

        self.network_calls.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(result.clone());

        PendingFetch {
            request_id,
            endpoint: endpoint.to_string(),
            result,
            abort,
            table: self.in_flight.clone(),
        }
    }

    /// Whether a request for `endpoint` is currently outstanding.
    pub fn is_in_flight(&self, endpoint: &str) -> bool {
        lock_table(&self.in_flight).contains_key(endpoint)
    }

    /// Network requests started so far (joins not counted).
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }
}
