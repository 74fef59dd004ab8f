//! Admission-controlled asset load scheduler.
//!
//! Every node controller submits its loads to one [`LoadScheduler`]. The
//! scheduler keeps at most `max_in_flight` requests dispatched to the
//! [`ResourceProvider`] at a time and services the rest in
//! `(priority, distance, submission order)` order as slots free up. This caps
//! the load placed on the provider at the cost of serializing requests.
//!
//! The scheduler is driven from one control thread: call
//! [`update`](LoadScheduler::update) once per frame to collect provider
//! completions. Completions are delivered to listeners through one-shot
//! channels, so handling a completion never re-enters the scheduler.

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::provider::{
    AssetHandle, ProviderCompletion, ProviderStatus, ProviderTicket, ResourceProvider,
};
use crate::queue::LoadQueue;
use crate::request::{
    ControllerId, LoadRequest, RequestCompletion, RequestHandle, RequestStatus,
};

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of requests dispatched to the provider at once. Values below 1 are treated as 1.
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_in_flight: 1 }
    }
}

/// Scheduler-side state of one request.
#[derive(Debug)]
struct RequestRecord {
    request: LoadRequest,
    status: RequestStatus,
    /// Set once dispatched; released together with the record.
    ticket: Option<ProviderTicket>,
    assets: Vec<AssetHandle>,
    /// Fired once on the terminal transition, then dropped.
    listeners: Vec<Sender<RequestCompletion>>,
}

impl RequestRecord {
    fn completion(&self, handle: RequestHandle) -> RequestCompletion {
        RequestCompletion {
            handle,
            owner: self.request.owner(),
            kind: self.request.kind(),
            status: self.status,
            assets: self.assets.clone(),
        }
    }
}

/// Serializes asynchronous load requests onto a [`ResourceProvider`].
///
/// A request is always in exactly one place: the pending queue, the in-flight
/// set, or retained as completed until it is released.
pub struct LoadScheduler<P: ResourceProvider> {
    provider: P,
    config: SchedulerConfig,
    queue: LoadQueue,
    records: FxHashMap<RequestHandle, RequestRecord>,
    /// Dispatched tickets awaiting a provider completion.
    in_flight: FxHashMap<ProviderTicket, RequestHandle>,
    /// Monotonic; doubles as the FIFO tie-breaker in the queue key.
    next_handle: u64,
    next_owner: u32,
    shut_down: bool,
}

impl<P: ResourceProvider> LoadScheduler<P> {
    pub fn new(provider: P, config: SchedulerConfig) -> Self {
        Self {
            provider,
            config,
            queue: LoadQueue::new(),
            records: FxHashMap::default(),
            in_flight: FxHashMap::default(),
            next_handle: 0,
            next_owner: 0,
            shut_down: false,
        }
    }

    /// Allocates an owner id for a controller.
    pub fn register_owner(&mut self) -> ControllerId {
        let id = ControllerId(self.next_owner);
        self.next_owner += 1;
        id
    }

    /// Queues `request` and dispatches from the head of the queue if a slot is free.
    ///
    /// Returns `None` once the scheduler has been shut down.
    pub fn submit(&mut self, request: LoadRequest) -> Option<RequestHandle> {
        self.submit_inner(request, Vec::new())
    }

    /// Like [`submit`](Self::submit), registering `listener` before dispatch.
    pub fn submit_with_listener(
        &mut self,
        request: LoadRequest,
        listener: Sender<RequestCompletion>,
    ) -> Option<RequestHandle> {
        self.submit_inner(request, vec![listener])
    }

    fn submit_inner(
        &mut self,
        request: LoadRequest,
        listeners: Vec<Sender<RequestCompletion>>,
    ) -> Option<RequestHandle> {
        if self.shut_down {
            tracing::debug!("submit after shutdown ignored: {:?}", request.addresses());
            return None;
        }

        let handle = RequestHandle(self.next_handle);
        self.next_handle += 1;

        self.queue.push(handle, request.key(handle.0));
        self.records.insert(
            handle,
            RequestRecord {
                request,
                status: RequestStatus::Unstarted,
                ticket: None,
                assets: Vec::new(),
                listeners,
            },
        );
        self.dispatch();
        Some(handle)
    }

    /// Returns a one-shot receiver for the request's completion.
    ///
    /// A request that already completed is notified immediately. Returns
    /// `None` for unknown handles and after shutdown.
    pub fn subscribe(&mut self, handle: RequestHandle) -> Option<Receiver<RequestCompletion>> {
        let record = self.records.get_mut(&handle)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        if record.status.is_terminal() {
            let _ = tx.send(record.completion(handle));
        } else {
            record.listeners.push(tx);
        }
        Some(rx)
    }

    /// Cancels a request that has not completed.
    ///
    /// A queued request is dropped without touching the provider. An
    /// in-flight request is released on the provider (best-effort) and its
    /// slot is handed to the next queued request. Completed and unknown
    /// handles are left alone. Listeners of a cancelled request are never
    /// notified; their receivers disconnect.
    pub fn cancel(&mut self, handle: RequestHandle) -> bool {
        let cancellable = self
            .records
            .get(&handle)
            .is_some_and(|record| !record.status.is_terminal());
        cancellable && self.remove(handle)
    }

    /// Cancels the request if needed and releases any provider resources it holds.
    ///
    /// Idempotent: unknown and already-released handles are a no-op.
    pub fn release(&mut self, handle: RequestHandle) -> bool {
        self.remove(handle)
    }

    /// Drops every queued request owned by `owner`. In-flight requests are
    /// not affected. Returns the number of requests dropped.
    pub fn cancel_all(&mut self, owner: ControllerId) -> usize {
        let doomed: Vec<RequestHandle> = self
            .records
            .iter()
            .filter(|(_, record)| {
                record.status == RequestStatus::Unstarted && record.request.owner() == owner
            })
            .map(|(&handle, _)| handle)
            .collect();

        for &handle in &doomed {
            self.queue.remove(handle);
            self.records.remove(&handle);
        }
        if !doomed.is_empty() {
            tracing::debug!("cancelled {} queued requests for {:?}", doomed.len(), owner);
        }
        doomed.len()
    }

    fn remove(&mut self, handle: RequestHandle) -> bool {
        let Some(record) = self.records.remove(&handle) else {
            return false;
        };

        match record.status {
            RequestStatus::Unstarted => {
                self.queue.remove(handle);
            }
            RequestStatus::Pending => {
                if let Some(ticket) = record.ticket {
                    self.in_flight.remove(&ticket);
                    self.provider.release(ticket);
                }
                self.dispatch();
            }
            RequestStatus::Succeeded | RequestStatus::Failed => {
                if let Some(ticket) = record.ticket {
                    self.provider.release(ticket);
                }
            }
        }
        tracing::trace!("released request {} ({:?})", handle.0, record.status);
        true
    }

    /// Collects provider completions and advances the queue.
    ///
    /// Returns the number of requests that completed. After shutdown,
    /// completions are drained and discarded.
    pub fn update(&mut self) -> usize {
        let completions = self.provider.drain_completions();
        if self.shut_down {
            return 0;
        }
        let mut completed = 0;
        for completion in completions {
            if self.complete(completion) {
                completed += 1;
            }
        }
        completed
    }

    /// Applies one provider completion.
    ///
    /// Returns `false` for tickets that are not in flight, such as late
    /// completions of cancelled requests; those are discarded.
    pub fn complete(&mut self, completion: ProviderCompletion) -> bool {
        let Some(handle) = self.in_flight.remove(&completion.ticket) else {
            tracing::trace!("discarding completion for {:?}", completion.ticket);
            return false;
        };
        let Some(record) = self.records.get_mut(&handle) else {
            return false;
        };

        match completion.assets {
            Some(assets) => {
                record.status = RequestStatus::Succeeded;
                record.assets = assets;
            }
            None => {
                record.status = RequestStatus::Failed;
                tracing::warn!(
                    "load failed: {:?} {:?}",
                    record.request.kind(),
                    record.request.addresses()
                );
            }
        }
        tracing::debug!("request {} completed: {:?}", handle.0, record.status);

        let notification = record.completion(handle);
        let listeners = std::mem::take(&mut record.listeners);

        self.dispatch();

        for listener in listeners {
            // A dropped receiver just means nobody is waiting any more.
            let _ = listener.send(notification.clone());
        }
        true
    }

    /// Fills free in-flight slots from the head of the queue.
    fn dispatch(&mut self) {
        let limit = self.config.max_in_flight.max(1);
        while self.in_flight.len() < limit {
            let Some(handle) = self.queue.pop() else {
                break;
            };
            let Some(record) = self.records.get_mut(&handle) else {
                continue;
            };

            let ticket = self
                .provider
                .load(record.request.addresses(), record.request.kind());
            debug_assert_eq!(self.provider.status(ticket), ProviderStatus::Pending);
            record.status = RequestStatus::Pending;
            record.ticket = Some(ticket);
            self.in_flight.insert(ticket, handle);
            tracing::debug!(
                "dispatched request {} (priority {}, distance {}): {:?}",
                handle.0,
                record.request.priority(),
                record.request.distance(),
                record.request.addresses()
            );
        }
    }

    /// Cancels everything queued and releases every dispatched or completed
    /// request. All later operations are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let queued = self.queue.len();
        self.queue.clear();
        self.in_flight.clear();
        for (_, record) in self.records.drain() {
            if let Some(ticket) = record.ticket {
                self.provider.release(ticket);
            }
        }
        tracing::info!("load scheduler shut down ({} queued requests dropped)", queued);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Current status, or `None` if the handle is unknown or released.
    pub fn status(&self, handle: RequestHandle) -> Option<RequestStatus> {
        self.records.get(&handle).map(|record| record.status)
    }

    /// Loaded assets of a succeeded request.
    pub fn result(&self, handle: RequestHandle) -> Option<&[AssetHandle]> {
        self.records
            .get(&handle)
            .filter(|record| record.status == RequestStatus::Succeeded)
            .map(|record| record.assets.as_slice())
    }

    /// Queued (not yet dispatched) handles in the order they will be dispatched.
    pub fn queued(&self) -> Vec<RequestHandle> {
        self.queue.ordered()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }
}

impl<P: ResourceProvider> Drop for LoadScheduler<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
