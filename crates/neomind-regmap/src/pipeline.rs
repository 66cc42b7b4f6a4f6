//! Request pipeline.
//!
//! Drives a request end to end:
//!
//! 1. walk the requested range, checking write permission and collecting
//!    the properties involved;
//! 2. wait until every collected property is ready (the only suspension
//!    point, bounded by an optional timeout and cancellable);
//! 3. re-walk the range and read or write through the codec;
//! 4. emit exactly one completion.
//!
//! Completions go to the channel returned by [`RequestPipeline::take_completions`],
//! or to the caller of [`RequestPipeline::execute`] for requests submitted that way.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::backend::{Property, PropertyState, SharedResolver};
use crate::codec;
use crate::config::DEFAULT_READY_TIMEOUT;
use crate::error::{MappingError, MappingResult};
use crate::iterator::RegisterSpanIterator;
use crate::request::{Completion, MappingRequest, RequestId, RequestKind};
use crate::schema::RegisterSchema;
use crate::unit_id::UnitIdTable;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a request may wait for its properties. `None` waits forever.
    pub ready_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Some(DEFAULT_READY_TIMEOUT),
        }
    }
}

/// A request suspended until its properties become ready.
struct PendingAssociation {
    paths: Vec<String>,
    cancel: oneshot::Sender<()>,
}

struct PipelineInner {
    schema: Arc<RegisterSchema>,
    unit_ids: Arc<UnitIdTable>,
    resolver: SharedResolver,
    config: PipelineConfig,
    pending: DashMap<RequestId, PendingAssociation>,
    waiters: DashMap<RequestId, oneshot::Sender<MappingRequest>>,
    completions: mpsc::UnboundedSender<Completion>,
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<Completion>>>,
}

impl PipelineInner {
    fn iter(&self, request: &MappingRequest) -> RegisterSpanIterator<'_> {
        RegisterSpanIterator::new(
            &self.schema,
            &self.unit_ids,
            self.resolver.as_ref(),
            request.address,
            request.unit_id,
            request.quantity,
        )
    }
}

/// Translates register requests into backend property reads and writes.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<PipelineInner>,
}

impl RequestPipeline {
    pub fn new(schema: RegisterSchema, unit_ids: UnitIdTable, resolver: SharedResolver) -> Self {
        Self::with_config(schema, unit_ids, resolver, PipelineConfig::default())
    }

    pub fn with_config(
        schema: RegisterSchema,
        unit_ids: UnitIdTable,
        resolver: SharedResolver,
        config: PipelineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(PipelineInner {
                schema: Arc::new(schema),
                unit_ids: Arc::new(unit_ids),
                resolver,
                config,
                pending: DashMap::new(),
                waiters: DashMap::new(),
                completions: tx,
                completion_rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Take the completion stream. Returns `None` after the first call.
    pub fn take_completions(&self) -> Option<mpsc::UnboundedReceiver<Completion>> {
        self.inner.completion_rx.lock().take()
    }

    /// Number of requests waiting for property readiness.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Object paths a suspended request is waiting on.
    pub fn pending_paths(&self, id: RequestId) -> Option<Vec<String>> {
        self.inner.pending.get(&id).map(|p| p.paths.clone())
    }

    /// Submit a request. Its completion is delivered on the completion channel.
    ///
    /// Requests that have to wait for readiness are resumed on the current
    /// Tokio runtime.
    pub fn handle_request(&self, request: MappingRequest) -> RequestId {
        let id = RequestId::new();
        self.submit(id, request);
        id
    }

    /// Submit a request and wait for its completion.
    pub async fn execute(&self, request: MappingRequest) -> MappingRequest {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.insert(id, tx);

        let (kind, address, unit_id, quantity) =
            (request.kind, request.address, request.unit_id, request.quantity);
        self.submit(id, request);

        match rx.await {
            Ok(request) => request,
            Err(_) => {
                let mut request = match kind {
                    RequestKind::Read => MappingRequest::read(address, unit_id, quantity),
                    RequestKind::Write => {
                        MappingRequest::write_bytes(address, unit_id, quantity, Vec::new())
                    }
                };
                request.set_error(MappingError::Service(format!(
                    "Request {} was dropped before completion",
                    id
                )));
                request
            }
        }
    }

    /// Cancel a request waiting for readiness. It completes with
    /// `MappingError::Cancelled`. Returns `false` if the request is not waiting
    /// or its wait has already been settled.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.inner.pending.remove(&id) {
            Some((_, association)) => {
                debug!("Cancel request {}", id);
                let _ = association.cancel.send(());
                true
            }
            None => false,
        }
    }

    fn submit(&self, id: RequestId, mut request: MappingRequest) {
        debug!(
            "Request {} {:?} address {} unit {} quantity {}",
            id, request.kind, request.address, request.unit_id, request.quantity
        );
        match self.collect(&request) {
            Ok(properties) => {
                let pending: Vec<Arc<dyn Property>> = properties
                    .into_iter()
                    .filter(|p| !p.state().is_ready())
                    .collect();
                if pending.is_empty() {
                    self.dispatch(id, request);
                } else {
                    self.suspend(id, request, pending);
                }
            }
            Err(e) => {
                request.set_error(e);
                self.complete(id, request);
            }
        }
    }

    /// Walk the whole range, checking permissions and collecting one
    /// property per entry. Nothing is read or written here.
    fn collect(&self, request: &MappingRequest) -> MappingResult<Vec<Arc<dyn Property>>> {
        if request.kind == RequestKind::Write
            && request.quantity > 0
            && request.data.len() < 2 * request.quantity as usize
        {
            return Err(MappingError::Service(format!(
                "Write payload of {} bytes is too short for {} registers",
                request.data.len(),
                request.quantity
            )));
        }

        let mut it = self.inner.iter(request);
        let mut properties = Vec::new();
        while let Some(entry) = it.entry() {
            if request.kind == RequestKind::Write && !entry.access.can_write() {
                let address = it.address().unwrap_or(entry.address);
                return Err(MappingError::Permission(address));
            }
            if let Some(property) = it.property() {
                properties.push(property);
            }
            it.advance_entry();
        }
        match it.take_error() {
            Some(e) => Err(e),
            None => Ok(properties),
        }
    }

    fn suspend(&self, id: RequestId, request: MappingRequest, pending: Vec<Arc<dyn Property>>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                let mut request = request;
                request.set_error(MappingError::Service(
                    "No async runtime to wait for property readiness".to_string(),
                ));
                self.complete(id, request);
                return;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let paths: Vec<String> = pending.iter().map(|p| p.path().to_string()).collect();
        debug!("Request {} waiting for {:?}", id, paths);
        self.inner.pending.insert(
            id,
            PendingAssociation {
                paths,
                cancel: cancel_tx,
            },
        );

        let pipeline = self.clone();
        let timeout = self.inner.config.ready_timeout;
        runtime.spawn(async move {
            let all_ready = async {
                join_all(pending.iter().map(|p| p.ready())).await;
            };
            let outcome = tokio::select! {
                _ = cancel_rx => Err(MappingError::Cancelled),
                result = wait_ready(all_ready, timeout) => result,
            };

            match pipeline.settle(id, outcome) {
                Ok(()) => pipeline.dispatch(id, request),
                Err(e) => {
                    warn!("Request {} not dispatched: {}", id, e);
                    let mut request = request;
                    request.set_error(e);
                    pipeline.complete(id, request);
                }
            }
        });
    }

    /// Claim the pending association of a request whose wait has ended.
    /// A request whose association was already taken by `cancel` is cancelled,
    /// whatever the outcome of the wait.
    fn settle(&self, id: RequestId, outcome: MappingResult<()>) -> MappingResult<()> {
        match self.inner.pending.remove(&id) {
            Some(_) => outcome,
            None => Err(MappingError::Cancelled),
        }
    }

    fn dispatch(&self, id: RequestId, mut request: MappingRequest) {
        let result = match request.kind {
            RequestKind::Read => self.read_values(&mut request),
            RequestKind::Write => self.write_values(&request),
        };
        if let Err(e) = result {
            request.set_error(e);
        }
        self.complete(id, request);
    }

    fn read_values(&self, request: &mut MappingRequest) -> MappingResult<()> {
        let mut it = self.inner.iter(request);
        let mut reply = Vec::with_capacity(2 * request.quantity.max(0) as usize);
        while let Some(entry) = it.entry() {
            let offset = it.offset();
            let Some(property) = it.property() else {
                break;
            };
            if property.state() == PropertyState::Offline {
                trace!("Value not available {}", entry.object_path);
            }
            let value = property.value();
            let word = codec::decode_register(&value, entry.data_kind, offset, entry.scale_factor);
            reply.extend_from_slice(&word.to_be_bytes());
            debug!(
                "Get value {} offset {}: {}",
                entry.object_path, offset, value
            );
            it.advance();
        }
        if let Some(e) = it.take_error() {
            return Err(e);
        }
        request.data = reply;
        Ok(())
    }

    fn write_values(&self, request: &MappingRequest) -> MappingResult<()> {
        let words = request.words();
        let mut it = self.inner.iter(request);
        let mut index = 0usize;
        while let Some(entry) = it.entry() {
            let offset = it.offset();
            let count = it.register_count() as usize;
            let Some(property) = it.property() else {
                break;
            };
            let slice = words.get(index..index + count).ok_or_else(|| {
                MappingError::Service(format!(
                    "Write payload ends before register {}",
                    entry.address + offset
                ))
            })?;

            let value = codec::encode_registers(&property.value(), entry, offset, slice)?;
            debug!("Set value {} to {}", entry.object_path, value);
            property.set_value(value).map_err(|e| {
                MappingError::Service(format!("SetValue failed on {}: {}", entry.object_path, e))
            })?;

            index += count;
            it.advance_entry();
        }
        match it.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Emit the completion. Consumes the request, so it runs once per request.
    fn complete(&self, id: RequestId, request: MappingRequest) {
        if let Some(e) = request.error() {
            debug!("Request {} failed: {}", id, e);
        }
        let request = match self.inner.waiters.remove(&id) {
            Some((_, waiter)) => match waiter.send(request) {
                Ok(()) => return,
                Err(request) => request,
            },
            None => request,
        };
        if self.inner.completions.send(Completion { id, request }).is_err() {
            trace!("Completion for {} dropped", id);
        }
    }
}

async fn wait_ready<F>(all_ready: F, timeout: Option<Duration>) -> MappingResult<()>
where
    F: std::future::Future<Output = ()>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, all_ready)
            .await
            .map_err(|_| MappingError::Timeout(limit.as_millis() as u64)),
        None => {
            all_ready.await;
            Ok(())
        }
    }
}
