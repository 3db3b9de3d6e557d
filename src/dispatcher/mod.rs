//! Background execution context for retrieval.
//!
//! The [`RetrievalCoordinator`] lives on a dedicated thread running a
//! single-threaded runtime and handles one request at a time, in arrival
//! order. Callers talk to it through a cloneable [`DispatcherHandle`]; every
//! request gets a fresh id and its response is routed back by that id, so
//! overlapping calls never receive each other's answers.


pub mod protocol;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::database::{Chunk, DocumentSummary, ScoredChunk};
use crate::retrieval::{DocumentInput, RetrievalCoordinator};
use crate::{DocchatError, Result};

pub use protocol::{Envelope, ErrorKind, Request, RequestId, Response};

/// `None` once the background context has stopped
type PendingCalls = Arc<Mutex<Option<HashMap<RequestId, oneshot::Sender<Response>>>>>;

pub struct Dispatcher;

impl Dispatcher {
    /// Move `coordinator` onto its own thread and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime: the task that routes
    /// responses back to callers runs on the caller's runtime.
    pub fn spawn(coordinator: RetrievalCoordinator) -> Result<DispatcherHandle> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("docchat-retrieval")
            .build()?;

        let (request_tx, request_rx) = mpsc::unbounded_channel::<Envelope<Request>>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Envelope<Response>>();

        thread::Builder::new()
            .name("docchat-retrieval".to_string())
            .spawn(move || {
                runtime.block_on(run_worker(coordinator, request_rx, response_tx));
            })?;

        let pending: PendingCalls = Arc::new(Mutex::new(Some(HashMap::new())));
        tokio::spawn(route_responses(response_rx, Arc::clone(&pending)));

        info!("Retrieval dispatcher started");

        Ok(DispatcherHandle {
            requests: request_tx,
            pending,
            next_id: Arc::new(AtomicI64::new(1)),
        })
    }
}

/// Cloneable client of the background retrieval context
#[derive(Clone)]
pub struct DispatcherHandle {
    requests: mpsc::UnboundedSender<Envelope<Request>>,
    pending: PendingCalls,
    next_id: Arc<AtomicI64>,
}

/// A submitted request whose response has not been awaited yet.
///
/// Dropping it abandons the call; the response is discarded when it arrives.
pub struct PendingResponse {
    id: RequestId,
    receiver: oneshot::Receiver<Response>,
}

impl PendingResponse {
    #[inline]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response. Fails with `WorkerStopped` if the background
    /// context ended first.
    #[inline]
    pub async fn wait(self) -> Result<Response> {
        self.receiver.await.map_err(|_| DocchatError::WorkerStopped)
    }
}

impl DispatcherHandle {
    /// Enqueue `request` without waiting for it
    pub fn submit(&self, request: Request) -> Result<PendingResponse> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(calls) = pending.as_mut() else {
                return Err(DocchatError::WorkerStopped);
            };
            calls.insert(id.clone(), sender);
        }

        debug!("Submitting {} request {}", request.action(), id);

        let envelope = Envelope {
            id: id.clone(),
            body: request,
        };
        if self.requests.send(envelope).is_err() {
            self.forget(&id);
            return Err(DocchatError::WorkerStopped);
        }

        Ok(PendingResponse { id, receiver })
    }

    /// Submit `request` and wait for its response
    #[inline]
    pub async fn call(&self, request: Request) -> Result<Response> {
        self.submit(request)?.wait().await
    }

    pub async fn add_documents(
        &self,
        documents: Vec<DocumentInput>,
        chunk_size: usize,
    ) -> Result<()> {
        let chunk_size = i64::try_from(chunk_size).map_err(|_| {
            DocchatError::InvalidArgument(format!("chunk size {} is too large", chunk_size))
        })?;

        match self
            .call(Request::AddDocumentsToStore {
                documents,
                chunk_size,
            })
            .await?
            .into_result()?
        {
            Response::DocumentsAdded => Ok(()),
            other => Err(unexpected_response("addDocumentsToStore", &other)),
        }
    }

    pub async fn search(&self, query: impl Into<String>, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let top_k = i64::try_from(top_k)
            .map_err(|_| DocchatError::InvalidArgument(format!("topK {} is too large", top_k)))?;

        match self
            .call(Request::SearchSimilarDocuments {
                query: query.into(),
                top_k,
            })
            .await?
            .into_result()?
        {
            Response::SearchResults { results } => Ok(results),
            other => Err(unexpected_response("searchSimilarDocuments", &other)),
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        match self.call(Request::ListDocuments).await?.into_result()? {
            Response::DocumentsList { documents } => Ok(documents),
            other => Err(unexpected_response("listDocuments", &other)),
        }
    }

    pub async fn get_documents_by_doc_id(&self, doc_id: impl Into<String>) -> Result<Vec<Chunk>> {
        match self
            .call(Request::GetDocumentsByDocId {
                doc_id: doc_id.into(),
            })
            .await?
            .into_result()?
        {
            Response::GetDocumentsResults { results } => Ok(results),
            other => Err(unexpected_response("getDocumentsByDocId", &other)),
        }
    }

    /// Number of calls still waiting for a response
    #[inline]
    pub fn pending_calls(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, HashMap::len)
    }

    fn forget(&self, id: &RequestId) {
        if let Some(calls) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            calls.remove(id);
        }
    }
}

fn unexpected_response(action: &str, response: &Response) -> DocchatError {
    DocchatError::Other(anyhow::anyhow!(
        "unexpected {} response to {}",
        response.action(),
        action
    ))
}

async fn route_responses(
    mut responses: mpsc::UnboundedReceiver<Envelope<Response>>,
    pending: PendingCalls,
) {
    while let Some(Envelope { id, body }) = responses.recv().await {
        let sender = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .and_then(|calls| calls.remove(&id));

        match sender {
            Some(sender) => {
                if sender.send(body).is_err() {
                    debug!("Discarding response {}: caller went away", id);
                }
            }
            None => debug!("Discarding response {}: no pending call", id),
        }
    }

    // dropping the senders wakes every waiter with WorkerStopped
    let abandoned = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .map_or(0, |calls| calls.len());
    if abandoned > 0 {
        warn!(
            "Retrieval context stopped with {} calls unanswered",
            abandoned
        );
    } else {
        debug!("Retrieval context stopped");
    }
}

async fn run_worker(
    coordinator: RetrievalCoordinator,
    mut requests: mpsc::UnboundedReceiver<Envelope<Request>>,
    responses: mpsc::UnboundedSender<Envelope<Response>>,
) {
    while let Some(Envelope { id, body }) = requests.recv().await {
        let action = body.action();
        debug!("Handling {} request {}", action, id);

        let response = handle_request(&coordinator, body).await;
        if let Response::Error { kind, message } = &response {
            error!("{} request {} failed ({}): {}", action, id, kind, message);
        }

        if responses.send(Envelope { id, body: response }).is_err() {
            break;
        }
    }

    coordinator.store().close().await;
}

/// Execute one request against `coordinator`, turning any failure into an
/// `error` response
pub async fn handle_request(coordinator: &RetrievalCoordinator, request: Request) -> Response {
    match execute(coordinator, request).await {
        Ok(response) => response,
        Err(err) => Response::error(&err),
    }
}

async fn execute(coordinator: &RetrievalCoordinator, request: Request) -> Result<Response> {
    match request {
        Request::AddDocumentsToStore {
            documents,
            chunk_size,
        } => {
            let chunk_size = usize::try_from(chunk_size)
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| {
                    DocchatError::InvalidArgument(format!(
                        "chunkSize must be positive, got {}",
                        chunk_size
                    ))
                })?;
            coordinator.ingest(&documents, chunk_size).await?;
            Ok(Response::DocumentsAdded)
        }
        Request::SearchSimilarDocuments { query, top_k } => {
            let top_k = usize::try_from(top_k).map_err(|_| {
                DocchatError::InvalidArgument(format!("topK must not be negative, got {}", top_k))
            })?;
            let results = coordinator.search(&query, top_k).await?;
            Ok(Response::SearchResults { results })
        }
        Request::ListDocuments => Ok(Response::DocumentsList {
            documents: coordinator.list_documents().await?,
        }),
        Request::GetDocumentsByDocId { doc_id } => Ok(Response::GetDocumentsResults {
            results: coordinator.get_document(&doc_id).await?,
        }),
    }
}
