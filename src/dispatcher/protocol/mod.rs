//! Messages exchanged with the background retrieval context.
//!
//! Every message carries an `action` tag. Field names are camelCase so the
//! same types serve the in-process channel and the JSON-lines transport.


use serde::{Deserialize, Serialize};

use crate::DocchatError;
use crate::database::{Chunk, DocumentSummary, ScoredChunk};
use crate::retrieval::DocumentInput;

/// Identifier correlating a response with its request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl std::fmt::Display for RequestId {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A message together with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: RequestId,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    AddDocumentsToStore {
        documents: Vec<DocumentInput>,
        chunk_size: i64,
    },
    SearchSimilarDocuments {
        query: String,
        top_k: i64,
    },
    ListDocuments,
    GetDocumentsByDocId {
        doc_id: String,
    },
}

impl Request {
    /// Wire name of the action
    #[inline]
    pub fn action(&self) -> &'static str {
        match self {
            Self::AddDocumentsToStore { .. } => "addDocumentsToStore",
            Self::SearchSimilarDocuments { .. } => "searchSimilarDocuments",
            Self::ListDocuments => "listDocuments",
            Self::GetDocumentsByDocId { .. } => "getDocumentsByDocId",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    DocumentsAdded,
    SearchResults { results: Vec<ScoredChunk> },
    DocumentsList { documents: Vec<DocumentSummary> },
    GetDocumentsResults { results: Vec<Chunk> },
    Error { kind: ErrorKind, message: String },
}

impl Response {
    #[inline]
    pub fn action(&self) -> &'static str {
        match self {
            Self::DocumentsAdded => "documentsAdded",
            Self::SearchResults { .. } => "searchResults",
            Self::DocumentsList { .. } => "documentsList",
            Self::GetDocumentsResults { .. } => "getDocumentsResults",
            Self::Error { .. } => "error",
        }
    }

    #[inline]
    pub fn error(err: &DocchatError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Turn an `error` response back into a [`DocchatError::Worker`]
    #[inline]
    pub fn into_result(self) -> crate::Result<Self> {
        match self {
            Self::Error { kind, message } => Err(DocchatError::Worker { kind, message }),
            other => Ok(other),
        }
    }
}

/// Wire-level error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidArgument,
    DimensionMismatch,
    ModelUnavailable,
    StorageUnavailable,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ErrorKind::InvalidArgument => write!(f, "invalidArgument"),
            ErrorKind::DimensionMismatch => write!(f, "dimensionMismatch"),
            ErrorKind::ModelUnavailable => write!(f, "modelUnavailable"),
            ErrorKind::StorageUnavailable => write!(f, "storageUnavailable"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}
