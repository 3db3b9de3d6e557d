
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::database::models::{
    Chunk, ChunkRow, DocumentSummary, NewChunk, ScoredChunk, encode_embedding,
};
use crate::database::similarity::rank_by_similarity;
use crate::{DocchatError, Result};

const SELECT_ALL_CHUNKS: &str =
    "SELECT id, doc_id, document, embedding, dimension FROM chunks ORDER BY id";
const SELECT_DOCUMENT_CHUNKS: &str =
    "SELECT id, doc_id, document, embedding, dimension FROM chunks WHERE doc_id = ? ORDER BY id";

struct Connection {
    pool: SqlitePool,
    /// Dimension established by the oldest record; held while writing
    write_lock: Mutex<Option<usize>>,
}

/// Append-only store of embedded chunks backed by a SQLite file.
///
/// Nothing touches the disk until the first operation (or an explicit
/// [`VectorStore::open`]); the connection is then reused for the store's
/// lifetime. Every listing is in insertion order.
pub struct VectorStore {
    path: PathBuf,
    connection: OnceCell<Connection>,
}

fn storage_error(action: &'static str) -> impl FnOnce(sqlx::Error) -> DocchatError {
    move |err| DocchatError::StorageUnavailable(format!("Failed to {}: {}", action, err))
}

impl VectorStore {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connection: OnceCell::new(),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the underlying database. Safe to call repeatedly and concurrently.
    #[inline]
    pub async fn open(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<&Connection> {
        self.connection
            .get_or_try_init(|| Self::connect(&self.path))
            .await
    }

    async fn connect(path: &Path) -> Result<Connection> {
        info!("Opening vector store at {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DocchatError::StorageUnavailable(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(storage_error("open vector store"))?;

        sqlx::migrate!("src/database/migrations").run(&pool).await?;

        let dimension: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM chunks ORDER BY id LIMIT 1")
                .fetch_optional(&pool)
                .await
                .map_err(storage_error("read store dimension"))?;

        let dimension = dimension
            .map(|d| {
                usize::try_from(d).map_err(|_| {
                    DocchatError::StorageUnavailable(format!("stored dimension {} is invalid", d))
                })
            })
            .transpose()?;

        debug!("Vector store opened, established dimension {:?}", dimension);

        Ok(Connection {
            pool,
            write_lock: Mutex::new(dimension),
        })
    }

    /// Append one record and return its id
    #[inline]
    pub async fn insert(
        &self,
        embedding: Vec<f32>,
        text: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Result<i64> {
        let ids = self
            .insert_many(vec![NewChunk::new(embedding, text, document_id)])
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| DocchatError::StorageUnavailable("insert returned no id".to_string()))
    }

    /// Append several records atomically; ids come back in input order.
    ///
    /// Every embedding must match the store's dimension, or the first one
    /// establishes it when the store is empty. On any failure nothing is
    /// written.
    #[inline]
    pub async fn insert_many(&self, records: Vec<NewChunk>) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        for record in &records {
            if record.embedding.is_empty() {
                return Err(DocchatError::InvalidArgument(
                    "embedding must not be empty".to_string(),
                ));
            }
            if record.text.is_empty() {
                return Err(DocchatError::InvalidArgument(
                    "chunk text must not be empty".to_string(),
                ));
            }
        }

        let connection = self.connection().await?;
        let mut dimension = connection.write_lock.lock().await;

        let expected = dimension.unwrap_or(records[0].embedding.len());
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != expected) {
            warn!(
                "Rejecting {} records for {}: dimension {} does not match {}",
                records.len(),
                bad.document_id,
                bad.embedding.len(),
                expected
            );
            return Err(DocchatError::DimensionMismatch {
                expected,
                actual: bad.embedding.len(),
            });
        }

        let now = Utc::now();
        let dimension_column = i64::try_from(expected).map_err(|_| {
            DocchatError::InvalidArgument(format!("dimension {} is too large", expected))
        })?;

        let mut tx = connection
            .pool
            .begin()
            .await
            .map_err(storage_error("begin transaction"))?;

        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            let id = sqlx::query(
                "INSERT INTO chunks (doc_id, document, embedding, dimension, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.document_id)
            .bind(&record.text)
            .bind(encode_embedding(&record.embedding))
            .bind(dimension_column)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_error("insert chunk"))?
            .last_insert_rowid();
            ids.push(id);
        }

        tx.commit().await.map_err(storage_error("commit chunks"))?;

        if dimension.is_none() {
            info!("Vector store dimension established at {}", expected);
            *dimension = Some(expected);
        }

        debug!("Inserted {} chunks", ids.len());
        Ok(ids)
    }

    /// Every record, in insertion order
    #[inline]
    pub async fn get_all(&self) -> Result<Vec<Chunk>> {
        let connection = self.connection().await?;
        let rows: Vec<ChunkRow> = sqlx::query_as(SELECT_ALL_CHUNKS)
            .fetch_all(&connection.pool)
            .await
            .map_err(storage_error("read chunks"))?;

        rows.into_iter().map(ChunkRow::into_chunk).collect()
    }

    /// Records of one document, in insertion order; empty if unknown
    #[inline]
    pub async fn get_by_document_id(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let connection = self.connection().await?;
        let rows: Vec<ChunkRow> = sqlx::query_as(SELECT_DOCUMENT_CHUNKS)
            .bind(document_id)
            .fetch_all(&connection.pool)
            .await
            .map_err(storage_error("read document chunks"))?;

        rows.into_iter().map(ChunkRow::into_chunk).collect()
    }

    /// Distinct document ids, ordered by their first insertion
    #[inline]
    pub async fn list_document_ids(&self) -> Result<Vec<String>> {
        let connection = self.connection().await?;
        sqlx::query_scalar("SELECT doc_id FROM chunks GROUP BY doc_id ORDER BY MIN(id)")
            .fetch_all(&connection.pool)
            .await
            .map_err(storage_error("list documents"))
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self
            .list_document_ids()
            .await?
            .into_iter()
            .map(|name| DocumentSummary { name })
            .collect())
    }

    #[inline]
    pub async fn count(&self) -> Result<usize> {
        let connection = self.connection().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&connection.pool)
            .await
            .map_err(storage_error("count chunks"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Dimension shared by every stored embedding, `None` while empty
    #[inline]
    pub async fn dimension(&self) -> Result<Option<usize>> {
        let connection = self.connection().await?;
        Ok(*connection.write_lock.lock().await)
    }

    /// Best `top_k` records by cosine similarity to `query`.
    ///
    /// An empty store yields no results. A query whose length differs from
    /// the stored dimension is rejected.
    #[inline]
    pub async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if query.is_empty() {
            return Err(DocchatError::InvalidArgument(
                "query embedding must not be empty".to_string(),
            ));
        }

        let chunks = self.get_all().await?;
        if let Some(stored) = chunks.first().map(|c| c.embedding.len()) {
            if stored != query.len() {
                return Err(DocchatError::DimensionMismatch {
                    expected: stored,
                    actual: query.len(),
                });
            }
        }

        debug!(
            "Scoring {} chunks for top {} (query dimension {})",
            chunks.len(),
            top_k,
            query.len()
        );

        let ranked = rank_by_similarity(
            query,
            chunks.into_iter().map(|c| (c.text, c.embedding)),
            top_k,
        )?;

        Ok(ranked
            .into_iter()
            .map(|(text, score)| ScoredChunk { text, score })
            .collect())
    }

    /// Close the pool if it was opened. Later operations fail.
    #[inline]
    pub async fn close(&self) {
        if let Some(connection) = self.connection.get() {
            connection.pool.close().await;
            debug!("Vector store at {} closed", self.path.display());
        }
    }
}
