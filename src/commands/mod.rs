
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{Chunk, DocumentSummary, ScoredChunk, VectorStore};
use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::embeddings::chunking::chunk_count;
use crate::embeddings::ollama::OllamaClient;
use crate::retrieval::{DocumentInput, RetrievalCoordinator, context_message};
use crate::server::serve_stdio;
use crate::{DocchatError, Result};

/// Start the background retrieval context for `config`
#[inline]
pub fn start_dispatcher(config: &Config) -> Result<DispatcherHandle> {
    Dispatcher::spawn(RetrievalCoordinator::from_config(config)?)
}

/// Extract the text of a file; the document name is the file name
pub fn read_document(path: &Path) -> Result<DocumentInput> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        return Err(DocchatError::InvalidArgument(format!(
            "PDF extraction is not supported: {}",
            path.display()
        )));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            DocchatError::InvalidArgument(format!("not a file path: {}", path.display()))
        })?;

    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|_| {
        DocchatError::InvalidArgument(format!("{} is not valid UTF-8 text", path.display()))
    })?;

    Ok(DocumentInput::new(name, text))
}

/// Read, chunk, embed and store every file
pub async fn add_files(paths: &[PathBuf], chunk_size: Option<usize>) -> Result<()> {
    let config = Config::load_default()?;
    let chunk_size = chunk_size.unwrap_or(config.retrieval.chunk_size);

    let documents = paths
        .iter()
        .map(|path| read_document(path))
        .collect::<Result<Vec<_>>>()?;
    let chunks: usize = documents
        .iter()
        .map(|d| chunk_count(d.text.chars().count(), chunk_size))
        .sum();

    info!(
        "Adding {} documents ({} chunks of up to {} characters)",
        documents.len(),
        chunks,
        chunk_size
    );

    let names = documents.iter().map(|d| d.name.clone()).collect::<Vec<_>>();
    let handle = start_dispatcher(&config)?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!("Embedding {} chunks", chunks));
    bar.enable_steady_tick(Duration::from_millis(100));

    let result = handle.add_documents(documents, chunk_size).await;
    bar.finish_and_clear();
    result?;

    println!(
        "{} Added {} ({} chunks)",
        style("✓").green(),
        names.iter().join(", "),
        chunks
    );
    Ok(())
}

pub async fn search(query: &str, top_k: Option<usize>, context: bool) -> Result<()> {
    let config = Config::load_default()?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let handle = start_dispatcher(&config)?;

    let results = handle.search(query, top_k).await?;

    if context {
        println!("{}", context_message(&results)?);
    } else {
        print!("{}", format_search_results(&results));
    }
    Ok(())
}

pub async fn list_documents() -> Result<()> {
    let config = Config::load_default()?;
    let handle = start_dispatcher(&config)?;

    let documents = handle.list_documents().await?;
    print!("{}", format_document_list(&documents));
    Ok(())
}

pub async fn show_document(doc_id: &str) -> Result<()> {
    let config = Config::load_default()?;
    let handle = start_dispatcher(&config)?;

    let chunks = handle.get_documents_by_doc_id(doc_id).await?;
    if chunks.is_empty() {
        return Err(DocchatError::InvalidArgument(format!(
            "no document named {}",
            doc_id
        )));
    }
    print!("{}", format_chunks(&chunks));
    Ok(())
}

/// Speak the retrieval protocol on stdin/stdout
pub async fn serve() -> Result<()> {
    let config = Config::load_default()?;
    let handle = start_dispatcher(&config)?;
    serve_stdio(handle).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub chunks: usize,
    pub dimension: Option<usize>,
    pub documents: usize,
}

/// Summarize the store at `path`. Returns `None` without touching the disk
/// when no store file exists yet.
pub async fn store_status(path: &Path) -> Result<Option<StoreStatus>> {
    if !path.try_exists()? {
        return Ok(None);
    }

    let store = VectorStore::new(path);
    let status = async {
        Ok::<_, DocchatError>(StoreStatus {
            chunks: store.count().await?,
            dimension: store.dimension().await?,
            documents: store.list_document_ids().await?.len(),
        })
    }
    .await;
    store.close().await;

    status.map(Some)
}

/// Report the state of the store and the embedding backend
pub async fn show_status() -> Result<()> {
    let config = Config::load_default()?;

    println!("📊 docchat Status");
    println!("{}", "=".repeat(40));

    println!("🗄️  Vector Store: {}", config.database_path().display());
    match store_status(&config.database_path()).await {
        Ok(Some(status)) => {
            println!("   Chunks: {}", status.chunks);
            match status.dimension {
                Some(d) => println!("   Dimension: {}", d),
                None => println!("   Dimension: not established (empty store)"),
            }
            println!("   Documents: {}", status.documents);
        }
        Ok(None) => println!("   No store yet. Add documents with 'docchat add <FILE>'."),
        Err(e) => println!("   ❌ Unavailable: {}", e),
    }

    println!("🤖 Embedding Backend:");
    let client = OllamaClient::new(&config.embedding)?.with_retry_attempts(1);
    let health = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .map_err(|e| DocchatError::Other(e.into()))?;
    match health {
        Ok(()) => println!(
            "   ✅ {} at {}:{}",
            config.embedding.model, config.embedding.host, config.embedding.port
        ),
        Err(e) => {
            warn!("Embedding backend health check failed: {:#}", e);
            println!("   ❌ {}: {:#}", config.embedding.model, e);
        }
    }
    Ok(())
}

fn format_score(score: f32) -> String {
    if score.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.4}", score)
    }
}

/// One line of text, shortened to `max_chars`
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}…", flat.chars().take(max_chars).collect::<String>())
    } else {
        flat
    }
}

pub fn format_search_results(results: &[ScoredChunk]) -> String {
    if results.is_empty() {
        return "No matching chunks. Add documents with 'docchat add <FILE>'.\n".to_string();
    }

    let mut out = String::new();
    for (rank, hit) in results.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}] {}",
            rank + 1,
            format_score(hit.score),
            preview(&hit.text, 120)
        );
    }
    out
}

pub fn format_document_list(documents: &[DocumentSummary]) -> String {
    if documents.is_empty() {
        return "No documents have been added yet.\nUse 'docchat add <FILE>' to add one.\n"
            .to_string();
    }

    let mut out = format!("Documents ({} total):\n", documents.len());
    for document in documents {
        let _ = writeln!(out, "  📄 {}", document.name);
    }
    out
}

pub fn format_chunks(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    if let Some(first) = chunks.first() {
        let _ = writeln!(
            out,
            "{} ({} chunks, {} dimensions)",
            first.document_id,
            chunks.len(),
            first.embedding.len()
        );
    }
    for chunk in chunks {
        let _ = writeln!(out, "  #{} {}", chunk.id, preview(&chunk.text, 72));
    }
    out
}
