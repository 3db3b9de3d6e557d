// Embeddings module
// Fixed-width chunking, the lazily loaded embedding provider and its Ollama backend

pub mod chunking;
pub mod ollama;
pub mod provider;

pub use chunking::{DEFAULT_CHUNK_SIZE, chunk_count, chunk_text};
pub use ollama::OllamaClient;
pub use provider::{EmbeddingBackend, EmbeddingProvider, normalize};
