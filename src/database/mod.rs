// Database module
// SQLite-backed vector store: chunk records, their embeddings, and exact cosine ranking

pub mod models;
pub mod similarity;
pub mod vector_store;

pub use models::{Chunk, DocumentSummary, NewChunk, ScoredChunk};
pub use similarity::{cosine_similarity, rank_by_similarity};
pub use vector_store::VectorStore;
