use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docchat::Result;
use docchat::commands::{add_files, list_documents, search, serve, show_document, show_status};
use docchat::config::{run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Chat with your documents: local chunking, embedding and similarity search")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding backend and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add text files to the vector store
    Add {
        /// Files to add; each becomes a document named after the file
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Characters per chunk (defaults to the configured chunk size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Find the chunks most similar to a query
    Search {
        query: String,
        /// Number of results (defaults to the configured top-k)
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Print the context message handed to the chat model instead of a listing
        #[arg(long)]
        context: bool,
    },
    /// List stored documents
    List,
    /// Show the chunks of one document
    Show {
        /// Document name, as listed by `docchat list`
        doc_id: String,
    },
    /// Serve the retrieval protocol as JSON lines on stdin/stdout
    Serve,
    /// Show the state of the vector store and the embedding backend
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output and the serve protocol
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Add { files, chunk_size } => {
            add_files(&files, chunk_size).await?;
        }
        Commands::Search {
            query,
            top_k,
            context,
        } => {
            search(&query, top_k, context).await?;
        }
        Commands::List => {
            list_documents().await?;
        }
        Commands::Show { doc_id } => {
            show_document(&doc_id).await?;
        }
        Commands::Serve => {
            serve().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
