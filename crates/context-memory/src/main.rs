#[cfg(feature = "cli")]
mod cli {
    use std::sync::Arc;

    use anyhow::Result;
    use clap::{Parser, Subcommand};
    use context_memory::{
        config::Config, telemetry, ApiResponse, ContextService, HttpLanguageModel, MemoryDatabase,
        MemoryResult, Metadata, MetadataValue,
    };
    use serde::Serialize;

    #[derive(Parser)]
    #[command(name = "context-memory", version, about = "Conversation memory with lexical document retrieval")]
    pub struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// Create the database and insert the sample documents
        Init,
        /// Add a context document
        AddDoc {
            #[arg(long)]
            title: String,
            #[arg(long)]
            content: String,
            /// Metadata entries as key=value
            #[arg(long = "meta", value_parser = parse_meta)]
            meta: Vec<(String, String)>,
        },
        /// List documents, newest first
        Docs {
            #[arg(long)]
            limit: Option<usize>,
        },
        /// Lexical search over all documents
        Search {
            query: String,
            #[arg(long, default_value_t = 10)]
            limit: usize,
        },
        /// Relevant documents, boosted by a session's context when given
        Relevant {
            query: String,
            #[arg(long)]
            session: Option<String>,
            #[arg(long)]
            limit: Option<usize>,
        },
        /// Attach documents to a session
        Attach {
            session: String,
            #[arg(required = true)]
            document_ids: Vec<String>,
            #[arg(long)]
            score: Option<f64>,
        },
        /// Detach a document from a session
        Detach { session: String, document_id: String },
        /// Show a session's active context
        Context { session: String },
        /// Show a session's message history
        History { session: String },
        /// Answer one message through the configured backend
        Chat { session: String, message: String },
        /// Clear a session's history and context
        Clear { session: String },
        /// Row counts and database size
        Stats,
    }

    fn parse_meta(raw: &str) -> Result<(String, String), String> {
        raw.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| format!("expected key=value, got '{}'", raw))
    }

    fn report<T: Serialize>(result: MemoryResult<T>) -> Result<()> {
        let response: ApiResponse<T> = result.into();
        print_json(response)
    }

    fn print_json<T: Serialize>(response: ApiResponse<T>) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if response.success {
            Ok(())
        } else {
            Err(anyhow::anyhow!(response.message))
        }
    }

    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        telemetry::init_tracing();

        let config = Config::from_env()?;
        config.print_config();

        let database = Arc::new(MemoryDatabase::new(&config.database_path, config.pool_size)?);
        let service = ContextService::new(Arc::clone(&database), config.clone());

        match cli.command {
            Command::Init => {
                let inserted = database.run(|db| db.seed_sample_documents()).await;
                report(inserted)
            }
            Command::AddDoc { title, content, meta } => {
                let metadata: Metadata = meta
                    .into_iter()
                    .map(|(k, v)| (k, MetadataValue::String(v)))
                    .collect();
                report(service.add_document(&title, &content, metadata).await)
            }
            Command::Docs { limit } => report(service.list_documents(limit).await),
            Command::Search { query, limit } => {
                report(service.search_documents(&query, limit).await)
            }
            Command::Relevant { query, session, limit } => report(
                service
                    .find_relevant_context(&query, session.as_deref(), limit)
                    .await,
            ),
            Command::Attach { session, document_ids, score } => {
                report(service.attach_context(&session, &document_ids, score).await)
            }
            Command::Detach { session, document_id } => {
                report(service.detach_context(&session, &document_id).await)
            }
            Command::Context { session } => {
                report(service.context_summary(&session).await)
            }
            Command::History { session } => {
                let loaded = service.load_context(&session).await;
                print_json(ApiResponse::ok(loaded.history))
            }
            Command::Chat { session, message } => {
                let model = HttpLanguageModel::new(config.backend_url.clone(), config.generate_timeout())?;
                let outcome = service.respond(&session, &message, &model).await?;
                print_json(ApiResponse::ok(outcome))
            }
            Command::Clear { session } => report(service.clear(&session).await),
            Command::Stats => report(service.stats().await),
        }
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
