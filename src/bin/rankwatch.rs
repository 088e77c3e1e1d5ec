#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use rankwatch::providers::ProviderLabel;
use rankwatch::ranking::build_ranking_table;
use rankwatch::store::{ResultStore, SqliteResultStore};
use rankwatch::RankwatchConfig;

#[derive(Parser)]
#[command(name = "rankwatch", version, about = "Track company rankings across LLM providers")]
struct Cli {
    /// JSON config file (defaults to $RANKWATCH_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite store path (overrides config and $RANKWATCH_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tracked companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },
    /// Manage a company's probe questions
    Questions {
        #[command(subcommand)]
        command: QuestionCommands,
    },
    /// Re-query every model of a provider and record new rank observations
    Refresh {
        #[arg(long)]
        company: i64,
        #[arg(long)]
        provider: ProviderLabel,
        /// Print the full refresh summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the latest rank per question and model
    Table {
        #[arg(long)]
        company: i64,
        #[arg(long)]
        provider: ProviderLabel,
        #[arg(long, value_enum, default_value_t = TableFormat::Md)]
        format: TableFormat,
    },
    /// List providers and their models
    Providers,
}

#[derive(Subcommand)]
enum CompanyCommands {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// Probe question (repeatable)
        #[arg(long = "question")]
        questions: Vec<String>,
    },
    List,
    /// Delete a company with its questions and observations
    Remove {
        #[arg(long)]
        company: i64,
    },
}

#[derive(Subcommand)]
enum QuestionCommands {
    /// Replace the question set. Observations for old questions are deleted.
    Set {
        #[arg(long)]
        company: i64,
        #[arg(long = "question", required = true)]
        questions: Vec<String>,
    },
    List {
        #[arg(long)]
        company: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TableFormat {
    Md,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = RankwatchConfig::load(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    match cli.command {
        Commands::Providers => {
            for spec in config.registry().iter() {
                println!("{} ({}, {})", spec.label, spec.vendor, spec.backend.as_str());
                for model in &spec.models {
                    println!("  {:<28} {}", model.name, model.display_name);
                }
            }
        }
        Commands::Company { command } => {
            let store = SqliteResultStore::new(&config.store_path)?;
            match command {
                CompanyCommands::Add { name, url, questions } => {
                    let company = store.insert_company(&name, &url).await?;
                    let questions = store.replace_questions(company.id, questions).await?;
                    println!(
                        "company {} {} ({}) with {} question(s)",
                        company.id,
                        company.name,
                        company.site_url,
                        questions.len()
                    );
                }
                CompanyCommands::List => {
                    for c in store.list_companies().await? {
                        println!("{}\t{}\t{}", c.id, c.name, c.site_url);
                    }
                }
                CompanyCommands::Remove { company } => {
                    store.delete_company(company).await?;
                    println!("removed company {company}");
                }
            }
        }
        Commands::Questions { command } => {
            let store = SqliteResultStore::new(&config.store_path)?;
            match command {
                QuestionCommands::Set { company, questions } => {
                    let questions = store.replace_questions(company, questions).await?;
                    println!("company {company} now has {} question(s)", questions.len());
                }
                QuestionCommands::List { company } => {
                    store.get_company(company).await?;
                    for q in store.questions_for(company).await? {
                        println!("{}\t{}", q.id, q.text);
                    }
                }
            }
        }
        Commands::Refresh {
            company,
            provider,
            json,
        } => {
            let store: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::new(&config.store_path)?);
            let refresher = config.refresher(store, provider)?;
            let summary = refresher.refresh(company, provider).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for m in &summary.models {
                    println!(
                        "{:<28} answered {}/{}  ranked {}  null {}  dropped {}",
                        m.display_name,
                        m.answered,
                        m.attempted,
                        m.ranked,
                        m.null_ranks,
                        m.dropped_writes
                    );
                }
                println!("refresh {} done", summary.refresh_id);
            }
        }
        Commands::Table {
            company,
            provider,
            format,
        } => {
            let store = SqliteResultStore::new(&config.store_path)?;
            let table = build_ranking_table(&store, &config.registry(), company, provider).await?;
            match format {
                TableFormat::Md => print!("{}", table.render_markdown()),
                TableFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
            }
        }
    }

    Ok(())
}
