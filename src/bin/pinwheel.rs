//! Pinwheel CLI: run pipeline stages and administer their stores.
//!
//! Usage:
//!   pinwheel run [--stage all|ingest|inference|egress]
//!   pinwheel submit <account> ups-rs <server> <instance>
//!   pinwheel catalog <subcommand>
//!   pinwheel dead-letters <subcommand>
//!   pinwheel status

use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand, ValueEnum};
use pinwheel::catalog::{Account, InferenceModel, MetadataCatalog, OpenCatalog, SqliteCatalog};
use pinwheel::config::Config;
use pinwheel::queue::{SqliteBroker, ALL_QUEUES};
use pinwheel::{CancellationToken, DataType, OrchestratorRequest, Pipeline, SourceProperties, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "pinwheel",
    version,
    about = "Queue-mediated inference fan-out pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Log warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pipeline workers until interrupted
    Run {
        /// Which stage to run
        #[arg(long, value_enum, default_value_t = StageArg::All)]
        stage: StageArg,
    },
    /// Enqueue an orchestrator request
    Submit {
        /// Account whose models should run
        account: String,
        #[command(subcommand)]
        source: SubmitSource,
    },
    /// Manage the SQLite metadata catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Inspect and replay dead-lettered messages
    DeadLetters {
        #[command(subcommand)]
        action: DeadLetterAction,
    },
    /// Show queue depths
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    All,
    Ingest,
    Inference,
    Egress,
}

impl StageArg {
    fn stages(self) -> Vec<Stage> {
        match self {
            Self::All => Stage::ALL.to_vec(),
            Self::Ingest => vec![Stage::Ingest],
            Self::Inference => vec![Stage::Inference],
            Self::Egress => vec![Stage::Egress],
        }
    }
}

#[derive(Subcommand)]
enum SubmitSource {
    /// A UPS-RS workitem on a DICOMweb server
    UpsRs {
        /// DICOMweb base address
        server: String,
        /// Workitem instance UID
        instance: String,
    },
    /// Plain HTTP input and output locations
    Http {
        input: String,
        output: String,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Create or update an account
    AddAccount {
        id: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Create or update a model registration
    AddModel {
        id: String,
        /// Owning account
        account: String,
        /// URI the input payload is POSTed to
        endpoint: String,
        #[arg(long)]
        input: DataType,
        #[arg(long)]
        output: DataType,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a model registration
    RemoveModel { id: String },
    /// List all accounts
    ListAccounts,
    /// List models registered for an account
    ListModels { account: String },
}

#[derive(Subcommand)]
enum DeadLetterAction {
    /// List dead letters of a queue
    List {
        #[arg(value_parser = PossibleValuesParser::new(ALL_QUEUES))]
        queue: String,
    },
    /// Return one dead letter to its queue
    Requeue {
        #[arg(value_parser = PossibleValuesParser::new(ALL_QUEUES))]
        queue: String,
        id: String,
    },
    /// Discard all dead letters of a queue
    Purge {
        #[arg(value_parser = PossibleValuesParser::new(ALL_QUEUES))]
        queue: String,
    },
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        config
            .log_level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create tokio runtime: {}", e))
}

fn open_broker(config: &Config) -> Result<Arc<SqliteBroker>, String> {
    let path = config.queue_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    SqliteBroker::open(&path, config.broker_options())
        .map(Arc::new)
        .map_err(|e| format!("failed to open queues at {}: {}", path.display(), e))
}

fn open_catalog(config: &Config) -> Result<SqliteCatalog, String> {
    let path = config
        .catalog_db_path()
        .ok_or_else(|| "catalog administration requires the sqlite catalog".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    SqliteCatalog::open(&path).map_err(|e| format!("failed to open catalog at {}: {}", path.display(), e))
}

fn cmd_run(config: Config, stage: StageArg) -> i32 {
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let pipeline = match Pipeline::from_config(config) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    cancel.cancel();
                }
            });
        }

        let stats = pipeline.run(&stage.stages(), &cancel).await;
        println!(
            "completed {}, dead-lettered {}, abandoned {}, queue errors {}",
            stats.completed, stats.dead_lettered, stats.abandoned, stats.errors
        );
        0
    })
}

fn cmd_submit(config: Config, account: String, source: SubmitSource) -> i32 {
    let properties = match source {
        SubmitSource::UpsRs { server, instance } => SourceProperties::ups_rs(server, instance),
        SubmitSource::Http { input, output } => SourceProperties::http(input, output),
    };
    let request = OrchestratorRequest::new(account, properties);

    let result = runtime().and_then(|rt| {
        rt.block_on(async {
            let pipeline = Pipeline::from_config(config).map_err(|e| e.to_string())?;
            pipeline.submit(&request).await.map_err(|e| e.to_string())
        })
    });
    match result {
        Ok(()) => {
            println!("Submitted request for account '{}'", request.account_id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_catalog(config: &Config, action: CatalogAction) -> i32 {
    let catalog = match open_catalog(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let result = match action {
        CatalogAction::AddAccount { id, name } => catalog
            .upsert_account(&Account::new(&id, name))
            .map(|()| println!("Saved account '{}'", id)),
        CatalogAction::AddModel {
            id,
            account,
            endpoint,
            input,
            output,
            name,
        } => {
            let mut model = InferenceModel::new(&id, account, endpoint, input, output);
            if let Some(name) = name {
                model = model.with_name(name);
            }
            catalog
                .upsert_model(&model)
                .map(|()| println!("Saved model '{}'", id))
        }
        CatalogAction::RemoveModel { id } => catalog.remove_model(&id).map(|removed| {
            if removed {
                println!("Removed model '{}'", id);
            } else {
                println!("Model '{}' not registered", id);
            }
        }),
        CatalogAction::ListAccounts => catalog.list_accounts().map(|accounts| {
            if accounts.is_empty() {
                println!("No accounts registered.");
                return;
            }
            println!("{:<36}  {}", "ID", "NAME");
            println!("{}", "-".repeat(60));
            for account in accounts {
                println!("{:<36}  {}", account.id, account.name);
            }
        }),
        CatalogAction::ListModels { account } => {
            let models = match runtime() {
                Ok(rt) => rt.block_on(catalog.list_inference_models(&account)),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            };
            models.map(|mut models| {
                if models.is_empty() {
                    println!("No models registered for '{}'.", account);
                    return;
                }
                models.sort_by(|a, b| a.id.cmp(&b.id));
                println!("{:<24}  {:<6}  {:<6}  {}", "ID", "INPUT", "OUTPUT", "ENDPOINT");
                println!("{}", "-".repeat(72));
                for m in models {
                    println!(
                        "{:<24}  {:<6}  {:<6}  {}",
                        m.id, m.input_data_type, m.output_data_type, m.endpoint_uri
                    );
                }
            })
        }
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_dead_letters(config: &Config, action: DeadLetterAction) -> i32 {
    let broker = match open_broker(config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let result = match action {
        DeadLetterAction::List { queue } => broker.dead_letters(&queue).map(|letters| {
            if letters.is_empty() {
                println!("No dead letters in '{}'.", queue);
                return;
            }
            for letter in letters {
                println!(
                    "{}  deliveries={}  at={}  reason: {}",
                    letter.id,
                    letter.delivery_count,
                    letter.dead_lettered_at.to_rfc3339(),
                    letter.reason
                );
            }
        }),
        DeadLetterAction::Requeue { queue, id } => broker.requeue_dead_letter(&queue, &id).map(|found| {
            if found {
                println!("Requeued '{}' on '{}'", id, queue);
            } else {
                println!("No dead letter '{}' in '{}'", id, queue);
            }
        }),
        DeadLetterAction::Purge { queue } => broker
            .purge_dead_letters(&queue)
            .map(|n| println!("Purged {} dead letter(s) from '{}'", n, queue)),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_status(config: &Config) -> i32 {
    let broker = match open_broker(config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("{:<24}  {:>8}  {:>8}  {:>8}", "QUEUE", "ACTIVE", "LEASED", "DEAD");
    println!("{}", "-".repeat(56));
    for queue in ALL_QUEUES {
        match broker.depth(queue) {
            Ok(d) => println!(
                "{:<24}  {:>8}  {:>8}  {:>8}",
                queue, d.active, d.leased, d.dead_lettered
            ),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
    0
}

fn main() {
    let cli = Cli::parse();
    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&cli, &config);

    let code = match cli.command {
        Commands::Run { stage } => cmd_run(config, stage),
        Commands::Submit { account, source } => cmd_submit(config, account, source),
        Commands::Catalog { action } => cmd_catalog(&config, action),
        Commands::DeadLetters { action } => cmd_dead_letters(&config, action),
        Commands::Status => cmd_status(&config),
    };
    std::process::exit(code);
}
