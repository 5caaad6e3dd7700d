use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use wyvern_data::{AccessController, DbError, Document, Settings};

#[derive(Parser, Debug)]
#[command(name = "wyvern-data", version, about = "Document database bootstrap and query CLI", long_about = None)]
struct Cli {
    #[arg(long, help = "Directory for app.log / audit.log; logging stays off when omitted")]
    log_dir: Option<PathBuf>,
    #[arg(long, help = "Log level: error|warn|info|debug|trace")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List the databases on a host")]
    Databases {
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value_t = 27017)]
        port: u16,
    },
    #[command(about = "Connect, seed the configured database and print its schema state")]
    Connect {
        #[arg(long, help = "Config file (TOML). Falls back to WYVERN_CONFIG, then ./wyvern.toml")]
        config: Option<PathBuf>,
    },
    #[command(about = "Run a native filter against a collection and print matches as JSON lines")]
    Find {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        collection: String,
        #[arg(long, default_value = "{}")]
        filter: String,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "Print the Cargo features this binary was built with")]
    Features,
}

// Precedence: explicit path > WYVERN_CONFIG > ./wyvern.toml, then environment overrides.
fn load_settings(cli_cfg: Option<&Path>) -> Result<Settings, DbError> {
    let mut paths: Vec<PathBuf> = vec![];
    if let Some(p) = cli_cfg {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("WYVERN_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("wyvern.toml"));
    }
    let settings = match paths.iter().find(|p| p.exists()) {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new(),
    };
    Ok(settings.with_env_overrides())
}

fn print_document(document: Document) -> Result<(), DbError> {
    let json = bson::Bson::Document(document).into_relaxed_extjson();
    let line = serde_json::to_string(&json).map_err(|e| DbError::Serialization(e.to_string()))?;
    println!("{line}");
    Ok(())
}

async fn run(cli: Cli) -> Result<(), DbError> {
    match cli.command {
        Commands::Databases { host, port } => {
            let controller = AccessController::mongo();
            for name in controller.database_list_on_host(&host, port).await? {
                println!("{name}");
            }
        }
        Commands::Connect { config } => {
            let settings = load_settings(config.as_deref())?;
            let controller = AccessController::mongo();
            let outcome = controller.connect_with_config(&settings).await?;
            let state = bson::to_document(&outcome.state)?;
            print_document(state)?;
            eprintln!("committed: {}", outcome.committed);
        }
        Commands::Find { config, collection, filter, sort, limit } => {
            let settings = load_settings(config.as_deref())?;
            let controller = AccessController::mongo();
            controller.connect_with_config(&settings).await?;
            let db = controller.context()?;
            let rows: Vec<Document> = match sort {
                Some(sort) => db.read_sorted(&collection, &filter, &sort, limit).await?,
                None if limit.is_some() => db.read_sorted(&collection, &filter, "{\"_id\": 1}", limit).await?,
                None => db.read_native(&collection, &filter).await?,
            };
            for row in rows {
                print_document(row)?;
            }
        }
        Commands::Features => {
            println!("{}", wyvern_data::compiled_features().join(","));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(dir) = &cli.log_dir {
        if let Err(e) = wyvern_data::logger::configure_logging(Some(dir), cli.log_level.as_deref(), None) {
            eprintln!("warning: logging disabled: {e}");
        }
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
