use std::{fs, path::PathBuf, process::ExitCode};

use clap::Parser;
use serde_json::Value;
use tracing::error;

use vitrine::{
    auth::Session,
    core::{
        catalog::{catalog_page, ProductQuery, SortOrder},
        data::Workspace,
        forms::AuditLog,
        hosting::GithubStore,
        settings::{Settings, DEFAULT_SETTINGS_PATH},
        site::{SiteReader, SiteRoot},
    },
    error::AppError,
    server,
    types::{Collection, Freebie, Product, Project, Record, Service, Testimonial},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the admin and public HTTP service
    Serve,
    /// Write the default settings file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Check a hosting API token
    Verify {
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Print a collection as stored in the repository
    List {
        #[arg(value_enum)]
        collection: Collection,
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Delete one record of a collection by index
    Remove {
        #[arg(value_enum)]
        collection: Collection,
        index: usize,
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Upload a local file into the repository
    Upload {
        file: PathBuf,
        /// Destination path in the repository
        path: String,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// List products the way the shop page shows them
    Catalog {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        max: Option<f64>,
        #[arg(long, value_enum)]
        sort: Option<SortOrder>,
    },
    /// Print the recorded submissions of a form store
    Audit { store: String },
}

#[actix_web::main]
async fn main() -> ExitCode {
    vitrine::init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = cli.config;
    let load = || Settings::load(&config);

    match cli.command {
        Commands::Serve => server::start_server(&load()?).await?,
        Commands::Init { force } => {
            if config.exists() && !force {
                return Err(AppError::Config(format!(
                    "{} already exists, pass --force to overwrite it",
                    config.display()
                )));
            }
            Settings::new().export(&config)?;
            println!("Settings written to {}", config.display());
        }
        Commands::Verify { token } => {
            let store = GithubStore::from_settings(&load()?);
            let login = Session::new().sign_in(&store, &token).await?;
            println!("Token accepted for {}", login);
        }
        Commands::List { collection, token } => {
            let workspace = open_workspace(&load()?, &token).await?;
            let token = token.trim();
            let value = match collection {
                Collection::Products => list::<Product>(&workspace, token).await?,
                Collection::Projects => list::<Project>(&workspace, token).await?,
                Collection::Freebies => list::<Freebie>(&workspace, token).await?,
                Collection::Services => list::<Service>(&workspace, token).await?,
                Collection::Testimonials => list::<Testimonial>(&workspace, token).await?,
                Collection::Settings => to_value(
                    collection,
                    workspace.load_settings(token).await?,
                )?,
            };
            println!("{}", pretty(collection.path(), &value)?);
        }
        Commands::Remove {
            collection,
            index,
            token,
        } => {
            let workspace = open_workspace(&load()?, &token).await?;
            let token = token.trim();
            let label = match collection {
                Collection::Products => remove::<Product>(&workspace, token, index).await?,
                Collection::Projects => remove::<Project>(&workspace, token, index).await?,
                Collection::Freebies => remove::<Freebie>(&workspace, token, index).await?,
                Collection::Services => remove::<Service>(&workspace, token, index).await?,
                Collection::Testimonials => {
                    remove::<Testimonial>(&workspace, token, index).await?
                }
                Collection::Settings => {
                    return Err(AppError::Validation(
                        "Settings hold a single object, nothing to remove.".to_string(),
                    ))
                }
            };
            println!("Removed \"{}\" from {}", label, collection);
        }
        Commands::Upload {
            file,
            path,
            message,
            token,
        } => {
            let workspace = open_workspace(&load()?, &token).await?;
            let bytes = fs::read(&file)?;
            let message = message.unwrap_or_else(|| format!("Upload {} from admin", path));
            let sha = workspace
                .upload_asset(token.trim(), &path, &bytes, &message)
                .await?;
            println!("Uploaded {} ({})", path, sha);
        }
        Commands::Catalog {
            search,
            kind,
            max,
            sort,
        } => {
            let settings = load()?;
            let site = SiteReader::new(SiteRoot::parse(&settings.site_root.value));
            let products: Vec<Product> = site.collection(Collection::Products).await?;
            let query = ProductQuery {
                search,
                kind,
                max,
                sort,
            };
            let page = catalog_page(&products, &query);
            for card in page.products {
                println!(
                    "{:<12} {:<40} {:<8} {:>12}",
                    card.product.reference, card.product.name, card.product.kind, card.display_price
                );
            }
            println!("Price filter ceiling: {} €", page.max_price);
        }
        Commands::Audit { store } => {
            let audit = AuditLog::new(load()?.audit_dir());
            let entries = audit.entries(&store)?;
            println!("{}", pretty(&store, &Value::Array(entries))?);
        }
    }
    Ok(())
}

/// Validates the token the same way the admin session does.
async fn open_workspace(settings: &Settings, token: &str) -> Result<Workspace, AppError> {
    let store = GithubStore::from_settings(settings);
    Session::new().sign_in(&store, token).await?;
    Ok(Workspace::new(std::sync::Arc::new(store)))
}

async fn list<T: Record>(workspace: &Workspace, token: &str) -> Result<Value, AppError> {
    let items = workspace.load::<T>(token).await?;
    to_value(T::COLLECTION, items)
}

async fn remove<T: Record>(workspace: &Workspace, token: &str, index: usize) -> Result<String, AppError> {
    workspace.load::<T>(token).await?;
    let removed: T = workspace.remove(token, index).await?;
    Ok(removed.label().to_string())
}

fn to_value<T: serde::Serialize>(collection: Collection, value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|err| AppError::malformed(collection.path(), err))
}

fn pretty(label: &str, value: &Value) -> Result<String, AppError> {
    serde_json::to_string_pretty(value).map_err(|err| AppError::malformed(label, err))
}
