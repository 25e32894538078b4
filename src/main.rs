use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use convoscope::audio::PcmFormat;
use convoscope::cli::{Cli, Commands, ConfigAction, ReportsAction, UsersAction};
use convoscope::config::Config;
use convoscope::providers::Providers;
use convoscope::providers::http::HttpProviders;
use convoscope::session::SessionContext;
use convoscope::store::{ConversationStore, SqliteStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbosity_filter().unwrap_or(config.logging.filter.as_str()));

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            run_server(config).await?;
        }
        Commands::Config { action } => handle_config_command(action, &config, cli.config)?,
        Commands::Users { action } => handle_users_command(action, &config)?,
        Commands::Reports { action } => handle_reports_command(action, &config)?,
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "convoscope",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// `RUST_LOG` wins over `-v`, which wins over `logging.filter`.
fn init_logging(fallback: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_server(config: Config) -> Result<()> {
    let Some(endpoint) = config.providers.endpoint.clone() else {
        bail!(
            "providers.endpoint is not configured (set it in the config file or CONVOSCOPE_PROVIDER_ENDPOINT)"
        );
    };
    let backend = HttpProviders::new(
        &endpoint,
        config.providers.request_timeout,
        PcmFormat::from(&config.audio),
    )?;
    let store = open_store(&config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!(
        version = %convoscope::version_string(),
        endpoint = %endpoint,
        database = %config.storage.database.display(),
        audio_dir = %config.storage.audio_dir.display(),
        "starting convoscope"
    );
    let ctx = SessionContext::new(config, Providers::from_http(backend), store);
    convoscope::server::serve(ctx, listener).await
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.storage.database).with_context(|| {
        format!(
            "Failed to open database {}",
            config.storage.database.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_config_command(
    action: ConfigAction,
    config: &Config,
    custom_path: Option<std::path::PathBuf>,
) -> Result<()> {
    match action {
        ConfigAction::Show => print!("{}", toml::to_string_pretty(config)?),
        ConfigAction::Path => {
            let path = custom_path.unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn handle_users_command(action: UsersAction, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    match action {
        UsersAction::Add { user_id, name } => {
            let uid = store.upsert_user(&user_id, Some(&name))?;
            println!("{} -> uid {}", user_id, uid);
        }
        UsersAction::List => print_json(&store.list_users()?)?,
    }
    Ok(())
}

fn handle_reports_command(action: ReportsAction, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    match action {
        ReportsAction::List { user_id } => {
            let Some(uid) = store.resolve_user_uid(&user_id)? else {
                bail!("unknown user: {}", user_id);
            };
            print_json(&store.list_masters(uid)?)?;
        }
        ReportsAction::Show { master_id } => {
            let Some(master) = store.get_master(master_id)? else {
                bail!("no conversation {}", master_id);
            };
            let details = store.list_details(master_id)?;
            print_json(&serde_json::json!({ "master": master, "details": details }))?;
        }
    }
    Ok(())
}
