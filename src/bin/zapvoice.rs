use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use zapvoice::{app::AppStateBuilder, billing::PlanCatalog, config::Config, version};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Backend for AI voice agents, batch-calling campaigns and usage billing",
    long_about = version::get_version_info()
)]
struct Cli {
    /// Path to the configuration file
    #[clap(
        long,
        global = true,
        help = "Path to the configuration file (TOML format)"
    )]
    conf: Option<String>,
    #[clap(
        long,
        global = true,
        requires = "staff_password",
        help = "Create or update a support staff account and exit"
    )]
    staff_username: Option<String>,
    #[clap(
        long,
        global = true,
        requires = "staff_username",
        help = "Password for the staff account"
    )]
    staff_password: Option<String>,
    #[clap(
        long,
        global = true,
        requires = "staff_username",
        help = "Email for the staff account (defaults to username@localhost)"
    )]
    staff_email: Option<String>,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit without starting the server
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.conf {
        println!("Loading config from: {}", path);
        Config::load(path)?
    } else {
        println!("Loading default config");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        let issues = config.validate();
        if issues.is_empty() {
            println!("Configuration is valid.");
            return Ok(());
        }
        eprintln!("Configuration validation failed:");
        for issue in issues {
            eprintln!("- {}: {}", issue.field, issue.message);
        }
        std::process::exit(1);
    }

    if let (Some(username), Some(password)) = (
        cli.staff_username.as_deref(),
        cli.staff_password.as_deref(),
    ) {
        let email = cli
            .staff_email
            .clone()
            .unwrap_or_else(|| format!("{}@localhost", username));
        let db = zapvoice::models::create_db(&config.database_url).await?;
        let plans = PlanCatalog::from_config(config.plans.as_ref());
        zapvoice::auth::upsert_staff_user(&db, &plans, username, &email, password, Utc::now())
            .await?;
        println!("Staff user '{}' ensured with email '{}'", username, email);
        return Ok(());
    }

    println!("Start at {}", Utc::now());
    println!("{}", version::get_version_info());

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }
    if let Ok(directive) = "sqlx=warn".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    let mut _guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _guard = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    for issue in config.validate() {
        tracing::warn!(field = %issue.field, "configuration issue: {}", issue.message);
    }

    let state = AppStateBuilder::new().with_config(config).build().await?;
    info!(
        "starting zapvoice {} on {}",
        version::get_short_version(),
        state.config.http_addr
    );
    let mut app_future = Box::pin(zapvoice::app::run(state.clone()));

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream = signal(SignalKind::terminate())?;
        tokio::select! {
            result = &mut app_future => return result,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
            }
            _ = sigterm_stream.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = &mut app_future => return result,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
            }
        }
    }

    state.token.cancel();
    app_future.await
}
