use clap::{Parser, Subcommand};

use netpulse_core::Config;

// ── CLI ─────────────────────────────────────────────────────────────

/// netpulse: connector polling scheduler and alert correlation service.
#[derive(Parser, Debug)]
#[command(name = "netpulse", version, about)]
struct Cli {
    /// Configuration profile; keys resolve `{PROFILE}_{KEY}` before `{KEY}`.
    #[arg(long, env = "NETPULSE_PROFILE", global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server and dispatch loop (default).
    Serve,
    /// Load and validate configuration, then print the redacted summary.
    CheckConfig,
}

fn load_config(profile: Option<&str>) -> Config {
    netpulse_core::config::load_dotenv();
    match profile {
        Some(p) => Config::for_profile(p),
        None => Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.profile.as_deref());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => netpulse_server::serve(config).await,
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
            Ok(())
        }
    }
}
