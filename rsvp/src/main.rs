mod config;
mod links;
mod observability;
mod smoke;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig};
use rsvp_client::RemoteClient;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rsvp", about = "Wedding RSVP proxy and tooling")]
enum CliCommand {
    /// Run the proxy in front of the spreadsheet store
    Proxy(ProxyArgs),
    /// Create, update and read back one RSVP through a running proxy
    Smoke(SmokeArgs),
    /// Print personalised RSVP and WhatsApp links for a guest list
    Links(LinksArgs),
}

#[derive(Args)]
struct ProxyArgs {
    #[arg(long)]
    config_file: PathBuf,
}

#[derive(Args)]
struct SmokeArgs {
    /// Base URL of the deployed site, e.g. https://rsvp.example
    #[arg(long)]
    base_url: String,
    #[arg(long, default_value = smoke::DEFAULT_NAME)]
    name: String,
}

#[derive(Args)]
struct LinksArgs {
    #[arg(long)]
    base_url: String,
    /// CSV file of `name,phone` lines
    #[arg(long)]
    guests_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Proxy(args) => run_proxy(args).await,
        CliCommand::Smoke(args) => run_smoke(args).await,
        CliCommand::Links(args) => run_links(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_proxy(args: ProxyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(&args.config_file)?;
    let _sentry = observability::init_logging(
        config
            .common
            .logging
            .as_ref()
            .unwrap_or(&LoggingConfig::default()),
    );
    if let Some(metrics) = &config.common.metrics {
        observability::init_metrics(metrics);
    }

    let mut proxy_config = config.proxy.ok_or(ConfigError::MissingProxy)?;
    proxy_config.apply_env_overrides();

    tracing::info!("starting proxy");
    rsvp_proxy::run(proxy_config).await?;
    Ok(())
}

async fn run_smoke(args: SmokeArgs) -> Result<(), Box<dyn std::error::Error>> {
    observability::init_logging(&LoggingConfig::default());

    let remote = RemoteClient::new(&args.base_url)?;
    let report = smoke::run(&remote, &args.name).await?;

    println!("created  {} ({:?})", report.report_id, report.created);
    println!("updated  {} ({:?})", report.report_id, report.updated);
    println!("read back {}", report.report_id);
    println!("smoke test passed");
    Ok(())
}

fn run_links(args: LinksArgs) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(&args.guests_file)?;
    let guests = links::parse_guests(&contents)?;

    for (index, guest) in guests.iter().enumerate() {
        let link = links::generate_link(&args.base_url, guest)?;
        println!("{}. {}", index + 1, link.name);
        println!("   phone:    {}", link.phone);
        println!("   rsvp:     {}", link.rsvp_url);
        println!("   whatsapp: {}", link.whatsapp_url);
        println!();
    }
    Ok(())
}
