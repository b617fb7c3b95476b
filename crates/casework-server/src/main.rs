use anyhow::Context;
use casework_server::{build_engine, router, spawn_outbox_worker, ServerConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .env("CASEWORK_CONFIG")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Path to a TOML configuration file");

    Command::new("casework")
        .version(casework_server::VERSION)
        .about("Casework reasoning engine server")
        .subcommand_required(true)
        .subcommand(
            Command::new("serve")
                .about("Run the HTTP server")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .help("Listen address, overrides the configuration"),
                ),
        )
        .subcommand(
            Command::new("show-config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg)
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn load_config(args: &ArgMatches) -> anyhow::Result<ServerConfig> {
    let path = args.get_one::<PathBuf>("config");
    ServerConfig::load(path.map(PathBuf::as_path)).context("loading configuration")
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn serve(args: &ArgMatches) -> anyhow::Result<()> {
    let mut config = load_config(args)?;
    if let Some(bind) = args.get_one::<String>("bind") {
        config.bind.clone_from(bind);
    }
    init_tracing(&config);

    let addr = config.socket_addr()?;
    let engine = build_engine(&config).context("building extraction gateway client")?;

    let recovered = engine.recover_outbox().await?;
    if recovered.remaining > 0 {
        tracing::warn!(remaining = recovered.remaining, "audit outbox not fully drained at startup");
    }

    let worker = config
        .outbox_retry()
        .map(|every| spawn_outbox_worker(engine.clone(), every));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, gateway = %config.gateway.url, "casework listening");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    if let Some(worker) = worker {
        worker.abort();
    }
    tracing::info!("casework stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn show_config(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let rendered = if args.get_flag("json") {
        serde_json::to_string_pretty(&config)?
    } else {
        toml::to_string_pretty(&config)?
    };
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("serve", args)) => serve(args).await,
        Some(("show-config", args)) => show_config(args),
        _ => Ok(()),
    }
}
