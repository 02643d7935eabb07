use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dx_hmr::client::{self, AcceptHandler, HttpModuleLoader, LogReloader};
use dx_hmr::config::HmrConfig;
use dx_hmr::server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hmr")]
#[command(
    about = "Hot module replacement for ES module apps: watch sources, push updates, swap modules in place",
    version
)]
#[command(after_help = "Settings are read from hmr.toml in the working directory when present.
Command line flags override the file. Set RUST_LOG=debug for protocol traces.")]
struct Cli {
    /// Config file (defaults to ./hmr.toml when it exists)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory, watch it and broadcast module updates
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Connect a headless client and log the updates it applies
    Client {
        /// Origin modules are served from, e.g. http://localhost:8080
        #[arg(long)]
        origin: Option<String>,

        /// Socket endpoint, derived from the origin when omitted
        #[arg(long, value_name = "URL")]
        socket_url: Option<String>,

        /// Module urls to register as self-accepting
        #[arg(short, long = "module", value_name = "URL")]
        modules: Vec<String>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config =
        HmrConfig::load_or_default(cli.config.as_deref()).context("failed to load config")?;

    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        root: None,
    });

    match command {
        Commands::Serve { host, port, root } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(root) = root {
                config.server.root = root;
            }

            println!("{}", "🔥 Starting HMR server...".cyan().bold());
            println!(
                "  {} {}",
                "Root:  ".bright_black(),
                config.server.root.display().to_string().bright_white()
            );
            println!(
                "  {} {}",
                "Socket:".bright_black(),
                format!("ws://{}/", config.server.bind_addr()).bright_blue()
            );
            println!(
                "  {} {}",
                "Graph: ".bright_black(),
                format!("http://{}/graph", config.server.bind_addr()).bright_blue()
            );

            server::start(config.server).await?;
        }

        Commands::Client {
            origin,
            socket_url,
            modules,
        } => {
            if let Some(origin) = origin {
                config.client.origin = origin;
            }
            if socket_url.is_some() {
                config.client.socket_url = socket_url;
            }

            let client_config = config.client;
            let socket = client_config.socket_url()?;
            let loader = Arc::new(HttpModuleLoader::new(client_config.origin_url()?));
            let (runtime, connection) =
                client::connect(client_config, loader, Arc::new(LogReloader)).await?;

            println!(
                "{} {}",
                "✔ Connecting to".green(),
                socket.as_str().bright_blue()
            );

            for url in &modules {
                let Some(hot) = runtime.install_hot_context(url)? else {
                    println!(
                        "{} {} is not a dev host, hot api disabled",
                        "!".yellow(),
                        runtime.config().origin
                    );
                    break;
                };
                hot.accept_self(AcceptHandler::new(|update| {
                    println!(
                        "{} {} {}",
                        "→".bright_black(),
                        update.module.id.bright_cyan(),
                        format!("({} bytes, generation {})", update.module.source.len(), update.module.generation)
                            .bright_black()
                    );
                    Ok(())
                }))?;
                println!("  {} {}", "●".bright_green(), hot.id().bright_cyan());
            }

            tokio::select! {
                _ = connection => {
                    println!("{}", "Connection closed".yellow());
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{}", "Stopping client".yellow());
                }
            }
        }
    }

    Ok(())
}
