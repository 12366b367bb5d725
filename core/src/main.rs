//! PineDB Server Executable
//!
//! Main entry point for the PineDB database server.

use colored::Colorize;
use pine_core::{Config, Database, server::DatabaseServer};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

fn get_env_filter() -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else if cfg!(debug_assertions) {
        EnvFilter::new("pine_core=debug,pined=debug")
    } else {
        EnvFilter::new("info")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(get_env_filter()).with_target(false).init();

    print_banner();

    let config = Config::load_from_path("pinedb.toml")?;

    println!("{}", "Starting PineDB Server...".bright_green());
    println!("Configuration:");
    println!(
        "  Address: {}",
        format!("{}:{}", config.server.host, config.server.port).bright_cyan()
    );
    println!("  Data Directory: {}", config.storage.data_dir.bright_cyan());
    println!(
        "  Storage Medium: {}",
        format!("{:?}", config.storage.medium).bright_cyan()
    );
    println!(
        "  Workers / Queue: {} / {}",
        config.server.worker_threads.to_string().bright_cyan(),
        config.server.work_queue_size.to_string().bright_cyan()
    );
    println!(
        "  Tree Order: {}",
        config.storage.tree_order.to_string().bright_cyan()
    );

    let storage = config.storage.clone();
    let database = tokio::task::spawn_blocking(move || Database::open(storage)).await??;
    let server = Arc::new(DatabaseServer::new(config.server, Arc::new(database)));

    // Set up graceful shutdown handler
    let server_for_shutdown = Arc::clone(&server);
    let shutdown_handle = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        println!("\n{}", "Received shutdown signal".bright_yellow());

        if let Err(e) = server_for_shutdown.shutdown().await {
            eprintln!("{} {}", "Error during shutdown:".bright_red(), e);
        }
    });

    let server_result = tokio::select! {
        result = server.start() => result,
        _ = shutdown_handle => Ok(()),
    };

    match server_result {
        Ok(()) => {
            println!("{}", "PineDB Server stopped".bright_green());
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "Server error:".bright_red(), e);
            Err(e.into())
        }
    }
}

fn print_banner() {
    let banner = r#"
    ██████╗ ██╗███╗   ██╗███████╗██████╗ ██████╗
    ██╔══██╗██║████╗  ██║██╔════╝██╔══██╗██╔══██╗
    ██████╔╝██║██╔██╗ ██║█████╗  ██║  ██║██████╔╝
    ██╔═══╝ ██║██║╚██╗██║██╔══╝  ██║  ██║██╔══██╗
    ██║     ██║██║ ╚████║███████╗██████╔╝██████╔╝
    ╚═╝     ╚═╝╚═╝  ╚═══╝╚══════╝╚═════╝ ╚═════╝
                  Database Engine v0.1.0
    "#;

    println!("{}", banner.bright_green());
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut sigint), Ok(mut sigterm)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) else {
            tracing::error!("Failed to install signal handlers");
            return std::future::pending().await;
        };

        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
