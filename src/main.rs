use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use color_eyre::Result;
use eyre::Context;
use gatehouse::{config, config::ServerConfigValidator, run_cycle, tracing_setup};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gatehouse.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file (or directory) to validate
        #[clap(short, long, default_value = "gatehouse.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "gatehouse.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file (or directory) to use
        #[clap(short, long, default_value = "gatehouse.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_config_command(&config_path),
        "init" => return init_config_command(&config_path).await,
        "serve" => {}
        _ => unreachable!(),
    }

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if rustls::crypto::CryptoProvider::install_default(provider).is_err() {
        tracing::warn!("a rustls crypto provider was already installed");
    }

    tracing_setup::init_tracing()?;

    serve(&config_path).await
}

/// The reload supervisor: each iteration loads and validates configuration,
/// runs one serving cycle to completion and decides whether to go around
/// again. SIGUSR1 ends a cycle cleanly and continues; SIGINT/SIGTERM end it
/// cleanly and exit zero; a failing cycle propagates its error out.
async fn serve(config_path: &str) -> Result<()> {
    loop {
        let config = config::load(config_path)
            .wrap_err_with(|| format!("could not load configuration from {config_path}"))?;
        ServerConfigValidator::validate(&config)?;

        let token = CancellationToken::new();
        let terminate = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(watch_signals(token.clone(), terminate.clone()));

        tracing::info!(config = config_path, "starting serving cycle");
        let result = run_cycle(&config, &token).await;
        watcher.abort();
        result?;

        if terminate.load(Ordering::SeqCst) {
            tracing::info!("terminated by signal");
            return Ok(());
        }
        tracing::info!("reloading configuration");
    }
}

#[cfg(unix)]
async fn watch_signals(token: CancellationToken, terminate: Arc<AtomicBool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let (usr1, int, term) = match (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(a), Ok(b), Ok(c)) => (a, b, c),
        _ => {
            tracing::error!("could not register signal handlers");
            return;
        }
    };
    let (mut usr1, mut int, mut term) = (usr1, int, term);

    tokio::select! {
        _ = usr1.recv() => tracing::info!("SIGUSR1 received, stopping cycle for reload"),
        _ = int.recv() => {
            tracing::info!("SIGINT received, shutting down");
            terminate.store(true, Ordering::SeqCst);
        }
        _ = term.recv() => {
            tracing::info!("SIGTERM received, shutting down");
            terminate.store(true, Ordering::SeqCst);
        }
    }
    token.cancel();
}

#[cfg(not(unix))]
async fn watch_signals(token: CancellationToken, terminate: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("ctrl-c received, shutting down");
        terminate.store(true, Ordering::SeqCst);
        token.cancel();
    }
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match config::load(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • HTTP Address: {}", config.http.http_addr);
            println!("   • HTTPS Address: {}", config.http.https_addr);
            println!("   • Virtual Hosts: {}", config.virtual_hosts.len());
            println!("   • TLS (ACME): {}", config.acme.accept_tos);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Every pattern needs a path: \"example.com/\" or \"/api\"");
            println!("   • Proxy upstreams must start with http:// or https://");
            println!("   • Static roots must be existing directories");
            println!("   • TLS requires accept_tos = true and a contact email");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Gatehouse Configuration

[http]
http_addr = "0.0.0.0:8080"
# https_addr = "0.0.0.0:8443"

[timeouts]
# request = "30s"
shutdown_grace = "5s"

# Automatic TLS. Certificates are only requested once you accept the
# certificate authority's terms of service.
[acme]
accept_tos = false
email = ""
cache_dir = "./acme-cache"
staging = false

# Serve a directory on every host
[[virtual_hosts]]
patterns = ["/"]

[[virtual_hosts.middlewares]]
kind = "static"
root = "./public"

# Proxy one hostname to a backend, with an access log
# [[virtual_hosts]]
# patterns = ["api.example.com/"]
#
# [[virtual_hosts.middlewares]]
# kind = "proxy"
# upstream = "http://localhost:3000"
#
# [[virtual_hosts.middlewares]]
# kind = "log"
# path = "./api-access.log"
"#;

    tokio::fs::write(path, default_config)
        .await
        .wrap_err("could not write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'gatehouse serve --config {config_path}' to start the gateway");
    Ok(())
}
