//! Lumen streaming host entry point.
//!
//! ```text
//! lumen-host                  Serve clients in the foreground
//! lumen-host --config <path>  Load a custom config TOML
//! lumen-host --gen-config     Write default config to stdout
//! lumen-host --port <port>    Override the listen port
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lumen_host::config::HostConfig;
use lumen_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lumen-host", about = "Adaptive frame streaming host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lumen-host.toml")]
    config: PathBuf,

    /// Override `network.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to `--config` and exit.
    #[arg(long)]
    write_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.write_config {
        HostConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = HostConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("lumen-host v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}", config.listen_address());
    info!(
        "stream: {} @ {} fps, {:?}",
        config.stream.resolution, config.stream.frame_rate, config.stream.codec
    );
    info!(
        "pacing: {}",
        if config.pacing.render_fps_enc { "event-driven" } else { "fixed-interval" }
    );
    info!("target delay: {} ms", config.predictor.target_delay_ms);

    let service = HostService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
