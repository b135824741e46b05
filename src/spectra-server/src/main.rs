// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod coordinator;
mod fanout;
mod logging;
mod playback;
mod recorder;
mod transport;

use std::path::PathBuf;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use spectra_backend::{DeviceSource, MockSource, SyntheticSource};
use tracing::{error, info};

use config::ServerConfig;
use coordinator::Coordinator;
use fanout::BroadcastFanout;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - spectrum analyzer server");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(author, version, about = PKG_DESCRIPTION)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Listening port for the WebSocket/REST server
    #[arg(long)]
    port: Option<u16>,
    /// Device sample rate override, Hz
    #[arg(long = "sample-rate")]
    sample_rate: Option<f64>,
    /// FFT size override
    #[arg(long = "fft-size")]
    fft_size: Option<usize>,
    /// Use the deterministic synthetic source instead of real hardware
    #[arg(long)]
    synthetic: bool,
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn build_source(cli: &Cli, cfg: &ServerConfig) -> Box<dyn DeviceSource + Send> {
    if cli.synthetic {
        return Box::new(SyntheticSource::new(1_000_000.0, 0.02));
    }
    #[cfg(feature = "soapysdr")]
    {
        match spectra_backend::RealDeviceSource::new("", cfg.device) {
            Ok(source) => return Box::new(source),
            Err(err) => {
                error!(error = %err, "real device unavailable, falling back to mock source");
            }
        }
    }
    let _ = cfg;
    Box::new(MockSource::default())
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        (config::load_from_file(path)?, Some(path.clone()))
    } else {
        config::load_from_default_paths()?
    };

    if let Some(port) = cli.port {
        cfg.server.port = port;
    }
    if let Some(sample_rate) = cli.sample_rate {
        cfg.device.sample_rate = sample_rate;
    }
    if let Some(fft_size) = cli.fft_size {
        cfg.dsp.fft_size = fft_size;
    }
    cfg.validate()
        .map_err(|e| format!("invalid server configuration: {e}"))?;

    let log_level = if cli.debug || cfg.server.debug {
        Some("debug")
    } else {
        None
    };
    logging::init_logging(log_level);

    if let Some(path) = &config_path {
        info!("loaded configuration from {}", path.display());
    }
    info!(port = cfg.server.port, "starting spectra-server");

    let fanout = std::sync::Arc::new(BroadcastFanout::new());
    let source = build_source(&cli, &cfg);
    let (coordinator, worker_threads) =
        Coordinator::spawn(&cfg, source, std::sync::Arc::clone(&fanout))
            .map_err(|e| format!("failed to start device/DSP pipeline: {e}"))?;

    let bind_port = cfg.server.port;
    let coordinator_data = web::Data::new(std::sync::Arc::clone(&coordinator));
    let fanout_data = web::Data::new(std::sync::Arc::clone(&fanout));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(coordinator_data.clone())
            .app_data(fanout_data.clone())
            .service(transport::websocket::ws_endpoint)
            .service(transport::rest::status)
    })
    .bind(("0.0.0.0", bind_port))
    .map_err(|e| format!("failed to bind port {bind_port}: {e}"))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");

    server_handle.stop(true).await;
    coordinator.request_shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    for handle in worker_threads {
        let _ = handle.join();
    }
    let _ = server_task.await;

    Ok(())
}
