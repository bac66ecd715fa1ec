// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sirius — print gateway for networked thermal printers.
//
// Entry point. Initialises logging, then either runs the device listener or
// renders a local image through one of the encoding pipelines.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sirius_coding::{ImageEncoder, ImageProcessor, preview_png};
use sirius_core::config::GatewayConfig;
use sirius_core::error::Result;
use sirius_core::types::PixelBuffer;
use sirius_protocol::{DeviceServer, Dispatcher};
use tracing::{error, info};

/// Sirius - print gateway for networked thermal printers
#[derive(Parser, Debug)]
#[command(name = "sirius")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept device connections until Ctrl-C
    Serve {
        /// Gateway configuration (JSON); defaults apply when absent
        #[arg(long, value_name = "FILE", default_value = "sirius.json")]
        config: PathBuf,
    },

    /// Encode an image and write what the printer would produce as PNG
    Preview {
        /// Source image
        input: PathBuf,

        /// Destination PNG
        output: PathBuf,

        /// Flat midpoint threshold instead of dithering
        #[arg(long, conflicts_with = "raw")]
        threshold: bool,

        /// Treat the input as a pre-sized upload (must already be device width)
        #[arg(long)]
        raw: bool,

        /// Raster width in dots
        #[arg(long, default_value_t = sirius_core::RASTER_WIDTH)]
        width: u32,
    },

    /// Write a configuration file populated with the defaults
    InitConfig {
        #[arg(value_name = "FILE", default_value = "sirius.json")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!(error = %e, kind = %e.kind(), "sirius exited with an error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::Preview {
            input,
            output,
            threshold,
            raw,
            width,
        } => preview(&input, &output, threshold, raw, width),
        Commands::InitConfig { path } => {
            GatewayConfig::default().save(&path)?;
            info!(path = %path.display(), "default configuration written");
            Ok(())
        }
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = GatewayConfig::load(config_path)?;
    info!(
        config = %config_path.display(),
        port = config.port,
        raster_width = config.raster_width,
        ack_timeout_ms = config.ack_timeout_ms,
        queue_depth = config.queue_depth,
        "Sirius starting"
    );

    let mut server = DeviceServer::new(Dispatcher::new(config));
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!(
        devices = server.dispatcher().registry().len(),
        connections = server.active_connections(),
        "shutdown requested"
    );
    server.stop().await
}

fn preview(input: &Path, output: &Path, threshold: bool, raw: bool, width: u32) -> Result<()> {
    let encoder = ImageEncoder::new(width);
    let pixels: PixelBuffer = if raw {
        encoder.raw_image_pipeline(&std::fs::read(input)?)?
    } else if threshold {
        encoder.threshold(ImageProcessor::open(input)?.as_dynamic())?
    } else {
        encoder.image_pipeline(input)?
    };

    std::fs::write(output, preview_png(&pixels)?)?;
    info!(
        output = %output.display(),
        width = pixels.width(),
        height = pixels.height(),
        dots = pixels.count_on(),
        "preview written"
    );
    Ok(())
}
