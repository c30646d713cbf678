/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::PathBuf;

use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use upload_relay::config::loader::{ConfigLoader, LogFormat};
use upload_relay::server::Service;

#[derive(Debug, Parser)]
#[command(version, about = "HTTP relay coordinating multipart uploads", long_about = None)]
struct Cli {
    /// Path to a YAML settings file
    #[arg(short, long, value_name = "FILE", env = "UPLOAD_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON, overrides `log_format`
    #[arg(long)]
    json_logs: bool,
}

fn env_filter() -> EnvFilter {
    // RUST_LOG used to control logging level.
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    })
}

fn setup_tracing(format: LogFormat) {
    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };
    let subscriber = tracing_subscriber::registry().with(log_layer.with_filter(env_filter()));
    if let Err(err) = subscriber.try_init() {
        eprintln!("logger was already initiated, continuing: {err}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::default();
    if let Some(path) = &cli.config {
        loader = loader.file(path);
    }
    let settings = loader.env().load()?;

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        settings.log_format
    };
    setup_tracing(format);

    let root_span = tracing::info_span!("upload-relay");
    if let Err(err) = Service::new(settings).start().instrument(root_span).await {
        tracing::error!("upload relay failed: {err:?}");
        return Err(err);
    }
    Ok(())
}
