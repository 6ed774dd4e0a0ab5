// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::{io, sync::Arc, time::Instant};

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use piuma_http1::{ServerConfig, Settings};

mod example_handlers;

const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let start = Instant::now();
    let address = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDRESS.to_string());

    let settings = Settings::default();
    let handler = example_handlers::ExampleHandler {
        body_limit: settings.maximum_body_buffer,
    };
    let config = ServerConfig::with_settings(settings, Arc::new(handler));
    let listener = TcpListener::bind(&address).await?;
    info!(address = %listener.local_addr()?, "started listening");

    piuma_http1::serve(listener, config, async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }).await?;

    info!(uptime_ms = start.elapsed().as_millis() as u64, "stopped");
    Ok(())
}
