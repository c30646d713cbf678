/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use tokio::signal;
use tokio::sync::watch;

use crate::client::Coordinator;
use crate::config::loader::{MetadataSettings, ServiceSettings, StorageSettings};
use crate::error::Error;
use crate::gateway::{InMemoryGateway, S3Gateway};
use crate::metadata::{FileMetadataRecorder, InMemoryMetadataRecorder};
use crate::reaper::Reaper;

/// Request and response bodies of the HTTP surface
pub mod http_objects;

/// Axum router and handlers
pub mod routes;

use routes::{create_routes, RouteState};

/// Build a coordinator with the storage and metadata backends named in `settings`
pub async fn build_coordinator(settings: &ServiceSettings) -> Result<Coordinator, Error> {
    let builder = Coordinator::builder().config(settings.coordinator_config());

    let builder = match &settings.storage {
        StorageSettings::S3(s3) => {
            let gateway = S3Gateway::from_settings(s3).await?;
            tracing::info!("storing uploads in S3 bucket {}", gateway.bucket());
            builder.gateway(gateway)
        }
        StorageSettings::Memory => {
            tracing::warn!("storing uploads in memory, they are lost on restart");
            builder.gateway(InMemoryGateway::new())
        }
    };

    let builder = match &settings.metadata {
        MetadataSettings::File { path } => {
            let recorder = FileMetadataRecorder::open(path).await?;
            tracing::info!("recording file metadata in {}", recorder.path().display());
            builder.metadata_recorder(recorder)
        }
        MetadataSettings::Memory => builder.metadata_recorder(InMemoryMetadataRecorder::new()),
    };

    builder.build()
}

/// The relay service: HTTP surface plus background reaper
#[derive(Debug)]
pub struct Service {
    settings: ServiceSettings,
}

impl Service {
    /// Create a service from validated settings
    pub fn new(settings: ServiceSettings) -> Self {
        Self { settings }
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn start(&self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        self.start_with_shutdown(shutdown_tx, shutdown_rx, shutdown_signal())
            .await
    }

    async fn start_with_shutdown(
        &self,
        shutdown_tx: watch::Sender<()>,
        shutdown_rx: watch::Receiver<()>,
        signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let coordinator = build_coordinator(&self.settings).await?;
        let reaper = Reaper::new(coordinator.clone(), shutdown_rx.clone()).spawn();

        let max_body_bytes = usize::try_from(self.settings.max_request_body_bytes)?;
        let app = create_routes(
            RouteState {
                coordinator: coordinator.clone(),
            },
            max_body_bytes,
        );

        let addr = self.settings.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("upload relay listening on {}", listener.local_addr()?);

        let mut server_shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            signal.await;
            tracing::info!("received graceful shutdown signal, telling tasks to shutdown");
            let _ = shutdown_tx.send(());
        });
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown_rx.changed().await;
            })
            .await?;

        reaper.await?;
        tracing::info!("upload relay stopped - {}", coordinator.metrics());
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_service_stops_on_signal() {
        let settings = ServiceSettings {
            listen_addr: "127.0.0.1:0".to_owned(),
            ..Default::default()
        };
        let service = Service::new(settings);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let signal = tokio::time::sleep(Duration::from_millis(50));

        tokio::time::timeout(
            Duration::from_secs(10),
            service.start_with_shutdown(shutdown_tx, shutdown_rx, signal),
        )
        .await
        .expect("service did not stop")
        .unwrap();
    }

    #[tokio::test]
    async fn test_build_coordinator_with_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ServiceSettings {
            metadata: MetadataSettings::File {
                path: dir.path().join("files.jsonl"),
            },
            ..Default::default()
        };
        let coordinator = build_coordinator(&settings).await.unwrap();
        assert_eq!(
            settings.coordinator_config().session_ttl(),
            coordinator.config().session_ttl()
        );
        assert!(dir.path().join("files.jsonl").exists());
    }
}
