/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::Coordinator;

/// Background task sweeping expired sessions on a fixed interval until shutdown
#[derive(Debug)]
pub struct Reaper {
    coordinator: Coordinator,
    interval: Duration,
    shutdown_rx: watch::Receiver<()>,
}

impl Reaper {
    /// Create a reaper sweeping every [`Config::reap_interval`](crate::Config::reap_interval)
    pub fn new(coordinator: Coordinator, shutdown_rx: watch::Receiver<()>) -> Self {
        let interval = coordinator.config().reap_interval();
        Self {
            coordinator,
            interval,
            shutdown_rx,
        }
    }

    /// Run sweeps until a shutdown signal arrives or its sender is dropped
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.coordinator.reap_expired().await {
                        tracing::warn!("session reaping failed: {err}");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    tracing::info!("reaper shutting down");
                    return;
                }
            }
        }
    }

    /// Run on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
