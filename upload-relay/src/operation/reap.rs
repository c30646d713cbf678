/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::SystemTime;

use crate::client::Handle;
use crate::error::Error;
use crate::gateway::StorageGateway;
use crate::types::{SessionId, SessionStatus};

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Sessions moved to `Expired` by this sweep
    pub expired: Vec<SessionId>,
    /// Terminal sessions whose records were dropped
    pub purged: usize,
    /// Sessions skipped because another operation held their lock
    pub busy: usize,
}

#[tracing::instrument(skip(handle), level = "debug")]
pub(crate) async fn reap(handle: &Handle, now: SystemTime) -> Result<ReapReport, Error> {
    let retention = handle.config.terminal_retention();
    let mut report = ReapReport::default();
    let mut to_abort = Vec::new();
    let mut to_purge = Vec::new();

    for session in handle.store.list().await? {
        // a locked session is in the middle of an operation, the next sweep gets it
        let Ok(mut entry) = session.try_lock() else {
            report.busy += 1;
            continue;
        };
        let status = entry.session.status;
        if status.is_active() && entry.session.is_expired_at(now) {
            entry.session.transition(SessionStatus::Expired, now)?;
            to_abort.push((entry.session.id.clone(), entry.session.key.clone()));
        } else if status.is_terminal() {
            let stale = entry
                .session
                .closed_at
                .is_some_and(|closed_at| closed_at + retention < now);
            if stale {
                to_purge.push(entry.session.id.clone());
            }
        }
    }

    // provider calls happen with no session lock held
    for (id, key) in to_abort {
        handle.metrics.session_expired();
        match handle.gateway.abort(&id, &key).await {
            Ok(_) => tracing::info!(session_id = %id, key = %key, "expired upload session"),
            Err(err) => tracing::warn!(
                session_id = %id,
                "expired upload session but the provider abort failed: {err}"
            ),
        }
        report.expired.push(id);
    }

    for id in to_purge {
        handle.store.remove(&id).await?;
        report.purged += 1;
    }

    if !report.expired.is_empty() || report.purged > 0 {
        tracing::debug!(
            "reaped {} expired sessions, purged {} terminal sessions",
            report.expired.len(),
            report.purged
        );
    }
    Ok(report)
}
