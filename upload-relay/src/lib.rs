/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */
#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

//! Multipart upload relay
//!
//! Coordinates multipart uploads on behalf of HTTP clients: a client starts a session, sends
//! parts one request at a time and completes (or aborts) the session. The [`Coordinator`]
//! forwards every step to an object storage provider such as Amazon S3 and records the
//! metadata of finished files.
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> Result<(), upload_relay::error::Error> {
//! use upload_relay::gateway::InMemoryGateway;
//!
//! let coordinator = upload_relay::Coordinator::builder()
//!     .gateway(InMemoryGateway::new())
//!     .build()?;
//!
//! let session_id = coordinator
//!     .start_upload()
//!     .key("a.png")
//!     .content_type("image/png")
//!     .send()
//!     .await?;
//!
//! coordinator
//!     .accept_part()
//!     .session_id(session_id.clone())
//!     .part_number(1)
//!     .payload(vec![0u8; 1024])
//!     .send()
//!     .await?;
//!
//! let file = coordinator
//!     .complete_upload()
//!     .session_id(session_id)
//!     .parts(1)
//!     .title("A picture")
//!     .send()
//!     .await?;
//! println!("uploaded to {}", file.url);
//! # Ok(())
//! # }
//! ```

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

pub(crate) const GIBIBYTE: u64 = 1024 * MEBIBYTE;

/// Default limit of in-flight storage provider calls
pub(crate) const DEFAULT_CONCURRENCY: usize = 64;

/// Error types emitted by `upload-relay`
pub mod error;

/// Common types used by `upload-relay`
pub mod types;

/// Coordinator configuration and service settings
pub mod config;

/// Per-session part bookkeeping
pub mod ledger;

/// Upload session storage
pub mod store;

/// Storage provider adapters
pub mod gateway;

/// Metadata recorders for completed uploads
pub mod metadata;

/// Upload coordinator
pub mod client;

/// Coordinator operations
pub mod operation;

/// Background expiry of abandoned sessions
pub mod reaper;

/// Coordinator metrics
pub mod metrics;

/// HTTP surface
pub mod server;

pub use self::client::Coordinator;
pub use self::config::Config;
