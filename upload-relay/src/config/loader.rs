/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::config::{Config, RetryConfig, DEFAULT_MAX_PART_SIZE_BYTES, DEFAULT_MIN_PART_SIZE_BYTES};
use crate::error::{self, Error};
use crate::types::ConcurrencySetting;
use crate::MEBIBYTE;

/// Prefix of environment variables overriding settings, nested keys are split on `__`
pub const ENV_PREFIX: &str = "UPLOAD_RELAY_";

/// Where the object data goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageSettings {
    /// Amazon S3 or an S3 compatible endpoint
    S3(S3Settings),
    /// Keep uploads in process memory, for local runs
    Memory,
}

/// Amazon S3 connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    /// Destination bucket
    pub bucket: String,
    /// Region, falls back to the AWS environment when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom endpoint for S3 compatible stores
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    /// Use path style addressing (`endpoint/bucket/key`)
    pub force_path_style: bool,
    /// Static access key, falls back to the AWS credential chain when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Static secret key, required together with `access_key_id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    /// Canned ACL applied to created objects, e.g. `public-read`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
}

/// Where finished upload metadata is recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataSettings {
    /// Keep records in process memory
    Memory,
    /// Append records as JSON lines to a file
    File {
        /// Path of the JSON lines file
        path: PathBuf,
    },
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable single line output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// All settings of a running relay service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Overrides the port of `listen_addr`, read from `PORT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Largest accepted request body; parts arrive base64 encoded so this must be about 4/3 of
    /// the part size
    pub max_request_body_bytes: u64,
    /// Log output format
    pub log_format: LogFormat,
    /// Object storage backend
    pub storage: StorageSettings,
    /// Metadata store backend
    pub metadata: MetadataSettings,
    /// Session time-to-live in seconds
    pub session_ttl_secs: u64,
    /// Smallest allowed part, the last part is exempt
    pub min_part_size_bytes: u64,
    /// Largest allowed part
    pub max_part_size_bytes: u64,
    /// Attempts per provider call including the first
    pub retry_max_attempts: u32,
    /// Backoff before the first retry in milliseconds
    pub retry_base_delay_ms: u64,
    /// Cap for a single backoff in milliseconds
    pub retry_max_delay_ms: u64,
    /// Deadline for a single provider call attempt in seconds
    pub gateway_timeout_secs: u64,
    /// Deadline for a single attempt to complete an upload in seconds
    pub complete_timeout_secs: u64,
    /// Max in-flight provider calls, unset for the default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_concurrency: Option<usize>,
    /// Seconds between reaper sweeps
    pub reap_interval_secs: u64,
    /// Seconds terminal sessions are kept before being purged
    pub terminal_retention_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_owned(),
            port: None,
            max_request_body_bytes: 100 * MEBIBYTE,
            log_format: LogFormat::default(),
            storage: StorageSettings::Memory,
            metadata: MetadataSettings::Memory,
            session_ttl_secs: 24 * 60 * 60,
            min_part_size_bytes: DEFAULT_MIN_PART_SIZE_BYTES,
            max_part_size_bytes: DEFAULT_MAX_PART_SIZE_BYTES,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            gateway_timeout_secs: 60,
            complete_timeout_secs: 10 * 60,
            gateway_concurrency: None,
            reap_interval_secs: 60,
            terminal_retention_secs: 60 * 60,
        }
    }
}

impl ServiceSettings {
    /// The socket address to listen on, with `port` applied
    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        let mut addr: SocketAddr = self.listen_addr.parse().map_err(|_| {
            error::invalid_argument(format!("invalid listen address: {}", self.listen_addr))
        })?;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        Ok(addr)
    }

    /// Check settings that can not be expressed in types
    pub fn validate(&self) -> Result<(), Error> {
        self.socket_addr()?;

        // base64 turns every 3 bytes into 4
        let encoded_min_part = self.min_part_size_bytes.div_ceil(3) * 4;
        if self.max_request_body_bytes < encoded_min_part {
            return Err(error::invalid_argument(format!(
                "max_request_body_bytes ({}) can not hold a base64 encoded part of the minimum \
                 size ({} bytes encoded)",
                self.max_request_body_bytes, encoded_min_part
            )));
        }

        if let StorageSettings::S3(s3) = &self.storage {
            if s3.bucket.is_empty() {
                return Err(error::invalid_argument("storage.bucket must be set for s3 storage"));
            }
            if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                return Err(error::invalid_argument(
                    "storage.access_key_id and storage.secret_access_key must be set together",
                ));
            }
        }
        Ok(())
    }

    /// The coordinator configuration described by these settings
    pub fn coordinator_config(&self) -> Config {
        let concurrency = match self.gateway_concurrency {
            Some(n) => ConcurrencySetting::Explicit(n),
            None => ConcurrencySetting::Auto,
        };
        Config::builder()
            .session_ttl(Duration::from_secs(self.session_ttl_secs))
            .min_part_size(self.min_part_size_bytes)
            .max_part_size(self.max_part_size_bytes)
            .retry(RetryConfig {
                max_attempts: self.retry_max_attempts,
                initial_backoff: Duration::from_millis(self.retry_base_delay_ms),
                max_backoff: Duration::from_millis(self.retry_max_delay_ms),
            })
            .gateway_timeout(Duration::from_secs(self.gateway_timeout_secs))
            .complete_timeout(Duration::from_secs(self.complete_timeout_secs))
            .concurrency(concurrency)
            .reap_interval(Duration::from_secs(self.reap_interval_secs))
            .terminal_retention(Duration::from_secs(self.terminal_retention_secs))
            .build()
    }
}

/// Load [`ServiceSettings`] from defaults, an optional YAML file and the environment.
///
/// Later sources win: defaults, then the file, then `UPLOAD_RELAY_*` variables, then `PORT`.
#[derive(Debug)]
pub struct ConfigLoader {
    figment: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(ServiceSettings::default())),
        }
    }
}

impl ConfigLoader {
    /// Merge settings from a YAML file
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.figment = self.figment.merge(Yaml::file(path.as_ref()));
        self
    }

    /// Merge settings from a YAML string
    pub fn yaml(mut self, yaml: &str) -> Self {
        self.figment = self.figment.merge(Yaml::string(yaml));
        self
    }

    /// Merge `UPLOAD_RELAY_*` environment variables and `PORT`
    pub fn env(mut self) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&["PORT"]));
        self
    }

    /// Extract and validate the settings
    pub fn load(self) -> Result<ServiceSettings, Error> {
        let settings: ServiceSettings = self
            .figment
            .extract()
            .map_err(|e| error::invalid_argument(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ConfigLoader::default().load().unwrap();
        assert_eq!(ServiceSettings::default(), settings);
        assert_eq!(5000, settings.socket_addr().unwrap().port());
    }

    #[test]
    fn test_yaml_overrides() {
        let settings = ConfigLoader::default()
            .yaml(
                r#"
listen_addr: "127.0.0.1:8080"
session_ttl_secs: 60
complete_timeout_secs: 1800
storage:
  type: s3
  bucket: uploads
  region: us-west-2
  acl: public-read
metadata:
  type: file
  path: /tmp/files.jsonl
"#,
            )
            .load()
            .unwrap();
        assert_eq!("127.0.0.1:8080", settings.socket_addr().unwrap().to_string());
        assert_eq!(
            StorageSettings::S3(S3Settings {
                bucket: "uploads".to_owned(),
                region: Some("us-west-2".to_owned()),
                acl: Some("public-read".to_owned()),
                ..Default::default()
            }),
            settings.storage
        );
        assert_eq!(
            MetadataSettings::File {
                path: PathBuf::from("/tmp/files.jsonl")
            },
            settings.metadata
        );
        let config = settings.coordinator_config();
        assert_eq!(Duration::from_secs(60), config.session_ttl());
        assert_eq!(Duration::from_secs(1800), config.complete_timeout());
    }

    #[test]
    fn test_port_overrides_listen_addr() {
        let settings = ServiceSettings {
            port: Some(9000),
            ..Default::default()
        };
        assert_eq!(9000, settings.socket_addr().unwrap().port());
    }

    #[test]
    fn test_body_limit_must_fit_encoded_min_part() {
        let err = ConfigLoader::default()
            .yaml("max_request_body_bytes: 1048576")
            .load()
            .unwrap_err();
        assert_eq!("InvalidArgument", err.kind_str());
    }

    #[test]
    fn test_s3_requires_bucket_and_paired_credentials() {
        let err = ConfigLoader::default()
            .yaml("storage:\n  type: s3\n")
            .load()
            .unwrap_err();
        assert_eq!("InvalidArgument", err.kind_str());

        let err = ConfigLoader::default()
            .yaml("storage:\n  type: s3\n  bucket: b\n  access_key_id: AKID\n")
            .load()
            .unwrap_err();
        assert_eq!("InvalidArgument", err.kind_str());
    }
}
