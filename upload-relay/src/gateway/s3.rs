/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;

use crate::config::loader::S3Settings;
use crate::error::{self, Error};
use crate::gateway::{ObjectInfo, StorageGateway};
use crate::types::{PartNumber, PartRecord, SessionId};

const DEFAULT_REGION: &str = "us-east-1";

/// Error codes S3 returns for conditions that clear up on their own
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "RequestTimeout",
    "RequestTimeTooSkewed",
];

/// [`StorageGateway`] backed by Amazon S3 (or an S3 compatible store)
#[derive(Debug, Clone)]
pub struct S3Gateway {
    client: aws_sdk_s3::Client,
    bucket: String,
    acl: Option<ObjectCannedAcl>,
    object_url_base: String,
}

impl S3Gateway {
    /// Create a gateway writing to `bucket` with the given client.
    ///
    /// Object URLs default to the virtual-hosted style of the client's region.
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let region = client
            .config()
            .region()
            .map(|r| r.as_ref().to_owned())
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());
        let object_url_base = format!("https://{bucket}.s3.{region}.amazonaws.com");
        Self {
            client,
            bucket,
            acl: None,
            object_url_base,
        }
    }

    /// Apply a canned ACL to every object created through this gateway
    pub fn with_acl(mut self, acl: ObjectCannedAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    /// Derive object URLs as `{endpoint}/{bucket}/{key}`, used with custom endpoints
    pub fn with_endpoint_url(mut self, endpoint_url: &str) -> Self {
        self.object_url_base = format!("{}/{}", endpoint_url.trim_end_matches('/'), self.bucket);
        self
    }

    /// Build a gateway from service settings, loading credentials and region from the
    /// environment when the settings leave them unset.
    ///
    /// SDK level retries are disabled, [`RetryingGateway`](crate::gateway::RetryingGateway)
    /// owns the retry policy.
    pub async fn from_settings(settings: &S3Settings) -> Result<Self, Error> {
        let acl = settings.acl.as_deref().map(parse_acl).transpose()?;

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).retry_config(RetryConfig::disabled());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "upload-relay-settings",
            ));
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style);
        if let Some(endpoint_url) = &settings.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint_url);
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config.build());

        let mut gateway = S3Gateway::new(client, settings.bucket.clone());
        if let Some(endpoint_url) = &settings.endpoint_url {
            gateway = gateway.with_endpoint_url(endpoint_url);
        }
        if let Some(acl) = acl {
            gateway = gateway.with_acl(acl);
        }
        Ok(gateway)
    }

    /// The bucket objects are written to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.object_url_base, encode_key(key))
    }
}

fn parse_acl(acl: &str) -> Result<ObjectCannedAcl, Error> {
    if ObjectCannedAcl::values().contains(&acl) {
        Ok(ObjectCannedAcl::from(acl))
    } else {
        Err(error::invalid_argument(format!("unknown canned ACL: {acl}")))
    }
}

/// Percent-encode an object key for use in a URL path, keeping `/` separators
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Sort an S3 SDK error into `GatewayUnavailable` or `GatewayRejected`
fn classify<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => match ctx.err().code() {
            Some(code) => TRANSIENT_CODES.contains(&code),
            None => {
                let status = ctx.raw().status().as_u16();
                status >= 500 || status == 429
            }
        },
        _ => false,
    };

    tracing::debug!(
        "S3 {operation} failed (transient: {transient}): {}",
        DisplayErrorContext(&err)
    );
    if transient {
        error::gateway_unavailable(err)
    } else {
        error::gateway_rejected(err)
    }
}

#[async_trait]
impl StorageGateway for S3Gateway {
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_acl(self.acl.clone())
            .send()
            .await
            .map_err(|err| classify("CreateMultipartUpload", err))?;

        resp.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| error::gateway_rejected("CreateMultipartUpload returned no upload ID"))
    }

    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .part_number(part_number.get())
            .content_length(payload.len() as i64)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|err| classify("UploadPart", err))?;

        tracing::trace!("uploaded part {part_number} of {key}");
        resp.e_tag()
            .map(str::to_owned)
            .ok_or_else(|| error::gateway_rejected("UploadPart returned no ETag"))
    }

    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number.get())
                    .e_tag(part.e_tag.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| classify("CompleteMultipartUpload", err))?;

        Ok(match resp.location() {
            Some(location) if !location.is_empty() => location.to_owned(),
            _ => self.object_url(key),
        })
    }

    async fn abort(&self, upload_id: &SessionId, key: &str) -> Result<(), Error> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.code() == Some("NoSuchUpload") => {
                tracing::debug!("upload {upload_id} already gone at the provider");
                Ok(())
            }
            Err(err) => Err(classify("AbortMultipartUpload", err)),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(resp) => Ok(Some(ObjectInfo {
                url: self.object_url(key),
                size_bytes: resp.content_length().unwrap_or_default().max(0) as u64,
                e_tag: resp.e_tag().unwrap_or_default().to_owned(),
            })),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(classify("HeadObject", err)),
        }
    }
}
