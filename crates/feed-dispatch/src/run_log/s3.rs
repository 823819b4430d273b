use crate::run::RunReport;
use crate::run_log::RunLogSink;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use feed_dispatch_common::{DispatchError, Result};
use tracing::{debug, info, instrument};

/// Key prefix used when `RUN_LOG_PREFIX` is not set.
pub const DEFAULT_PREFIX: &str = "feed-dispatch/runs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3RunLogConfig {
    pub bucket: String,
    pub prefix: String,
    /// Custom endpoint (MinIO, LocalStack); switches to path-style addressing.
    pub endpoint: Option<String>,
}

impl S3RunLogConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            endpoint: None,
        }
    }
}

#[derive(Clone)]
pub struct S3RunLog {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3RunLog {
    pub async fn new(config: S3RunLogConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, prefix = %config.prefix, "Run log enabled");

        Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    /// `{prefix}/{YYYY}/{MM}/{DD}/{run_id}.json`, dated by run start.
    pub fn key_for(&self, report: &RunReport) -> String {
        object_key(&self.prefix, report)
    }
}

fn object_key(prefix: &str, report: &RunReport) -> String {
    format!(
        "{}/{}/{}.json",
        prefix.trim_end_matches('/'),
        report.started_at.format("%Y/%m/%d"),
        report.run_id
    )
}

#[async_trait]
impl RunLogSink for S3RunLog {
    #[instrument(skip(self, report), fields(run_id = %report.run_id))]
    async fn record(&self, report: &RunReport) -> Result<()> {
        let key = self.key_for(report);
        let body = serde_json::to_vec_pretty(report)?;

        debug!("Uploading {} bytes to s3://{}/{}", body.len(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                DispatchError::Io(std::io::Error::other(format!(
                    "failed to upload run log to s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                )))
            })?;

        info!("Run log written to s3://{}/{}", self.bucket, key);
        Ok(())
    }
}
