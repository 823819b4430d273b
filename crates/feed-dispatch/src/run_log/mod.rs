//! Durable run log
//!
//! Keeps one JSON document per run for operators. Writing it is best effort:
//! the caller logs a sink failure and carries on.

pub mod s3;

use crate::run::RunReport;
use async_trait::async_trait;
use feed_dispatch_common::Result;

pub use s3::{S3RunLog, S3RunLogConfig};

#[async_trait]
pub trait RunLogSink: Send + Sync {
    async fn record(&self, report: &RunReport) -> Result<()>;
}
