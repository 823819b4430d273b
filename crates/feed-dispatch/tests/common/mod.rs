//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use feed_dispatch::invoker::{IngestInvoker, InvocationAck, InvocationError, InvocationRequest};
use feed_dispatch::registry::{FeedRecord, FeedRegistry, FeedUpdate, InMemoryRegistry};
use feed_dispatch::run::RunReport;
use feed_dispatch::run_log::RunLogSink;
use feed_dispatch_common::{DispatchError, FeedId, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// How the scripted downstream answers for one feed.
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    Reject(&'static str),
    Hang,
}

/// Downstream fake: accepts every feed unless scripted otherwise.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: HashMap<FeedId, Script>,
    calls: Mutex<Vec<FeedId>>,
}

impl ScriptedInvoker {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn with(mut self, feed_id: &str, script: Script) -> Self {
        self.scripts.insert(FeedId::new(feed_id), script);
        self
    }

    pub fn calls(&self) -> Vec<FeedId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl IngestInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> std::result::Result<InvocationAck, InvocationError> {
        self.calls.lock().unwrap().push(request.feed_id.clone());
        match self.scripts.get(&request.feed_id).cloned().unwrap_or(Script::Accept) {
            Script::Accept => Ok(InvocationAck {
                invocation_id: Some(format!("req-{}", request.feed_id)),
            }),
            Script::Reject(reason) => Err(InvocationError::Rejected(reason.to_string())),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Registry whose fetch is rejected for bad credentials.
pub struct AuthFailingRegistry;

#[async_trait]
impl FeedRegistry for AuthFailingRegistry {
    async fn fetch(&self, _filter: Option<&str>) -> Result<Vec<FeedRecord>> {
        Err(DispatchError::RegistryAuth("401 Unauthorized".into()))
    }

    async fn update(&self, _id: &FeedId, _update: &FeedUpdate) -> Result<()> {
        Err(DispatchError::RegistryAuth("401 Unauthorized".into()))
    }
}

/// In-memory registry whose writes fail transiently for the listed feeds.
pub struct FlakyWrites {
    pub inner: InMemoryRegistry,
    failing: Vec<FeedId>,
    pub failed_writes: AtomicU32,
}

impl FlakyWrites {
    pub fn new(inner: InMemoryRegistry, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|id| FeedId::new(*id)).collect(),
            failed_writes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FeedRegistry for FlakyWrites {
    async fn fetch(&self, filter: Option<&str>) -> Result<Vec<FeedRecord>> {
        self.inner.fetch(filter).await
    }

    async fn update(&self, id: &FeedId, update: &FeedUpdate) -> Result<()> {
        if self.failing.contains(id) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(DispatchError::unavailable("503 Service Unavailable"));
        }
        self.inner.update(id, update).await
    }
}

/// Run-log sink that keeps every report in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub reports: Mutex<Vec<RunReport>>,
}

#[async_trait]
impl RunLogSink for RecordingSink {
    async fn record(&self, report: &RunReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait]
impl RunLogSink for FailingSink {
    async fn record(&self, _report: &RunReport) -> Result<()> {
        Err(DispatchError::Io(std::io::Error::other("bucket does not exist")))
    }
}
