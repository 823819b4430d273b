//! Feed Dispatch Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Decides which feeds in a Socrata-hosted registry are due for ingestion and
//! triggers the downstream ingester for each of them, then records the attempt
//! back in the registry so the next scheduled run starts from fresh state.
//!
//! # Components
//!
//! - **Registry** ([`registry`]): fetch feed records, write partial updates
//! - **Eligibility** ([`eligibility`]): pure due/not-due policy
//! - **Dispatcher** ([`dispatcher`]): bounded-concurrency invocation with per-feed isolation
//! - **Recorder** ([`recorder`]): write-back with retry
//! - **Run** ([`run`]): one end-to-end pass, producing a [`RunReport`]
//!
//! # Example
//!
//! ```no_run
//! use feed_dispatch::config::DispatchConfig;
//! use feed_dispatch::invoker::LambdaInvoker;
//! use feed_dispatch::registry::SocrataRegistry;
//! use feed_dispatch::run::DispatchRun;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DispatchConfig::load()?;
//!     let registry = SocrataRegistry::new(config.socrata_config())?;
//!     let invoker = LambdaInvoker::from_env(config.lambda_to_trigger.clone()).await;
//!
//!     let report = DispatchRun::new(&registry, &invoker, config.run_settings())
//!         .execute()
//!         .await?;
//!     println!("{} feed(s) triggered", report.summary.triggered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod eligibility;
pub mod invoker;
pub mod recorder;
pub mod registry;
pub mod retry;
pub mod run;
pub mod run_log;

pub use dispatcher::{DispatchOutcome, DispatchResult, IngestDispatcher};
pub use eligibility::{EligibilityDecision, EligibilityReason};
pub use recorder::{CommitReport, CommitStatus, ResultRecorder};
pub use registry::{FeedRecord, FeedRegistry, FeedUpdate};
pub use run::{DispatchRun, FeedStatus, RunReport};
