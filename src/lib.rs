//! Seppo Harness - declarative step runner for Kubernetes tests
//!
//! A test is a list of steps. Each step deletes leftovers, runs setup
//! commands, applies objects, then polls the cluster until the declared
//! assertions hold (or the step times out). Assertions are structural
//! subsets: only the fields they name are compared.
//!
//! # Example
//!
//! ```no_run
//! use seppo_harness::{Context, HarnessConfig, KubeClient, ShellRunner, Step, TestCase};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     seppo_harness::telemetry::init_logging();
//!
//!     let config = HarnessConfig::from_env()?;
//!     let ctx = config.context(
//!         Arc::new(KubeClient::try_default().await?),
//!         Arc::new(ShellRunner::new()),
//!     );
//!
//!     let mut test = TestCase::new("nginx").step(
//!         Step::new(0, "deploy")
//!             .apply(json!({
//!                 "apiVersion": "v1",
//!                 "kind": "Pod",
//!                 "metadata": { "name": "nginx" },
//!                 "spec": { "containers": [{ "name": "nginx", "image": "nginx" }] }
//!             }))
//!             .assert(json!({
//!                 "apiVersion": "v1",
//!                 "kind": "Pod",
//!                 "metadata": { "name": "nginx" },
//!                 "status": { "phase": "Running" }
//!             })),
//!     );
//!
//!     let outcome = test.run(&ctx).await;
//!     for error in &outcome.errors {
//!         eprintln!("{error}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod case;
pub mod cleanup;
pub mod client;
pub mod collector;
pub mod command;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod poll;
pub mod resource;
pub mod step;
pub mod strategy;
pub mod subset;
pub mod suite;
pub mod telemetry;
pub mod wait;
pub mod wildcard;

// Re-export commonly used types
pub use case::{TestCase, TestOutcome};
pub use cleanup::Cleanups;
pub use client::{ApplyAction, ClientError, KubeClient, MemoryClient, ResourceClient};
pub use collector::Collector;
pub use command::{
    Command, CommandError, CommandRunner, ExpectedOutput, MatchType, RunnerError, ShellRunner,
};
pub use config::{ConfigError, HarnessConfig};
pub use context::Context;
pub use error::{CleanupError, StepError};
pub use poll::{poll_until, CancelHandle, CancelSignal, PollError};
pub use resource::{Node, ResourceRef};
pub use step::Step;
pub use strategy::{ArrayRule, AssertOptions};
pub use subset::{is_subset, ArrayStrategy, SubsetError};
pub use suite::{Suite, SuiteReport};
pub use wait::WaitError;
