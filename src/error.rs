//! Step and cleanup error taxonomy

use crate::client::ClientError;
use crate::command::CommandError;
use crate::subset::SubsetError;
use crate::wait::WaitError;

/// Everything that can go wrong while running a step
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// Bad declarative input, detected before anything runs
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("deleting {resource}: {source}")]
    Delete {
        resource: String,
        #[source]
        source: ClientError,
    },

    #[error("{0}")]
    WaitTimeout(#[from] WaitError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("applying {resource}: {source}")]
    Apply {
        resource: String,
        #[source]
        source: ClientError,
    },

    /// An apply declared with `shouldFail` went through
    #[error("applying {resource}: an error was expected but didn't happen")]
    UnexpectedSuccess { resource: String },

    /// A live object did not match its assertion
    #[error("resource {resource}: {source}{}", render_diff(.diff.as_deref()))]
    Mismatch {
        resource: String,
        #[source]
        source: SubsetError,
        diff: Option<String>,
    },

    /// A listed assertion found nothing to compare against
    #[error("no resources matched of kind: {gvk}")]
    NoMatches { gvk: String },

    /// Objects matched an error assertion
    #[error("resource {gvk} {name}{} matched error assertion", render_others(.others))]
    Present {
        gvk: String,
        name: String,
        others: usize,
    },

    #[error("{resource}: {source}")]
    Client {
        resource: String,
        #[source]
        source: ClientError,
    },

    /// A phase ran past its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

fn render_diff(diff: Option<&str>) -> String {
    diff.map(|d| format!("\n{d}")).unwrap_or_default()
}

fn render_others(others: &usize) -> String {
    if *others == 0 {
        String::new()
    } else {
        format!(" and {others} other resources")
    }
}

impl StepError {
    /// Whether this error means time ran out
    ///
    /// An assertion round containing one of these is not retried.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::WaitTimeout(_) | Self::Timeout(_) => true,
            Self::Command(e) => e.is_timeout(),
            Self::Client { source, .. }
            | Self::Apply { source, .. }
            | Self::Delete { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// The rendered diff attached to a mismatch
    pub fn diff(&self) -> Option<&str> {
        match self {
            Self::Mismatch { diff, .. } => diff.as_deref(),
            _ => None,
        }
    }
}

/// Failure to remove an object created by a test
#[derive(Debug, Clone, thiserror::Error)]
pub enum CleanupError {
    #[error("cleanup of {resource} failed: {source}")]
    Delete {
        resource: String,
        #[source]
        source: ClientError,
    },

    #[error("{0}")]
    NotRemoved(#[from] WaitError),
}
