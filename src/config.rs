//! Harness configuration
//!
//! Build it programmatically, optionally starting from the environment.
//!
//! # Example
//!
//! ```
//! use seppo_harness::config::HarnessConfig;
//! use std::time::Duration;
//!
//! let config = HarnessConfig::new()
//!     .namespace("e2e")
//!     .timeout(Duration::from_secs(120))
//!     .parallel(4)
//!     .skip_delete(true);
//!
//! assert_eq!(config.parallel, 4);
//! ```
//!
//! # Environment
//!
//! [`HarnessConfig::from_env`] reads:
//! - `SEPPO_TIMEOUT`: step timeout in seconds
//! - `SEPPO_PARALLEL`: test cases run at once
//! - `SEPPO_SKIP_DELETE`: `true`/`false` (also `1`/`0`, `yes`/`no`)
//! - `SEPPO_NAMESPACE`: ambient namespace
//! - `SEPPO_KUBECONFIG`: kubeconfig path

use crate::command::CommandRunner;
use crate::client::ResourceClient;
use crate::context::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A configuration value that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    fn new(var: &str, value: &str, reason: impl Into<String>) -> Self {
        Self {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Settings shared by every test case of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Step timeout for steps that do not set one
    pub timeout: Duration,

    /// Number of test cases run at the same time
    pub parallel: usize,

    /// Leave created objects in place
    pub skip_delete: bool,

    /// Namespace for objects and commands that do not name one
    pub namespace: String,

    /// Kubeconfig handed to commands
    pub kubeconfig: Option<PathBuf>,

    /// Upper bound for the whole run
    pub suite_timeout: Option<Duration>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            parallel: 8,
            skip_delete: false,
            namespace: "default".to_string(),
            kubeconfig: None,
            suite_timeout: None,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `SEPPO_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("SEPPO_TIMEOUT") {
            let seconds: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::new("SEPPO_TIMEOUT", &value, "expected seconds"))?;
            config.timeout = Duration::from_secs(seconds);
        }

        if let Some(value) = lookup("SEPPO_PARALLEL") {
            config.parallel = match value.trim().parse() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::new(
                        "SEPPO_PARALLEL",
                        &value,
                        "expected a positive integer",
                    ))
                }
            };
        }

        if let Some(value) = lookup("SEPPO_SKIP_DELETE") {
            config.skip_delete = parse_bool(&value)
                .ok_or_else(|| ConfigError::new("SEPPO_SKIP_DELETE", &value, "expected a boolean"))?;
        }

        if let Some(value) = lookup("SEPPO_NAMESPACE").filter(|v| !v.is_empty()) {
            config.namespace = value;
        }

        if let Some(value) = lookup("SEPPO_KUBECONFIG").filter(|v| !v.is_empty()) {
            config.kubeconfig = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// Set the default step timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many test cases run at once
    #[must_use]
    pub fn parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn skip_delete(mut self, skip: bool) -> Self {
        self.skip_delete = skip;
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Bound the whole run
    #[must_use]
    pub fn suite_timeout(mut self, timeout: Duration) -> Self {
        self.suite_timeout = Some(timeout);
        self
    }

    /// A context for these settings
    pub fn context(
        &self,
        client: Arc<dyn ResourceClient>,
        runner: Arc<dyn CommandRunner>,
    ) -> Context {
        let ctx = Context::new(client, runner, self.namespace.clone())
            .skip_delete(self.skip_delete)
            .default_timeout(self.timeout);
        match &self.kubeconfig {
            Some(path) => ctx.kubeconfig(path.clone()),
            None => ctx,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::command::ShellRunner;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::new();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.parallel, 8);
        assert!(!config.skip_delete);
        assert_eq!(config.namespace, "default");
        assert!(config.kubeconfig.is_none());
        assert!(config.suite_timeout.is_none());
    }

    #[test]
    fn test_from_lookup_overlays() {
        let config = HarnessConfig::from_lookup(lookup(&[
            ("SEPPO_TIMEOUT", "90"),
            ("SEPPO_PARALLEL", "2"),
            ("SEPPO_SKIP_DELETE", "yes"),
            ("SEPPO_NAMESPACE", "e2e"),
            ("SEPPO_KUBECONFIG", "/tmp/kubeconfig"),
        ]))
        .unwrap();

        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.parallel, 2);
        assert!(config.skip_delete);
        assert_eq!(config.namespace, "e2e");
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = HarnessConfig::from_lookup(lookup(&[("SEPPO_TIMEOUT", "soon")])).unwrap_err();
        assert_eq!(err.var, "SEPPO_TIMEOUT");

        let err = HarnessConfig::from_lookup(lookup(&[("SEPPO_PARALLEL", "0")])).unwrap_err();
        assert_eq!(err.var, "SEPPO_PARALLEL");

        let err = HarnessConfig::from_lookup(lookup(&[("SEPPO_SKIP_DELETE", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("SEPPO_SKIP_DELETE"));
    }

    #[test]
    fn test_context_carries_settings() {
        let config = HarnessConfig::new()
            .namespace("e2e")
            .timeout(Duration::from_secs(7));
        let ctx = config.context(Arc::new(MemoryClient::new()), Arc::new(ShellRunner::new()));
        assert_eq!(ctx.namespace, "e2e");
        assert_eq!(
            ctx.step_timeout(&crate::step::Step::new(0, "a")),
            Duration::from_secs(7)
        );
    }
}
