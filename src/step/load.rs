//! Building steps from loaded documents

use super::config::{TestAssertConfig, TestStepConfig, TEST_ASSERT_KIND, TEST_STEP_KIND};
use super::{ApplyItem, AssertItem, ErrorItem, Step};
use crate::command::Command;
use crate::error::StepError;
use crate::resource::Node;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Errors reading object files
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Reads object documents from a path
pub trait ObjectLoader: Send + Sync {
    /// Whether `path` exists
    fn exists(&self, path: &Path) -> bool;

    /// Every document under `path` (a file, or a directory of files)
    fn load(&self, path: &Path) -> Result<Vec<Node>, LoadError>;
}

/// Loads multi-document YAML files, or every `*.yaml` file of a directory
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlLoader;

impl YamlLoader {
    fn parse(path: &Path, text: &str) -> Result<Vec<Node>, LoadError> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document).map_err(|source| {
                LoadError::Yaml {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            if value.is_null() {
                continue;
            }
            let node = serde_json::to_value(&value).map_err(|e| LoadError::Invalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            objects.push(node);
        }
        Ok(objects)
    }

    fn files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        files.sort();
        Ok(files)
    }
}

impl ObjectLoader for YamlLoader {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn load(&self, path: &Path) -> Result<Vec<Node>, LoadError> {
        let files = if path.is_dir() {
            Self::files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let mut objects = Vec::new();
        for file in files {
            let text = std::fs::read_to_string(&file).map_err(|source| LoadError::Io {
                path: file.clone(),
                source,
            })?;
            objects.extend(Self::parse(&file, &text)?);
        }
        debug!(path = %path.display(), count = objects.len(), "Loaded objects");
        Ok(objects)
    }
}

/// Which role a document plays in its step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Apply,
    Assert,
    Error,
}

/// A document already classified by the loader
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub bucket: Bucket,
    pub object: Node,
}

impl Document {
    pub fn new(bucket: Bucket, object: Node) -> Self {
        Self { bucket, object }
    }

    fn kind(&self) -> &str {
        self.object.get("kind").and_then(Node::as_str).unwrap_or("")
    }
}

/// Expand `$VAR` and `${VAR}` from the process environment
fn expand_env(input: &str) -> String {
    static VAR: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = VAR
        .get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").ok())
        .as_ref()
    else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_default()
    })
    .into_owned()
}

/// `path` as is when absolute, else relative to `dir`
fn resolve_path(path: &str, dir: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(expand_env(path));
    match dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

fn invalid(message: impl Into<String>) -> StepError {
    StepError::Validation(message.into())
}

impl Step {
    /// Build a step from classified documents
    ///
    /// A `TestStep` document in the apply bucket and a `TestAssert` document in
    /// the assert bucket configure the step instead of being applied. Files
    /// the `TestStep` references are checked before any is loaded.
    pub fn from_documents(
        index: i64,
        name: impl Into<String>,
        dir: Option<PathBuf>,
        documents: Vec<Document>,
        loader: &dyn ObjectLoader,
    ) -> Result<Self, StepError> {
        let mut step = Step::new(index, name);
        step.dir = dir;
        let mut step_config: Option<TestStepConfig> = None;

        for document in documents {
            let kind = document.kind().to_string();
            match (document.bucket, kind.as_str()) {
                (Bucket::Apply, TEST_STEP_KIND) => {
                    if step_config.is_some() {
                        return Err(invalid(format!(
                            "more than 1 TestStep not allowed in step {:?}",
                            step.name
                        )));
                    }
                    let config: TestStepConfig = serde_json::from_value(document.object)
                        .map_err(|e| invalid(format!("failed to load TestStep object: {e}")))?;
                    step_config = Some(config);
                }
                (Bucket::Assert, TEST_ASSERT_KIND) => {
                    let config: TestAssertConfig = serde_json::from_value(document.object)
                        .map_err(|e| invalid(format!("failed to load TestAssert object: {e}")))?;
                    step.configure_assert(config);
                }
                (bucket, kind @ (TEST_STEP_KIND | TEST_ASSERT_KIND)) => {
                    return Err(invalid(format!(
                        "{kind} is not allowed in the {bucket:?} documents of step {:?}",
                        step.name
                    )));
                }
                (Bucket::Apply, _) => step = step.apply(document.object),
                (Bucket::Assert, _) => step = step.assert(document.object),
                (Bucket::Error, _) => step = step.error(document.object),
            }
        }

        if let Some(config) = step_config {
            step.configure_step(config, loader)?;
        }
        Ok(step)
    }

    fn configure_assert(&mut self, config: TestAssertConfig) {
        if config.timeout > 0 {
            self.assert_timeout = Some(Duration::from_secs(config.timeout));
        }
        self.collectors = config.collectors;
        self.assert_commands = config.commands.into_iter().map(Command::from).collect();
    }

    fn configure_step(
        &mut self,
        config: TestStepConfig,
        loader: &dyn ObjectLoader,
    ) -> Result<(), StepError> {
        if let Some(index) = config.index.filter(|index| *index != self.index) {
            return Err(invalid(format!(
                "TestStep index {index} does not match step index {} of {:?}",
                self.index, self.name
            )));
        }

        let dir = self.dir.clone();
        let dir = dir.as_deref();

        let referenced = config
            .apply
            .iter()
            .map(|a| ("Apply", a.file.as_str()))
            .chain(config.assert.iter().map(|a| ("Assert", a.file.as_str())))
            .chain(config.error.iter().map(|e| ("Error", e.as_str())));
        for (section, file) in referenced {
            let path = resolve_path(file, dir);
            if !loader.exists(&path) {
                return Err(invalid(format!(
                    "referenced file in {section} does not exist: {}",
                    path.display()
                )));
            }
        }

        if !config.metadata.name.is_empty() {
            self.name = config.metadata.name;
        }
        if !config.kubeconfig.is_empty() {
            self.kubeconfig = Some(resolve_path(&config.kubeconfig, dir));
        }
        self.delete = config.delete;
        self.commands = config.commands;

        let load = |file: &str, section: &str| {
            let path = resolve_path(file, dir);
            loader
                .load(&path)
                .map_err(|e| invalid(format!("step {section} path {}: {e}", path.display())))
        };

        for apply in &config.apply {
            for object in load(&apply.file, "apply")? {
                self.apply.push(ApplyItem {
                    object,
                    should_fail: apply.should_fail,
                    action: None,
                });
            }
        }
        for assert in &config.assert {
            let options = assert.options.clone().unwrap_or_default();
            for object in load(&assert.file, "assert")? {
                self.asserts.push(AssertItem {
                    object,
                    options: options.clone(),
                });
            }
        }
        for error in &config.error {
            for object in load(error, "error")? {
                self.errors.push(ErrorItem { object });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_yaml_loader_multi_document() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pods.yaml",
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\n---\n---\napiVersion: v1\nkind: Pod\nmetadata:\n  name: b\n",
        );

        let objects = YamlLoader.load(&dir.path().join("pods.yaml")).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1]["metadata"]["name"], "b");
    }

    #[test]
    fn test_yaml_loader_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.yaml", "kind: Service\n");
        write(dir.path(), "a.yaml", "kind: Pod\n");
        write(dir.path(), "notes.txt", "ignored");

        let objects = YamlLoader.load(dir.path()).unwrap();
        let kinds: Vec<_> = objects.iter().map(|o| o["kind"].clone()).collect();
        assert_eq!(kinds, vec![json!("Pod"), json!("Service")]);
    }

    #[test]
    fn test_yaml_loader_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.yaml", "kind: [unterminated\n");

        assert!(matches!(
            YamlLoader.load(&dir.path().join("broken.yaml")),
            Err(LoadError::Yaml { .. })
        ));
        assert!(matches!(
            YamlLoader.load(&dir.path().join("missing.yaml")),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn test_documents_are_bucketed() {
        let docs = vec![
            Document::new(Bucket::Apply, json!({ "kind": "Pod", "metadata": { "name": "a" } })),
            Document::new(Bucket::Assert, json!({ "kind": "Pod", "status": { "phase": "Ready" } })),
            Document::new(Bucket::Error, json!({ "kind": "Pod", "status": { "phase": "Failed" } })),
            Document::new(
                Bucket::Assert,
                json!({
                    "kind": "TestAssert",
                    "timeout": 5,
                    "commands": [{ "command": "true" }],
                    "collectors": [{ "pod": "a" }]
                }),
            ),
        ];

        let step = Step::from_documents(1, "create", None, docs, &YamlLoader).unwrap();
        assert_eq!(step.apply.len(), 1);
        assert_eq!(step.asserts.len(), 1);
        assert_eq!(step.errors.len(), 1);
        assert_eq!(step.timeout(), Duration::from_secs(5));
        assert_eq!(step.assert_commands[0].command, "true");
        assert_eq!(step.collectors.len(), 1);
    }

    #[test]
    fn test_test_step_loads_referenced_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pod.yaml", "apiVersion: v1\nkind: Pod\nmetadata:\n  name: extra\n");
        write(dir.path(), "assert.yaml", "apiVersion: v1\nkind: Pod\nmetadata:\n  name: extra\n");
        write(dir.path(), "errors.yaml", "apiVersion: v1\nkind: Pod\nmetadata:\n  name: bad\n");

        let docs = vec![Document::new(
            Bucket::Apply,
            json!({
                "kind": "TestStep",
                "metadata": { "name": "renamed" },
                "apply": [{ "file": "pod.yaml", "shouldFail": true }],
                "assert": [{
                    "file": "assert.yaml",
                    "options": { "arrays": [{ "path": "/spec/containers", "strategy": "Anywhere" }] }
                }],
                "error": ["errors.yaml"],
                "delete": [{ "apiVersion": "v1", "kind": "Pod", "name": "old" }],
                "commands": [{ "command": "echo hi" }],
                "kubeconfig": "kubeconfig.yaml"
            }),
        )];

        let step = Step::from_documents(
            0,
            "original",
            Some(dir.path().to_path_buf()),
            docs,
            &YamlLoader,
        )
        .unwrap();

        assert_eq!(step.name, "renamed");
        assert_eq!(step.apply.len(), 1);
        assert!(step.apply[0].should_fail);
        assert_eq!(step.asserts[0].options.arrays.len(), 1);
        assert_eq!(step.errors.len(), 1);
        assert_eq!(step.delete[0].name, "old");
        assert_eq!(step.commands.len(), 1);
        assert_eq!(step.kubeconfig, Some(dir.path().join("kubeconfig.yaml")));
    }

    #[test]
    fn test_missing_referenced_file_is_rejected_eagerly() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![Document::new(
            Bucket::Apply,
            json!({ "kind": "TestStep", "assert": ["nope.yaml"] }),
        )];

        let err = Step::from_documents(0, "s", Some(dir.path().to_path_buf()), docs, &YamlLoader)
            .unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
        assert!(err
            .to_string()
            .contains("referenced file in Assert does not exist"));
    }

    #[test]
    fn test_test_step_index_must_match() {
        let docs = vec![Document::new(
            Bucket::Apply,
            json!({ "kind": "TestStep", "index": 3 }),
        )];
        assert!(Step::from_documents(3, "s", None, docs, &YamlLoader).is_ok());

        let docs = vec![Document::new(
            Bucket::Apply,
            json!({ "kind": "TestStep", "index": 2, "unitTest": true }),
        )];
        let err = Step::from_documents(3, "s", None, docs, &YamlLoader).unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
        assert!(err.to_string().contains("TestStep index 2 does not match step index 3"));
    }

    #[test]
    fn test_only_one_test_step() {
        let docs = vec![
            Document::new(Bucket::Apply, json!({ "kind": "TestStep" })),
            Document::new(Bucket::Apply, json!({ "kind": "TestStep" })),
        ];
        let err = Step::from_documents(0, "s", None, docs, &YamlLoader).unwrap_err();
        assert!(err.to_string().contains("more than 1 TestStep"));
    }

    #[test]
    fn test_config_kind_in_wrong_bucket() {
        let docs = vec![Document::new(Bucket::Error, json!({ "kind": "TestAssert" }))];
        assert!(Step::from_documents(0, "s", None, docs, &YamlLoader).is_err());
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("SEPPO_HARNESS_TEST_DIR", "fixtures");
        assert_eq!(expand_env("$SEPPO_HARNESS_TEST_DIR/a.yaml"), "fixtures/a.yaml");
        assert_eq!(expand_env("${SEPPO_HARNESS_TEST_DIR}/b.yaml"), "fixtures/b.yaml");
        assert_eq!(expand_env("plain.yaml"), "plain.yaml");
    }

    #[test]
    fn test_resolve_path() {
        let dir = Path::new("/tests/step");
        assert_eq!(resolve_path("a.yaml", Some(dir)), PathBuf::from("/tests/step/a.yaml"));
        assert_eq!(resolve_path("/abs/a.yaml", Some(dir)), PathBuf::from("/abs/a.yaml"));
        assert_eq!(resolve_path("a.yaml", None), PathBuf::from("a.yaml"));
    }
}
