//! `TestStep` and `TestAssert` configuration documents

use crate::collector::Collector;
use crate::command::{AssertCommand, Command};
use crate::resource::ResourceRef;
use crate::strategy::AssertOptions;
use serde::{Deserialize, Serialize};

/// Kind of the step configuration document
pub const TEST_STEP_KIND: &str = "TestStep";

/// Kind of the assertion configuration document
pub const TEST_ASSERT_KIND: &str = "TestAssert";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// A file of objects to apply, given as a path or as `{file, shouldFail}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ApplyFileRepr")]
#[serde(rename_all = "camelCase")]
pub struct ApplyFile {
    pub file: String,
    pub should_fail: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApplyFileRepr {
    Path(String),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(default)]
        file: String,
        #[serde(default)]
        should_fail: bool,
    },
}

impl From<ApplyFileRepr> for ApplyFile {
    fn from(value: ApplyFileRepr) -> Self {
        match value {
            ApplyFileRepr::Path(file) => Self {
                file,
                should_fail: false,
            },
            ApplyFileRepr::Full { file, should_fail } => Self { file, should_fail },
        }
    }
}

/// A file of assertions, given as a path or as `{file, options}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "AssertFileRepr")]
pub struct AssertFile {
    pub file: String,
    pub options: Option<AssertOptions>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssertFileRepr {
    Path(String),
    Full {
        #[serde(default)]
        file: String,
        #[serde(default)]
        options: Option<AssertOptions>,
    },
}

impl From<AssertFileRepr> for AssertFile {
    fn from(value: AssertFileRepr) -> Self {
        match value {
            AssertFileRepr::Path(file) => Self {
                file,
                options: None,
            },
            AssertFileRepr::Full { file, options } => Self { file, options },
        }
    }
}

/// Settings for a step, declared next to the objects it applies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestStepConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: ConfigMetadata,
    /// Must agree with the index the step was loaded under, when given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    /// Extra files or directories of objects to apply, relative to the step
    pub apply: Vec<ApplyFile>,
    /// Extra files or directories of assertions
    pub assert: Vec<AssertFile>,
    /// Extra files or directories of error assertions
    pub error: Vec<String>,
    /// Objects to delete before the step runs
    pub delete: Vec<ResourceRef>,
    /// Setup commands
    pub commands: Vec<Command>,
    /// Kubeconfig for the step, relative to the step directory
    pub kubeconfig: String,
}

/// Settings for a step's assertions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestAssertConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: ConfigMetadata,
    /// Step timeout override in seconds, 0 to keep the default
    pub timeout: u64,
    /// Diagnostics run when the assertions fail
    pub collectors: Vec<Collector>,
    /// Commands that must succeed
    pub commands: Vec<AssertCommand>,
}
