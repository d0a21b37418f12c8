//! End-to-end step runs against the in-memory store
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use async_trait::async_trait;
use common::{context, pod, pod_with_phase, ready_assert, RecordingRunner, NAMESPACE};
use seppo_harness::command::Command;
use seppo_harness::step::{Bucket, Document, YamlLoader};
use seppo_harness::{
    ApplyAction, Cleanups, ClientError, Collector, Context, ExpectedOutput, MatchType,
    MemoryClient, Node, ResourceClient, ResourceRef, Step, StepError, TestCase,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn hello_ref() -> ResourceRef {
    ResourceRef::new("v1", "Pod").name("hello").namespace(NAMESPACE)
}

#[tokio::test]
async fn test_becomes_ready_while_polling() {
    let client = MemoryClient::new();
    let ctx = context(&client, &RecordingRunner::new());

    let mut step = Step::new(0, "ready")
        .apply(pod("hello"))
        .assert(ready_assert("hello"))
        .with_timeout(Duration::from_secs(10));

    // Plays the controller: flips the phase once the pod exists
    let controller = {
        let client = client.clone();
        tokio::spawn(async move {
            loop {
                if let Ok(mut live) = client.get(&hello_ref()).await {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    live["status"] = json!({ "phase": "Ready" });
                    client.insert(live).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    let mut cleanups = Cleanups::new();
    let errors = ctx.run_step(&mut step, &mut cleanups).await;
    controller.await.unwrap();

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(step.apply[0].action, Some(ApplyAction::Created));
    assert_eq!(cleanups.len(), 1);
}

#[tokio::test]
async fn test_never_ready_fails_after_timeout() {
    let client = MemoryClient::new();
    let ctx = context(&client, &RecordingRunner::new());

    let mut step = Step::new(0, "ready")
        .apply(pod("hello"))
        .assert(ready_assert("hello"))
        .with_timeout(Duration::from_secs(2));

    let start = Instant::now();
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        StepError::Mismatch { source, .. } => assert_eq!(source.path_string(), "/status/phase"),
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_apply_twice_creates_then_updates() {
    let client = MemoryClient::new();
    let ctx = context(&client, &RecordingRunner::new());
    let mut cleanups = Cleanups::new();

    let mut step = Step::new(0, "apply").apply(pod("hello"));
    assert!(ctx.run_step(&mut step, &mut cleanups).await.is_empty());
    assert_eq!(step.apply[0].action, Some(ApplyAction::Created));
    assert!(ctx.run_step(&mut step, &mut cleanups).await.is_empty());
    assert_eq!(step.apply[0].action, Some(ApplyAction::Updated));

    let live = client.get(&hello_ref()).await.unwrap();
    assert_eq!(live["spec"]["containers"][0]["image"], "nginx:1.27");
    assert!(live["metadata"]["resourceVersion"].is_string());
}

#[tokio::test]
async fn test_delete_runs_before_apply() {
    let client = MemoryClient::new();
    client.insert(pod_with_phase("stale", "Running")).unwrap();
    let ctx = context(&client, &RecordingRunner::new());

    let mut step = Step::new(0, "replace")
        .delete(ResourceRef::new("v1", "Pod").name("stale"))
        .apply(pod("hello"))
        .with_timeout(Duration::from_secs(2));
    assert!(ctx.run_step(&mut step, &mut Cleanups::new()).await.is_empty());

    let names: Vec<String> = client
        .objects()
        .iter()
        .map(|o| o["metadata"]["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["hello"]);
}

#[tokio::test]
async fn test_failing_setup_command_aborts_before_apply() {
    let client = MemoryClient::new();
    let runner = RecordingRunner::new().on("prepare", 1, "");
    let ctx = context(&client, &runner);

    let mut step = Step::new(0, "setup")
        .command(Command::new("prepare"))
        .command(Command::new("never-runs"))
        .apply(pod("hello"));
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StepError::Command(_)));
    assert_eq!(runner.lines(), vec!["prepare"]);
    assert!(client.objects().is_empty());
}

#[tokio::test]
async fn test_ignored_setup_failure_continues() {
    let client = MemoryClient::new();
    let runner = RecordingRunner::new().on("prepare", 1, "");
    let ctx = context(&client, &runner);

    let mut step = Step::new(0, "setup")
        .command(Command::new("prepare").ignore_failure())
        .command(Command::new("kubectl get pods").namespaced())
        .apply(pod("hello"));
    assert!(ctx.run_step(&mut step, &mut Cleanups::new()).await.is_empty());

    assert_eq!(
        runner.lines(),
        vec!["prepare", "kubectl get pods --namespace world"]
    );
    assert_eq!(client.objects().len(), 1);
}

#[tokio::test]
async fn test_should_fail_both_ways() {
    let client = MemoryClient::new();
    let ctx = context(&client, &RecordingRunner::new());

    let nameless = json!({ "apiVersion": "v1", "kind": "Pod", "metadata": {} });
    let mut step = Step::new(0, "rejected").apply_should_fail(nameless);
    assert!(ctx.run_step(&mut step, &mut Cleanups::new()).await.is_empty());

    let mut step = Step::new(1, "accepted").apply_should_fail(pod("hello"));
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .to_string()
        .contains("an error was expected but didn't happen"));
}

#[tokio::test]
async fn test_collectors_run_only_on_failure() {
    let client = MemoryClient::new();
    client.insert(pod_with_phase("hello", "Ready")).unwrap();
    let runner = RecordingRunner::new();
    let ctx = context(&client, &runner);

    let mut passing = Step::new(0, "passing")
        .assert(ready_assert("hello"))
        .collector(Collector::pod("hello"));
    assert!(ctx.run_step(&mut passing, &mut Cleanups::new()).await.is_empty());
    assert!(runner.lines().is_empty());

    let mut failing = Step::new(1, "failing")
        .assert(ready_assert("missing"))
        .collector(Collector::pod("missing"))
        .collector(Collector::selector("").container("x"))
        .collector(Collector::events())
        .with_timeout(Duration::from_secs(1));
    assert!(!ctx.run_step(&mut failing, &mut Cleanups::new()).await.is_empty());

    let lines = runner.lines();
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines[0].starts_with("kubectl logs --prefix missing"));
    assert!(lines[0].ends_with("--namespace world"));
    assert!(lines[1].starts_with("kubectl get events"));
}

#[tokio::test]
async fn test_assert_command_output_wildcard() {
    let client = MemoryClient::new();
    let greeting = Command::new("greet")
        .expect_stdout(ExpectedOutput::new(MatchType::Wildcard, "Hello, *!"));

    let runner = RecordingRunner::new().on("greet", 0, "Hello, World!");
    let ctx = context(&client, &runner);
    let mut step = Step::new(0, "greet").assert_command(greeting.clone());
    assert!(ctx.run_step(&mut step, &mut Cleanups::new()).await.is_empty());

    let runner = RecordingRunner::new().on("greet", 0, "Hi, World!");
    let ctx = context(&client, &runner);
    let mut step = Step::new(0, "greet")
        .assert_command(greeting)
        .with_timeout(Duration::from_secs(1));
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("wildcard"));
}

#[tokio::test]
async fn test_error_assertion_reports_matches() {
    let client = MemoryClient::new();
    client.insert(pod_with_phase("a", "Failed")).unwrap();
    client.insert(pod_with_phase("b", "Failed")).unwrap();
    let ctx = context(&client, &RecordingRunner::new());

    let mut step = Step::new(0, "no-failures")
        .error(json!({ "apiVersion": "v1", "kind": "Pod", "status": { "phase": "Failed" } }))
        .with_timeout(Duration::from_secs(1));
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;

    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].to_string(),
        "resource v1, Kind=Pod a and 1 other resources matched error assertion"
    );
}

/// Every read times out, as against an overloaded API server
#[derive(Clone, Default)]
struct Overloaded {
    inner: MemoryClient,
    reads: Arc<AtomicU32>,
}

#[async_trait]
impl ResourceClient for Overloaded {
    async fn get(&self, target: &ResourceRef) -> Result<Node, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Timeout(format!("get {target}")))
    }
    async fn list(&self, target: &ResourceRef) -> Result<Vec<Node>, ClientError> {
        self.inner.list(target).await
    }
    async fn create(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError> {
        self.inner.create(target, obj).await
    }
    async fn update(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError> {
        self.inner.update(target, obj).await
    }
    async fn delete(&self, target: &ResourceRef) -> Result<(), ClientError> {
        self.inner.delete(target).await
    }
    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool, ClientError> {
        self.inner.is_namespaced(api_version, kind).await
    }
}

#[tokio::test]
async fn test_timed_out_read_stops_polling() {
    let client = Overloaded::default();
    let ctx = Context::new(
        Arc::new(client.clone()),
        Arc::new(RecordingRunner::new()),
        NAMESPACE,
    );

    let mut step = Step::new(0, "overloaded")
        .assert(ready_assert("hello"))
        .with_timeout(Duration::from_secs(10));

    let start = Instant::now();
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;

    assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
    assert_eq!(client.reads.load(Ordering::SeqCst), 1);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].is_timeout(), "{errors:?}");
}

#[tokio::test]
async fn test_round_reports_every_failure() {
    let client = MemoryClient::new();
    let runner = RecordingRunner::new().on("check", 3, "");
    let ctx = context(&client, &runner);

    let mut step = Step::new(0, "all")
        .assert(ready_assert("one"))
        .assert(ready_assert("two"))
        .assert_command(Command::new("check"))
        .with_timeout(Duration::from_secs(1));
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;
    assert_eq!(errors.len(), 3, "{errors:?}");
}

#[tokio::test]
async fn test_case_cleans_up_in_reverse() {
    let client = MemoryClient::new();
    let ctx = context(&client, &RecordingRunner::new());

    let mut case = TestCase::new("two-steps")
        .step(Step::new(0, "first").apply(pod("a")))
        .step(Step::new(1, "second").apply(pod("b")).apply(pod("c")));
    let outcome = case.run(&ctx).await;

    assert!(outcome.passed(), "{:?}", outcome.errors);
    assert!(client.objects().is_empty());
}

#[tokio::test]
async fn test_step_loaded_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("extra.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: extra\ndata:\n  key: value\n",
    )
    .unwrap();

    let documents = vec![
        Document::new(
            Bucket::Apply,
            json!({
                "apiVersion": "harness.seppo.dev/v1beta1",
                "kind": "TestStep",
                "metadata": { "name": "loaded" },
                "apply": ["extra.yaml"]
            }),
        ),
        Document::new(
            Bucket::Assert,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": "extra" },
                "data": { "key": "value" }
            }),
        ),
        Document::new(
            Bucket::Assert,
            json!({ "apiVersion": "harness.seppo.dev/v1beta1", "kind": "TestAssert", "timeout": 5 }),
        ),
    ];

    let mut step = Step::from_documents(
        0,
        "from-dir",
        Some(dir.path().to_path_buf()),
        documents,
        &YamlLoader,
    )
    .unwrap();
    assert_eq!(step.name, "loaded");
    assert_eq!(step.timeout(), Duration::from_secs(5));

    let client = MemoryClient::new();
    let ctx = context(&client, &RecordingRunner::new());
    let errors = ctx.run_step(&mut step, &mut Cleanups::new()).await;
    assert!(errors.is_empty(), "{errors:?}");
}

#[test]
fn test_missing_referenced_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let documents = vec![Document::new(
        Bucket::Apply,
        json!({ "apiVersion": "harness.seppo.dev/v1beta1", "kind": "TestStep", "apply": ["nope.yaml"] }),
    )];

    let err = Step::from_documents(0, "bad", Some(dir.path().to_path_buf()), documents, &YamlLoader)
        .unwrap_err();
    assert!(matches!(err, StepError::Validation(_)));
    assert!(err.to_string().contains("does not exist"));
}
