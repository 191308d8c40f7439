//! Sandbox runner tests against a real interpreter (`sh`), no Python needed.

use std::time::Duration;

use execution::protocol::{RESULT_BEGIN, RESULT_END};
use execution::{
    ExecutionStatus, InputArtifact, InterpreterConfig, SandboxConfig, SandboxRunner, StatusCode,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn runner(root: &std::path::Path) -> SandboxRunner {
    SandboxRunner::new(SandboxConfig::new(InterpreterConfig::shell(), root))
}

fn emit(payload: &str) -> String {
    format!("echo '{RESULT_BEGIN}'\necho '{payload}'\necho '{RESULT_END}'\n")
}

fn csv() -> InputArtifact {
    InputArtifact::new("data.csv", b"amount\n10\n20\n30\n".to_vec(), Some("text/csv".into()))
}

const SUM_AMOUNT: &str = r#"total=$(awk -F, 'NR > 1 { s += $1 } END { print s }' data.csv)
echo "summing amount column"
echo '__QUIZ_RESULT_START__'
echo "$total"
echo '__QUIZ_RESULT_END__'
"#;

#[tokio::test]
async fn csv_sum_succeeds_and_removes_workdir() {
    let root = tempfile::tempdir().unwrap();
    let result = runner(root.path())
        .run(SUM_AMOUNT, &[csv()], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.code(), StatusCode::Success);
    assert_eq!(result.value(), Some(&json!(60)));
    assert!(!result.workdir.exists(), "workdir must not outlive run");
    assert!(result.workdir.starts_with(root.path()));
}

#[tokio::test]
async fn last_marker_pair_is_authoritative() {
    let root = tempfile::tempdir().unwrap();
    let program = format!("{}echo debugging\n{}", emit("1"), emit("2"));
    let result = runner(root.path())
        .run(&program, &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.value(), Some(&json!(2)));
}

#[tokio::test]
async fn non_zero_exit_is_runtime_error_with_stderr_preserved() {
    let root = tempfile::tempdir().unwrap();
    let program = format!(
        "{}echo 'ZeroDivisionError: division by zero' >&2\nexit 3\n",
        emit("5")
    );
    let result = runner(root.path())
        .run(&program, &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::RuntimeError { exit_code: Some(3) });
    assert!(result.stderr.contains("ZeroDivisionError: division by zero"));
    assert!(result.value().is_none(), "markers from a failed run are not trusted");
    assert!(!result.workdir.exists());
}

#[tokio::test]
async fn clean_exit_without_markers_is_no_result_marker() {
    let root = tempfile::tempdir().unwrap();
    let result = runner(root.path())
        .run("echo 'the answer is 60'", &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::NoResultMarker);
    assert!(result.stdout.contains("the answer is 60"));
}

#[tokio::test]
async fn sleeping_past_deadline_times_out_without_partial_trust() {
    let root = tempfile::tempdir().unwrap();
    let program = format!("{}sleep 5\n", emit("1"));
    let started = std::time::Instant::now();
    let result = runner(root.path())
        .run(&program, &[], Duration::from_millis(300), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Timeout { cancelled: false });
    assert!(result.value().is_none());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!result.workdir.exists());
}

#[tokio::test]
async fn cancellation_is_a_forced_timeout() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = runner(root.path())
        .run("sleep 5", &[], Duration::from_secs(30), &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Timeout { cancelled: true });
    assert!(!result.workdir.exists());
}

#[tokio::test]
async fn artifacts_are_readable_and_writes_stay_in_workdir() {
    let root = tempfile::tempdir().unwrap();
    let program = r#"head -n 1 data.csv > header.txt
echo '__QUIZ_RESULT_START__'
echo "\"$(cat header.txt)\""
echo '__QUIZ_RESULT_END__'
"#;
    let result = runner(root.path())
        .run(program, &[csv()], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.value(), Some(&json!("amount")));
    // Nothing but removed workdirs under the root.
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn output_file_is_read_back_as_data_uri() {
    let root = tempfile::tempdir().unwrap();
    let program = format!("printf 'col\\n1\\n' > output.csv\n{}", emit("null"));
    let result = runner(root.path())
        .run(&program, &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    let output = result.output.as_ref().expect("output.csv captured");
    assert_eq!(output.file_name, "output.csv");
    assert_eq!(output.media_type, "text/csv");
    assert_eq!(output.data_uri, "data:text/csv;base64,Y29sCjEK");
    assert_eq!(result.value(), Some(&json!(null)));
}

#[tokio::test]
async fn same_program_twice_yields_same_status_and_value() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());
    let cancel = CancellationToken::new();

    let first = runner
        .run(SUM_AMOUNT, &[csv()], Duration::from_secs(10), &cancel)
        .await
        .unwrap();
    let second = runner
        .run(SUM_AMOUNT, &[csv()], Duration::from_secs(10), &cancel)
        .await
        .unwrap();

    assert_eq!(first.status, second.status);
    assert_ne!(first.workdir, second.workdir, "workdirs are never reused");
}

#[tokio::test]
async fn concurrent_runs_do_not_see_each_others_files() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());
    let cancel = CancellationToken::new();

    let a = InputArtifact::new("data.csv", b"a\n1\n".to_vec(), None);
    let b = InputArtifact::new("other.csv", b"b\n2\n".to_vec(), None);
    let script = format!(
        "if [ -e data.csv ] && [ -e other.csv ]; then n=2; else n=1; fi\nsleep 0.2\n{}",
        "echo '__QUIZ_RESULT_START__'\necho \"$n\"\necho '__QUIZ_RESULT_END__'\n"
    );

    let (ra, rb) = tokio::join!(
        runner.run(&script, std::slice::from_ref(&a), Duration::from_secs(10), &cancel),
        runner.run(&script, std::slice::from_ref(&b), Duration::from_secs(10), &cancel),
    );
    assert_eq!(ra.unwrap().value(), Some(&json!(1)));
    assert_eq!(rb.unwrap().value(), Some(&json!(1)));
}

#[tokio::test]
async fn environment_is_rebuilt_around_workdir() {
    let root = tempfile::tempdir().unwrap();
    std::env::set_var("QUIZ_TEST_LEAK", "secret");
    let program = "if [ -n \"$QUIZ_TEST_LEAK\" ]; then v=leaked; else v=clean; fi\n\
                   if [ \"$HOME\" = \"$(pwd)\" ]; then h=home; else h=elsewhere; fi\n\
                   echo '__QUIZ_RESULT_START__'\necho \"$v-$h\"\necho '__QUIZ_RESULT_END__'\n";
    let result = runner(root.path())
        .run(program, &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.value(), Some(&json!("clean-home")));
}

#[tokio::test]
async fn timeout_kills_descendants_too() {
    let root = tempfile::tempdir().unwrap();
    let witness = tempfile::tempdir().unwrap();
    let flag = witness.path().join("descendant_ran");
    let program = format!("sh -c 'sleep 1; touch {}'\n", flag.display());

    let result = runner(root.path())
        .run(&program, &[], Duration::from_millis(200), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.code(), StatusCode::Timeout);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!flag.exists(), "a process started by the program outlived the run");
}

#[tokio::test]
async fn dropping_the_run_kills_descendants() {
    let root = tempfile::tempdir().unwrap();
    let witness = tempfile::tempdir().unwrap();
    let flag = witness.path().join("descendant_ran");
    let program = format!("sh -c 'sleep 1; touch {}'\n", flag.display());

    let runner = runner(root.path());
    let cancel = CancellationToken::new();
    let dropped = tokio::time::timeout(
        Duration::from_millis(200),
        runner.run(&program, &[], Duration::from_secs(30), &cancel),
    )
    .await;
    assert!(dropped.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!flag.exists());
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn background_child_holding_stdout_does_not_hide_the_result() {
    let root = tempfile::tempdir().unwrap();
    let witness = tempfile::tempdir().unwrap();
    let flag = witness.path().join("background_ran");
    let program = format!(
        "(sleep 1; touch {}) &\n{}exit 0\n",
        flag.display(),
        emit("60")
    );

    let started = std::time::Instant::now();
    let result = runner(root.path())
        .run(&program, &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.value(), Some(&json!(60)));
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!flag.exists(), "background child survived a clean exit");
}

#[tokio::test]
async fn verbose_output_before_markers_keeps_the_result() {
    let root = tempfile::tempdir().unwrap();
    let mut config = SandboxConfig::new(InterpreterConfig::shell(), root.path());
    config.max_capture_bytes = 4096;
    let program = format!(
        "i=0\n\
         while [ $i -lt 200 ]; do\n\
         echo \"debug line $i: intermediate rows and columns\"\n\
         i=$((i+1))\n\
         done\n{}",
        emit("60")
    );

    let result = SandboxRunner::new(config)
        .run(&program, &[], Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.value(), Some(&json!(60)));
    assert!(result.truncated);
    assert!(result.stdout.len() <= 4096);
    assert!(!result.stdout.contains("debug line 0:"));
}
