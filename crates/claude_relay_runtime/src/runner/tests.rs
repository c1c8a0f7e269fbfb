use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use super::*;

const INIT_S1: &str = r#"{"type":"system","subtype":"init","session_id":"s1"}"#;

fn fake_cli(script: &str) -> RunnerConfig {
    RunnerConfig::new()
        .with_cli_bin("sh")
        .with_cli_prefix_args(["-c", script, "claude"])
}

fn runner(script: &str) -> ClaudeRunner {
    ClaudeRunner::new(fake_cli(script)).expect("runner")
}

/// Script echoing its argv back as the final result.
const ECHO_ARGS: &str = r#"
printf '%s\n' '{"type":"system","subtype":"init","session_id":"s1"}'
printf '{"type":"result","result":"%s"}\n' "$*"
"#;

async fn wait_first_chunk(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("chunk timeout")
        .expect("chunk channel closed")
}

#[test]
fn cli_args_pass_config_through_unmodified() {
    let config = RunnerConfig::new()
        .with_model("opus")
        .with_permission_mode("bypassPermissions")
        .with_max_turns(3);
    assert_eq!(
        build_cli_args(&config, "fix the build", Some("sess_9")),
        vec![
            "-p",
            "fix the build",
            "--output-format",
            "stream-json",
            "--verbose",
            "--model",
            "opus",
            "--permission-mode",
            "bypassPermissions",
            "--max-turns",
            "3",
            "--resume",
            "sess_9",
        ]
    );
    assert!(!build_cli_args(&config, "x", None).contains(&"--resume".to_owned()));
}

#[test]
fn new_rejects_invalid_config() {
    let err = match ClaudeRunner::new(RunnerConfig::new().with_max_turns(0)) {
        Ok(_) => panic!("must reject zero max_turns"),
        Err(err) => err,
    };
    assert!(matches!(err, RunnerError::InvalidConfig(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn end_to_end_run_accumulates_text_and_records_session() {
    let script = r#"
printf '%s\n' '{"type":"system","subtype":"init","session_id":"s1"}'
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}'
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":", world"}]}}'
"#;
    let runner = runner(script);
    let mut chunks = Vec::new();
    let text = runner
        .run_prompt(PromptRequest::new("thr", "hi"), |text: &str| {
            chunks.push(text.to_owned())
        })
        .await
        .expect("run");

    assert_eq!(text, "Hello, world");
    assert_eq!(chunks, vec!["Hello".to_owned(), "Hello, world".to_owned()]);
    assert_eq!(runner.session_for("thr").as_deref(), Some("s1"));
    assert_eq!(runner.session_count(), 1);
    assert_eq!(runner.running_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn text_blocks_win_over_result_payload() {
    let script = r#"
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"streamed"}]}}'
printf '%s\n' '{"type":"result","result":"summary","session_id":"s_result"}'
"#;
    let runner = runner(script);
    let text = runner.run_prompt_simple("thr", "hi").await.expect("run");
    assert_eq!(text, "streamed");
    assert_eq!(runner.session_for("thr").as_deref(), Some("s_result"));
}

#[tokio::test(flavor = "current_thread")]
async fn result_payload_is_used_when_no_text_streamed() {
    let script = r#"
printf '%s\n' 'warming up...' '{"type":"result","result":"only result"}'
"#;
    let text = runner(script)
        .run_prompt_simple("thr", "hi")
        .await
        .expect("run");
    assert_eq!(text, "only result");
}

#[tokio::test(flavor = "current_thread")]
async fn clean_exit_without_text_yields_placeholder() {
    let text = runner("printf '%s\\n' 'not json'")
        .run_prompt_simple("thr", "hi")
        .await
        .expect("run");
    assert_eq!(text, NO_OUTPUT_PLACEHOLDER);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_exit_without_text_rejects_but_keeps_session() {
    let script = format!("printf '%s\\n' '{INIT_S1}'; echo 'fatal: quota exceeded' >&2; exit 3");
    let runner = runner(&script);
    let err = runner
        .run_prompt_simple("thr", "hi")
        .await
        .expect_err("non-zero exit with no text");

    assert_eq!(
        err,
        RunnerError::AbnormalExit {
            code: Some(3),
            stderr: "fatal: quota exceeded\n".to_owned(),
        }
    );
    assert_eq!(runner.session_for("thr").as_deref(), Some("s1"));
    assert_eq!(runner.running_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_exit_stderr_excerpt_is_bounded() {
    let script = r#"i=0; while [ "$i" -lt 200 ]; do printf 'xxxxxxxxxx' >&2; i=$((i+1)); done; exit 1"#;
    let err = runner(script)
        .run_prompt_simple("thr", "hi")
        .await
        .expect_err("must fail");
    let RunnerError::AbnormalExit { code, stderr } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(code, Some(1));
    assert_eq!(stderr.chars().count(), STDERR_EXCERPT_CHARS);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_exit_with_text_resolves_with_text() {
    let script = r#"
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}'
exit 1
"#;
    let text = runner(script)
        .run_prompt_simple("thr", "hi")
        .await
        .expect("text wins over exit code");
    assert_eq!(text, "partial");
}

#[tokio::test(flavor = "current_thread")]
async fn second_run_resumes_recorded_session() {
    let runner = runner(ECHO_ARGS);
    let first = runner.run_prompt_simple("thr", "hi").await.expect("first");
    assert!(!first.contains("--resume"), "first run args: {first}");

    let second = runner.run_prompt_simple("thr", "again").await.expect("second");
    assert!(second.ends_with("--resume s1"), "second run args: {second}");

    let other = runner.run_prompt_simple("other", "hi").await.expect("other");
    assert!(!other.contains("--resume"), "other thread args: {other}");
}

#[tokio::test(flavor = "current_thread")]
async fn env_overrides_reach_the_child() {
    let script = r#"printf '{"type":"result","result":"%s"}\n' "$RELAY_TEST_VALUE""#;
    let runner =
        ClaudeRunner::new(fake_cli(script).with_env("RELAY_TEST_VALUE", "from-config"))
            .expect("runner");
    let text = runner.run_prompt_simple("thr", "hi").await.expect("run");
    assert_eq!(text, "from-config");
}

#[tokio::test(flavor = "current_thread")]
async fn spawn_failure_rejects_without_bookkeeping() {
    let runner = ClaudeRunner::new(
        RunnerConfig::new().with_cli_bin("/nonexistent/claude-relay-test-bin"),
    )
    .expect("runner");
    let err = runner
        .run_prompt_simple("thr", "hi")
        .await
        .expect_err("spawn must fail");
    assert!(matches!(err, RunnerError::Spawn(_)), "got {err:?}");
    assert_eq!(runner.running_count(), 0);
    assert_eq!(runner.session_count(), 0);
}

const LONG_RUN: &str = r#"
printf '%s\n' '{"type":"system","subtype":"init","session_id":"s_long"}'
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}'
exec sleep 30
"#;

/// Long run for the prompt "long task", argv echo for anything else.
const LONG_OR_ECHO: &str = r#"
if [ "$2" = "long task" ]; then
  printf '%s\n' '{"type":"system","subtype":"init","session_id":"s_long"}'
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}'
  exec sleep 30
fi
printf '%s\n' '{"type":"system","subtype":"init","session_id":"s1"}'
printf '{"type":"result","result":"%s"}\n' "$*"
"#;

fn spawn_run(
    runner: &ClaudeRunner,
    thread_id: &str,
) -> (
    tokio::task::JoinHandle<Result<String, RunnerError>>,
    mpsc::UnboundedReceiver<String>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = runner.clone();
    let request = PromptRequest::new(thread_id, "long task");
    let task = tokio::spawn(async move {
        runner
            .run_prompt(request, move |text: &str| {
                let _ = tx.send(text.to_owned());
            })
            .await
    });
    (task, rx)
}

#[tokio::test(flavor = "current_thread")]
async fn abort_interrupts_and_resolves_with_partial_text() {
    let runner = runner(LONG_RUN);
    assert!(!runner.abort("thr"), "nothing registered yet");

    let (task, mut rx) = spawn_run(&runner, "thr");
    assert_eq!(wait_first_chunk(&mut rx).await, "partial");
    assert!(runner.is_running("thr"));

    assert!(runner.abort("thr"));
    assert!(!runner.abort("thr"));

    let text = timeout(Duration::from_secs(35), task)
        .await
        .expect("run must finish after abort")
        .expect("join")
        .expect("partial text resolves");
    assert_eq!(text, "partial");
    assert_eq!(runner.session_for("thr").as_deref(), Some("s_long"));
    assert_eq!(runner.running_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_run_for_same_thread_is_rejected() {
    let runner = runner(LONG_RUN);
    let (task, mut rx) = spawn_run(&runner, "thr");
    wait_first_chunk(&mut rx).await;

    let err = runner
        .run_prompt_simple("thr", "overlap")
        .await
        .expect_err("thread is busy");
    assert_eq!(err, RunnerError::ThreadBusy("thr".to_owned()));
    assert_eq!(runner.running_count(), 1);

    assert!(runner.abort("thr"));
    let _ = timeout(Duration::from_secs(35), task).await.expect("finish");
}

#[tokio::test(flavor = "current_thread")]
async fn clear_session_aborts_run_and_next_run_starts_fresh() {
    let runner = runner(LONG_OR_ECHO);
    runner.run_prompt_simple("thr", "hi").await.expect("seed run");
    assert_eq!(runner.session_for("thr").as_deref(), Some("s1"));

    let (task, mut rx) = spawn_run(&runner, "thr");
    wait_first_chunk(&mut rx).await;

    assert!(runner.clear_session("thr"));
    assert!(!runner.is_running("thr"));
    assert_eq!(runner.session_for("thr"), None);

    let _ = timeout(Duration::from_secs(35), task).await.expect("finish");
    assert_eq!(
        runner.session_for("thr"),
        None,
        "reset run must not record its session"
    );

    let args = runner.run_prompt_simple("thr", "fresh").await.expect("fresh run");
    assert!(!args.contains("--resume"), "fresh run args: {args}");
    assert!(!runner.clear_session("unknown"));
}

#[tokio::test(flavor = "current_thread")]
async fn abort_all_interrupts_every_thread() {
    let runner = runner(LONG_RUN);
    let (first, mut first_rx) = spawn_run(&runner, "a");
    let (second, mut second_rx) = spawn_run(&runner, "b");
    wait_first_chunk(&mut first_rx).await;
    wait_first_chunk(&mut second_rx).await;
    assert_eq!(runner.running_count(), 2);

    assert_eq!(runner.abort_all(), 2);
    assert_eq!(runner.running_count(), 0);
    for task in [first, second] {
        let text = timeout(Duration::from_secs(35), task)
            .await
            .expect("finish")
            .expect("join")
            .expect("partial");
        assert_eq!(text, "partial");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn cancelled_run_releases_thread() {
    let runner = runner(LONG_OR_ECHO);
    let cancelled = timeout(
        Duration::from_millis(500),
        runner.run_prompt_simple("thr", "long task"),
    )
    .await;
    assert!(cancelled.is_err(), "long run must still be in flight");

    assert_eq!(runner.running_count(), 0);
    assert!(!runner.is_running("thr"));
    assert!(!runner.abort("thr"));

    let args = runner
        .run_prompt_simple("thr", "next")
        .await
        .expect("thread is free after cancellation");
    assert!(args.starts_with("-p next"), "next run args: {args}");
}

#[tokio::test(flavor = "current_thread")]
async fn exited_child_is_untracked_while_grandchild_holds_stderr() {
    let script = r#"
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"done"}]}}'
(sleep 5 >/dev/null &)
exit 0
"#;
    let runner = runner(script);
    let (task, mut rx) = spawn_run(&runner, "thr");
    assert_eq!(wait_first_chunk(&mut rx).await, "done");

    timeout(Duration::from_secs(3), async {
        while runner.is_running("thr") {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("entry must be released once the child is reaped");
    assert!(!task.is_finished(), "stderr is still held open");
    assert!(!runner.abort("thr"), "a reaped child must not be signalled");

    let text = timeout(Duration::from_secs(10), task)
        .await
        .expect("finish")
        .expect("join")
        .expect("run");
    assert_eq!(text, "done");
}
