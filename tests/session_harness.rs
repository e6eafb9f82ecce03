//! Drives the real session harness against a shell script that speaks the
//! interactive `gatttool` dialect.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use switchbot::{
    DeviceCommandProtocol, ExpectError, ExpectOptions, FakeGattTool, FakeReply, GattClient,
    GattToolClient, GattToolConfig, GattTransport, GatttoolSession, PlugMiniCommand,
    PlugMiniHandler, PlugState, RetryPolicy, SessionError, TargetAddress, send_and_expect,
};

const FAKE_GATTTOOL: &str = r#"
addr=""
while [ $# -gt 0 ]; do
  case "$1" in
    -b) addr="$2"; shift ;;
  esac
  shift
done
prompt="[$addr][LE]>"
printf '\033[0;94m%s\033[0m ' "$prompt"
while read -r line; do
  case "$line" in
    connect)
      printf 'Attempting to connect to %s\n\033[K\033[1;32mConnection successful\033[0m\n%s ' "$addr" "$prompt" ;;
    characteristics)
      printf 'handle: 0x0002, char properties: 0x02, char value handle: 0x0003, uuid: 00002a00-0000-1000-8000-00805f9b34fb\n'
      printf 'handle: 0x0015, char properties: 0x18, char value handle: 0x0016, uuid: cba20002-224d-11e6-9fb8-0002a5d5c51b\n%s ' "$prompt" ;;
    char-write-req*)
      printf 'Characteristic value was written successfully\nNotification handle = 0x0013 value: 01 80\n%s ' "$prompt" ;;
    exit)
      exit 0 ;;
    *)
      printf 'Error: unknown command\n%s ' "$prompt" ;;
  esac
done
"#;

const PLUG: &str = "60:55:f9:00:00:01";

fn script_config(script: &str) -> GattToolConfig {
    GattToolConfig::builder()
        .program("sh")
        .leading_args(vec![
            "-c".to_string(),
            script.to_string(),
            "gatttool".to_string(),
        ])
        .prompt_timeout(Duration::from_secs(3))
        .poll_interval(Duration::from_millis(20))
        .exit_grace(Duration::from_millis(50))
        .build()
}

fn quick_options(success_marker: Option<&str>) -> ExpectOptions {
    ExpectOptions::builder()
        .maybe_success_marker(success_marker)
        .timeout(Duration::from_secs(3))
        .poll_interval(Duration::from_millis(20))
        .build()
}

#[tokio::test]
async fn plug_mini_command_runs_over_a_live_process() -> anyhow::Result<()> {
    let protocol = DeviceCommandProtocol::builder()
        .client(Arc::new(GattToolClient::new(script_config(FAKE_GATTTOOL))))
        .policy(
            RetryPolicy::builder()
                .max_retries(1)
                .delay(Duration::from_millis(10))
                .build(),
        )
        .expect_timeout(Duration::from_secs(3))
        .poll_interval(Duration::from_millis(20))
        .build();

    let state = PlugMiniHandler::send(&protocol, "hci0", PLUG, PlugMiniCommand::On).await?;

    assert_eq!(PlugState::On, state);
    Ok(())
}

#[tokio::test]
async fn session_strips_escapes_and_resolves_on_success_marker() -> anyhow::Result<()> {
    let config = script_config(FAKE_GATTTOOL);
    let session =
        GatttoolSession::open(&config, "hci0", &TargetAddress::random("c1:d2:e3:f4:a5:b6"))
            .await?;

    let outcome = send_and_expect(&session, "connect", &quick_options(Some("Connection successful")))
        .await?;

    assert!(outcome.success());
    assert!(outcome.output().iter().any(|line| line == "Connection successful"));
    assert!(session.is_alive().await);
    GattTransport::close(Box::new(session)).await?;
    Ok(())
}

#[tokio::test]
async fn tool_error_line_is_fatal() -> anyhow::Result<()> {
    let config = script_config(FAKE_GATTTOOL);
    let session = GatttoolSession::open(&config, "hci0", &TargetAddress::public(PLUG)).await?;

    let result = send_and_expect(&session, "primary", &quick_options(None)).await;

    assert_matches!(result, Err(ExpectError::ToolFatal { detail, .. }) if detail == "unknown command");
    GattTransport::close(Box::new(session)).await?;
    Ok(())
}

#[tokio::test]
async fn silent_tool_times_out_waiting_for_prompt() {
    let config = GattToolConfig::builder()
        .program("sh")
        .leading_args(vec![
            "-c".to_string(),
            "sleep 5".to_string(),
            "gatttool".to_string(),
        ])
        .prompt_timeout(Duration::from_millis(300))
        .poll_interval(Duration::from_millis(20))
        .build();

    let result = GatttoolSession::open(&config, "hci0", &TargetAddress::public(PLUG)).await;

    assert_matches!(result, Err(SessionError::PromptTimeout { output }) if output.is_empty());
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let config = GattToolConfig::builder()
        .program("/nonexistent/gatttool")
        .build();

    let result = GatttoolSession::open(&config, "hci0", &TargetAddress::public(PLUG)).await;

    assert_matches!(
        result,
        Err(SessionError::Spawn { program, .. }) if program == "/nonexistent/gatttool"
    );
}

#[tokio::test(start_paused = true)]
async fn late_reply_does_not_satisfy_the_next_command() -> anyhow::Result<()> {
    let tool = FakeGattTool::default()
        .on(
            "connect",
            FakeReply::lines(["Connection successful"]).after(Duration::from_millis(500)),
        )
        .on("characteristics", FakeReply::silent());
    let session = tool.open("hci0", &TargetAddress::random(PLUG)).await?;
    let options = ExpectOptions::builder()
        .success_marker("Connection successful")
        .timeout(Duration::from_millis(300))
        .poll_interval(Duration::from_millis(20))
        .build();

    let first = send_and_expect(session.as_ref(), "connect", &options).await;
    assert_matches!(first, Err(ExpectError::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(session.lines().snapshot().iter().any(|line| line == "Connection successful"));

    let second = send_and_expect(session.as_ref(), "characteristics", &options).await;

    assert_matches!(second, Err(ExpectError::Timeout { output }) if output.is_empty());
    session.close().await?;
    Ok(())
}
