use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use clap::Parser;
use pretty_assertions::assert_eq;
use rstest::rstest;
use switchbot::{
    Args, Command, DeviceKind, FakeGattTool, FakeReply, OutputFormat, ProtocolError, RunError,
    ScanArgs, ScanConfig, TerminalClient, ToolBackend, run_with_clients_and_log_level,
};

const COMMAND_ROW: &str = "handle: 0x0015, char properties: 0x18, char value handle: 0x0016, uuid: cba20002-224d-11e6-9fb8-0002a5d5c51b";
const BOT_PACKET: &str = "> 04 3E 20 02 01 04 01 B6 A5 F4 E3 D2 C1 14 06 16 3D FD 48 00 E4 0B FF 69 09 C1 D2 E3 F4 A5 B6 01 02 00 C4";

struct PipedTerminal;

impl TerminalClient for PipedTerminal {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

fn plug_tool(notification: &str) -> FakeGattTool {
    FakeGattTool::default()
        .on("connect", FakeReply::lines(["Connection successful"]))
        .on("characteristics", FakeReply::lines([COMMAND_ROW]))
        .on(
            "char-write-req",
            FakeReply::lines([
                "Characteristic value was written successfully".to_string(),
                format!("Notification handle = 0x0013 value: {notification}"),
            ]),
        )
}

async fn run_command(
    command: Command,
    backend: ToolBackend,
    format: Option<OutputFormat>,
) -> (anyhow::Result<()>, String) {
    let mut out = Vec::new();
    let result =
        run_with_clients_and_log_level(command, &mut out, &PipedTerminal, backend, None, format)
            .await;
    (result, String::from_utf8_lossy(&out).into_owned())
}

#[rstest]
#[case(&["switchbot", "do", "-b", "AA:BB:CC:DD:EE:FF", "-d", "bot", "-c", "press"], DeviceKind::Bot, 20)]
#[case(&["switchbot", "do", "-m", "AA:BB:CC:DD:EE:FF", "-d", "curtain", "-c", "open", "-r", "3"], DeviceKind::Curtain, 3)]
#[case(&["switchbot", "do", "--mac", "AA:BB:CC:DD:EE:FF", "--device", "plugmini", "--command", "on", "--max_retries", "0"], DeviceKind::PlugMini, 0)]
fn do_arguments_parse(#[case] argv: &[&str], #[case] device: DeviceKind, #[case] retries: u32) {
    let args = Args::try_parse_from(argv.iter().copied()).expect("arguments should parse");

    let Command::Do(do_args) = args.into_command() else {
        panic!("expected the do command");
    };
    assert_eq!(device, do_args.device());
    assert_eq!(retries, do_args.max_retries());
}

#[rstest]
#[case(&["switchbot", "scan"], "hci0", None)]
#[case(&["switchbot", "scan", "-i", "hci1", "-t", "30"], "hci1", Some(Duration::from_secs(30)))]
#[case(&["switchbot", "scan", "--hci", "hci2", "--time", "2m"], "hci2", Some(Duration::from_secs(120)))]
fn scan_arguments_parse(
    #[case] argv: &[&str],
    #[case] hci: &str,
    #[case] time: Option<Duration>,
) {
    let args = Args::try_parse_from(argv.iter().copied()).expect("arguments should parse");

    let Command::Scan(scan_args) = args.into_command() else {
        panic!("expected the scan command");
    };
    assert_eq!(hci, scan_args.hci());
    assert_eq!(time, scan_args.time());
}

#[test]
fn unknown_device_kind_is_rejected() {
    let result = Args::try_parse_from([
        "switchbot", "do", "-b", "AA:BB:CC:DD:EE:FF", "-d", "lock", "-c", "on",
    ]);

    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn plug_do_prints_state_as_json() {
    let args = Args::try_parse_from([
        "switchbot", "do", "-b", "60:55:F9:00:00:01", "-d", "plugmini", "-c", "toggle",
    ])
    .expect("arguments should parse");
    let backend = ToolBackend::builder()
        .gatt_client(Arc::new(plug_tool("01 00")))
        .build();

    let (result, out) = run_command(args.into_command(), backend, None).await;

    assert!(result.is_ok(), "{result:?}");
    assert_eq!("\"off\"\n", out);
}

#[tokio::test(start_paused = true)]
async fn bot_do_prints_confirmation() {
    let args = Args::try_parse_from([
        "switchbot", "do", "-b", "C1:D2:E3:F4:A5:B6", "-d", "bot", "-c", "press",
    ])
    .expect("arguments should parse");
    let backend = ToolBackend::builder()
        .gatt_client(Arc::new(plug_tool("01 00")))
        .build();

    let (result, out) = run_command(args.into_command(), backend, Some(OutputFormat::Pretty)).await;

    assert!(result.is_ok(), "{result:?}");
    assert_eq!("✓ bot command written\n", out);
}

#[tokio::test(start_paused = true)]
async fn invalid_command_opens_no_session() {
    let tool = FakeGattTool::default();
    let args = Args::try_parse_from([
        "switchbot", "do", "-b", "C1:D2:E3:F4:A5:B6", "-d", "bot", "-c", "sideways",
    ])
    .expect("arguments should parse");
    let backend = ToolBackend::builder()
        .gatt_client(Arc::new(tool.clone()))
        .build();

    let (result, out) = run_command(args.into_command(), backend, None).await;

    let error = result.expect_err("the command word is invalid");
    assert_eq!("invalid bot command `sideways`", error.to_string());
    assert!(out.is_empty());
    assert_eq!((0, 0), tool.session_counts());
}

#[tokio::test(start_paused = true)]
async fn failed_do_surfaces_the_stage() {
    let tool = FakeGattTool::default().on("connect", FakeReply::silent());
    let args = Args::try_parse_from([
        "switchbot", "do", "-b", "C1:D2:E3:F4:A5:B6", "-d", "curtain", "-c", "close", "-r", "1",
    ])
    .expect("arguments should parse");
    let backend = ToolBackend::builder().gatt_client(Arc::new(tool)).build();

    let (result, _out) = run_command(args.into_command(), backend, None).await;

    let error = result.expect_err("connect never succeeds");
    assert_matches!(error.downcast_ref::<ProtocolError>(), Some(ProtocolError::Device(_)));
    assert_eq!("connect/give_up after 2 attempts", error.to_string());
}

#[tokio::test]
async fn scan_prints_decoded_advertisements_as_json() {
    let dump = format!("printf '%s\\n' '{BOT_PACKET}' '{BOT_PACKET}'; sleep 30");
    let backend = ToolBackend::builder()
        .scan_config(
            ScanConfig::builder()
                .dump_program("sh")
                .dump_args(vec!["-c".to_string(), dump])
                .discovery_program("sh")
                .discovery_args(vec!["-c".to_string(), "sleep 30".to_string()])
                .flush_interval(Duration::from_millis(100))
                .stop_grace(Duration::from_millis(20))
                .build(),
        )
        .build();
    let command = Command::Scan(ScanArgs::new("hci0", Some(Duration::from_millis(800))));

    let (result, out) = run_command(command, backend, Some(OutputFormat::Json)).await;

    assert!(result.is_ok(), "{result:?}");
    let first = out.lines().next().expect("one advertisement should be printed");
    let value: serde_json::Value = serde_json::from_str(first).expect("line should be JSON");
    assert_eq!("C1:D2:E3:F4:A5:B6", value["address"]);
    assert_eq!("bot", value["model"]);
    assert!(value["received_at"].is_string());
}

#[tokio::test]
async fn scan_that_cannot_start_exits_with_code_two() {
    let backend = ToolBackend::builder()
        .scan_config(
            ScanConfig::builder()
                .dump_program("/nonexistent/hcidump")
                .build(),
        )
        .build();
    let command = Command::Scan(ScanArgs::new("hci0", Some(Duration::from_secs(1))));

    let (result, _out) = run_command(command, backend, None).await;

    let error = result.expect_err("hcidump is missing");
    assert_eq!(Some(2), error.downcast_ref::<RunError>().map(RunError::exit_code));
}
