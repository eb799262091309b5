use std::net::TcpListener;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

const OVERRIDES: [&str; 5] = ["REDFISH_BASEURL", "REDFISH_USERNAME", "REDFISH_PASSWORD", "REDFISH_SYSTEM_ID", "AMT_GATEWAY_URL"];
const SYSTEM: &str = "4c4c4544-0035-5910-8031-c2c04f4a4b33";

fn amtctl(config: &Path, args: &[&str], env: &[(&str, &str)]) -> (bool, Value, String) {
	let mut command = Command::new(env!("CARGO_BIN_EXE_amtctl"));
	for name in OVERRIDES {
		command.env_remove(name);
	}
	command.env_remove("RUST_LOG").envs(env.iter().copied());
	let output = command
		.arg("--config")
		.arg(config)
		.args(args)
		.output()
		.expect("failed to execute amtctl");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let json = serde_json::from_str(&stdout).unwrap_or_else(|_| serde_json::json!({ "raw": stdout }));
	(output.status.success(), json, stderr)
}

/// Base URL on a local port nothing listens on.
fn closed_url() -> String {
	let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
	let addr = listener.local_addr().expect("local addr");
	drop(listener);
	format!("http://{addr}/")
}

#[test]
fn config_init_then_show_roundtrips() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("amtctl").join("config.json");

	let (success, json, stderr) = amtctl(&path, &["config", "init"], &[]);
	assert!(success, "config init failed: {stderr}");
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "config init");
	assert_eq!(json["data"]["written"], true);
	assert!(path.exists());

	let (success, json, stderr) = amtctl(&path, &["config", "show"], &[]);
	assert!(success, "config show failed: {stderr}");
	assert_eq!(json["data"]["exists"], true);
	assert_eq!(json["data"]["config"]["timings"]["cycle"]["stateTimeout"], 180_000);
	assert_eq!(json["data"]["config"]["timings"]["session"]["keepAlive"], 15_000);
}

#[test]
fn config_init_refuses_to_overwrite() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");
	std::fs::write(&path, "{}").expect("config should be written");

	let (success, json, _) = amtctl(&path, &["config", "init"], &[]);
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["error"]["code"], "CONFIG_ERROR");

	let (success, _, stderr) = amtctl(&path, &["config", "init", "--force"], &[]);
	assert!(success, "config init --force failed: {stderr}");
}

#[test]
fn config_show_applies_environment_and_redacts() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");
	std::fs::write(&path, r#"{"redfish":{"baseUrl":"https://file.example","username":"admin"}}"#).expect("config should be written");

	let (success, json, stderr) = amtctl(
		&path,
		&["config", "show"],
		&[("REDFISH_BASEURL", "https://env.example:8181"), ("REDFISH_PASSWORD", "hunter2")],
	);
	assert!(success, "config show failed: {stderr}");
	let redfish = &json["data"]["config"]["redfish"];
	assert_eq!(redfish["baseUrl"], "https://env.example:8181");
	assert_eq!(redfish["username"], "admin");
	assert_eq!(redfish["password"], "<redacted>");
	assert!(!json.to_string().contains("hunter2"));
}

#[test]
fn power_state_without_target_is_invalid_input() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");

	let (success, json, _) = amtctl(&path, &["power", "state"], &[("REDFISH_BASEURL", "http://127.0.0.1:1/")]);
	assert!(!success);
	assert_eq!(json["command"], "power state");
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
}

#[test]
fn power_state_against_unreachable_service_reports_unavailable() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");
	let url = closed_url();

	let (success, json, _) = amtctl(
		&path,
		&["power", "state", "--system", SYSTEM],
		&[("REDFISH_BASEURL", url.as_str()), ("REDFISH_USERNAME", "admin"), ("REDFISH_PASSWORD", "secret")],
	);
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["inputs"]["system"], SYSTEM);
	assert_eq!(json["error"]["code"], "DEVICE_UNAVAILABLE");
}

#[test]
fn malformed_system_id_is_rejected_before_any_request() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");

	let (success, json, _) = amtctl(&path, &["power", "reset", "ForceOff", "--system", "not-a-uuid"], &[("REDFISH_BASEURL", closed_url().as_str())]);
	assert!(!success);
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
}

#[test]
fn kvm_check_reports_blocked_when_gateway_is_down() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");

	let (success, json, stderr) = amtctl(&path, &["kvm", "check", "dev-1"], &[("AMT_GATEWAY_URL", closed_url().as_str())]);
	assert!(success, "kvm check failed: {stderr}");
	assert_eq!(json["data"]["outcome"], "blocked");
	assert_eq!(json["data"]["messageKey"], "kvm.errorRetrieve.value");
	assert_eq!(json["diagnostics"][0]["source"], "kvm.errorRetrieve.value");
}

#[test]
fn text_format_prints_error_line() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let path = tmp.path().join("config.json");

	let output = Command::new(env!("CARGO_BIN_EXE_amtctl"))
		.env_remove("AMT_GATEWAY_URL")
		.env("NO_COLOR", "1")
		.arg("--config")
		.arg(&path)
		.args(["-f", "text", "kvm", "check", "dev-1"])
		.output()
		.expect("failed to execute amtctl");
	assert!(!output.status.success());
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(stdout.contains("Error [CONFIG_ERROR]"), "unexpected output: {stdout}");
}
