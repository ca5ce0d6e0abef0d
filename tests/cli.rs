#![cfg(unix)]

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        };
        let output = workspace.lmenrich(&["init"]);
        assert!(output.status.success(), "init failed: {}", stderr(&output));
        workspace
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn lmenrich(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_lmenrich"))
            .arg("--config")
            .arg(self.path("config.json"))
            .arg("--schemas")
            .arg(self.path("schemas.json"))
            .args(args)
            .env_remove("RUST_LOG")
            .env_remove("LMENRICH_LM_COMMAND")
            .output()
            .expect("run lmenrich")
    }

    /// Mock LM: ignores the prompt and prints one fixed answer.
    fn fixed_lm(&self) -> String {
        let script = self.path("fake_lm.sh");
        fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf '%s\\n' 'Sure! {\"industry\": \"Software\", \"headquarters\": \"Berlin\", \"founded\": \"1999\"}'\n",
        )
        .expect("write script");
        format!("sh {}", script.display())
    }

    fn write_rows(&self, rows: &Value) -> PathBuf {
        let path = self.path("rows.json");
        fs::write(&path, rows.to_string()).expect("write rows");
        path
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse")
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let ws = Workspace::new();
    let again = ws.lmenrich(&["init"]);
    assert!(!again.status.success());
    assert!(stderr(&again).contains("--force"));
    assert!(ws.lmenrich(&["init", "--force"]).status.success());
}

#[test]
fn lists_checks_and_activates_schemas() {
    let ws = Workspace::new();
    let listing = ws.lmenrich(&["schemas", "--json"]);
    assert!(listing.status.success());
    let listing: Value = serde_json::from_str(&stdout(&listing)).expect("listing json");
    assert_eq!(listing["active"], json!("company_enrichment"));
    assert_eq!(listing["schemas"][0]["inputs"], json!(["company_name"]));

    let check = ws.lmenrich(&["check"]);
    assert!(check.status.success(), "{}", stderr(&check));
    assert!(stdout(&check).contains("ok      company_enrichment"));

    let missing = ws.lmenrich(&["activate", "nope"]);
    assert!(!missing.status.success());
    assert!(stderr(&missing).contains("unknown schema"));
}

#[test]
fn prompt_preview_lists_tagged_rows() {
    let ws = Workspace::new();
    let rows = ws.write_rows(&json!([
        {"company_name": "Acme"},
        {"company_name": ""},
        {"company_name": "Globex"}
    ]));
    let output = ws.lmenrich(&["prompt", "--input", rows.to_str().expect("utf8 path")]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains(r#""index": 0, "company_name": "Acme""#), "{text}");
    assert!(text.contains(r#""index": 1, "company_name": "Globex""#), "{text}");
}

#[test]
fn run_writes_results_and_reuses_the_cache() {
    let ws = Workspace::new();
    let rows = ws.write_rows(&json!([
        {"company_name": "Acme"},
        {"company_name": "  "}
    ]));
    let lm = ws.fixed_lm();
    let out = ws.path("results.json");
    let cache = ws.path("cache.json");
    let run = |log: &str| {
        ws.lmenrich(&[
            "run",
            "--input",
            rows.to_str().expect("utf8 path"),
            "--out",
            out.to_str().expect("utf8 path"),
            "--mode",
            "single",
            "--cache",
            cache.to_str().expect("utf8 path"),
            "--lm-log",
            ws.path(log).to_str().expect("utf8 path"),
            "--lm-command",
            &lm,
        ])
    };

    let first = run("first.jsonl");
    assert!(first.status.success(), "{}", stderr(&first));
    assert!(stdout(&first).contains("2 rows: 1 success, 1 validation_error"));

    let results = read_json(&out);
    assert_eq!(results["summary"]["success"], json!(1));
    assert_eq!(results["outcomes"][0]["status"], json!("success"));
    assert_eq!(results["outcomes"][1]["status"], json!("validation_error"));
    assert_eq!(results["records"][0]["industry"], json!("Software"));
    assert_eq!(results["records"][0]["founded"], json!(1999));
    assert_eq!(results["records"][1]["industry"], json!("N/A"));
    assert!(cache.is_file());
    let first_log = fs::read_to_string(ws.path("first.jsonl")).expect("first log");
    assert_eq!(first_log.lines().count(), 1);

    let second = run("second.jsonl");
    assert!(second.status.success(), "{}", stderr(&second));
    let second_log = fs::read_to_string(ws.path("second.jsonl")).unwrap_or_default();
    assert_eq!(second_log.lines().count(), 0);
    assert_eq!(read_json(&out)["records"][0]["industry"], json!("Software"));
}

#[test]
fn run_without_schema_store_explains_init() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let output = Command::new(env!("CARGO_BIN_EXE_lmenrich"))
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--schemas")
        .arg(dir.path().join("schemas.json"))
        .arg("schemas")
        .output()
        .expect("run lmenrich");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("lmenrich init"));
}
