//! CLI command integration tests.
//! Each test uses a temp directory via LUCID_DATA_DIR for full isolation.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn lucid_cmd(data_dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("lucid").unwrap();
    cmd.env("LUCID_DATA_DIR", data_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn assert_ok(dir: &TempDir, text: &str) {
    lucid_cmd(dir).args(["assert", text]).assert().success();
}

fn query_stdout(dir: &TempDir, args: &[&str]) -> String {
    let output = lucid_cmd(dir).arg("query").args(args).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn stats_fresh_db() {
    let dir = TempDir::new().unwrap();
    lucid_cmd(&dir)
        .args(["stats", "--kb", "test-stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kb:           test-stats"))
        .stdout(predicate::str::contains("entries:      0"))
        .stdout(predicate::str::contains("individuals:  0"));
    assert!(dir.path().join("kbs/test-stats.db").exists());
}

#[test]
fn assert_then_query() {
    let dir = TempDir::new().unwrap();
    lucid_cmd(&dir)
        .args(["assert", "A farmer owns a donkey."])
        .assert()
        .success()
        .stdout(predicate::str::contains("asserted entry 1"));

    assert_eq!(query_stdout(&dir, &["Does a farmer own a donkey?"]).trim(), "yes");
    assert_eq!(query_stdout(&dir, &["Does a farmer own a cat?"]).trim(), "no");
}

#[test]
fn assert_is_idempotent_across_runs() {
    let dir = TempDir::new().unwrap();
    assert_ok(&dir, "Tom owns a car.");
    lucid_cmd(&dir)
        .args(["assert", "Tom owns a car."])
        .assert()
        .success()
        .stdout(predicate::str::contains("entry 1 already present"));
    assert_eq!(query_stdout(&dir, &["How many cars does Tom own?"]).trim(), "1");
}

#[test]
fn pronouns_resolve_across_runs() {
    let dir = TempDir::new().unwrap();
    assert_ok(&dir, "A woman owns a dog.");
    assert_ok(&dir, "She likes it.");
    assert_eq!(query_stdout(&dir, &["Does a woman like a dog?"]).trim(), "yes");
}

#[test]
fn query_explain_cites_entries() {
    let dir = TempDir::new().unwrap();
    assert_ok(&dir, "Every student is mortal. Tom is a student.");
    let stdout = query_stdout(&dir, &["Is Tom mortal?", "--explain"]);
    assert!(stdout.starts_with("yes"), "{stdout}");
    assert!(stdout.contains("proof 1:"), "{stdout}");
    assert!(stdout.contains("rule from entry 1"), "{stdout}");
    assert!(stdout.contains("fact from entry 2"), "{stdout}");
}

#[test]
fn compile_error_reports_position() {
    let dir = TempDir::new().unwrap();
    lucid_cmd(&dir)
        .args(["assert", "Tom walks. Frobnicate talks."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("statement 2"))
        .stderr(predicate::str::contains("Frobnicate"));

    // The first statement was kept.
    assert_eq!(query_stdout(&dir, &["Does Tom walk?"]).trim(), "yes");
}

#[test]
fn retract_and_list() {
    let dir = TempDir::new().unwrap();
    assert_ok(&dir, "Tom walks. Bob walks.");
    lucid_cmd(&dir)
        .args(["retract", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("retracted entry 1"));

    assert_eq!(query_stdout(&dir, &["Who walks?"]).trim(), "Bob");

    lucid_cmd(&dir)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("walk(Bob)"))
        .stdout(predicate::str::contains("Bob walks."))
        .stdout(predicate::str::contains("walk(Tom)").not());

    lucid_cmd(&dir)
        .args(["list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(retracted)"));

    lucid_cmd(&dir).args(["retract", "1"]).assert().failure();
}

#[test]
fn ingest_files() {
    let dir = TempDir::new().unwrap();
    let rules = dir.path().join("rules.txt");
    let facts = dir.path().join("facts.txt");
    std::fs::write(&rules, "Every farmer who owns a donkey beats it.").unwrap();
    std::fs::write(&facts, "Tom is a farmer. Tom owns a donkey.").unwrap();

    lucid_cmd(&dir)
        .arg("ingest")
        .arg(&rules)
        .arg(&facts)
        .assert()
        .success()
        .stdout(predicate::str::contains("ingested"))
        .stdout(predicate::str::contains("done. new=3"));

    assert_eq!(query_stdout(&dir, &["Who beats a donkey?"]).trim(), "Tom");
}

#[test]
fn ingest_parallel() {
    let dir = TempDir::new().unwrap();
    let mut files = Vec::new();
    for (i, text) in ["Tom walks.", "Bob walks.", "Alice talks."].iter().enumerate() {
        let path = dir.path().join(format!("{i}.txt"));
        std::fs::write(&path, text).unwrap();
        files.push(path);
    }

    lucid_cmd(&dir)
        .args(["ingest", "--parallel"])
        .args(&files)
        .assert()
        .success()
        .stdout(predicate::str::contains("ingested 3 files"));

    assert_eq!(query_stdout(&dir, &["Who walks?"]).trim(), "Tom; Bob");
}

#[test]
fn export_import_roundtrip() {
    let dir = TempDir::new().unwrap();
    assert_ok(&dir, "A farmer owns a donkey. He beats it.");
    let path = dir.path().join("export.json");

    lucid_cmd(&dir)
        .arg("export")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported to"));

    let content = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["entries"].as_array().unwrap().len(), 2);

    lucid_cmd(&dir)
        .args(["--kb", "copy", "import"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("entries=2"));

    assert_eq!(
        query_stdout(&dir, &["--kb", "copy", "Does a farmer beat a donkey?"]).trim(),
        "yes"
    );
}

#[test]
fn import_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{ not json").unwrap();
    lucid_cmd(&dir)
        .arg("import")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid export file"));
}

#[test]
fn config_budget_makes_answers_unknown() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[inference]\nmax_steps = 10\n",
    )
    .unwrap();
    assert_ok(
        &dir,
        "Every person who knows a person who is famous is famous. \
         Alice is a person. Bob is a person. Alice knows Bob. Bob knows Alice.",
    );
    let stdout = query_stdout(&dir, &["Is Alice famous?"]);
    assert!(stdout.starts_with("unknown"), "{stdout}");
}

#[test]
fn invalid_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, "[inference]\nmax_dept = 3\n").unwrap();
    lucid_cmd(&dir)
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));
}

#[test]
fn lexicon_extension() {
    let dir = TempDir::new().unwrap();
    lucid_cmd(&dir)
        .args(["assert", "Tom is sleepy."])
        .assert()
        .failure();

    let words = dir.path().join("words.toml");
    std::fs::write(&words, "[[adjective]]\nlemma = \"sleepy\"\n").unwrap();
    lucid_cmd(&dir)
        .arg("--lexicon")
        .arg(&words)
        .args(["assert", "Tom is sleepy."])
        .assert()
        .success();
    assert_eq!(
        query_stdout(&dir, &["--lexicon", words.to_str().unwrap(), "Is Tom sleepy?"]).trim(),
        "yes"
    );
}
