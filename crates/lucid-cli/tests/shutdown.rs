//! `lucid serve` over stdio: it must exit cleanly when its client goes away
//! and leave everything it accepted in the store.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tempfile::TempDir;

const KB: &str = "stdio";

struct Server {
    child: Child,
    next_id: u64,
}

impl Server {
    /// Spawn the server and block until its database file shows up.
    fn start(dir: &TempDir) -> Self {
        let child = Command::new(PathBuf::from(assert_cmd::cargo::cargo_bin!("lucid")))
            .args(["--kb", KB, "serve"])
            .env("LUCID_DATA_DIR", dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let db = dir.path().join("kbs").join(format!("{KB}.db"));
        let started = Instant::now();
        while !db.exists() && started.elapsed() < Duration::from_secs(5) {
            sleep(Duration::from_millis(25));
        }
        Self { child, next_id: 1 }
    }

    fn write(&mut self, message: Value) {
        let stdin = self.child.stdin.as_mut().unwrap();
        writeln!(stdin, "{message}").unwrap();
        stdin.flush().unwrap();
    }

    fn request(&mut self, method: &str, params: Value) {
        let id = self.next_id;
        self.next_id += 1;
        self.write(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }));
    }

    fn initialize(&mut self) {
        self.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "lucid-tests", "version": "0" }
            }),
        );
        sleep(Duration::from_millis(300));
        self.write(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }));
        sleep(Duration::from_millis(200));
    }

    fn call(&mut self, tool: &str, arguments: Value) {
        self.request("tools/call", json!({ "name": tool, "arguments": arguments }));
    }

    /// Close stdin and collect the exit, failing if it takes longer than `limit`.
    fn hang_up(mut self, limit: Duration) -> Output {
        drop(self.child.stdin.take());
        let started = Instant::now();
        let output = self.child.wait_with_output().unwrap();
        let took = started.elapsed();
        assert!(took < limit, "serve took {took:?} to exit");
        assert!(
            output.status.success(),
            "serve exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }
}

fn hang_up_after(handshake: bool) {
    let dir = TempDir::new().unwrap();
    let mut server = Server::start(&dir);
    if handshake {
        server.initialize();
    }
    server.hang_up(Duration::from_secs(2));
}

#[test]
fn eof_before_handshake_exits_cleanly() {
    hang_up_after(false);
}

#[test]
fn eof_after_handshake_exits_cleanly() {
    hang_up_after(true);
}

#[test]
fn assert_over_stdio_is_persisted() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::start(&dir);
    server.initialize();
    server.call("kb_assert", json!({ "text": "Tom walks. Bob talks." }));
    sleep(Duration::from_millis(500));
    server.hang_up(Duration::from_secs(5));

    let wal = dir.path().join("kbs").join(format!("{KB}.db-wal"));
    if let Ok(meta) = std::fs::metadata(&wal) {
        assert_eq!(meta.len(), 0, "WAL left behind after exit");
    }

    let lucid = |args: &[&str]| {
        #[allow(deprecated)]
        let output = assert_cmd::Command::cargo_bin("lucid")
            .unwrap()
            .env("LUCID_DATA_DIR", dir.path())
            .args(["--kb", KB])
            .args(args)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    assert_eq!(lucid(&["query", "Who walks?"]).trim(), "Tom");
    assert!(lucid(&["list"]).contains("Bob talks."));
}
