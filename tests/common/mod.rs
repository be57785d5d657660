#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use drive_audit_helper::remote::fixture::{DriveFixture, FixtureItem};
use drive_audit_helper::remote::types::{Permission, RemoteItem};

pub const FOLDER: &str = "application/vnd.google-apps.folder";

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dah") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dah.exe" } else { "dah" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dah binary path for integration test"),
    }
}

/// Run the binary with logging disabled and a config path that does not exist.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("dah-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("DAH_LOGGING_ENABLED", "false")
        .env("HOME", &root)
        .env("RUST_BACKTRACE", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute dah command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Parse the single JSON line a `--json` command prints.
pub fn json_output(result: &CmdResult) -> serde_json::Value {
    let line = result
        .stdout
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON output; log: {}", result.log_path.display()));
    serde_json::from_str(line).expect("valid JSON output")
}

pub fn owner(id: &str, email: &str) -> Permission {
    Permission {
        id: id.to_string(),
        kind: "user".to_string(),
        role: "owner".to_string(),
        email_address: Some(email.to_string()),
    }
}

pub fn reader(id: &str, email: &str) -> Permission {
    Permission {
        role: "reader".to_string(),
        ..owner(id, email)
    }
}

pub fn folder(id: &str, name: &str, parents: &[&str], perms: Vec<Permission>) -> FixtureItem {
    FixtureItem {
        item: RemoteItem {
            id: id.to_string(),
            name: Some(name.to_string()),
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            size: None,
            md5_checksum: None,
            trashed: false,
            mime_type: Some(FOLDER.to_string()),
        },
        permissions: perms,
    }
}

pub fn file(
    id: &str,
    name: &str,
    parents: &[&str],
    size: u64,
    md5: &str,
    perms: Vec<Permission>,
) -> FixtureItem {
    FixtureItem {
        item: RemoteItem {
            id: id.to_string(),
            name: Some(name.to_string()),
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            size: Some(size),
            md5_checksum: Some(md5.to_string()),
            trashed: false,
            mime_type: Some("application/octet-stream".to_string()),
        },
        permissions: perms,
    }
}

/// A small account owned by `me@example.org`:
///
/// ```text
/// root (never listed)
/// ├── Photos            (folder)
/// │   ├── a.jpg  x2     (same content, same parent: dedup group)
/// │   └── b.jpg
/// ├── Shared            (folder, also under Photos)
/// │   └── c.txt         (owned by someone else)
/// └── loose.bin         (no parents: orphan, private)
/// ```
pub fn sample_drive(max_page_size: u32) -> DriveFixture {
    let me = "me@example.org";
    DriveFixture {
        max_page_size: Some(max_page_size),
        items: vec![
            folder("photos", "Photos", &["root"], vec![owner("p-photos", me)]),
            file("a1", "a.jpg", &["photos"], 100, "md5-a", vec![owner("p-a1", me)]),
            file("a2", "a.jpg", &["photos"], 100, "md5-a", vec![owner("p-a2", me)]),
            file("b", "b.jpg", &["photos"], 40, "md5-b", vec![owner("p-b", me)]),
            folder(
                "shared",
                "Shared",
                &["root", "photos"],
                vec![owner("p-shared", me), reader("p-shared-r", "friend@example.org")],
            ),
            file(
                "c",
                "c.txt",
                &["shared"],
                7,
                "md5-c",
                vec![owner("p-c", "friend@example.org"), reader("p-c-r", me)],
            ),
            file("loose", "loose.bin", &[], 5, "md5-l", vec![owner("p-loose", me)]),
        ],
    }
}

pub fn write_fixture(dir: &Path, fixture: &DriveFixture) -> PathBuf {
    let path = dir.join("drive.json");
    fs::write(&path, serde_json::to_string_pretty(fixture).expect("serialize fixture"))
        .expect("write fixture");
    path
}
