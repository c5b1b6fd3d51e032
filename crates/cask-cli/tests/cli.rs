//! Drives the built `cask` binary inside a sandboxed home.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

/// A sandboxed home with every cask directory inside it.
struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        std::fs::create_dir_all(temp_dir.path().join("Casks")).unwrap();
        Self { temp_dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join(rel)
    }

    fn cask_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cask"));
        cmd.env("HOME", self.temp_dir.path())
            .env("CASK_ROOM", self.path("Caskroom"))
            .env("CASK_CACHE", self.path("cache"))
            .env("CASK_APPDIR", self.path("Applications"))
            .env("CASK_BINARYDIR", self.path("bin"))
            .env("CASK_CATALOG", self.path("Casks"))
            .env("NO_PROXY", "127.0.0.1,localhost")
            .env_remove("HTTP_PROXY")
            .env_remove("http_proxy")
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cask_cmd().args(args).output().expect("failed to run cask")
    }

    fn write_cask(&self, token: &str, body: &str) {
        std::fs::write(self.path(&format!("Casks/{token}.toml")), body).unwrap();
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn app_zip() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(
        "Foo.app/Contents/Info.plist",
        zip::write::SimpleFileOptions::default(),
    )
    .unwrap();
    zip.write_all(b"<plist/>").unwrap();
    zip.finish().unwrap().into_inner()
}

#[test]
fn test_help_command() {
    let env = TestEnv::new();
    let output = env.run(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_version_command() {
    let env = TestEnv::new();
    assert!(env.run(&["--version"]).status.success());
}

#[test]
fn test_list_when_nothing_installed() {
    let env = TestEnv::new();

    let output = env.run(&["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No casks installed."));

    let output = env.run(&["list", "--json"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "[]");
}

#[test]
fn test_uninstall_absent_cask_warns() {
    let env = TestEnv::new();
    let output = env.run(&["uninstall", "foo"]);
    assert!(output.status.success());
    assert!(stderr(&output).contains("Cask 'foo' is not installed."));
}

#[test]
fn test_unknown_cask_names_phase_and_token() {
    let env = TestEnv::new();
    let output = env.run(&["install", "nope"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("install nope"), "{err}");
    assert!(err.contains("unavailable"), "{err}");
}

#[test]
fn test_completions() {
    let env = TestEnv::new();
    let output = env.run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("cask"));
}

#[test]
fn test_install_list_uninstall() {
    let env = TestEnv::new();
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/foo-1.0.zip")
        .with_status(200)
        .with_body(app_zip())
        .create();

    env.write_cask(
        "foo",
        &format!(
            "token = \"foo\"\nversion = \"1.0\"\nsha256 = \"no_check\"\nurl = \"{}/foo-1.0.zip\"\n\n[[artifacts]]\nkind = \"app\"\nsource = \"Foo.app\"\n",
            server.url()
        ),
    );

    let output = env.run(&["install", "foo"]);
    assert!(output.status.success(), "{}", stderr(&output));
    mock.assert();
    assert!(env.path("Applications/Foo.app/Contents/Info.plist").is_file());
    assert!(env.path("Caskroom/foo/1.0/Foo.app").is_dir());
    assert!(env.path("cache/foo--1.0.zip").is_file());

    let output = env.run(&["list", "--json"]);
    let listed = stdout(&output);
    assert!(listed.contains("\"token\": \"foo\""), "{listed}");
    assert!(listed.contains("\"version\": \"1.0\""), "{listed}");

    let output = env.run(&["install", "foo"]);
    assert!(output.status.success());
    assert!(stderr(&output).contains("already installed"));

    let output = env.run(&["uninstall", "foo"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(!env.path("Applications/Foo.app").exists());
    assert!(!env.path("Caskroom/foo").exists());
}
