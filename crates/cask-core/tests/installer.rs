//! End-to-end installer behavior against a sandboxed directory layout.
//!
//! Downloads are served from local zip fixtures and host probes are faked,
//! so everything below runs without network access or macOS tools.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cask_core::{
    CaskError, CommandError, CommandOutput, CommandRunner, Config, Context, Fetcher,
    InstallOptions, Installer, MemoryCatalog, Metadata, NullReporter, Platform, Result,
    SystemCommand, upgrade,
};
use cask_schema::{Arch, Cask, OsVersion, Token};
use tempfile::TempDir;

#[derive(Default)]
struct SpyFetcher {
    fixtures: Mutex<HashMap<String, PathBuf>>,
    calls: Mutex<Vec<String>>,
}

impl SpyFetcher {
    fn serve(&self, url: &str, path: PathBuf) {
        self.fixtures.lock().unwrap().insert(url.to_string(), path);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for SpyFetcher {
    async fn fetch(&self, cask: &Cask, _force: bool) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(cask.token.to_string());
        self.fixtures
            .lock()
            .unwrap()
            .get(&cask.url.url)
            .cloned()
            .ok_or_else(|| CaskError::DownloadFailed {
                token: cask.token.clone(),
                url: cask.url.url.clone(),
                reason: "no fixture".to_string(),
                partial: None,
            })
    }

    fn clear_cache(&self, _cask: &Cask) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakePlatform {
    missing_formulas: bool,
    formulas_installed: Mutex<Vec<String>>,
}

impl Platform for FakePlatform {
    fn macos_version(&self) -> Option<OsVersion> {
        OsVersion::parse("14.0").ok()
    }
    fn arch(&self) -> Arch {
        Arch::current()
    }
    fn x11_installed(&self) -> bool {
        false
    }
    fn formula_installed(&self, _name: &str) -> bool {
        !self.missing_formulas
    }
    fn install_formula(&self, name: &str) -> Result<()> {
        self.formulas_installed.lock().unwrap().push(name.to_string());
        Ok(())
    }
    fn enable_accessibility_access(&self, _apps: &[PathBuf]) -> Result<()> {
        Ok(())
    }
    fn disable_accessibility_access(&self, _apps: &[PathBuf]) -> Result<()> {
        Ok(())
    }
    fn quarantine(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

struct NoTools;

impl CommandRunner for NoTools {
    fn run(&self, _cmd: &SystemCommand) -> std::result::Result<CommandOutput, CommandError> {
        Ok(CommandOutput::ok(""))
    }
}

struct Harness {
    tmp: TempDir,
    catalog: MemoryCatalog,
    fetcher: Arc<SpyFetcher>,
    platform: Arc<FakePlatform>,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("downloads")).unwrap();
        Self {
            tmp,
            catalog: MemoryCatalog::new(),
            fetcher: Arc::new(SpyFetcher::default()),
            platform: Arc::new(FakePlatform::default()),
        }
    }

    fn without_formulas() -> Self {
        Self {
            platform: Arc::new(FakePlatform {
                missing_formulas: true,
                ..FakePlatform::default()
            }),
            ..Self::new()
        }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn config(&self) -> Config {
        Config::rooted(self.root())
    }

    /// Register a cask whose download is a zip with `files`, and return it.
    fn cask(&mut self, token: &str, version: &str, files: &[(&str, &str)], extra: &str) -> Cask {
        let url = format!("https://example.com/{token}-{version}.zip");
        let cask = Cask::parse(&format!(
            "token = \"{token}\"\nversion = \"{version}\"\nsha256 = \"no_check\"\nurl = \"{url}\"\n{extra}"
        ))
        .unwrap();

        let archive = self
            .root()
            .join("downloads")
            .join(format!("{token}-{version}.zip"));
        write_zip(&archive, files);
        self.fetcher.serve(&url, archive);
        self.catalog.insert(cask.clone());
        cask
    }

    fn ctx(&self, options: InstallOptions) -> Context {
        Context::new(
            self.config(),
            options,
            Arc::new(NullReporter),
            Arc::new(NoTools),
            self.platform.clone(),
            Arc::new(self.catalog.clone()),
            self.fetcher.clone(),
        )
    }

    fn metadata(&self, token: &str) -> Metadata {
        Metadata::new(&self.config().caskroom, &Token::new(token))
    }
}

fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

const FOO_APP: &[(&str, &str)] = &[("Foo.app/Contents/Info.plist", "<plist/>")];

const APP_ARTIFACT: &str = "[[artifacts]]\nkind = \"app\"\nsource = \"Foo.app\"\n";

const BROKEN_BINARY: &str = "[[artifacts]]\nkind = \"binary\"\nsource = \"bin/missing\"\n";

fn versioned_dir_count(dir: &Path) -> usize {
    fs::read_dir(dir).map_or(0, Iterator::count)
}

#[tokio::test]
async fn test_install_then_uninstall_zip_app() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());

    Installer::new(&ctx, cask.clone()).install().await.unwrap();

    let caskroom = &ctx.config.caskroom;
    assert!(caskroom.join("foo/1.0/Foo.app/Contents/Info.plist").is_file());
    assert!(ctx.config.appdir.join("Foo.app/Contents/Info.plist").is_file());
    assert_eq!(versioned_dir_count(&caskroom.join("foo/.metadata/1.0")), 1);

    let metadata = h.metadata("foo");
    assert_eq!(metadata.installed_version().unwrap().unwrap(), cask.version);
    assert_eq!(metadata.installed_cask().unwrap().token, cask.token);
    assert_eq!(h.fetcher.calls(), vec!["foo"]);

    Installer::new(&ctx, cask).uninstall().unwrap();
    assert!(!ctx.config.appdir.join("Foo.app").exists());
    assert!(!caskroom.join("foo").exists());
    assert!(!metadata.is_installed().unwrap());
}

#[tokio::test]
async fn test_second_install_is_already_installed() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());

    Installer::new(&ctx, cask.clone()).install().await.unwrap();
    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    assert!(matches!(err, CaskError::AlreadyInstalled { .. }));
    assert!(err.is_preflight());
    assert_eq!(h.fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_reinstall_replaces_existing() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());

    Installer::new(&ctx, cask.clone()).install().await.unwrap();
    fs::write(ctx.config.appdir.join("Foo.app/Contents/local-change"), "x").unwrap();

    Installer::new(&ctx, cask)
        .reinstall(true)
        .install()
        .await
        .unwrap();

    assert!(ctx.config.appdir.join("Foo.app/Contents/Info.plist").is_file());
    assert!(!ctx.config.appdir.join("Foo.app/Contents/local-change").exists());
    assert!(h.metadata("foo").is_installed().unwrap());
}

#[test]
fn test_force_uninstall_is_idempotent() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);

    let ctx = h.ctx(InstallOptions::default());
    let err = Installer::new(&ctx, cask.clone()).uninstall().unwrap_err();
    assert!(matches!(err, CaskError::NotInstalled { .. }));

    let forced = h.ctx(InstallOptions {
        force: true,
        ..InstallOptions::default()
    });
    Installer::new(&forced, cask.clone()).uninstall().unwrap();
    Installer::new(&forced, cask).uninstall().unwrap();
    assert!(!forced.config.caskroom.join("foo").exists());
}

#[tokio::test]
async fn test_failed_artifact_unwinds_everything() {
    let mut h = Harness::new();
    let extra = format!("{APP_ARTIFACT}\n{BROKEN_BINARY}");
    let cask = h.cask("foo", "1.0", FOO_APP, &extra);
    let ctx = h.ctx(InstallOptions::default());

    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    match err {
        CaskError::ArtifactInstallFailed { artifact, .. } => {
            assert_eq!(artifact, "binary 'bin/missing'");
        }
        other => panic!("expected ArtifactInstallFailed, got {other}"),
    }
    assert!(!ctx.config.appdir.join("Foo.app").exists());
    assert!(!ctx.config.caskroom.join("foo").exists());
    assert!(!h.metadata("foo").is_installed().unwrap());
}

#[tokio::test]
async fn test_self_dependency_is_rejected_before_download() {
    let mut h = Harness::new();
    let extra = format!("[depends_on]\ncask = [\"foo\"]\n\n{APP_ARTIFACT}");
    let cask = h.cask("foo", "1.0", FOO_APP, &extra);
    let ctx = h.ctx(InstallOptions::default());

    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    assert!(matches!(err, CaskError::SelfDependency { .. }));
    assert!(h.fetcher.calls().is_empty());
    assert!(!ctx.config.caskroom.join("foo").exists());
}

#[tokio::test]
async fn test_self_dependency_is_rejected_before_formula_installs() {
    let mut h = Harness::without_formulas();
    let extra = format!("[depends_on]\nformula = [\"wget\"]\ncask = [\"foo\"]\n\n{APP_ARTIFACT}");
    let cask = h.cask("foo", "1.0", FOO_APP, &extra);
    let ctx = h.ctx(InstallOptions::default());

    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    assert!(matches!(err, CaskError::SelfDependency { .. }));
    assert!(h.platform.formulas_installed.lock().unwrap().is_empty());
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_missing_formula_is_installed() {
    let mut h = Harness::without_formulas();
    let extra = format!("[depends_on]\nformula = [\"wget\"]\n\n{APP_ARTIFACT}");
    let cask = h.cask("foo", "1.0", FOO_APP, &extra);
    let ctx = h.ctx(InstallOptions::default());

    Installer::new(&ctx, cask).install().await.unwrap();

    assert_eq!(*h.platform.formulas_installed.lock().unwrap(), vec!["wget"]);
    assert!(h.metadata("foo").is_installed().unwrap());
}

#[tokio::test]
async fn test_unknown_container_leaves_nothing_staged() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let text = h.root().join("downloads/foo-1.0.txt");
    fs::write(&text, "just some text, not an archive\n").unwrap();
    h.fetcher.serve(&cask.url.url, text);
    let ctx = h.ctx(InstallOptions::default());

    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    assert!(matches!(err, CaskError::UnknownContainerFormat { .. }));
    let caskroom = &ctx.config.caskroom;
    assert!(!caskroom.join("foo/1.0").exists());
    assert!(!caskroom.join("foo/.metadata/1.0").exists());
    assert!(!h.metadata("foo").is_installed().unwrap());
    assert!(!ctx.config.appdir.join("Foo.app").exists());
}

#[tokio::test]
async fn test_cycle_is_rejected_from_every_entry_point() {
    let mut h = Harness::new();
    let depends = |on: &str| format!("[depends_on]\ncask = [\"{on}\"]\n");
    let a = h.cask("a", "1.0", FOO_APP, &depends("b"));
    let b = h.cask("b", "1.0", FOO_APP, &depends("c"));
    let c = h.cask("c", "1.0", FOO_APP, &depends("a"));
    let ctx = h.ctx(InstallOptions::default());

    for cask in [a, b, c] {
        let token = cask.token.clone();
        let err = Installer::new(&ctx, cask).install().await.unwrap_err();
        match err {
            CaskError::CyclicDependency { token: reported, cycle } => {
                assert_eq!(reported, token);
                assert_eq!(cycle.len(), 4);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected CyclicDependency, got {other}"),
        }
    }
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_dependencies_install_first() {
    let mut h = Harness::new();
    h.cask("lib", "1.0", &[("lib.txt", "lib")], "");
    let app = h.cask(
        "foo",
        "1.0",
        FOO_APP,
        &format!("[depends_on]\ncask = [\"lib\"]\n\n{APP_ARTIFACT}"),
    );
    let ctx = h.ctx(InstallOptions::default());

    Installer::new(&ctx, app).install().await.unwrap();

    assert_eq!(h.fetcher.calls(), vec!["lib", "foo"]);
    assert!(h.metadata("lib").is_installed().unwrap());
    assert!(h.metadata("foo").is_installed().unwrap());
}

#[tokio::test]
async fn test_skip_cask_deps_leaves_dependencies_alone() {
    let mut h = Harness::new();
    h.cask("lib", "1.0", &[("lib.txt", "lib")], "");
    let app = h.cask(
        "foo",
        "1.0",
        FOO_APP,
        &format!("[depends_on]\ncask = [\"lib\"]\n\n{APP_ARTIFACT}"),
    );
    let ctx = h.ctx(InstallOptions {
        skip_cask_deps: true,
        ..InstallOptions::default()
    });

    Installer::new(&ctx, app).install().await.unwrap();

    assert_eq!(h.fetcher.calls(), vec!["foo"]);
    assert!(!h.metadata("lib").is_installed().unwrap());
}

#[tokio::test]
async fn test_unsupported_arch_fails_preflight() {
    let mut h = Harness::new();
    let other = match Arch::current() {
        Arch::Arm64 => "x86_64",
        Arch::X86_64 => "arm64",
    };
    let cask = h.cask(
        "foo",
        "1.0",
        FOO_APP,
        &format!("[depends_on]\narch = [\"{other}\"]\n\n{APP_ARTIFACT}"),
    );
    let ctx = h.ctx(InstallOptions::default());

    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    assert!(matches!(err, CaskError::DependencyUnsatisfied { .. }));
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_require_sha_refuses_no_check_before_download() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions {
        require_sha: true,
        ..InstallOptions::default()
    });

    let err = Installer::new(&ctx, cask).install().await.unwrap_err();

    assert!(matches!(err, CaskError::ChecksumMissing { .. }));
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_installed_conflict_blocks_install() {
    let mut h = Harness::new();
    let foo = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let bar = h.cask(
        "bar",
        "1.0",
        &[("bar.txt", "bar")],
        "[conflicts_with]\ncask = [\"foo\", \"not-in-catalog\"]\n",
    );
    let ctx = h.ctx(InstallOptions::default());

    Installer::new(&ctx, foo).install().await.unwrap();
    let err = Installer::new(&ctx, bar).install().await.unwrap_err();

    assert!(matches!(err, CaskError::ConflictDetected { ref conflict, .. } if conflict.as_str() == "foo"));
    assert_eq!(h.fetcher.calls(), vec!["foo"]);
}

#[tokio::test]
async fn test_upgrade_replaces_old_version() {
    let mut h = Harness::new();
    let old = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());
    Installer::new(&ctx, old).install().await.unwrap();

    let new = h.cask(
        "foo",
        "2.0",
        &[("Foo.app/Contents/Info.plist", "<plist version=\"2\"/>")],
        APP_ARTIFACT,
    );
    assert!(upgrade(&ctx, new).await.unwrap());

    let caskroom = &ctx.config.caskroom;
    let metadata = h.metadata("foo");
    assert_eq!(metadata.installed_version().unwrap().unwrap().as_str(), "2.0");
    assert_eq!(
        fs::read_to_string(ctx.config.appdir.join("Foo.app/Contents/Info.plist")).unwrap(),
        "<plist version=\"2\"/>"
    );
    assert!(!caskroom.join("foo/1.0").exists());
    assert!(!caskroom.join("foo/1.0.upgrading").exists());
    assert!(!caskroom.join("foo/.metadata/1.0.upgrading").exists());
}

#[tokio::test]
async fn test_upgrade_to_same_version_is_noop() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());
    Installer::new(&ctx, cask.clone()).install().await.unwrap();

    assert!(!upgrade(&ctx, cask).await.unwrap());
    assert_eq!(h.fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_failed_upgrade_restores_old_version() {
    let mut h = Harness::new();
    let old = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());
    Installer::new(&ctx, old).install().await.unwrap();

    let new = h.cask(
        "foo",
        "2.0",
        FOO_APP,
        &format!("{APP_ARTIFACT}\n{BROKEN_BINARY}"),
    );
    let err = upgrade(&ctx, new).await.unwrap_err();
    assert!(matches!(err, CaskError::ArtifactInstallFailed { .. }));

    let caskroom = &ctx.config.caskroom;
    let metadata = h.metadata("foo");
    assert_eq!(metadata.installed_version().unwrap().unwrap().as_str(), "1.0");
    assert!(caskroom.join("foo/1.0/Foo.app").is_dir());
    assert!(ctx.config.appdir.join("Foo.app/Contents/Info.plist").is_file());
    assert!(!caskroom.join("foo/2.0").exists());
    assert!(!caskroom.join("foo/1.0.upgrading").exists());
    assert!(!caskroom.join("foo/.metadata/1.0.upgrading").exists());
}

#[tokio::test]
async fn test_upgrade_requires_install() {
    let mut h = Harness::new();
    let cask = h.cask("foo", "1.0", FOO_APP, APP_ARTIFACT);
    let ctx = h.ctx(InstallOptions::default());

    let err = upgrade(&ctx, cask).await.unwrap_err();
    assert!(matches!(err, CaskError::NotInstalled { .. }));
}

#[tokio::test]
async fn test_zap_runs_directives_and_purges() {
    let mut h = Harness::new();
    let prefs = h.root().join("prefs/com.example.foo.plist");
    fs::create_dir_all(prefs.parent().unwrap()).unwrap();
    fs::write(&prefs, "prefs").unwrap();

    let extra = format!(
        "{APP_ARTIFACT}\n[[artifacts]]\nkind = \"zap\"\ndelete = [\"{}\"]\n",
        prefs.display()
    );
    let cask = h.cask("foo", "1.0", FOO_APP, &extra);
    let ctx = h.ctx(InstallOptions::default());
    Installer::new(&ctx, cask.clone()).install().await.unwrap();

    Installer::new(&ctx, cask).zap().unwrap();

    assert!(!prefs.exists());
    assert!(!ctx.config.appdir.join("Foo.app").exists());
    assert!(!ctx.config.caskroom.join("foo").exists());
}
