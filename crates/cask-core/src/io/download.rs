//! Download strategies and the download cache.
//!
//! Cache layout: `<cache>/<token>--<version><ext>` for HTTP downloads, with a
//! `.incomplete` sibling while in flight, and `<cache>/<token>--svn` for
//! Subversion working copies. Every fetch and cache clear holds a
//! [`DownloadLock`] named after the destination file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use cask_schema::{Cask, Checksum, Transport};
use futures::StreamExt;
use regex::Regex;
use reqwest::{Client, StatusCode, header};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

use crate::command::{CommandRunner, SystemCommand};
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::io::lock::DownloadLock;
use crate::io::remove_path;
use crate::reporter::Reporter;

const INCOMPLETE_SUFFIX: &str = ".incomplete";
const SVN_CACHE_TAG: &str = "svn";

static EXTENSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)((\.tar)?\.[a-z0-9]{1,8})$").ok());

/// Anything that can turn a cask into a file on local disk.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download (or reuse) the cask's source and return its local path.
    async fn fetch(&self, cask: &Cask, force: bool) -> Result<PathBuf>;

    /// Remove every cached artifact of the cask.
    fn clear_cache(&self, cask: &Cask) -> Result<()>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, cask: &Cask, force: bool) -> Result<PathBuf> {
        (**self).fetch(cask, force).await
    }

    fn clear_cache(&self, cask: &Cask) -> Result<()> {
        (**self).clear_cache(cask)
    }
}

#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Where the finished download lives.
    fn cached_location(&self) -> PathBuf;

    async fn fetch(&self) -> Result<PathBuf>;

    fn clear_cache(&self) -> Result<()>;
}

/// Maps casks to strategies and owns the HTTP client.
pub struct DownloadManager {
    client: Client,
    cache: PathBuf,
    lock_dir: PathBuf,
    user_agent: String,
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be initialized.
    pub fn new(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent, false)?,
            cache: config.cache.clone(),
            lock_dir: config.lock_dir(),
            user_agent: config.user_agent.clone(),
            runner,
            reporter,
        })
    }

    /// Pick the strategy for the cask's declared transport.
    pub fn strategy_for<'a>(&'a self, cask: &'a Cask) -> Box<dyn DownloadStrategy + 'a> {
        match cask.url.using {
            Transport::Plain => Box::new(HttpDownloadStrategy {
                cask,
                manager: self,
                post: false,
            }),
            Transport::Post => Box::new(HttpDownloadStrategy {
                cask,
                manager: self,
                post: true,
            }),
            Transport::Svn => Box::new(SubversionDownloadStrategy {
                cask,
                manager: self,
            }),
        }
    }

    fn lock(&self, target: &Path) -> Result<DownloadLock> {
        let name = target
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        DownloadLock::acquire(&self.lock_dir, &name)
    }
}

#[async_trait]
impl Fetcher for DownloadManager {
    async fn fetch(&self, cask: &Cask, force: bool) -> Result<PathBuf> {
        let strategy = self.strategy_for(cask);

        if force || cask.version.is_latest() {
            debug!(token = %cask.token, "Clearing download cache");
            strategy.clear_cache()?;
        }

        fs::create_dir_all(&self.cache)
            .map_err(CaskError::io(format!("creating {}", self.cache.display())))?;

        self.reporter
            .section(&format!("Downloading {}", cask.url.url));
        let path = strategy.fetch().await?;
        info!(token = %cask.token, path = %path.display(), "Downloaded");
        Ok(path)
    }

    fn clear_cache(&self, cask: &Cask) -> Result<()> {
        self.strategy_for(cask).clear_cache()
    }
}

fn build_client(user_agent: &str, trust_cert: bool) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .danger_accept_invalid_certs(trust_cert)
        .build()
        .map_err(|e| CaskError::io("building HTTP client")(io::Error::other(e)))
}

/// Extension inferred from the URL path, or from the first query value
/// that looks like a filename (CDN and redirect URLs).
pub fn guess_extension(url: &str) -> String {
    let from = |s: &str| {
        let name = s.rsplit('/').next().unwrap_or(s);
        EXTENSION
            .as_ref()?
            .captures(name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    let Ok(parsed) = Url::parse(url) else {
        return from(url.split(['?', '#']).next().unwrap_or("")).unwrap_or_default();
    };

    from(parsed.path())
        .or_else(|| parsed.query_pairs().find_map(|(_, v)| from(&*v)))
        .unwrap_or_default()
}

fn incomplete_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(INCOMPLETE_SUFFIX);
    PathBuf::from(name)
}

#[derive(Error, Debug)]
enum TransferError {
    #[error("server does not support resuming")]
    RangeNotSatisfiable,

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Plain GET or form POST over HTTP(S).
pub struct HttpDownloadStrategy<'a> {
    cask: &'a Cask,
    manager: &'a DownloadManager,
    post: bool,
}

impl HttpDownloadStrategy<'_> {
    async fn transfer(&self, client: &Client, partial: &Path) -> Result<(), TransferError> {
        let source = &self.cask.url;
        let resume_from = tokio::fs::metadata(partial).await.map_or(0, |m| m.len());

        let mut request = if self.post {
            client.post(&source.url).form(&source.data)
        } else {
            client.get(&source.url)
        };
        for (k, v) in &source.headers {
            request = request.header(k.as_str(), v.as_str());
        }
        if !source.cookies.is_empty() {
            let cookie = source
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(header::COOKIE, cookie);
        }
        if let Some(referer) = &source.referer {
            request = request.header(header::REFERER, referer);
        }
        if resume_from > 0 {
            debug!(offset = resume_from, "Resuming partial download");
            request = request.header(header::RANGE, format!("bytes={resume_from}-"));
        }

        let response = request.send().await?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(TransferError::RangeNotSatisfiable);
        }
        let response = response.error_for_status()?;

        let append = resume_from > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        let mut options = tokio::fs::OpenOptions::new();
        if append {
            options.append(true);
        } else {
            options.create(true).write(true).truncate(true);
        }
        let mut file = options.open(partial).await?;

        let mut downloaded = if append { resume_from } else { 0 };
        let total = response.content_length().map(|len| len + downloaded);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.manager
                .reporter
                .downloading(&self.cask.token, downloaded, total);
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DownloadStrategy for HttpDownloadStrategy<'_> {
    fn cached_location(&self) -> PathBuf {
        let ext = guess_extension(&self.cask.url.url);
        self.manager
            .cache
            .join(format!("{}--{}{ext}", self.cask.token, self.cask.version))
    }

    async fn fetch(&self) -> Result<PathBuf> {
        let dest = self.cached_location();
        let _lock = self.manager.lock(&dest)?;

        if dest.is_file() {
            debug!(path = %dest.display(), "Already downloaded");
            return Ok(dest);
        }

        let client = if self.cask.url.trust_cert {
            build_client(&self.manager.user_agent, true)?
        } else {
            self.manager.client.clone()
        };

        let partial = incomplete_path(&dest);
        let mut outcome = self.transfer(&client, &partial).await;

        if matches!(outcome, Err(TransferError::RangeNotSatisfiable)) && partial.exists() {
            debug!(path = %partial.display(), "Discarding partial download and retrying");
            remove_path(&partial)?;
            outcome = self.transfer(&client, &partial).await;
        }

        if let Err(e) = outcome {
            return Err(CaskError::DownloadFailed {
                token: self.cask.token.clone(),
                url: self.cask.url.url.clone(),
                reason: e.to_string(),
                partial: partial.exists().then_some(partial),
            });
        }

        fs::rename(&partial, &dest).map_err(CaskError::io(format!(
            "moving {} into place",
            partial.display()
        )))?;
        Ok(dest)
    }

    fn clear_cache(&self) -> Result<()> {
        let dest = self.cached_location();
        let _lock = self.manager.lock(&dest)?;
        remove_path(&dest)?;
        remove_path(&incomplete_path(&dest))
    }
}

/// Subversion checkout, packed into a tarball for staging.
pub struct SubversionDownloadStrategy<'a> {
    cask: &'a Cask,
    manager: &'a DownloadManager,
}

impl SubversionDownloadStrategy<'_> {
    fn working_copy(&self) -> PathBuf {
        self.manager
            .cache
            .join(format!("{}--{SVN_CACHE_TAG}", self.cask.token))
    }

    fn svn(&self, subcommand: &str) -> SystemCommand {
        let mut cmd = SystemCommand::new("svn")
            .arg(subcommand)
            .args(["--config-option", "config:miscellany:use-commit-times=yes"]);
        if self.cask.url.trust_cert {
            cmd = cmd.args(["--trust-server-cert", "--non-interactive"]);
        }
        cmd
    }

    fn fetch_repo(
        &self,
        target: &Path,
        url: &str,
        revision: Option<&str>,
        ignore_externals: bool,
    ) -> Result<()> {
        let checkout = !target.join(".svn").is_dir();
        let mut cmd = self.svn(if checkout { "checkout" } else { "update" });
        if ignore_externals {
            cmd = cmd.arg("--ignore-externals");
        }
        if let Some(rev) = revision {
            cmd = cmd.args(["-r", rev]);
        }
        cmd = if checkout {
            cmd.arg("--force").arg(url).arg(target)
        } else {
            cmd.current_dir(target)
        };
        self.manager.runner.run(&cmd)?;
        Ok(())
    }

    fn tarball(&self, working_copy: &Path, dest: &Path) -> Result<()> {
        let ctx = || format!("packing {}", working_copy.display());
        let file = fs::File::create(dest).map_err(CaskError::io(ctx()))?;
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);

        let entries = WalkDir::new(working_copy)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".svn");
        for entry in entries {
            let entry = entry.map_err(|e| CaskError::io(ctx())(io::Error::other(e)))?;
            let rel = entry
                .path()
                .strip_prefix(working_copy)
                .map_err(|e| CaskError::io(ctx())(io::Error::other(e)))?;
            builder
                .append_path_with_name(entry.path(), rel)
                .map_err(CaskError::io(ctx()))?;
        }
        builder
            .into_inner()
            .and_then(|mut f| f.flush())
            .map_err(CaskError::io(ctx()))
    }
}

#[async_trait]
impl DownloadStrategy for SubversionDownloadStrategy<'_> {
    fn cached_location(&self) -> PathBuf {
        self.manager.cache.join(format!(
            "{}--{SVN_CACHE_TAG}-{}.tar",
            self.cask.token, self.cask.version
        ))
    }

    async fn fetch(&self) -> Result<PathBuf> {
        let working_copy = self.working_copy();
        let dest = self.cached_location();
        let _lock = self.manager.lock(&working_copy)?;

        let source = &self.cask.url;
        let has_externals = !source.revisions.is_empty();
        self.fetch_repo(
            &working_copy,
            &source.url,
            source.revision.as_deref(),
            has_externals,
        )?;
        for (name, revision) in &source.revisions {
            let url = format!("{}/{name}", source.url.trim_end_matches('/'));
            self.fetch_repo(&working_copy.join(name), &url, Some(revision), false)?;
        }

        self.tarball(&working_copy, &dest)?;
        Ok(dest)
    }

    fn clear_cache(&self) -> Result<()> {
        let working_copy = self.working_copy();
        let _lock = self.manager.lock(&working_copy)?;
        remove_path(&working_copy)?;
        remove_path(&self.cached_location())
    }
}

/// Hex SHA256 of a file.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let ctx = || format!("hashing {}", path.display());
    let mut file = fs::File::open(path).map_err(CaskError::io(ctx()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(CaskError::io(ctx()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Check a downloaded file against the cask's declared checksum.
///
/// A mismatching file is left in place for inspection.
///
/// # Errors
///
/// [`CaskError::ChecksumMissing`] when no checksum is declared,
/// [`CaskError::ChecksumMismatch`] when the digest differs.
pub fn verify_checksum(cask: &Cask, path: &Path) -> Result<()> {
    match &cask.sha256 {
        None => Err(CaskError::ChecksumMissing {
            token: cask.token.clone(),
        }),
        Some(Checksum::NoCheck) => {
            debug!(token = %cask.token, "Checksum verification skipped");
            Ok(())
        }
        Some(Checksum::Sha256(expected)) => {
            let actual = sha256_file(path)?;
            if actual == expected.as_str() {
                Ok(())
            } else {
                Err(CaskError::ChecksumMismatch {
                    token: cask.token.clone(),
                    expected: expected.to_string(),
                    actual,
                    path: path.to_path_buf(),
                })
            }
        }
    }
}
