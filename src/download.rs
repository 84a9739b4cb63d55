use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use reqwest::blocking::Client;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::cancel::CancelFlag;
use crate::error::KiraError;
use crate::http::{self, MAX_RETRIES};

/// Outcome of a fetch: every requested file is present locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub retrieved: usize,
    pub already_present: usize,
    pub files: Vec<PathBuf>,
}

impl DownloadReport {
    pub fn count(&self) -> usize {
        self.retrieved + self.already_present
    }
}

pub trait ArchiveDownloader: Send + Sync {
    /// Retrieves `files` from `base_url` into `dest_dir`, skipping files that
    /// already exist there with a nonzero size.
    fn fetch(
        &self,
        base_url: &str,
        files: &[String],
        dest_dir: &Path,
    ) -> Result<DownloadReport, KiraError>;
}

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of one transfer attempt that did not fail for good.
enum Attempt {
    Complete(NamedTempFile),
    Transient(String),
}

/// Downloads over HTTP. Each attempt covers the request and the whole body,
/// so a connection dropped mid-transfer is retried from scratch.
#[derive(Clone)]
pub struct HttpArchiveDownloader {
    client: Client,
    max_retries: usize,
    cancel: CancelFlag,
}

impl HttpArchiveDownloader {
    pub fn new() -> Result<Self, KiraError> {
        let client = http::build_client(None)?;
        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            cancel: CancelFlag::default(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn fetch_one(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let parent = destination
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tracing::warn!(url = %url, attempt, error = %last_error, "retrying transfer");
                thread::sleep(http::retry_delay(attempt - 1));
            }
            self.cancel.check()?;
            match self.attempt(url, parent)? {
                Attempt::Complete(temp) => {
                    temp.persist(destination)
                        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
                    return Ok(());
                }
                Attempt::Transient(reason) => last_error = reason,
            }
        }

        Err(KiraError::TransferExhausted {
            url: url.to_string(),
            attempts,
            message: last_error,
        })
    }

    fn attempt(&self, url: &str, parent: &Path) -> Result<Attempt, KiraError> {
        let mut response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(err) if http::is_retryable_error(&err) => {
                return Ok(Attempt::Transient(err.to_string()));
            }
            Err(err) => return Err(KiraError::DownloadHttp(format!("{url}: {err}"))),
        };

        let status = response.status().as_u16();
        if http::is_retryable_status(status) {
            return Ok(Attempt::Transient(format!("status {status}")));
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "archive request failed".to_string());
            return Err(KiraError::DownloadStatus { status, message });
        }

        let mut temp = tempfile::Builder::new()
            .prefix(".kira-qtl-download")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            self.cancel.check()?;
            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Ok(Attempt::Transient(format!(
                        "body interrupted after {copied} bytes: {err}"
                    )));
                }
            };
            temp.as_file_mut()
                .write_all(&buffer[..read])
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            copied += read as u64;
        }
        tracing::debug!(url = %url, bytes = copied, "transfer complete");
        Ok(Attempt::Complete(temp))
    }
}

impl ArchiveDownloader for HttpArchiveDownloader {
    fn fetch(
        &self,
        base_url: &str,
        files: &[String],
        dest_dir: &Path,
    ) -> Result<DownloadReport, KiraError> {
        fs::create_dir_all(dest_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut report = DownloadReport::default();
        for file in files {
            let destination = dest_dir.join(file);
            if is_present(&destination) {
                tracing::info!(file = %destination.display(), "archive already present");
                report.already_present += 1;
                report.files.push(destination);
                continue;
            }
            let url = format!("{}/{file}", base_url.trim_end_matches('/'));
            tracing::info!(url = %url, "downloading archive");
            self.fetch_one(&url, &destination)?;
            report.retrieved += 1;
            report.files.push(destination);
        }
        Ok(report)
    }
}

pub fn is_present(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_not_present() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.tar");
        let full = dir.path().join("full.tar");
        fs::write(&empty, b"").unwrap();
        fs::write(&full, b"data").unwrap();
        assert!(!is_present(&empty));
        assert!(is_present(&full));
        assert!(!is_present(&dir.path().join("missing.tar")));
    }
}
