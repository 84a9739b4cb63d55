use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, NamedTempFile};

use crate::domain::DatasetKind;
use crate::error::KiraError;

/// Filesystem layout of one run: the output directory and the scratch
/// directory the archives are downloaded into.
#[derive(Debug, Clone)]
pub struct Store {
    output_dir: Utf8PathBuf,
    scratch_dir: Utf8PathBuf,
}

impl Store {
    /// Archives go to `<output_dir>/.kira-qtl`.
    pub fn new(output_dir: Utf8PathBuf) -> Self {
        let scratch_dir = output_dir.join(".kira-qtl");
        Self {
            output_dir,
            scratch_dir,
        }
    }

    pub fn new_with_paths(output_dir: Utf8PathBuf, scratch_dir: Utf8PathBuf) -> Self {
        Self {
            output_dir,
            scratch_dir,
        }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn scratch_dir(&self) -> &Utf8Path {
        &self.scratch_dir
    }

    pub fn output_path(&self, file_name: &str) -> Utf8PathBuf {
        self.output_dir.join(file_name)
    }

    pub fn archive_path(&self, kind: DatasetKind, gtex_version: u32) -> Utf8PathBuf {
        self.scratch_dir.join(kind.archive_file_name(gtex_version))
    }

    /// The output directory must exist and the output file must not.
    pub fn validate_output(&self, file_name: &str) -> Result<Utf8PathBuf, KiraError> {
        if !self.output_dir.as_std_path().is_dir() {
            return Err(KiraError::OutputDirMissing(self.output_dir.to_string()));
        }
        let path = self.output_path(file_name);
        if path.as_std_path().exists() {
            return Err(KiraError::OutputExists(path.to_string()));
        }
        Ok(path)
    }

    pub fn ensure_scratch_dir(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.scratch_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Temporary file next to the final output. Dropping it without
    /// [`Store::persist_output`] removes it.
    pub fn output_temp(&self) -> Result<NamedTempFile, KiraError> {
        Builder::new()
            .prefix(".kira-qtl-output")
            .suffix(".json")
            .tempfile_in(self.output_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn persist_output(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), KiraError> {
        temp.persist_noclobber(dest.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn archive_guard(&self, archives: Vec<Utf8PathBuf>, keep: bool) -> ArchiveGuard {
        ArchiveGuard {
            archives: archives.into_iter().map(Utf8PathBuf::into_std_path_buf).collect(),
            scratch_dir: self.scratch_dir.clone().into_std_path_buf(),
            keep,
        }
    }
}

/// Deletes the downloaded archives when dropped, on success and failure
/// alike, unless the run asked to keep them.
#[derive(Debug)]
pub struct ArchiveGuard {
    archives: Vec<PathBuf>,
    scratch_dir: PathBuf,
    keep: bool,
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for archive in &self.archives {
            if archive.is_file() {
                if let Err(err) = fs::remove_file(archive) {
                    tracing::warn!(
                        archive = %archive.display(),
                        error = %err,
                        "failed to remove archive"
                    );
                } else {
                    tracing::debug!(archive = %archive.display(), "removed archive");
                }
            }
        }
        // Only succeeds when nothing else was left behind.
        let _ = fs::remove_dir(&self.scratch_dir);
    }
}
