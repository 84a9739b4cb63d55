use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid variant id: {0}")]
    InvalidVariantId(String),

    #[error("unknown genome build or chromosome in variant id: {0}")]
    UnknownReference(String),

    #[error("unsupported variant encoding: {0}")]
    UnsupportedVariant(String),

    #[error("unknown tissue: {0}")]
    UnknownTissue(String),

    #[error("malformed record in {member} (line {line}): {reason}")]
    MalformedRecord {
        member: String,
        line: usize,
        reason: String,
    },

    #[error("no canonical id for {0}")]
    MissingRemap(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("output directory does not exist: {0}")]
    OutputDirMissing(String),

    #[error("output file already exists: {0}")]
    OutputExists(String),

    #[error("download request failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("transfer of {url} failed after {attempts} attempts: {message}")]
    TransferExhausted {
        url: String,
        attempts: usize,
        message: String,
    },

    #[error("normalization request failed: {0}")]
    NormalizationHttp(String),

    #[error("normalization service returned status {status}: {message}")]
    NormalizationStatus { status: u16, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("failed to write KGX output: {0}")]
    Serialization(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("run cancelled")]
    Cancelled,
}
