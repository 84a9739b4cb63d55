use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::normalize::{DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS, EDGE_NORM_URL, NODE_NORM_URL};
use crate::variant_norm::{DEFAULT_VARIANT_CHUNK_SIZE, VariantNormalization};

pub const DEFAULT_CONFIG_FILE: &str = "kira-qtl.json";
pub const DEFAULT_GTEX_VERSION: u32 = 8;
pub const DEFAULT_OUTPUT_FILE: &str = "gtex_kgx.json";
pub const DEFAULT_SOURCE_BASE_URL: &str =
    "https://storage.googleapis.com/gtex_analysis_v{version}/single_tissue_qtl_data";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub gtex_version: Option<u32>,
    #[serde(default)]
    pub source_base_url: Option<String>,
    #[serde(default)]
    pub node_norm_url: Option<String>,
    #[serde(default)]
    pub edge_norm_url: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub variant_chunk_size: Option<usize>,
    #[serde(default)]
    pub variant_normalization: Option<String>,
    #[serde(default)]
    pub normalize_predicates: Option<bool>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub keep_archives: Option<bool>,
    #[serde(default)]
    pub test_mode: Option<bool>,
}

/// Command line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub gtex_version: Option<u32>,
    pub output_dir: Option<String>,
    pub output_file: Option<String>,
    pub workers: Option<usize>,
    pub test_mode: bool,
    pub keep_archives: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub gtex_version: u32,
    pub source_base_url: String,
    pub node_norm_url: String,
    pub edge_norm_url: String,
    pub chunk_size: usize,
    pub workers: usize,
    pub variant_chunk_size: usize,
    pub variant_normalization: VariantNormalization,
    pub normalize_predicates: bool,
    pub output_dir: Utf8PathBuf,
    pub output_file: String,
    pub keep_archives: bool,
    pub test_mode: bool,
}

impl ResolvedConfig {
    pub fn output_path(&self) -> Utf8PathBuf {
        self.output_dir.join(&self.output_file)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `kira-qtl.json` in the working directory. Without an
    /// explicit path a missing default file means built-in defaults.
    pub fn resolve(
        path: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let gtex_version = overrides
            .gtex_version
            .or(config.gtex_version)
            .unwrap_or(DEFAULT_GTEX_VERSION);
        let source_base_url = config
            .source_base_url
            .unwrap_or_else(|| DEFAULT_SOURCE_BASE_URL.to_string())
            .replace("{version}", &gtex_version.to_string());

        let chunk_size = config.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(KiraError::ConfigParse("chunk_size must be positive".to_string()));
        }
        let variant_chunk_size = config
            .variant_chunk_size
            .unwrap_or(DEFAULT_VARIANT_CHUNK_SIZE);
        if variant_chunk_size == 0 {
            return Err(KiraError::ConfigParse(
                "variant_chunk_size must be positive".to_string(),
            ));
        }
        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(KiraError::ConfigParse("workers must be positive".to_string()));
        }

        let variant_normalization = match config.variant_normalization.as_deref() {
            Some(value) => VariantNormalization::parse(value)?,
            None => VariantNormalization::default(),
        };

        Ok(ResolvedConfig {
            schema_version,
            gtex_version,
            source_base_url,
            node_norm_url: config
                .node_norm_url
                .unwrap_or_else(|| NODE_NORM_URL.to_string()),
            edge_norm_url: config
                .edge_norm_url
                .unwrap_or_else(|| EDGE_NORM_URL.to_string()),
            chunk_size,
            workers,
            variant_chunk_size,
            variant_normalization,
            normalize_predicates: config.normalize_predicates.unwrap_or(false),
            output_dir: Utf8PathBuf::from(
                overrides
                    .output_dir
                    .clone()
                    .or(config.output_dir)
                    .unwrap_or_else(|| ".".to_string()),
            ),
            output_file: overrides
                .output_file
                .clone()
                .or(config.output_file)
                .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string()),
            keep_archives: overrides.keep_archives || config.keep_archives.unwrap_or(false),
            test_mode: overrides.test_mode || config.test_mode.unwrap_or(false),
        })
    }
}
