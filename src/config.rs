use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::annotation::InclusionFilter;
use crate::error::SpiceError;
use crate::provider::MAX_BATCH_SIZE;

pub const DEFAULT_CONFIG_FILE: &str = "spice.json";
pub const DEFAULT_PROVIDER_URL: &str = "https://rest.ensembl.org";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub gene_biotypes: Option<Vec<String>>,
    #[serde(default)]
    pub transcript_biotypes: Option<Vec<String>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub checkpoint_interval: Option<usize>,
    #[serde(default)]
    pub max_collection_passes: Option<usize>,
    #[serde(default)]
    pub min_protein_length: Option<usize>,
    #[serde(default)]
    pub provider_url: Option<String>,
    #[serde(default)]
    pub expression_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub gene_biotypes: Vec<String>,
    pub transcript_biotypes: Vec<String>,
    pub batch_size: usize,
    pub checkpoint_interval: usize,
    pub max_collection_passes: usize,
    pub min_protein_length: usize,
    pub provider_url: String,
    pub expression_threshold: f64,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            gene_biotypes: default_gene_biotypes(),
            transcript_biotypes: default_transcript_biotypes(),
            batch_size: MAX_BATCH_SIZE,
            checkpoint_interval: 250,
            max_collection_passes: 3,
            min_protein_length: 11,
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            expression_threshold: 1.0,
        }
    }
}

impl ResolvedConfig {
    /// Annotation filter built from the configured biotype allow lists.
    pub fn inclusion_filter(&self) -> InclusionFilter {
        let mut filter = InclusionFilter::new();
        filter.update("gene_biotype", &self.gene_biotypes);
        filter.update("transcript_biotype", &self.transcript_biotypes);
        filter
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `spice.json` in the working directory when no path is
    /// given. Only an explicitly named file has to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SpiceError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SpiceError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SpiceError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SpiceError> {
        let defaults = ResolvedConfig::default();

        let expression_threshold = config
            .expression_threshold
            .unwrap_or(defaults.expression_threshold);
        if !expression_threshold.is_finite() || expression_threshold < 0.0 {
            return Err(SpiceError::ConfigParse(format!(
                "expression_threshold must be a non-negative number, got {expression_threshold}"
            )));
        }
        let provider_url = config.provider_url.unwrap_or(defaults.provider_url);
        if !provider_url.starts_with("http://") && !provider_url.starts_with("https://") {
            return Err(SpiceError::ConfigParse(format!(
                "provider_url must be an http(s) URL, got {provider_url}"
            )));
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            gene_biotypes: config.gene_biotypes.unwrap_or(defaults.gene_biotypes),
            transcript_biotypes: config
                .transcript_biotypes
                .unwrap_or(defaults.transcript_biotypes),
            batch_size: config
                .batch_size
                .unwrap_or(defaults.batch_size)
                .clamp(1, MAX_BATCH_SIZE),
            checkpoint_interval: config
                .checkpoint_interval
                .unwrap_or(defaults.checkpoint_interval)
                .max(1),
            max_collection_passes: config
                .max_collection_passes
                .unwrap_or(defaults.max_collection_passes)
                .max(1),
            min_protein_length: config
                .min_protein_length
                .unwrap_or(defaults.min_protein_length),
            provider_url,
            expression_threshold,
        })
    }
}

pub fn default_gene_biotypes() -> Vec<String> {
    vec!["protein_coding".to_string()]
}

pub fn default_transcript_biotypes() -> Vec<String> {
    vec![
        "protein_coding".to_string(),
        "nonsense_mediated_decay".to_string(),
    ]
}
