//! Error types for synthesizing and deploying the stack.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid template: {0}")]
    Template(String),

    #[error("failed to serialize template: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("asset io error: {0}")]
    AssetIo(#[from] std::io::Error),

    #[error("failed to zip asset: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("deployment failed: {0}")]
    Deploy(String),
}
