//! Deployment configuration.
//!
//! Every field defaults to the values the stack was originally declared with,
//! so a missing config file synthesizes the reference topology. A TOML file
//! (`mycloud.toml` by default) can override any of them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::regions;
use crate::resources::s3_bucket::verify_bucket_name;
use crate::template::validate_stack_name;

pub const DEFAULT_CONFIG_FILE: &str = "mycloud.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    pub stack_name: String,
    pub region: String,

    /// directory zipped into the handlers' shared deployment artifact.
    pub asset_dir: PathBuf,
    /// bucket the artifact is uploaded to before deploying. Empty means
    /// `{stack name}-assets-{region}`, see [`StackConfig::asset_bucket_name`].
    pub asset_bucket: String,

    pub runtime: String,
    /// memory to give each handler (in MB). Valid values: 128 - 10240
    pub memory_size: u32,
    pub stage_name: String,

    pub domain_name: String,
    pub certificate_arn: String,
    pub hosted_zone_id: String,
    pub hosted_zone_name: String,

    /// source ranges the web ACL lets through. Everything else is blocked.
    /// The default is a single development address; review before production use.
    pub allowed_cidrs: Vec<String>,
    pub error_page_path: String,

    pub log_bucket_name: String,
    pub log_expiration_days: u32,
    pub comment: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "MycloudStack".into(),
            region: "us-east-1".into(),
            asset_dir: PathBuf::from("hello"),
            asset_bucket: String::new(),
            runtime: "python3.9".into(),
            memory_size: 1024,
            stage_name: "prod".into(),
            domain_name: "navintypescriptdeveops.com".into(),
            certificate_arn: "arn:aws:acm:us-east-1:814445629751:certificate/8f3a96b3-470e-4775-a89c-8f6d814bf3bb".into(),
            hosted_zone_id: "Z0918647YP9QBSN696HQ".into(),
            hosted_zone_name: "navintypescriptdeveops.com.".into(),
            allowed_cidrs: vec!["103.16.13.205/32".into()],
            error_page_path: "//cloudfronterrorbucket.s3.sa-east-1.amazonaws.com/error.html".into(),
            log_bucket_name: "nvlambdalogbucket".into(),
            log_expiration_days: 30,
            comment: "nv lambda Api".into(),
        }
    }
}

impl StackConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|source| Error::ConfigRead { path: path_str.clone(), source })?;
        Self::from_toml_str(&contents)
            .map_err(|source| Error::ConfigParse { path: path_str, source })
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// the configured asset bucket, or one derived from the stack name and
    /// region. Bucket names are global, so the derived name is scoped to both.
    pub fn asset_bucket_name(&self) -> String {
        if !self.asset_bucket.is_empty() {
            return self.asset_bucket.clone();
        }
        format!("{}-assets-{}", self.stack_name.to_ascii_lowercase(), self.region)
    }

    /// loads `path` if given. Otherwise loads `mycloud.toml` from the current
    /// directory if present, falling back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::load(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::load(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// checks only what is knowable locally. Certificates, zones and
    /// artifacts are validated by CloudFormation when the stack is applied.
    pub fn validate(&self) -> Result<()> {
        validate_stack_name(&self.stack_name)?;
        regions::verify_region(&self.region)?;
        if self.memory_size < 128 || self.memory_size > 10240 {
            return Err(Error::Config(format!("Invalid memory size {:?}\nMust be between 128 and 10240", self.memory_size)));
        }
        if self.stage_name.is_empty() || !self.stage_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::Config(format!("Invalid stage name {:?}\nMust be non-empty and contain only [A-Za-z0-9_-]", self.stage_name)));
        }
        if self.allowed_cidrs.is_empty() {
            return Err(Error::Config("Must allow at least one CIDR through the web ACL".into()));
        }
        if self.log_expiration_days < 1 {
            return Err(Error::Config(format!("Invalid log expiration {:?}\nMust be at least 1 day", self.log_expiration_days)));
        }
        verify_bucket_name(&self.asset_bucket_name())
            .map_err(|e| Error::Config(format!("{e}\nSet asset_bucket to a bucket name you own")))?;
        if self.domain_name.is_empty() {
            return Err(Error::Config("Must provide a domain name for the distribution".into()));
        }
        Ok(())
    }
}
