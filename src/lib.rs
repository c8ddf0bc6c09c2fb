//! Declares, synthesizes and deploys a small serverless web stack: three
//! python handlers behind a REST api, fronted by CloudFront with an IP
//! allow-list firewall, access logs and an apex DNS alias.

pub mod asset;
pub mod config;
pub mod deploy;
pub mod error;
pub mod regions;
pub mod resources;
pub mod stack;
pub mod template;

pub use config::StackConfig;
pub use error::{Error, Result};
pub use stack::{synth, MycloudStack};
pub use template::Template;
