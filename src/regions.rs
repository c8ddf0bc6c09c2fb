use crate::error::{Error, Result};

/// regions a stack can be deployed to. CloudFront scoped resources
/// (web ACLs, viewer certificates) still live in us-east-1 regardless.
pub const VALID_AWS_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "ca-west-1",
    "eu-north-1",
    "eu-west-3",
    "eu-west-2",
    "eu-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-south-1",
    "eu-south-2",
    "ap-south-1",
    "ap-south-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-east-1",
    "sa-east-1",
    "cn-north-1",
    "cn-northwest-1",
    "us-gov-east-1",
    "us-gov-west-1",
    "me-south-1",
    "me-central-1",
    "il-central-1",
    "af-south-1",
];

pub fn is_valid_region(r: &str) -> bool {
    VALID_AWS_REGIONS.contains(&r)
}

pub fn verify_region(r: &str) -> Result<()> {
    if !is_valid_region(r) {
        return Err(Error::Config(format!(
            "Invalid region code {:?}\nMust be one of {:?}",
            r, VALID_AWS_REGIONS
        )));
    }
    Ok(())
}

/// S3 rejects an explicit location constraint for us-east-1.
pub fn needs_location_constraint(r: &str) -> bool {
    r != "us-east-1"
}
