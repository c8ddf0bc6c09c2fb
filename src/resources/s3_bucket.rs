//! S3 buckets, and the cleanup resources that let a non-empty bucket be
//! deleted together with its stack.
//!
//! CloudFormation cannot delete a bucket that still contains objects. For
//! buckets declared with [`with_cleanup`], a custom resource backed by a small
//! inline function empties the bucket when the stack is deleted, before
//! CloudFormation deletes the bucket itself.

use serde::Serialize;
use serde_json::Value;

use super::iam::{assume_role_policy_doc, aws_managed_policy_arn, create_policy_doc, CfnRole, Policy, PolicyStatement};
use super::lambda::{CfnFunction, Code};
use crate::template::{get_att, get_ref, join, CfnResource, DeletionPolicy, Resource, StrVal};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<StrVal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_configuration: Option<LifecycleConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership_controls: Option<OwnershipControls>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleConfiguration {
    pub rules: Vec<LifecycleRule>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_in_days: Option<u32>,
    pub status: String,
}

impl LifecycleRule {
    pub fn expire_after_days(days: u32) -> Self {
        Self {
            expiration_in_days: Some(days),
            status: "Enabled".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipControls {
    pub rules: Vec<OwnershipControlsRule>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipControlsRule {
    pub object_ownership: String,
}

impl OwnershipControls {
    /// keeps ACLs enabled. CloudFront standard logging writes through ACLs.
    pub fn object_writer() -> Self {
        Self {
            rules: vec![OwnershipControlsRule { object_ownership: "ObjectWriter".into() }],
        }
    }
}

/// checks the general purpose bucket naming rules.
pub fn verify_bucket_name(name: &str) -> Result<(), String> {
    let restriction = "Must be 3-63 characters of lowercase letters, numbers, dots and hyphens, and begin and end with a letter or number.";
    let invalid = || format!("Invalid bucket name {:?}\n{}", name, restriction);
    if name.len() < 3 || name.len() > 63 {
        return Err(invalid());
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-') {
        return Err(invalid());
    }
    let edge_ok = |c: Option<char>| c.map_or(false, |c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(invalid());
    }
    if name.contains("..") {
        return Err(invalid());
    }
    Ok(())
}

impl CfnResource for CfnBucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(name) = self.bucket_name.as_ref().and_then(StrVal::as_literal) {
            verify_bucket_name(name)?;
        }
        if let Some(lifecycle) = &self.lifecycle_configuration {
            for rule in lifecycle.rules.iter() {
                if rule.expiration_in_days == Some(0) {
                    return Err("lifecycle expiration must be at least 1 day".into());
                }
                if rule.status != "Enabled" && rule.status != "Disabled" {
                    return Err(format!("Invalid lifecycle rule status {:?}", rule.status));
                }
            }
        }
        Ok(())
    }
}

pub const CLEANUP_FUNCTION_SOURCE: &str = r#"import boto3
import cfnresponse


def handler(event, context):
    status = cfnresponse.SUCCESS
    try:
        if event['RequestType'] == 'Delete':
            bucket = boto3.resource('s3').Bucket(event['ResourceProperties']['BucketName'])
            bucket.object_versions.delete()
            bucket.objects.all().delete()
    except Exception as err:
        print(f'failed to empty bucket: {err}')
        status = cfnresponse.FAILED
    cfnresponse.send(event, context, status, {})
"#;

/// the custom resource that triggers the cleanup function.
pub struct CleanupResource {
    pub lambda_logical_id: String,
    pub bucket_logical_id: String,
}

impl CfnResource for CleanupResource {
    fn type_string(&self) -> &'static str {
        "Custom::CleanupBucket"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        let mut map = serde_json::Map::new();
        map.insert("ServiceToken".to_string(), get_att(&self.lambda_logical_id, "Arn"));
        map.insert("BucketName".to_string(), get_ref(&self.bucket_logical_id));
        Ok(Value::Object(map))
    }
}

/// declares the bucket with a `Delete` policy and the role, function and
/// custom resource that purge its contents on stack deletion.
pub fn with_cleanup(logical_bucket_name: &str, bucket: CfnBucket) -> Vec<Resource> {
    let logical_role_name = format!("{logical_bucket_name}CleanupRole");
    let logical_fn_name = format!("{logical_bucket_name}CleanupFunction");
    let logical_cleanup_name = format!("{logical_bucket_name}Cleanup");

    let bucket_objects: StrVal = join([StrVal::from(get_att(logical_bucket_name, "Arn")), "/*".into()]).into();
    let policy = Policy {
        policy_name: format!("{logical_bucket_name}-cleanup").into(),
        policy_document: create_policy_doc(&[
            PolicyStatement::allow(&["s3:ListBucket", "s3:ListBucketVersions"], vec![get_att(logical_bucket_name, "Arn").into()]),
            PolicyStatement::allow(&["s3:DeleteObject", "s3:DeleteObjectVersion"], vec![bucket_objects]),
        ]),
    };
    let role = CfnRole {
        description: Some(format!("empties {logical_bucket_name} when the stack is deleted").into()),
        assume_role_policy_document: assume_role_policy_doc("lambda.amazonaws.com"),
        managed_policy_arns: vec![aws_managed_policy_arn("service-role/AWSLambdaBasicExecutionRole")],
        policies: vec![policy],
    };
    let cleanup_function = CfnFunction {
        code: Code {
            zip_file: Some(CLEANUP_FUNCTION_SOURCE.into()),
            ..Default::default()
        },
        handler: "index.handler".into(),
        role: get_att(&logical_role_name, "Arn").into(),
        runtime: "python3.9".into(),
        timeout: Some(900),
        ..Default::default()
    };
    let cleanup = CleanupResource {
        lambda_logical_id: logical_fn_name.clone(),
        bucket_logical_id: logical_bucket_name.to_string(),
    };

    vec![
        Resource::new(logical_bucket_name, bucket).deletion_policy(DeletionPolicy::Delete),
        Resource::new(logical_role_name, role),
        Resource::new(logical_fn_name, cleanup_function),
        Resource::new(logical_cleanup_name, cleanup),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::StackBuilder;

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(verify_bucket_name("nvlambdalogbucket").is_ok());
        assert!(verify_bucket_name("my.logs-1").is_ok());
        assert!(verify_bucket_name("ab").is_err());
        assert!(verify_bucket_name("Upper").is_err());
        assert!(verify_bucket_name("-leading").is_err());
        assert!(verify_bucket_name("trailing.").is_err());
        assert!(verify_bucket_name("a..b").is_err());
    }

    #[test]
    fn lifecycle_serializes_expiration() {
        let bucket = CfnBucket {
            lifecycle_configuration: Some(LifecycleConfiguration { rules: vec![LifecycleRule::expire_after_days(30)] }),
            ..Default::default()
        };
        let props = bucket.properties().unwrap();
        assert_eq!(props["LifecycleConfiguration"]["Rules"][0]["ExpirationInDays"], 30);
        assert_eq!(props["LifecycleConfiguration"]["Rules"][0]["Status"], "Enabled");
        assert!(props.get("BucketName").is_none());
    }

    #[test]
    fn cleanup_resources_reference_the_bucket() {
        let mut builder = StackBuilder::default();
        for resource in with_cleanup("Logs", CfnBucket::default()) {
            builder.add(resource);
        }
        let template = builder.build().unwrap();
        assert_eq!(template.resources.len(), 4);
        assert_eq!(template.resources["Logs"].deletion_policy, Some(DeletionPolicy::Delete));
        let cleanup = &template.resources["LogsCleanup"];
        assert_eq!(cleanup.ty, "Custom::CleanupBucket");
        assert_eq!(cleanup.properties["BucketName"]["Ref"], "Logs");
        assert_eq!(cleanup.properties["ServiceToken"]["Fn::GetAtt"][0], "LogsCleanupFunction");
        let function = &template.resources["LogsCleanupFunction"].properties;
        assert!(function["Code"]["ZipFile"].as_str().unwrap().contains("cfnresponse.send"));
    }
}
