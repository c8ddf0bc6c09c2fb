//! Applies a synthesized template: uploads the handler archive, then creates
//! or updates the CloudFormation stack and waits for it to settle.

use std::collections::BTreeMap;

use aws_sdk_cloudformation::config::Region;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Parameter, Stack, StackStatus};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tracing::{debug, info, warn};

use crate::asset::{self, Asset};
use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::regions;
use crate::stack::{MycloudStack, ASSET_BUCKET_PARAM, ASSET_KEY_PARAM};

const POLL_INTERVAL_MS: u64 = 700;

/// where a stack is in its lifecycle, as far as a deploy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackProgress {
    Complete,
    InProgress,
    Failed,
}

pub fn stack_progress(status: &StackStatus) -> StackProgress {
    match status {
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::ImportComplete => StackProgress::Complete,

        StackStatus::CreateInProgress |
        StackStatus::DeleteInProgress |
        StackStatus::ImportInProgress |
        StackStatus::ImportRollbackInProgress |
        StackStatus::ReviewInProgress |
        StackStatus::RollbackInProgress |
        StackStatus::UpdateCompleteCleanupInProgress |
        StackStatus::UpdateInProgress |
        StackStatus::UpdateRollbackCompleteCleanupInProgress |
        StackStatus::UpdateRollbackInProgress => StackProgress::InProgress,

        // a rolled back update leaves a usable stack, but the deploy did not apply.
        StackStatus::UpdateRollbackComplete |
        StackStatus::ImportRollbackComplete |
        StackStatus::DeleteComplete |
        StackStatus::RollbackComplete |
        StackStatus::CreateFailed |
        StackStatus::DeleteFailed |
        StackStatus::ImportRollbackFailed |
        StackStatus::RollbackFailed |
        StackStatus::UpdateFailed |
        StackStatus::UpdateRollbackFailed |
        _ => StackProgress::Failed,
    }
}

fn is_missing_stack_error(e_str: &str) -> bool {
    e_str.contains("does not exist")
}

fn is_no_update_error(e_str: &str) -> bool {
    e_str.contains("No updates are to be performed")
}

pub fn stack_parameters(asset_bucket: &str, asset_key: &str) -> Vec<Parameter> {
    [(ASSET_BUCKET_PARAM, asset_bucket), (ASSET_KEY_PARAM, asset_key)]
        .into_iter()
        .map(|(key, value)| Parameter::builder().parameter_key(key).parameter_value(value).build())
        .collect()
}

pub async fn does_stack_exist(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<bool> {
    match client.describe_stacks().stack_name(name).send().await {
        Ok(_) => Ok(true),
        Err(e) => {
            let e_str = format!("{:#?}", e);
            if is_missing_stack_error(&e_str) {
                return Ok(false);
            }
            Err(Error::Deploy(e_str))
        }
    }
}

/// `Some(stack)` once the stack reached a successful terminal state, `None`
/// while it is still in progress.
pub async fn describe_stack(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<Option<Stack>> {
    let described = match client.describe_stacks().stack_name(name).send().await {
        Ok(d) => d,
        Err(e) => {
            let e_str = format!("{:#?}", e);
            if is_missing_stack_error(&e_str) {
                return Err(Error::Deploy(format!("Stack {name} no longer exists. It was likely rolled back and deleted")));
            }
            return Err(Error::Deploy(e_str));
        }
    };
    let first = described.stacks().and_then(|stacks| stacks.first())
        .ok_or_else(|| Error::Deploy(format!("Stack {name} not found")))?;
    let status = first.stack_status()
        .ok_or_else(|| Error::Deploy(format!("Stack {name} has no status")))?;
    match stack_progress(status) {
        StackProgress::Complete => Ok(Some(first.clone())),
        StackProgress::InProgress => {
            debug!(stack = name, status = status.as_str(), "waiting on stack");
            Ok(None)
        }
        StackProgress::Failed => Err(Error::Deploy(format!(
            "Stack {name} ended in {}: {}",
            status.as_str(),
            first.stack_status_reason().unwrap_or("Failed to get stack failure reason"),
        ))),
    }
}

/// the stack's outputs, whatever its status.
pub fn stack_outputs(stack: &Stack) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for output in stack.outputs().unwrap_or_default() {
        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
            out.insert(key.to_string(), val.to_string());
        }
    }
    out
}

pub async fn wait_for_output(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<BTreeMap<String, String>> {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
        if let Some(stack) = describe_stack(client, name).await? {
            return Ok(stack_outputs(&stack));
        }
    }
}

/// outputs of a stack that was left as it is. A rolled back earlier update
/// still counts, since the live template is the one requested.
pub async fn current_outputs(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<BTreeMap<String, String>> {
    let described = client.describe_stacks().stack_name(name).send().await
        .map_err(|e| Error::Deploy(format!("{:#?}", e)))?;
    let first = described.stacks().and_then(|stacks| stacks.first())
        .ok_or_else(|| Error::Deploy(format!("Stack {name} not found")))?;
    Ok(stack_outputs(first))
}

/// what `create_or_update_stack` asked CloudFormation to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackChange {
    Created,
    Updated,
    Unchanged,
}

impl StackChange {
    /// only a started operation has a status worth polling.
    pub fn needs_wait(&self) -> bool {
        !matches!(self, StackChange::Unchanged)
    }
}

pub async fn create_or_update_stack(
    client: &aws_sdk_cloudformation::Client,
    name: &str,
    body: &str,
    parameters: Vec<Parameter>,
) -> Result<StackChange> {
    if does_stack_exist(client, name).await? {
        info!(stack = name, "updating stack");
        let result = client
            .update_stack()
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .set_parameters(Some(parameters))
            .send()
            .await;
        if let Err(e) = result {
            let e_str = format!("{:#?}", e);
            if is_no_update_error(&e_str) {
                info!(stack = name, "stack is already up to date");
                return Ok(StackChange::Unchanged);
            }
            return Err(Error::Deploy(e_str));
        }
        Ok(StackChange::Updated)
    } else {
        info!(stack = name, "creating stack");
        client
            .create_stack()
            .on_failure(OnFailure::Delete)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .set_parameters(Some(parameters))
            .send()
            .await
            .map_err(|e| Error::Deploy(format!("{:#?}", e)))?;
        Ok(StackChange::Created)
    }
}

pub async fn ensure_asset_bucket(client: &aws_sdk_s3::Client, bucket: &str, region: &str) -> Result<()> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => {
            debug!(bucket, "asset bucket exists");
            return Ok(());
        }
        // anything but a 404 means the name is taken or unreachable, so creating it would fail too.
        Err(e) if !matches!(&e, aws_sdk_s3::error::SdkError::ServiceError(se) if se.err().is_not_found()) => {
            return Err(Error::Deploy(format!(
                "Asset bucket {bucket} exists but is not accessible. Set asset_bucket to a bucket you own\n{:#?}", e
            )));
        }
        Err(_) => {}
    }
    info!(bucket, region, "creating asset bucket");
    let mut request = client.create_bucket().bucket(bucket);
    if regions::needs_location_constraint(region) {
        let configuration = CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build();
        request = request.create_bucket_configuration(configuration);
    }
    request.send().await.map_err(|e| Error::Deploy(format!("{:#?}", e)))?;
    Ok(())
}

pub async fn upload_asset(client: &aws_sdk_s3::Client, bucket: &str, asset: &Asset) -> Result<String> {
    let key = asset.key();
    info!(bucket, key = %key, size = asset.bytes.len(), "uploading asset");
    client
        .put_object()
        .bucket(bucket)
        .key(&key)
        .body(ByteStream::from(asset.bytes.clone()))
        .send()
        .await
        .map_err(|e| Error::Deploy(format!("{:#?}", e)))?;
    Ok(key)
}

/// packages the handlers, uploads them, applies the stack and returns its outputs.
pub async fn deploy(config: &StackConfig) -> Result<BTreeMap<String, String>> {
    if config.region != "us-east-1" {
        warn!(region = %config.region, "web ACLs and certificates used by CloudFront must live in us-east-1");
    }
    let asset = asset::package_dir(&config.asset_dir)?;
    let template_body = MycloudStack::new(config)?.synth()?;

    let shared_config = aws_config::from_env()
        .region(Region::new(config.region.clone()))
        .load()
        .await;
    let s3 = aws_sdk_s3::Client::new(&shared_config);
    let cfn = aws_sdk_cloudformation::Client::new(&shared_config);

    let asset_bucket = config.asset_bucket_name();
    ensure_asset_bucket(&s3, &asset_bucket, &config.region).await?;
    let key = upload_asset(&s3, &asset_bucket, &asset).await?;

    let parameters = stack_parameters(&asset_bucket, &key);
    let change = create_or_update_stack(&cfn, &config.stack_name, &template_body, parameters).await?;
    let outputs = if change.needs_wait() {
        wait_for_output(&cfn, &config.stack_name).await?
    } else {
        current_outputs(&cfn, &config.stack_name).await?
    };
    info!(stack = %config.stack_name, ?change, outputs = outputs.len(), "stack deployed");
    Ok(outputs)
}
