use serde::Serialize;
use serde_json::Value;

use crate::template::{get_att, CfnResource, StrVal};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnFunction {
    pub code: Code,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<StrVal>,
    pub handler: StrVal,
    /// memory to give your function (in MB). Valid values: 128 - 10240
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u32>,
    pub role: StrVal,
    pub runtime: StrVal,
    /// timeout of your function (in seconds). Valid values: 1 - 900
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// where the function's code lives: an uploaded artifact or inline source.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Code {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<StrVal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<StrVal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_file: Option<StrVal>,
}

impl CfnResource for CfnFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(memory) = self.memory_size {
            if !(128..=10240).contains(&memory) {
                return Err(format!("Invalid memory size {:?}\nMust be between 128 and 10240", memory));
            }
        }
        if let Some(timeout) = self.timeout {
            if !(1..=900).contains(&timeout) {
                return Err(format!("Invalid timeout {:?}\nMust be between 1 and 900", timeout));
            }
        }
        if let Some(handler) = self.handler.as_literal() {
            // python and node handlers are `<module>.<function>`
            match handler.split_once('.') {
                Some((module, func)) if !module.is_empty() && !func.is_empty() => {}
                _ => return Err(format!("Invalid handler {:?}\nMust look like <file>.<function>", handler)),
            }
        }
        let Code { s3_bucket, s3_key, zip_file } = &self.code;
        match (s3_bucket, s3_key, zip_file) {
            (Some(_), Some(_), None) | (None, None, Some(_)) => Ok(()),
            _ => Err("function code must be either an S3 bucket and key, or an inline zip file".into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnPermission {
    pub action: StrVal,
    pub function_name: StrVal,
    pub principal: StrVal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_arn: Option<StrVal>,
}

impl_cfn_resource!(CfnPermission, "AWS::Lambda::Permission");

impl CfnPermission {
    /// allows `service` to invoke the function with logical id `function_id`
    /// when the call comes from `source_arn`.
    pub fn invoke_from(function_id: &str, service: &str, source_arn: Value) -> Self {
        Self {
            action: "lambda:InvokeFunction".into(),
            function_name: get_att(function_id, "Arn").into(),
            principal: service.into(),
            source_arn: Some(source_arn.into()),
        }
    }
}
