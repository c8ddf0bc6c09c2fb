use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::template::{get_ref, join, pseudo, CfnResource, StrVal};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRole {
    pub assume_role_policy_document: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<StrVal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<StrVal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    pub policy_name: StrVal,
    pub policy_document: Value,
}

impl CfnResource for CfnRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        let statements = self.assume_role_policy_document.get("Statement").and_then(Value::as_array);
        match statements {
            Some(s) if !s.is_empty() => {}
            _ => return Err("role must have an assume role policy with at least one statement".into()),
        }
        for policy in self.policies.iter() {
            if policy.policy_name.as_literal() == Some("") {
                return Err("inline policies must be named".into());
            }
        }
        Ok(())
    }
}

/// trust policy letting a service principal, eg: `lambda.amazonaws.com`, assume a role.
pub fn assume_role_policy_doc(service: &str) -> Value {
    let mut map = Map::default();
    map.insert("Version".to_string(), Value::String(POLICY_VERSION.to_string()));

    let mut principal = Map::default();
    principal.insert("Service".to_string(), Value::String(service.to_string()));

    let mut statement_obj = Map::default();
    statement_obj.insert("Effect".to_string(), Value::String("Allow".to_string()));
    statement_obj.insert("Principal".to_string(), Value::Object(principal));
    statement_obj.insert("Action".to_string(), Value::String("sts:AssumeRole".to_string()));
    map.insert("Statement".to_string(), Value::Array(vec![Value::Object(statement_obj)]));
    Value::Object(map)
}

/// partition-aware ARN of an AWS managed policy, eg: `AdministratorAccess`
/// or `service-role/AWSLambdaBasicExecutionRole`.
pub fn aws_managed_policy_arn(name: &str) -> StrVal {
    join([
        StrVal::from("arn:"),
        get_ref(pseudo::PARTITION).into(),
        format!(":iam::aws:policy/{name}").into(),
    ])
    .into()
}

#[derive(Debug, Clone)]
pub struct PolicyStatement {
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<StrVal>,
}

impl PolicyStatement {
    pub fn allow<S: AsRef<str>>(actions: &[S], resources: Vec<StrVal>) -> Self {
        Self {
            effect: "Allow".into(),
            actions: actions.iter().map(|a| a.as_ref().to_string()).collect(),
            resources,
        }
    }
}

pub fn create_policy_doc(statements: &[PolicyStatement]) -> Value {
    let statements: Vec<Value> = statements.iter().map(|s| {
        json!({
            "Effect": s.effect,
            "Action": s.actions,
            "Resource": s.resources,
        })
    }).collect();
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements,
    })
}
