//! CloudFormation template model.
//!
//! Resources are declared as typed structs implementing [`CfnResource`],
//! collected into a [`StackBuilder`], and validated into a [`Template`].
//! Every map in the template is ordered, so synthesizing the same stack twice
//! yields byte-identical JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// pseudo parameters resolved by CloudFormation at deploy time.
pub mod pseudo {
    pub const ACCOUNT_ID: &str = "AWS::AccountId";
    pub const PARTITION: &str = "AWS::Partition";
    pub const REGION: &str = "AWS::Region";
    pub const URL_SUFFIX: &str = "AWS::URLSuffix";
}

/// a string property that is either a literal or an intrinsic function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrVal {
    String(String),
    Val(Value),
}

impl Default for StrVal {
    fn default() -> Self {
        StrVal::String(String::new())
    }
}

impl From<&str> for StrVal {
    fn from(value: &str) -> Self {
        StrVal::String(value.to_string())
    }
}

impl From<String> for StrVal {
    fn from(value: String) -> Self {
        StrVal::String(value)
    }
}

impl From<&String> for StrVal {
    fn from(value: &String) -> Self {
        StrVal::String(value.clone())
    }
}

impl From<Value> for StrVal {
    fn from(value: Value) -> Self {
        StrVal::Val(value)
    }
}

impl StrVal {
    /// the literal value, if this is not an intrinsic.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            StrVal::String(s) => Some(s),
            StrVal::Val(Value::String(s)) => Some(s),
            StrVal::Val(_) => None,
        }
    }
}

pub fn get_ref(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `Fn::Join` with an empty delimiter.
pub fn join<I, S>(parts: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<StrVal>,
{
    let parts: Vec<StrVal> = parts.into_iter().map(Into::into).collect();
    json!({ "Fn::Join": ["", parts] })
}

/// a single resource type that can be placed into a template.
pub trait CfnResource {
    /// the CloudFormation type, eg: `AWS::S3::Bucket`
    fn type_string(&self) -> &'static str;

    fn properties(&self) -> serde_json::Result<Value>;

    /// local sanity checks. Anything the provider validates is left to it.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

pub struct Resource {
    pub name: String,
    pub properties: Box<dyn CfnResource>,
    pub depends_on: Vec<String>,
    /// applied as both the DeletionPolicy and the UpdateReplacePolicy.
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new<R: CfnResource + 'static>(name: impl Into<String>, properties: R) -> Self {
        Self {
            name: name.into(),
            properties: Box::new(properties) as _,
            depends_on: vec![],
            deletion_policy: None,
        }
    }

    pub fn depends_on<S: AsRef<str>>(mut self, logical_ids: &[S]) -> Self {
        for id in logical_ids {
            let id = id.as_ref().to_string();
            if !self.depends_on.contains(&id) {
                self.depends_on.push(id);
            }
        }
        self
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, TemplateParameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: String::new(),
            parameters: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl Template {
    /// pretty so that the template reads well in the CloudFormation console.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        ty: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a TemplateResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }

    /// every `Ref` and `Fn::GetAtt` must point at a resource, a parameter,
    /// or a pseudo parameter.
    pub fn check_references(&self) -> Result<()> {
        let mut refs = vec![];
        for resource in self.resources.values() {
            collect_references(&resource.properties, &mut refs);
        }
        for output in self.outputs.values() {
            collect_references(&output.value, &mut refs);
        }
        for target in refs {
            if target.starts_with("AWS::") {
                continue;
            }
            if !self.resources.contains_key(&target) && !self.parameters.contains_key(&target) {
                return Err(Error::Template(format!("Reference to unknown logical id '{target}'")));
            }
        }
        Ok(())
    }
}

fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match (key.as_str(), val) {
                    ("Ref", Value::String(target)) => out.push(target.clone()),
                    ("Fn::GetAtt", Value::Array(parts)) => {
                        if let Some(Value::String(target)) = parts.first() {
                            out.push(target.clone());
                        }
                    }
                    _ => collect_references(val, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

pub fn verify_resource_name(resource_name: &str) -> Result<()> {
    if resource_name.len() > 255 {
        return Err(Error::Template(format!("Invalid resource name {:?}\nmust be less than 255 characters", resource_name)));
    }
    if resource_name.is_empty() {
        return Err(Error::Template(format!("Invalid resource name {:?}\nMust contain at least 1 character", resource_name)));
    }
    if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Template(format!("Invalid resource name {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", resource_name)));
    }
    Ok(())
}

pub fn validate_stack_name(stack_name: &str) -> Result<()> {
    // A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
    // It must start with an alphabetical character and can't be longer than 128 characters.
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let invalid = || Error::Config(format!("Invalid stack name {:?}\n{}", stack_name, restriction));
    match stack_name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(invalid()),
    }
    if !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid());
    }
    if stack_name.len() > 128 {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_resources_to_template(resources: &[Resource]) -> Result<Template> {
    let mut out_template = Template::default();
    for resource in resources.iter() {
        verify_resource_name(&resource.name)?;
        if let Err(e) = resource.properties.validate() {
            return Err(Error::Template(format!("Validation failed on resource '{}'\n{e}", resource.name)));
        }
        let saved = TemplateResource {
            ty: resource.properties.type_string().to_string(),
            properties: resource.properties.properties()?,
            depends_on: resource.depends_on.clone(),
            deletion_policy: resource.deletion_policy,
            update_replace_policy: resource.deletion_policy,
        };
        if out_template.resources.insert(resource.name.clone(), saved).is_some() {
            return Err(Error::Template(format!("Duplicate logical id '{}'", resource.name)));
        }
    }
    for resource in resources.iter() {
        for dep in resource.depends_on.iter() {
            if !out_template.resources.contains_key(dep) {
                return Err(Error::Template(format!("Resource '{}' depends on unknown resource '{dep}'", resource.name)));
            }
        }
    }
    Ok(out_template)
}

/// collects resources, parameters and outputs for one stack.
#[derive(Default)]
pub struct StackBuilder {
    pub description: String,
    pub parameters: Vec<(String, TemplateParameter)>,
    pub resources: Vec<Resource>,
    pub outputs: Vec<(String, TemplateOutput)>,
}

impl StackBuilder {
    pub fn add(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn parameter(&mut self, name: &str, description: &str) {
        self.parameters.push((name.to_string(), TemplateParameter {
            ty: "String".to_string(),
            description: description.to_string(),
        }));
    }

    pub fn output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.push((name.to_string(), TemplateOutput {
            description: description.to_string(),
            value,
        }));
    }

    pub fn build(&self) -> Result<Template> {
        let mut template = validate_resources_to_template(&self.resources)?;
        template.description = self.description.clone();
        for (name, param) in self.parameters.iter() {
            verify_resource_name(name)?;
            if template.resources.contains_key(name) || template.parameters.insert(name.clone(), param.clone()).is_some() {
                return Err(Error::Template(format!("Duplicate logical id '{name}'")));
            }
        }
        for (name, output) in self.outputs.iter() {
            verify_resource_name(name)?;
            if template.outputs.insert(name.clone(), output.clone()).is_some() {
                return Err(Error::Template(format!("Duplicate output '{name}'")));
            }
        }
        template.check_references()?;
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct Topic {
        topic_name: StrVal,
    }

    impl CfnResource for Topic {
        fn type_string(&self) -> &'static str {
            "AWS::SNS::Topic"
        }
        fn properties(&self) -> serde_json::Result<Value> {
            serde_json::to_value(self)
        }
        fn validate(&self) -> std::result::Result<(), String> {
            match self.topic_name.as_literal() {
                Some("") => Err("topic name cannot be empty".to_string()),
                _ => Ok(()),
            }
        }
    }

    fn topic(name: &str) -> Topic {
        Topic { topic_name: name.into() }
    }

    #[test]
    fn intrinsics_have_cfn_shape() {
        assert_eq!(get_ref("Bucket"), json!({"Ref": "Bucket"}));
        assert_eq!(get_att("Bucket", "Arn"), json!({"Fn::GetAtt": ["Bucket", "Arn"]}));
        let joined = join([StrVal::from("arn:"), StrVal::from(get_ref(pseudo::PARTITION))]);
        assert_eq!(joined, json!({"Fn::Join": ["", ["arn:", {"Ref": "AWS::Partition"}]]}));
    }

    #[test]
    fn resource_names_must_be_alphanumeric() {
        assert!(verify_resource_name("LogBucket1").is_ok());
        assert!(verify_resource_name("log-bucket").is_err());
        assert!(verify_resource_name("").is_err());
        assert!(verify_resource_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn stack_names_follow_cloudformation_rules() {
        assert!(validate_stack_name("MycloudStack").is_ok());
        assert!(validate_stack_name("my-cloud-2").is_ok());
        assert!(validate_stack_name("2cloud").is_err());
        assert!(validate_stack_name("my_cloud").is_err());
        assert!(validate_stack_name("").is_err());
        assert!(validate_stack_name(&format!("a{}", "b".repeat(128))).is_err());
    }

    #[test]
    fn duplicate_logical_ids_are_rejected() {
        let resources = vec![Resource::new("Topic", topic("a")), Resource::new("Topic", topic("b"))];
        let err = validate_resources_to_template(&resources).unwrap_err();
        assert!(err.to_string().contains("Duplicate logical id 'Topic'"));
    }

    #[test]
    fn resource_validation_errors_name_the_resource() {
        let resources = vec![Resource::new("EmptyTopic", topic(""))];
        let err = validate_resources_to_template(&resources).unwrap_err();
        assert!(err.to_string().contains("Validation failed on resource 'EmptyTopic'"));
    }

    #[test]
    fn depends_on_must_exist() {
        let resources = vec![Resource::new("Topic", topic("a")).depends_on(&["Missing"])];
        assert!(validate_resources_to_template(&resources).is_err());
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut builder = StackBuilder::default();
        builder.add(Resource::new("Topic", Topic { topic_name: get_ref("Nope").into() }));
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("unknown logical id 'Nope'"));

        let mut builder = StackBuilder::default();
        builder.parameter("Nope", "");
        builder.add(Resource::new("Topic", Topic { topic_name: get_ref("Nope").into() }));
        builder.output("TopicArn", "arn", get_ref("Topic"));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn deletion_policy_is_applied_to_replacement_too() {
        let mut builder = StackBuilder::default();
        builder.add(Resource::new("Topic", topic("a")).deletion_policy(DeletionPolicy::Retain));
        let template = builder.build().unwrap();
        let json: Value = serde_json::from_str(&template.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["Resources"]["Topic"]["DeletionPolicy"], "Retain");
        assert_eq!(json["Resources"]["Topic"]["UpdateReplacePolicy"], "Retain");
        assert_eq!(json["AWSTemplateFormatVersion"], TEMPLATE_FORMAT_VERSION);
        assert!(json.get("Outputs").is_none());
    }
}
