use serde::Serialize;
use serde_json::Value;

use crate::template::{CfnResource, StrVal};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRecordSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_target: Option<AliasTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_zone_name: Option<String>,
    pub name: String,
    #[serde(rename = "Type")]
    pub ty: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AliasTarget {
    #[serde(rename = "DNSName")]
    pub dns_name: StrVal,
    #[serde(rename = "EvaluateTargetHealth", skip_serializing_if = "Option::is_none")]
    pub evaluate_target_health: Option<bool>,
    #[serde(rename = "HostedZoneId")]
    pub hosted_zone_id: StrVal,
}

/// hosted zone names must end in `.`
pub fn normalize_zone_name(zone_name: &str) -> String {
    let mut out = zone_name.to_string();
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}

impl CfnRecordSet {
    /// an alias record at the apex of an existing zone.
    pub fn alias_at_apex(ty: &str, hosted_zone_id: &str, zone_name: &str, alias_target: AliasTarget) -> Self {
        Self {
            alias_target: Some(alias_target),
            hosted_zone_id: Some(hosted_zone_id.to_string()),
            name: normalize_zone_name(zone_name),
            ty: ty.to_string(),
            ..Default::default()
        }
    }
}

impl CfnResource for CfnRecordSet {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        match (&self.hosted_zone_id, &self.hosted_zone_name) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => return Err("Route53 record must reference exactly one of hosted zone id or hosted zone name".into()),
        }
        if self.name.is_empty() {
            return Err("Route53 record must have a name. Example mysubdomain.mywebsite.com".into());
        }
        if let Some(zone_name) = &self.hosted_zone_name {
            if !zone_name.ends_with('.') {
                return Err(format!("Hosted zone name {zone_name} must end in '.'"));
            }
            let apex = zone_name.trim_end_matches('.');
            let name = self.name.trim_end_matches('.');
            if name != apex && !name.ends_with(&format!(".{apex}")) {
                return Err(format!("Record {} is not inside zone {}", self.name, zone_name));
            }
        }
        if self.alias_target.is_some() && !["A", "AAAA", "CNAME"].contains(&self.ty.as_str()) {
            return Err(format!("Alias records must be A, AAAA or CNAME. Found {}", self.ty));
        }
        Ok(())
    }
}
