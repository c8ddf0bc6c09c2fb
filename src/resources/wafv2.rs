use std::net::Ipv4Addr;

use serde::Serialize;
use serde_json::Value;

use crate::template::{CfnResource, StrVal};

/// web ACLs attached to a CloudFront distribution must use this scope
/// (and be deployed in us-east-1).
pub const SCOPE_CLOUDFRONT: &str = "CLOUDFRONT";
pub const SCOPE_REGIONAL: &str = "REGIONAL";

#[derive(Debug, Clone, Default, Serialize)]
pub struct CfnIPSet {
    #[serde(rename = "Addresses")]
    pub addresses: Vec<String>,
    #[serde(rename = "IPAddressVersion")]
    pub ip_address_version: String,
    #[serde(rename = "Scope")]
    pub scope: String,
}

impl CfnIPSet {
    pub fn ipv4(scope: &str, addresses: &[String]) -> Self {
        Self {
            addresses: addresses.to_vec(),
            ip_address_version: "IPV4".into(),
            scope: scope.into(),
        }
    }
}

/// parses `a.b.c.d/n`. Bare addresses are rejected, the prefix is required.
pub fn parse_ipv4_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), String> {
    let invalid = || format!("Invalid IPv4 CIDR {:?}\nMust look like 203.0.113.0/24", cidr);
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

impl CfnResource for CfnIPSet {
    fn type_string(&self) -> &'static str {
        "AWS::WAFv2::IPSet"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        validate_scope(&self.scope)?;
        if self.ip_address_version != "IPV4" {
            return Err(format!("Unsupported IP address version {:?}", self.ip_address_version));
        }
        for address in self.addresses.iter() {
            parse_ipv4_cidr(address)?;
        }
        Ok(())
    }
}

fn validate_scope(scope: &str) -> Result<(), String> {
    if scope != SCOPE_CLOUDFRONT && scope != SCOPE_REGIONAL {
        return Err(format!("Invalid scope {:?}\nMust be {} or {}", scope, SCOPE_CLOUDFRONT, SCOPE_REGIONAL));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmptyObject {}

/// serializes as `{"Allow": {}}` / `{"Block": {}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WafAction {
    Allow(EmptyObject),
    Block(EmptyObject),
}

impl WafAction {
    pub fn allow() -> Self {
        WafAction::Allow(EmptyObject {})
    }

    pub fn block() -> Self {
        WafAction::Block(EmptyObject {})
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VisibilityConfig {
    pub cloud_watch_metrics_enabled: bool,
    pub metric_name: String,
    pub sampled_requests_enabled: bool,
}

impl VisibilityConfig {
    /// metrics on, request sampling off.
    pub fn metrics_only(metric_name: &str) -> Self {
        Self {
            cloud_watch_metrics_enabled: true,
            metric_name: metric_name.into(),
            sampled_requests_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IPSetReferenceStatement {
    #[serde(rename = "Arn")]
    pub arn: StrVal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    #[serde(rename = "IPSetReferenceStatement")]
    pub ip_set_reference_statement: IPSetReferenceStatement,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    pub action: WafAction,
    pub name: String,
    pub priority: u32,
    pub statement: Statement,
    pub visibility_config: VisibilityConfig,
}

impl Rule {
    pub fn allow_ip_set(name: &str, priority: u32, ip_set_arn: Value, metric_name: &str) -> Self {
        Self {
            action: WafAction::allow(),
            name: name.into(),
            priority,
            statement: Statement {
                ip_set_reference_statement: IPSetReferenceStatement { arn: ip_set_arn.into() },
            },
            visibility_config: VisibilityConfig::metrics_only(metric_name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnWebACL {
    /// applied when no rule matches.
    pub default_action: WafAction,
    /// evaluated in ascending priority order.
    pub rules: Vec<Rule>,
    pub scope: String,
    pub visibility_config: VisibilityConfig,
}

impl CfnResource for CfnWebACL {
    fn type_string(&self) -> &'static str {
        "AWS::WAFv2::WebACL"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        validate_scope(&self.scope)?;
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.name.is_empty() {
                return Err(format!("Rule at index {i} must have a name"));
            }
            for other in self.rules[..i].iter() {
                if other.priority == rule.priority {
                    return Err(format!("Rules {} and {} share priority {}", other.name, rule.name, rule.priority));
                }
                if other.name == rule.name {
                    return Err(format!("Duplicate rule name {}", rule.name));
                }
            }
        }
        Ok(())
    }
}
