use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::{CfnResource, StrVal};

/// hosted zone id CloudFront distributions live in, for alias records.
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedMethods {
    GetHead,
    All,
}

impl AllowedMethods {
    pub fn methods(&self) -> Vec<String> {
        let methods: &[&str] = match self {
            AllowedMethods::GetHead => &["GET", "HEAD"],
            AllowedMethods::All => &["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"],
        };
        methods.iter().map(|m| m.to_string()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnDistribution {
    pub distribution_config: DistributionConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cache_behaviors: Vec<CacheBehavior>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_error_responses: Vec<CustomErrorResponse>,
    pub default_cache_behavior: DefaultCacheBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_root_object: Option<String>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_version: Option<String>,
    #[serde(rename = "IPV6Enabled", skip_serializing_if = "Option::is_none")]
    pub ipv6_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
    pub origins: Vec<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_certificate: Option<ViewerCertificate>,
    #[serde(rename = "WebACLId", skip_serializing_if = "Option::is_none")]
    pub web_acl_id: Option<StrVal>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwardedValues {
    pub cookies: Cookies,
    pub query_string: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Cookies {
    pub forward: String,
}

impl ForwardedValues {
    pub fn none() -> Self {
        Self {
            cookies: Cookies { forward: "none".into() },
            query_string: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultCacheBehavior {
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
    pub compress: bool,
    pub forwarded_values: ForwardedValues,
    pub target_origin_id: String,
    pub viewer_protocol_policy: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheBehavior {
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
    pub compress: bool,
    pub forwarded_values: ForwardedValues,
    pub path_pattern: String,
    pub target_origin_id: String,
    pub viewer_protocol_policy: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Origin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_origin_config: Option<CustomOriginConfig>,
    pub domain_name: StrVal,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<StrVal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomOriginConfig {
    #[serde(rename = "HTTPPort")]
    pub http_port: u16,
    #[serde(rename = "HTTPSPort")]
    pub https_port: u16,
    pub origin_keepalive_timeout: u32,
    pub origin_protocol_policy: String,
    pub origin_read_timeout: u32,
    #[serde(rename = "OriginSSLProtocols")]
    pub origin_ssl_protocols: Vec<String>,
}

impl Default for CustomOriginConfig {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            origin_keepalive_timeout: 5,
            origin_protocol_policy: "https-only".into(),
            origin_read_timeout: 30,
            origin_ssl_protocols: vec!["TLSv1.2".into()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomErrorResponse {
    #[serde(rename = "ErrorCachingMinTTL")]
    pub error_caching_min_ttl: u32,
    pub error_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_page_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Logging {
    pub bucket: StrVal,
    pub include_cookies: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewerCertificate {
    pub acm_certificate_arn: String,
    pub minimum_protocol_version: String,
    pub ssl_support_method: String,
}

impl CfnResource for CfnDistribution {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let conf = &self.distribution_config;
        if conf.origins.is_empty() {
            return Err("Must provide at least one origin".into());
        }
        for (i, origin) in conf.origins.iter().enumerate() {
            if conf.origins[..i].iter().any(|o| o.id == origin.id) {
                return Err(format!("Duplicate origin id {}", origin.id));
            }
            if origin.domain_name.as_literal() == Some("") {
                return Err(format!("Origin {} is missing a domain name", origin.id));
            }
        }
        let has_origin = |id: &str| conf.origins.iter().any(|o| o.id == id);
        if !has_origin(&conf.default_cache_behavior.target_origin_id) {
            return Err(format!("Default cache behavior targets unknown origin {}", conf.default_cache_behavior.target_origin_id));
        }
        for (i, behavior) in conf.cache_behaviors.iter().enumerate() {
            if !has_origin(&behavior.target_origin_id) {
                return Err(format!("Cache behavior {} targets unknown origin {}", behavior.path_pattern, behavior.target_origin_id));
            }
            if conf.cache_behaviors[..i].iter().any(|b| b.path_pattern == behavior.path_pattern) {
                return Err(format!("Duplicate path pattern {}", behavior.path_pattern));
            }
        }
        if !conf.aliases.is_empty() && conf.viewer_certificate.is_none() {
            return Err("Aliases require a viewer certificate".into());
        }
        for response in conf.custom_error_responses.iter() {
            if response.response_page_path.is_some() && response.response_code.is_none() {
                return Err(format!("Error response for {} has a page but no response code", response.error_code));
            }
        }
        Ok(())
    }
}

/// one origin of an [`ApiDistribution`]. `path` is `/` for the default behavior.
#[derive(Debug, Clone, Default)]
pub struct ApiEndpoint {
    pub path: String,
    pub domain_name: StrVal,
    pub origin_path: StrVal,
}

/// a higher level construct for a distribution in front of an http api,
/// where each endpoint is a separate origin with its own path behavior.
#[derive(Debug, Clone, Default)]
pub struct ApiDistribution {
    /// exactly one endpoint must have path = "/". All paths must be unique.
    pub endpoints: Vec<ApiEndpoint>,
    pub aliases: Vec<String>,
    pub viewer_certificate: Option<ViewerCertificate>,
    pub web_acl_id: Option<StrVal>,
    pub logging: Option<Logging>,
    pub custom_error_responses: Vec<CustomErrorResponse>,
    pub comment: Option<String>,
    pub default_root_object: Option<String>,
    pub allowed_methods: Option<AllowedMethods>,
}

impl ApiDistribution {
    fn behavior_parts(&self) -> (Vec<String>, Vec<String>, bool, ForwardedValues, String) {
        let allowed = self.allowed_methods.unwrap_or(AllowedMethods::GetHead);
        (
            allowed.methods(),
            AllowedMethods::GetHead.methods(),
            true,
            ForwardedValues::none(),
            "redirect-to-https".to_string(),
        )
    }

    pub fn into_distribution(self) -> Result<CfnDistribution> {
        let mut default = None;
        let mut others: Vec<&ApiEndpoint> = vec![];
        for endpoint in self.endpoints.iter() {
            if endpoint.path == "/" {
                if default.is_some() {
                    return Err(Error::Template("Distribution has more than one default endpoint".into()));
                }
                default = Some(endpoint);
            } else {
                if others.iter().any(|x| x.path == endpoint.path) {
                    return Err(Error::Template(format!(
                        "Distribution received duplicate endpoint path {}. All paths in a distribution must be unique", endpoint.path
                    )));
                }
                others.push(endpoint);
            }
        }
        let default = default.ok_or_else(|| Error::Template(
            "Distribution missing a default endpoint. Must provide an endpoint where path = '/'".into()
        ))?;

        let origin = |id: String, endpoint: &ApiEndpoint| Origin {
            custom_origin_config: Some(CustomOriginConfig::default()),
            domain_name: endpoint.domain_name.clone(),
            id,
            origin_path: Some(endpoint.origin_path.clone()),
        };
        let (allowed_methods, cached_methods, compress, forwarded_values, viewer_protocol_policy) = self.behavior_parts();

        let mut origins = vec![origin("origin1".into(), default)];
        let mut cache_behaviors = vec![];
        for (i, endpoint) in others.iter().enumerate() {
            let id = format!("origin{}", i + 2);
            origins.push(origin(id.clone(), endpoint));
            cache_behaviors.push(CacheBehavior {
                allowed_methods: allowed_methods.clone(),
                cached_methods: cached_methods.clone(),
                compress,
                forwarded_values: forwarded_values.clone(),
                path_pattern: endpoint.path.clone(),
                target_origin_id: id,
                viewer_protocol_policy: viewer_protocol_policy.clone(),
            });
        }
        let default_cache_behavior = DefaultCacheBehavior {
            allowed_methods,
            cached_methods,
            compress,
            forwarded_values,
            target_origin_id: "origin1".into(),
            viewer_protocol_policy,
        };

        Ok(CfnDistribution {
            distribution_config: DistributionConfig {
                aliases: self.aliases,
                cache_behaviors,
                comment: self.comment,
                custom_error_responses: self.custom_error_responses,
                default_cache_behavior,
                default_root_object: self.default_root_object,
                enabled: true,
                http_version: Some("http2".into()),
                ipv6_enabled: Some(true),
                logging: self.logging,
                origins,
                price_class: Some("PriceClass_100".into()),
                viewer_certificate: self.viewer_certificate,
                web_acl_id: self.web_acl_id,
            },
        })
    }
}
