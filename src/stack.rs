//! The stack: three python handlers behind a REST api, fronted by a
//! CloudFront distribution with an IP allow-list web ACL, access logs in an
//! expiring bucket and an apex alias record.

use tracing::{debug, info};

use crate::config::StackConfig;
use crate::error::Result;
use crate::resources::apigateway::{HttpMethod, LambdaRestApi};
use crate::resources::cloudfront::{
    AllowedMethods, ApiDistribution, ApiEndpoint, CustomErrorResponse, Logging, ViewerCertificate,
    CLOUDFRONT_HOSTED_ZONE_ID,
};
use crate::resources::iam::{assume_role_policy_doc, aws_managed_policy_arn, CfnRole};
use crate::resources::lambda::{CfnFunction, Code};
use crate::resources::logs::{CfnLogGroup, DEFAULT_RETENTION_DAYS};
use crate::resources::route53::{AliasTarget, CfnRecordSet};
use crate::resources::s3_bucket::{self, CfnBucket, LifecycleConfiguration, LifecycleRule, OwnershipControls};
use crate::resources::wafv2::{CfnIPSet, CfnWebACL, Rule, VisibilityConfig, WafAction, SCOPE_CLOUDFRONT};
use crate::template::{get_att, get_ref, DeletionPolicy, Resource, StackBuilder, Template};

pub const ASSET_BUCKET_PARAM: &str = "AssetBucket";
pub const ASSET_KEY_PARAM: &str = "AssetKey";

pub const EXECUTION_ROLE: &str = "WebserverRole";
pub const DEFAULT_HANDLER: &str = "ApiDefaultHandler";
pub const HELLO_HANDLER: &str = "ApiHelloGetHandler";
pub const WORLD_HANDLER: &str = "ApiWorldGetHandler";
pub const ACCESS_LOG_GROUP: &str = "NvApiLog";
pub const REST_API: &str = "ApiGateway";
pub const IP_SET: &str = "IPSet1";
pub const WEB_ACL: &str = "WebACL";
pub const LOG_BUCKET: &str = "LogBucket";
pub const DISTRIBUTION: &str = "WebDistribution";
pub const ALIAS_RECORD: &str = "AliasRecord";

/// (logical id, python module) of every handler. Each module exposes `handler`.
pub const HANDLERS: &[(&str, &str)] = &[
    (DEFAULT_HANDLER, "default"),
    (HELLO_HANDLER, "hello"),
    (WORLD_HANDLER, "world"),
];

pub struct MycloudStack {
    pub stack_name: String,
    builder: StackBuilder,
}

impl MycloudStack {
    pub fn new(config: &StackConfig) -> Result<Self> {
        let mut builder = StackBuilder {
            description: format!("{} ({})", config.comment, config.stack_name),
            ..Default::default()
        };
        builder.parameter(ASSET_BUCKET_PARAM, "bucket holding the packaged handler code");
        builder.parameter(ASSET_KEY_PARAM, "object key of the packaged handler code");

        declare_compute(&mut builder, config);
        let api = declare_api(&mut builder, config)?;
        declare_firewall(&mut builder, config);
        declare_log_bucket(&mut builder, config);
        declare_distribution(&mut builder, config, &api)?;
        declare_dns(&mut builder, config);

        builder.output("ApiEndpoint", "url of the api gateway stage", api.endpoint_url());
        builder.output("DistributionDomainName", "domain name of the cloudfront distribution", get_att(DISTRIBUTION, "DomainName"));

        debug!(resources = builder.resources.len(), stack = %config.stack_name, "declared stack");
        Ok(Self {
            stack_name: config.stack_name.clone(),
            builder,
        })
    }

    pub fn template(&self) -> Result<Template> {
        self.builder.build()
    }

    pub fn synth(&self) -> Result<String> {
        let template = self.template()?;
        info!(stack = %self.stack_name, resources = template.resources.len(), "synthesized template");
        template.to_json_pretty()
    }
}

/// the execution role and the three handlers sharing it.
fn declare_compute(builder: &mut StackBuilder, config: &StackConfig) {
    // administrator access is how the stack was first declared. It is broader
    // than the handlers need.
    builder.add(Resource::new(EXECUTION_ROLE, CfnRole {
        assume_role_policy_document: assume_role_policy_doc("lambda.amazonaws.com"),
        managed_policy_arns: vec![aws_managed_policy_arn("AdministratorAccess")],
        ..Default::default()
    }));

    for (logical_id, module) in HANDLERS {
        let function = CfnFunction {
            code: Code {
                s3_bucket: Some(get_ref(ASSET_BUCKET_PARAM).into()),
                s3_key: Some(get_ref(ASSET_KEY_PARAM).into()),
                ..Default::default()
            },
            handler: format!("{module}.handler").into(),
            memory_size: Some(config.memory_size),
            role: get_att(EXECUTION_ROLE, "Arn").into(),
            runtime: config.runtime.as_str().into(),
            ..Default::default()
        };
        builder.add(Resource::new(*logical_id, function).depends_on(&[EXECUTION_ROLE]));
    }
}

fn declare_api(builder: &mut StackBuilder, config: &StackConfig) -> Result<LambdaRestApi> {
    builder.add(Resource::new(ACCESS_LOG_GROUP, CfnLogGroup {
        retention_in_days: Some(DEFAULT_RETENTION_DAYS),
        ..Default::default()
    }).deletion_policy(DeletionPolicy::Retain));

    let api = LambdaRestApi::new(REST_API, &config.stage_name, ACCESS_LOG_GROUP)
        .route("/", &[HttpMethod::Any], DEFAULT_HANDLER)
        .route("/hello", &[HttpMethod::Get, HttpMethod::Post], HELLO_HANDLER)
        .route("/world", &[HttpMethod::Get, HttpMethod::Post], WORLD_HANDLER);
    for resource in api.resources()? {
        builder.add(resource);
    }
    Ok(api)
}

/// default deny. Only the allow-listed ranges get through.
fn declare_firewall(builder: &mut StackBuilder, config: &StackConfig) {
    builder.add(Resource::new(IP_SET, CfnIPSet::ipv4(SCOPE_CLOUDFRONT, &config.allowed_cidrs)));
    builder.add(Resource::new(WEB_ACL, CfnWebACL {
        default_action: WafAction::block(),
        rules: vec![Rule::allow_ip_set("IPWhitelistRule1", 1, get_att(IP_SET, "Arn"), "ipWhitelist1")],
        scope: SCOPE_CLOUDFRONT.into(),
        visibility_config: VisibilityConfig::metrics_only("waf1"),
    }));
}

fn declare_log_bucket(builder: &mut StackBuilder, config: &StackConfig) {
    let bucket = CfnBucket {
        bucket_name: Some(config.log_bucket_name.as_str().into()),
        lifecycle_configuration: Some(LifecycleConfiguration {
            rules: vec![LifecycleRule::expire_after_days(config.log_expiration_days)],
        }),
        ownership_controls: Some(OwnershipControls::object_writer()),
    };
    for resource in s3_bucket::with_cleanup(LOG_BUCKET, bucket) {
        builder.add(resource);
    }
}

fn declare_distribution(builder: &mut StackBuilder, config: &StackConfig, api: &LambdaRestApi) -> Result<()> {
    let origin_path = format!("/{}", config.stage_name);
    let endpoints = ["/", "/hello", "/world"].iter().map(|path| ApiEndpoint {
        path: path.to_string(),
        domain_name: api.domain_name().into(),
        origin_path: origin_path.as_str().into(),
    }).collect();

    let distribution = ApiDistribution {
        endpoints,
        aliases: vec![config.domain_name.clone()],
        viewer_certificate: Some(ViewerCertificate {
            acm_certificate_arn: config.certificate_arn.clone(),
            minimum_protocol_version: "TLSv1.2_2018".into(),
            ssl_support_method: "sni-only".into(),
        }),
        web_acl_id: Some(get_att(WEB_ACL, "Arn").into()),
        logging: Some(Logging {
            bucket: get_att(LOG_BUCKET, "RegionalDomainName").into(),
            include_cookies: true,
        }),
        custom_error_responses: vec![CustomErrorResponse {
            error_caching_min_ttl: 0,
            error_code: 404,
            response_code: Some(200),
            response_page_path: Some(config.error_page_path.clone()),
        }],
        comment: Some(config.comment.clone()),
        default_root_object: Some(String::new()),
        allowed_methods: Some(AllowedMethods::All),
    }.into_distribution()?;

    builder.add(Resource::new(DISTRIBUTION, distribution));
    Ok(())
}

/// apex `A` alias in the existing hosted zone.
fn declare_dns(builder: &mut StackBuilder, config: &StackConfig) {
    let record = CfnRecordSet::alias_at_apex("A", &config.hosted_zone_id, &config.hosted_zone_name, AliasTarget {
        dns_name: get_att(DISTRIBUTION, "DomainName").into(),
        evaluate_target_health: None,
        hosted_zone_id: CLOUDFRONT_HOSTED_ZONE_ID.into(),
    });
    builder.add(Resource::new(ALIAS_RECORD, record));
}

/// declares the stack for `config` and returns its template as pretty JSON.
pub fn synth(config: &StackConfig) -> Result<String> {
    MycloudStack::new(config)?.synth()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::BTreeSet;

    fn template() -> Template {
        MycloudStack::new(&StackConfig::default()).unwrap().template().unwrap()
    }

    /// (method, handler logical id) of every method on `/{path_part}`.
    fn methods_at(template: &Template, path_part: &str) -> Vec<(String, String)> {
        let resource_ids: Vec<&String> = template
            .resources_of_type("AWS::ApiGateway::Resource")
            .filter(|(_, r)| r.properties["PathPart"] == path_part)
            .map(|(id, _)| id)
            .collect();
        assert_eq!(resource_ids.len(), 1, "exactly one route at /{path_part}");
        let resource_id = resource_ids[0].as_str();
        template
            .resources_of_type("AWS::ApiGateway::Method")
            .filter(|(_, m)| m.properties["ResourceId"]["Ref"] == resource_id)
            .map(|(_, m)| {
                assert_eq!(m.properties["AuthorizationType"], "NONE");
                let method = m.properties["HttpMethod"].as_str().unwrap().to_string();
                let uri_parts = m.properties["Integration"]["Uri"]["Fn::Join"][1].as_array().unwrap();
                let handler = uri_parts.iter()
                    .find_map(|part| part.get("Fn::GetAtt").map(|g| g[0].as_str().unwrap().to_string()))
                    .unwrap();
                (method, handler)
            })
            .collect()
    }

    #[test]
    fn hello_and_world_accept_get_and_post_on_one_handler() {
        let template = template();
        for (path, handler) in [("hello", HELLO_HANDLER), ("world", WORLD_HANDLER)] {
            let mut methods = methods_at(&template, path);
            methods.sort();
            assert_eq!(methods, vec![
                ("GET".to_string(), handler.to_string()),
                ("POST".to_string(), handler.to_string()),
            ]);
        }
    }

    #[test]
    fn root_route_sends_any_method_to_the_default_handler() {
        let template = template();
        let root = &template.resources["ApiGatewayRootANY"].properties;
        assert_eq!(root["HttpMethod"], "ANY");
        assert_eq!(root["AuthorizationType"], "NONE");
        assert_eq!(root["ResourceId"], json!({"Fn::GetAtt": [REST_API, "RootResourceId"]}));
        assert!(root["Integration"]["Uri"].to_string().contains(DEFAULT_HANDLER));
        assert_eq!(template.resources_of_type("AWS::ApiGateway::Method").count(), 5);
    }

    #[test]
    fn handlers_share_role_artifact_and_memory() {
        let template = template();
        let functions: Vec<_> = template
            .resources_of_type("AWS::Lambda::Function")
            .filter(|(id, _)| HANDLERS.iter().any(|(h, _)| *h == id.as_str()))
            .collect();
        assert_eq!(functions.len(), 3);
        let mut handlers = BTreeSet::new();
        for (_, f) in functions {
            assert_eq!(f.properties["Role"], json!({"Fn::GetAtt": [EXECUTION_ROLE, "Arn"]}));
            assert_eq!(f.properties["Code"]["S3Key"]["Ref"], ASSET_KEY_PARAM);
            assert_eq!(f.properties["MemorySize"], 1024);
            assert_eq!(f.properties["Runtime"], "python3.9");
            handlers.insert(f.properties["Handler"].as_str().unwrap().to_string());
        }
        let expected: BTreeSet<String> = ["default.handler", "hello.handler", "world.handler"].iter().map(|s| s.to_string()).collect();
        assert_eq!(handlers, expected);

        let role = &template.resources[EXECUTION_ROLE].properties;
        assert_eq!(role["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"], "lambda.amazonaws.com");
        assert!(role["ManagedPolicyArns"].to_string().contains("AdministratorAccess"));
    }

    #[test]
    fn firewall_blocks_by_default_and_allows_one_cidr() {
        let template = template();
        let acls: Vec<_> = template.resources_of_type("AWS::WAFv2::WebACL").collect();
        assert_eq!(acls.len(), 1);
        let acl = &acls[0].1.properties;
        assert_eq!(acl["DefaultAction"], json!({"Block": {}}));
        assert_eq!(acl["Scope"], "CLOUDFRONT");
        let rules = acl["Rules"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["Action"], json!({"Allow": {}}));
        assert_eq!(rules[0]["Priority"], 1);
        assert_eq!(rules[0]["VisibilityConfig"]["CloudWatchMetricsEnabled"], true);
        assert_eq!(rules[0]["VisibilityConfig"]["SampledRequestsEnabled"], false);
        assert_eq!(rules[0]["Statement"]["IPSetReferenceStatement"]["Arn"], json!({"Fn::GetAtt": [IP_SET, "Arn"]}));

        let sets: Vec<_> = template.resources_of_type("AWS::WAFv2::IPSet").collect();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].1.properties["Addresses"], json!(["103.16.13.205/32"]));
        assert_eq!(sets[0].1.properties["IPAddressVersion"], "IPV4");
    }

    #[test]
    fn distribution_has_one_default_and_two_path_behaviors() {
        let template = template();
        let conf = &template.resources[DISTRIBUTION].properties["DistributionConfig"];
        let behaviors = conf["CacheBehaviors"].as_array().unwrap();
        let patterns: Vec<&str> = behaviors.iter().map(|b| b["PathPattern"].as_str().unwrap()).collect();
        assert_eq!(patterns, vec!["/hello", "/world"]);
        assert!(conf["DefaultCacheBehavior"].get("PathPattern").is_none());

        let origins = conf["Origins"].as_array().unwrap();
        assert_eq!(origins.len(), 3);
        let domains: BTreeSet<String> = origins.iter().map(|o| o["DomainName"].to_string()).collect();
        assert_eq!(domains.len(), 1);
        assert!(domains.iter().next().unwrap().contains(".execute-api."));
        for origin in origins {
            assert_eq!(origin["OriginPath"], "/prod");
        }
        for behavior in behaviors.iter().chain([&conf["DefaultCacheBehavior"]]) {
            assert_eq!(behavior["AllowedMethods"].as_array().unwrap().len(), 7);
        }

        assert_eq!(conf["WebACLId"], json!({"Fn::GetAtt": [WEB_ACL, "Arn"]}));
        assert_eq!(conf["Aliases"], json!(["navintypescriptdeveops.com"]));
        assert_eq!(conf["ViewerCertificate"]["MinimumProtocolVersion"], "TLSv1.2_2018");
        assert_eq!(conf["CustomErrorResponses"][0]["ErrorCode"], 404);
        assert_eq!(conf["CustomErrorResponses"][0]["ErrorCachingMinTTL"], 0);
        assert_eq!(conf["DefaultRootObject"], "");
        assert_eq!(conf["Logging"]["IncludeCookies"], true);
    }

    #[test]
    fn distribution_carries_the_configured_edge_settings() {
        let config = StackConfig::default();
        let template = template();
        let conf = &template.resources[DISTRIBUTION].properties["DistributionConfig"];

        let error_page = &conf["CustomErrorResponses"][0];
        assert_eq!(error_page["ResponseCode"], 200);
        assert_eq!(error_page["ResponsePagePath"], "//cloudfronterrorbucket.s3.sa-east-1.amazonaws.com/error.html");

        let cert = &conf["ViewerCertificate"];
        assert_eq!(cert["AcmCertificateArn"], config.certificate_arn.as_str());
        assert_eq!(cert["SslSupportMethod"], "sni-only");

        assert_eq!(conf["Logging"]["Bucket"], json!({"Fn::GetAtt": [LOG_BUCKET, "RegionalDomainName"]}));
        assert_eq!(conf["Comment"], "nv lambda Api");
    }

    #[test]
    fn stage_writes_access_logs_to_the_log_group() {
        let template = template();
        let stage = &template.resources["ApiGatewayStage"].properties;
        let access_log = &stage["AccessLogSetting"];
        assert_eq!(access_log["DestinationArn"], json!({"Fn::GetAtt": [ACCESS_LOG_GROUP, "Arn"]}));
        assert_eq!(access_log["Format"], crate::resources::apigateway::JSON_WITH_STANDARD_FIELDS);
        assert_eq!(template.resources[ACCESS_LOG_GROUP].ty, "AWS::Logs::LogGroup");
    }

    #[test]
    fn log_bucket_expires_and_is_purged_with_the_stack() {
        let template = template();
        let bucket = &template.resources[LOG_BUCKET];
        assert_eq!(bucket.properties["BucketName"], "nvlambdalogbucket");
        assert_eq!(bucket.properties["LifecycleConfiguration"]["Rules"], json!([{"ExpirationInDays": 30, "Status": "Enabled"}]));
        assert_eq!(bucket.deletion_policy, Some(DeletionPolicy::Delete));
        let cleanups: Vec<_> = template.resources_of_type("Custom::CleanupBucket").collect();
        assert_eq!(cleanups.len(), 1);
        assert_eq!(cleanups[0].1.properties["BucketName"], json!({"Ref": LOG_BUCKET}));
    }

    #[test]
    fn alias_record_points_at_the_distribution() {
        let template = template();
        let record = &template.resources[ALIAS_RECORD].properties;
        assert_eq!(record["Type"], "A");
        assert_eq!(record["HostedZoneId"], "Z0918647YP9QBSN696HQ");
        assert_eq!(record["Name"], "navintypescriptdeveops.com.");
        assert_eq!(record["AliasTarget"]["DNSName"], json!({"Fn::GetAtt": [DISTRIBUTION, "DomainName"]}));
        assert_eq!(record["AliasTarget"]["HostedZoneId"], CLOUDFRONT_HOSTED_ZONE_ID);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let config = StackConfig::default();
        let first = synth(&config).unwrap();
        let second = synth(&config).unwrap();
        assert_eq!(first, second);
        let parsed: Value = serde_json::from_str(&first).unwrap();
        assert!(!parsed["Resources"].as_object().unwrap().is_empty());
        assert_eq!(parsed["Parameters"][ASSET_BUCKET_PARAM]["Type"], "String");
        assert!(parsed["Outputs"]["ApiEndpoint"].is_object());
    }

    #[test]
    fn config_overrides_flow_into_the_template() {
        let config = StackConfig {
            stage_name: "dev".into(),
            allowed_cidrs: vec!["10.0.0.0/8".into(), "192.168.0.1/32".into()],
            memory_size: 512,
            ..Default::default()
        };
        let template = MycloudStack::new(&config).unwrap().template().unwrap();
        assert_eq!(template.resources[IP_SET].properties["Addresses"].as_array().unwrap().len(), 2);
        assert_eq!(template.resources[DEFAULT_HANDLER].properties["MemorySize"], 512);
        assert_eq!(template.resources["ApiGatewayStage"].properties["StageName"], "dev");
        let origin = &template.resources[DISTRIBUTION].properties["DistributionConfig"]["Origins"][0];
        assert_eq!(origin["OriginPath"], "/dev");
    }

    #[test]
    fn invalid_cidr_fails_synthesis() {
        let config = StackConfig {
            allowed_cidrs: vec!["not-an-ip".into()],
            ..Default::default()
        };
        let err = synth(&config).unwrap_err();
        assert!(err.to_string().contains(IP_SET));
    }
}
