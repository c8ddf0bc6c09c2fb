//! REST API gateway resources, plus [`LambdaRestApi`]: a higher level
//! construct that expands a route table into the rest api, its path
//! resources, methods, lambda invoke permissions, the logging account,
//! a deployment and a stage.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::iam::{assume_role_policy_doc, aws_managed_policy_arn, CfnRole};
use super::lambda::CfnPermission;
use super::logical_id_part;
use crate::error::{Error, Result};
use crate::template::{get_att, get_ref, join, pseudo, CfnResource, Resource, StrVal};

/// `$context` fields logged for every request, as a single JSON object per line.
pub const JSON_WITH_STANDARD_FIELDS: &str = concat!(
    r#"{"requestId":"$context.requestId","ip":"$context.identity.sourceIp","#,
    r#""user":"$context.identity.user","caller":"$context.identity.caller","#,
    r#""requestTime":"$context.requestTime","httpMethod":"$context.httpMethod","#,
    r#""resourcePath":"$context.resourcePath","status":"$context.status","#,
    r#""protocol":"$context.protocol","responseLength":"$context.responseLength"}"#,
);

pub const AUTHORIZATION_NONE: &str = "NONE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Any,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Any => "ANY",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRestApi {
    pub name: StrVal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_configuration: Option<EndpointConfiguration>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointConfiguration {
    pub types: Vec<String>,
}

impl_cfn_resource!(CfnRestApi, "AWS::ApiGateway::RestApi");

/// region wide setting that lets api gateway write execution logs.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnAccount {
    pub cloud_watch_role_arn: StrVal,
}

impl_cfn_resource!(CfnAccount, "AWS::ApiGateway::Account");

/// a path segment under a rest api. (`AWS::ApiGateway::Resource`)
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnApiResource {
    pub parent_id: StrVal,
    pub path_part: StrVal,
    pub rest_api_id: StrVal,
}

impl CfnResource for CfnApiResource {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGateway::Resource"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.path_part.as_literal() {
            Some(p) if p.is_empty() || p.contains('/') => {
                Err(format!("Invalid path part {:?}\nMust be a single non-empty path segment", p))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnMethod {
    pub authorization_type: StrVal,
    pub http_method: HttpMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<Integration>,
    pub resource_id: StrVal,
    pub rest_api_id: StrVal,
}

impl_cfn_resource!(CfnMethod, "AWS::ApiGateway::Method");

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Integration {
    pub integration_http_method: StrVal,
    #[serde(rename = "Type")]
    pub ty: StrVal,
    pub uri: StrVal,
}

impl Integration {
    /// lambda proxy integration. Lambda is always invoked with POST,
    /// whatever method the client used.
    pub fn lambda_proxy(function_id: &str) -> Self {
        Self {
            integration_http_method: "POST".into(),
            ty: "AWS_PROXY".into(),
            uri: lambda_integration_uri(function_id).into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnDeployment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<StrVal>,
    pub rest_api_id: StrVal,
}

impl_cfn_resource!(CfnDeployment, "AWS::ApiGateway::Deployment");

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnStage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_log_setting: Option<AccessLogSetting>,
    pub deployment_id: StrVal,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub method_settings: Vec<MethodSetting>,
    pub rest_api_id: StrVal,
    pub stage_name: StrVal,
}

impl_cfn_resource!(CfnStage, "AWS::ApiGateway::Stage");

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessLogSetting {
    pub destination_arn: StrVal,
    pub format: StrVal,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MethodSetting {
    pub data_trace_enabled: bool,
    pub http_method: String,
    pub logging_level: String,
    pub metrics_enabled: bool,
    pub resource_path: String,
}

/// `arn:{partition}:apigateway:{region}:lambda:path/2015-03-31/functions/{arn}/invocations`
pub fn lambda_integration_uri(function_id: &str) -> Value {
    join([
        StrVal::from("arn:"),
        get_ref(pseudo::PARTITION).into(),
        ":apigateway:".into(),
        get_ref(pseudo::REGION).into(),
        ":lambda:path/2015-03-31/functions/".into(),
        get_att(function_id, "Arn").into(),
        "/invocations".into(),
    ])
}

/// execute-api ARN for `method` on `path` in any stage (including test invocations).
pub fn execute_api_arn(rest_api_id: &str, method: HttpMethod, path: &str) -> Value {
    let method = match method {
        HttpMethod::Any => "*",
        m => m.as_str(),
    };
    join([
        StrVal::from("arn:"),
        get_ref(pseudo::PARTITION).into(),
        ":execute-api:".into(),
        get_ref(pseudo::REGION).into(),
        ":".into(),
        get_ref(pseudo::ACCOUNT_ID).into(),
        ":".into(),
        get_ref(rest_api_id).into(),
        format!("/*/{method}{path}").into(),
    ])
}

/// one path of the api. `path` is `/` for the root, or a single segment like `/hello`.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub methods: Vec<HttpMethod>,
    /// logical id of the lambda function the route's methods invoke.
    pub function_id: String,
}

impl Route {
    pub fn new(path: &str, methods: &[HttpMethod], function_id: &str) -> Self {
        Self {
            path: path.to_string(),
            methods: methods.to_vec(),
            function_id: function_id.to_string(),
        }
    }

    fn segment(&self) -> Option<&str> {
        self.path.strip_prefix('/').filter(|s| !s.is_empty())
    }
}

/// a regional REST api whose routes are all lambda proxy integrations.
#[derive(Debug, Clone)]
pub struct LambdaRestApi {
    /// logical id of the rest api. Every generated resource is prefixed with it.
    pub logical_id: String,
    pub name: String,
    pub stage_name: String,
    /// logical id of the log group receiving access logs.
    pub access_log_group_id: String,
    pub logging_level: String,
    pub metrics_enabled: bool,
    pub routes: Vec<Route>,
}

impl LambdaRestApi {
    pub fn new(logical_id: &str, stage_name: &str, access_log_group_id: &str) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            name: logical_id.to_string(),
            stage_name: stage_name.to_string(),
            access_log_group_id: access_log_group_id.to_string(),
            logging_level: "INFO".to_string(),
            metrics_enabled: true,
            routes: vec![],
        }
    }

    pub fn route(mut self, path: &str, methods: &[HttpMethod], function_id: &str) -> Self {
        self.routes.push(Route::new(path, methods, function_id));
        self
    }

    pub fn stage_id(&self) -> String {
        format!("{}Stage", self.logical_id)
    }

    pub fn account_id(&self) -> String {
        format!("{}Account", self.logical_id)
    }

    pub fn cloudwatch_role_id(&self) -> String {
        format!("{}CloudWatchRole", self.logical_id)
    }

    fn path_resource_id(&self, segment: &str) -> String {
        format!("{}{}", self.logical_id, logical_id_part(segment))
    }

    pub fn method_id(&self, path: &str, method: HttpMethod) -> String {
        let part = match path.strip_prefix('/') {
            Some("") | None => "Root".to_string(),
            Some(segment) => logical_id_part(segment),
        };
        format!("{}{}{}", self.logical_id, part, method.as_str())
    }

    /// `{api}.execute-api.{region}.{url suffix}`
    pub fn domain_name(&self) -> Value {
        join([
            StrVal::from(get_ref(&self.logical_id)),
            ".execute-api.".into(),
            get_ref(pseudo::REGION).into(),
            ".".into(),
            get_ref(pseudo::URL_SUFFIX).into(),
        ])
    }

    pub fn endpoint_url(&self) -> Value {
        join([
            StrVal::from("https://"),
            get_ref(&self.logical_id).into(),
            ".execute-api.".into(),
            get_ref(pseudo::REGION).into(),
            ".".into(),
            get_ref(pseudo::URL_SUFFIX).into(),
            format!("/{}/", self.stage_name).into(),
        ])
    }

    fn validate_routes(&self) -> Result<()> {
        let roots = self.routes.iter().filter(|r| r.segment().is_none()).count();
        if roots != 1 {
            return Err(Error::Template(format!(
                "Rest api '{}' must have exactly one root route with path = '/'. Found {roots}", self.logical_id
            )));
        }
        for (i, route) in self.routes.iter().enumerate() {
            if !route.path.starts_with('/') {
                return Err(Error::Template(format!("Route path {:?} must start with '/'", route.path)));
            }
            if let Some(segment) = route.segment() {
                if segment.contains('/') {
                    return Err(Error::Template(format!("Route path {:?} must be a single path segment", route.path)));
                }
                if logical_id_part(segment).is_empty() {
                    return Err(Error::Template(format!("Route path {:?} must contain alphanumeric characters", route.path)));
                }
            }
            if self.routes[..i].iter().any(|r| r.path == route.path) {
                return Err(Error::Template(format!(
                    "Rest api '{}' received duplicate route path {}. All paths must be unique", self.logical_id, route.path
                )));
            }
            if route.methods.is_empty() {
                return Err(Error::Template(format!("Route {} must accept at least one method", route.path)));
            }
            for (j, m) in route.methods.iter().enumerate() {
                if route.methods[..j].contains(m) {
                    return Err(Error::Template(format!("Route {} lists method {} twice", route.path, m.as_str())));
                }
            }
        }
        Ok(())
    }

    pub fn resources(&self) -> Result<Vec<Resource>> {
        self.validate_routes()?;
        let api = &self.logical_id;
        let mut out = vec![];

        out.push(Resource::new(api.clone(), CfnRestApi {
            name: self.name.as_str().into(),
            endpoint_configuration: Some(EndpointConfiguration { types: vec!["REGIONAL".into()] }),
        }));

        let role_id = self.cloudwatch_role_id();
        out.push(Resource::new(role_id.clone(), CfnRole {
            assume_role_policy_document: assume_role_policy_doc("apigateway.amazonaws.com"),
            managed_policy_arns: vec![aws_managed_policy_arn("service-role/AmazonAPIGatewayPushToCloudWatchLogs")],
            ..Default::default()
        }).deletion_policy(crate::template::DeletionPolicy::Retain));
        out.push(Resource::new(self.account_id(), CfnAccount {
            cloud_watch_role_arn: get_att(&role_id, "Arn").into(),
        }).depends_on(&[api]));

        let mut method_ids = vec![];
        let mut method_props = vec![];
        for route in self.routes.iter() {
            let resource_id: StrVal = match route.segment() {
                None => get_att(api, "RootResourceId").into(),
                Some(segment) => {
                    let path_id = self.path_resource_id(segment);
                    out.push(Resource::new(path_id.clone(), CfnApiResource {
                        parent_id: get_att(api, "RootResourceId").into(),
                        path_part: segment.into(),
                        rest_api_id: get_ref(api).into(),
                    }));
                    get_ref(&path_id).into()
                }
            };
            let path = if route.segment().is_some() { route.path.as_str() } else { "/" };
            for method in route.methods.iter() {
                let method_id = self.method_id(&route.path, *method);
                let cfn_method = CfnMethod {
                    authorization_type: AUTHORIZATION_NONE.into(),
                    http_method: *method,
                    integration: Some(Integration::lambda_proxy(&route.function_id)),
                    resource_id: resource_id.clone(),
                    rest_api_id: get_ref(api).into(),
                };
                method_props.push(cfn_method.properties()?);
                out.push(Resource::new(method_id.clone(), cfn_method));
                out.push(Resource::new(
                    format!("{method_id}Permission"),
                    CfnPermission::invoke_from(&route.function_id, "apigateway.amazonaws.com", execute_api_arn(api, *method, path)),
                ));
                method_ids.push(method_id);
            }
        }

        // a deployment is a snapshot of the methods at creation time, so a new
        // logical id is needed whenever they change.
        let method_bytes = serde_json::to_vec(&method_props)?;
        let deployment_id = format!("{api}Deployment{:08x}", adler::adler32_slice(&method_bytes));
        debug!(%deployment_id, methods = method_ids.len(), "declared rest api deployment");
        out.push(Resource::new(deployment_id.clone(), CfnDeployment {
            description: Some(format!("Deployment of {api}").into()),
            rest_api_id: get_ref(api).into(),
        }).depends_on(&method_ids));

        out.push(Resource::new(self.stage_id(), CfnStage {
            access_log_setting: Some(AccessLogSetting {
                destination_arn: get_att(&self.access_log_group_id, "Arn").into(),
                format: JSON_WITH_STANDARD_FIELDS.into(),
            }),
            deployment_id: get_ref(&deployment_id).into(),
            method_settings: vec![MethodSetting {
                data_trace_enabled: false,
                http_method: "*".into(),
                logging_level: self.logging_level.clone(),
                metrics_enabled: self.metrics_enabled,
                resource_path: "/*".into(),
            }],
            rest_api_id: get_ref(api).into(),
            stage_name: self.stage_name.as_str().into(),
        }).depends_on(&[self.account_id()]));

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::StackBuilder;
    use crate::resources::logs::CfnLogGroup;
    use crate::resources::lambda::{CfnFunction, Code};

    fn function() -> CfnFunction {
        CfnFunction {
            code: Code { zip_file: Some("x".into()), ..Default::default() },
            handler: "index.handler".into(),
            role: "arn:aws:iam::1:role/r".into(),
            runtime: "python3.9".into(),
            ..Default::default()
        }
    }

    fn api() -> LambdaRestApi {
        LambdaRestApi::new("Api", "prod", "Logs")
            .route("/", &[HttpMethod::Any], "RootFn")
            .route("/hello", &[HttpMethod::Get, HttpMethod::Post], "HelloFn")
    }

    fn build(api: &LambdaRestApi) -> crate::template::Template {
        let mut builder = StackBuilder::default();
        builder.add(Resource::new("Logs", CfnLogGroup::default()));
        builder.add(Resource::new("RootFn", function()));
        builder.add(Resource::new("HelloFn", function()));
        for r in api.resources().unwrap() {
            builder.add(r);
        }
        builder.build().unwrap()
    }

    #[test]
    fn routes_expand_to_methods_and_permissions() {
        let template = build(&api());
        let methods: Vec<_> = template.resources_of_type("AWS::ApiGateway::Method").collect();
        assert_eq!(methods.len(), 3);
        let hello_get = &template.resources["ApiHelloGET"].properties;
        assert_eq!(hello_get["HttpMethod"], "GET");
        assert_eq!(hello_get["AuthorizationType"], "NONE");
        assert_eq!(hello_get["ResourceId"]["Ref"], "ApiHello");
        assert_eq!(hello_get["Integration"]["Type"], "AWS_PROXY");
        assert_eq!(hello_get["Integration"]["IntegrationHttpMethod"], "POST");

        let root = &template.resources["ApiRootANY"].properties;
        assert_eq!(root["ResourceId"]["Fn::GetAtt"][1], "RootResourceId");
        assert_eq!(template.resources_of_type("AWS::Lambda::Permission").count(), 3);
        let any_arn = &template.resources["ApiRootANYPermission"].properties["SourceArn"]["Fn::Join"][1];
        assert_eq!(any_arn.as_array().unwrap().last().unwrap(), "/*/*/");
    }

    #[test]
    fn deployment_depends_on_every_method_and_changes_with_them() {
        let template = build(&api());
        let (id, deployment) = template.resources_of_type("AWS::ApiGateway::Deployment").next().unwrap();
        assert_eq!(deployment.depends_on.len(), 3);
        let stage = &template.resources["ApiStage"];
        assert_eq!(stage.properties["DeploymentId"]["Ref"], id.as_str());
        assert_eq!(stage.properties["StageName"], "prod");
        assert_eq!(stage.properties["MethodSettings"][0]["LoggingLevel"], "INFO");
        assert_eq!(stage.properties["MethodSettings"][0]["MetricsEnabled"], true);
        assert_eq!(stage.depends_on, vec!["ApiAccount".to_string()]);

        let other = build(&api().route("/world", &[HttpMethod::Get], "HelloFn"));
        let (other_id, _) = other.resources_of_type("AWS::ApiGateway::Deployment").next().unwrap();
        assert_ne!(id, other_id);
    }

    #[test]
    fn exactly_one_root_route_is_required() {
        let no_root = LambdaRestApi::new("Api", "prod", "Logs").route("/hello", &[HttpMethod::Get], "F");
        assert!(no_root.resources().is_err());
        let two_roots = api().route("/", &[HttpMethod::Get], "F");
        assert!(two_roots.resources().is_err());
    }

    #[test]
    fn invalid_routes_are_rejected() {
        assert!(api().route("/hello", &[HttpMethod::Put], "F").resources().is_err());
        assert!(api().route("/a/b", &[HttpMethod::Get], "F").resources().is_err());
        assert!(api().route("nope", &[HttpMethod::Get], "F").resources().is_err());
        assert!(api().route("/empty", &[], "F").resources().is_err());
        assert!(api().route("/dup", &[HttpMethod::Get, HttpMethod::Get], "F").resources().is_err());
    }

    #[test]
    fn rest_api_is_regional() {
        let template = build(&api());
        let rest_api = &template.resources["Api"];
        assert_eq!(rest_api.ty, "AWS::ApiGateway::RestApi");
        assert_eq!(rest_api.properties, serde_json::json!({"Name": "Api", "EndpointConfiguration": {"Types": ["REGIONAL"]}}));
    }

    #[test]
    fn access_log_format_is_json() {
        let parsed: Value = serde_json::from_str(JSON_WITH_STANDARD_FIELDS).unwrap();
        assert_eq!(parsed["requestId"], "$context.requestId");
        assert_eq!(parsed.as_object().unwrap().len(), 10);
    }
}
