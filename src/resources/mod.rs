//! Typed CloudFormation resources, one module per AWS service.

/// implements [`crate::template::CfnResource`] for a resource that has no
/// local validation and serializes its fields as its properties.
macro_rules! impl_cfn_resource {
    ($ty:ty, $type_string:literal) => {
        impl crate::template::CfnResource for $ty {
            fn type_string(&self) -> &'static str {
                $type_string
            }
            fn properties(&self) -> serde_json::Result<serde_json::Value> {
                serde_json::to_value(self)
            }
        }
    };
}

pub mod apigateway;
pub mod cloudfront;
pub mod iam;
pub mod lambda;
pub mod logs;
pub mod route53;
pub mod s3_bucket;
pub mod wafv2;

/// turns a path segment or name into something usable inside a logical id.
/// `hello-world` becomes `HelloWorld`.
pub fn logical_id_part(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = true;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if upper_next {
                out.push(c.to_ascii_uppercase());
                upper_next = false;
            } else {
                out.push(c);
            }
        } else {
            upper_next = true;
        }
    }
    out
}
