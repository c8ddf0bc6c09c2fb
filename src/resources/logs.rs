use serde::Serialize;
use serde_json::Value;

use crate::template::{CfnResource, StrVal};

/// retention periods CloudWatch Logs accepts.
pub const VALID_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922, 3288, 3653,
];

/// two years, matching the retention log groups were originally created with.
pub const DEFAULT_RETENTION_DAYS: u32 = 731;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnLogGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_group_name: Option<StrVal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_in_days: Option<u32>,
}

impl CfnResource for CfnLogGroup {
    fn type_string(&self) -> &'static str {
        "AWS::Logs::LogGroup"
    }

    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), String> {
        match self.retention_in_days {
            Some(days) if !VALID_RETENTION_DAYS.contains(&days) => {
                Err(format!("Invalid log retention {days}\nMust be one of {:?}", VALID_RETENTION_DAYS))
            }
            _ => Ok(()),
        }
    }
}
