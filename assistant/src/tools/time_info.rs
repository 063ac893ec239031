//! Time Info Implementation
//!
//! Current date and time for the configured zone, from the time API when it
//! answers and from the system clock otherwise.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::ToolDeclaration;
use crate::tool_registry::{ToolContext, ToolError, ToolHandler};

pub const TIME_INFO_TOOL_NAME: &str = "get_time_info";
pub const DEFAULT_TIME_API_URL: &str = "https://timeapi.io";
pub const DEFAULT_TIME_ZONE: &str = "America/Bogota";

/// Subset of the time API payload we use
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeApiResponse {
    date_time: Option<String>,
    time_zone: Option<String>,
    day_of_week: Option<String>,
    utc_offset: Option<String>,
}

/// Output from get_time_info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInfoOutput {
    pub date_time: Option<String>,
    pub time_zone: Option<String>,
    pub day_of_week: Option<String>,
    pub utc_offset: Option<String>,
    /// `time_api` or `system_clock`
    pub source: String,
}

impl TimeInfoOutput {
    pub fn from_system_clock() -> Self {
        let now = Utc::now();
        Self {
            date_time: Some(now.to_rfc3339()),
            time_zone: Some("UTC".to_string()),
            day_of_week: Some(now.format("%A").to_string()),
            utc_offset: Some("+00:00".to_string()),
            source: "system_clock".to_string(),
        }
    }
}

pub struct TimeInfoTool {
    http: reqwest::Client,
    base_url: String,
    time_zone: String,
}

impl TimeInfoTool {
    pub fn new(
        base_url: impl Into<String>,
        time_zone: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            time_zone: time_zone.into(),
        })
    }

    async fn fetch(&self) -> Result<TimeInfoOutput, ToolError> {
        let url = format!("{}/api/Time/current/zone", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("timeZone", self.time_zone.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!("time API returned {}", status)));
        }

        let data: TimeApiResponse = response.json().await?;
        Ok(TimeInfoOutput {
            date_time: data.date_time,
            time_zone: data.time_zone,
            day_of_week: data.day_of_week,
            utc_offset: data.utc_offset,
            source: "time_api".to_string(),
        })
    }
}

#[async_trait]
impl ToolHandler for TimeInfoTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(
            TIME_INFO_TOOL_NAME,
            "Get the current date, time and day of the week. Use it for questions about \
             \"today\", \"this month\" or any relative date.",
        )
    }

    async fn call(&self, _args: &Map<String, Value>, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let output = match self.fetch().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, time_zone = %self.time_zone, "time API unavailable, using system clock");
                TimeInfoOutput::from_system_clock()
            }
        };
        serde_json::to_value(output).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
