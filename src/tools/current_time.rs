//! current_time tool - report the server clock

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolError};

/// Largest offset a real timezone uses, in minutes
const MAX_OFFSET_MINUTES: i64 = 14 * 60;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time, optionally shifted to a UTC offset."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "description": "Offset from UTC in minutes, e.g. 60 for UTC+1"
                }
            }
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let offset_minutes = match input.get("utc_offset_minutes") {
            None | Some(Value::Null) => 0,
            Some(value) => value
                .as_i64()
                .ok_or_else(|| ToolError::InvalidArguments("utc_offset_minutes must be an integer".to_string()))?,
        };

        if offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(ToolError::InvalidArguments(format!(
                "utc_offset_minutes must be within +/-{}",
                MAX_OFFSET_MINUTES
            )));
        }

        let offset = FixedOffset::east_opt((offset_minutes * 60) as i32)
            .ok_or_else(|| ToolError::InvalidArguments("invalid offset".to_string()))?;
        let now = Utc::now();

        Ok(json!({
            "success": true,
            "data": {
                "iso": now.with_timezone(&offset).to_rfc3339(),
                "unix": now.timestamp(),
                "utcOffsetMinutes": offset_minutes
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_time_utc() {
        let result = CurrentTimeTool.execute(json!({}), &ToolContext::default()).await.unwrap();
        assert_eq!(result["success"], true);
        assert!(result["data"]["iso"].as_str().unwrap().ends_with("+00:00"));
        assert!(result["data"]["unix"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_current_time_offset() {
        let result = CurrentTimeTool
            .execute(json!({"utc_offset_minutes": 330}), &ToolContext::default())
            .await
            .unwrap();
        assert!(result["data"]["iso"].as_str().unwrap().ends_with("+05:30"));
    }

    #[tokio::test]
    async fn test_current_time_rejects_bad_offset() {
        let ctx = ToolContext::default();
        assert!(matches!(
            CurrentTimeTool.execute(json!({"utc_offset_minutes": "soon"}), &ctx).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            CurrentTimeTool.execute(json!({"utc_offset_minutes": 100000}), &ctx).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
