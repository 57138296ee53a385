use serde::Serialize;
use serde_json::Value;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The uniform response envelope every endpoint emits.
#[derive(Debug, Clone, Serialize)]
pub struct ApiEnvelope {
    /// Whether the request succeeded.
    pub success: bool,

    /// Human-readable summary.
    pub message: String,

    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Detail on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ApiEnvelope {
    /// A success envelope with an optional payload.
    pub fn success(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    /// An error envelope with a detail string.
    pub fn error(message: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: if detail.is_empty() { None } else { Some(detail) },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let env = ApiEnvelope::success("ok", Some(serde_json::json!({"id": "x"})));
        let value = serde_json::to_value(env).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "ok");
        assert_eq!(value["data"]["id"], "x");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_envelope_omits_empty_detail() {
        let env = ApiEnvelope::error("nope", "");
        let value = serde_json::to_value(env).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("error").is_none());
        assert!(value.get("data").is_none());
    }
}
