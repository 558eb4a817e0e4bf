use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatErrorCode {
    Transport,
    Http,
    Parse,
    Persistence,
    ExchangeInFlight,
    ConversationNotFound,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatError {
    pub code: ChatErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ChatError {
    pub fn new(code: ChatErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ChatErrorCode::Transport, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ChatErrorCode::Parse, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Recoverable errors affect a single record and never end an exchange.
    pub fn is_recoverable(&self) -> bool {
        self.code == ChatErrorCode::Parse
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"transport\",\"message\":\"{}\"}}",
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ChatError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_json_uses_snake_case_codes_and_skips_empty_details() {
        let error = ChatError::new(ChatErrorCode::ExchangeInFlight, "busy");
        assert_eq!(
            error.as_compact_json(),
            r#"{"code":"exchange_in_flight","message":"busy"}"#
        );
    }

    #[test]
    fn only_parse_errors_are_recoverable() {
        assert!(ChatError::parse("bad record").is_recoverable());
        assert!(!ChatError::transport("reset").is_recoverable());
        assert!(
            !ChatError::new(ChatErrorCode::Http, "HTTP 500")
                .with_details(json!({ "status": 500 }))
                .is_recoverable()
        );
    }
}
