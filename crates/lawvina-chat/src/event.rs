use serde::Deserialize;
use serde_json::json;

use crate::error::ChatError;
use crate::types::Citation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsedDocs {
    Resolved(Vec<Citation>),
    Ids(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Sources(Vec<Citation>),
    Content(String),
    Status(String),
    UsedDocs(UsedDocs),
    Warning(String),
}

impl StreamEvent {
    /// Status and citation events are rare and the user is waiting on them.
    pub fn bypasses_throttle(&self) -> bool {
        matches!(
            self,
            StreamEvent::Sources(_) | StreamEvent::Status(_) | StreamEvent::UsedDocs(_)
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Sources {
        #[serde(default)]
        data: Vec<Citation>,
    },
    Content {
        #[serde(default)]
        delta: String,
    },
    Status {
        #[serde(default)]
        message: String,
    },
    UsedDocs {
        #[serde(default)]
        data: Option<Vec<Citation>>,
        #[serde(default)]
        ids: Option<Vec<WireId>>,
    },
    Warning {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Integer(i64),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Text(text) => text,
            WireId::Integer(value) => value.to_string(),
        }
    }
}

/// Decodes one NDJSON record. `Ok(None)` means the record is valid but carries
/// nothing to act on (unknown `type`, or `used_docs` without a payload).
pub fn interpret_record(record: &str) -> Result<Option<StreamEvent>, ChatError> {
    let wire: WireEvent = serde_json::from_str(record).map_err(|error| {
        ChatError::parse(format!("invalid chat stream record: {error}"))
            .with_details(json!({ "record": truncate_for_details(record, 200) }))
    })?;

    let event = match wire {
        WireEvent::Sources { data } => StreamEvent::Sources(data),
        WireEvent::Content { delta } => StreamEvent::Content(delta),
        WireEvent::Status { message } => StreamEvent::Status(message),
        WireEvent::UsedDocs { data: Some(data), .. } => {
            StreamEvent::UsedDocs(UsedDocs::Resolved(data))
        }
        WireEvent::UsedDocs {
            data: None,
            ids: Some(ids),
        } => StreamEvent::UsedDocs(UsedDocs::Ids(
            ids.into_iter().map(WireId::into_string).collect(),
        )),
        WireEvent::UsedDocs {
            data: None,
            ids: None,
        } => {
            tracing::debug!("used_docs record without data or ids ignored");
            return Ok(None);
        }
        WireEvent::Warning { message } => StreamEvent::Warning(message),
        WireEvent::Unknown => {
            tracing::debug!("chat stream record with unknown type ignored");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn truncate_for_details(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatErrorCode;

    #[test]
    fn classifies_every_known_kind() {
        assert_eq!(
            interpret_record(r#"{"type":"content","delta":"Điều"}"#).expect("content"),
            Some(StreamEvent::Content("Điều".to_string()))
        );
        assert_eq!(
            interpret_record(r#"{"type":"status","message":"Đang tra cứu..."}"#)
                .expect("status"),
            Some(StreamEvent::Status("Đang tra cứu...".to_string()))
        );
        assert_eq!(
            interpret_record(r#"{"type":"warning","message":"giới hạn"}"#).expect("warning"),
            Some(StreamEvent::Warning("giới hạn".to_string()))
        );
        assert_eq!(
            interpret_record(r#"{"type":"sources","data":[{"id":"X1","title":"Law 1"}]}"#)
                .expect("sources"),
            Some(StreamEvent::Sources(vec![Citation::new("X1", "Law 1")]))
        );
    }

    #[test]
    fn used_docs_data_takes_precedence_over_ids() {
        let event = interpret_record(
            r#"{"type":"used_docs","data":[{"id":"A","title":"Alpha"}],"ids":["B"]}"#,
        )
        .expect("used_docs");
        assert_eq!(
            event,
            Some(StreamEvent::UsedDocs(UsedDocs::Resolved(vec![Citation::new(
                "A", "Alpha"
            )])))
        );
    }

    #[test]
    fn used_docs_ids_accept_numbers() {
        let event = interpret_record(r#"{"type":"used_docs","ids":["X2",7]}"#).expect("ids");
        assert_eq!(
            event,
            Some(StreamEvent::UsedDocs(UsedDocs::Ids(vec![
                "X2".to_string(),
                "7".to_string()
            ])))
        );
    }

    #[test]
    fn unknown_types_and_empty_used_docs_are_ignored() {
        assert_eq!(interpret_record(r#"{"type":"ping"}"#).expect("ping"), None);
        assert_eq!(interpret_record(r#"{"type":"used_docs"}"#).expect("empty"), None);
    }

    #[test]
    fn malformed_records_are_recoverable_parse_errors() {
        let error = interpret_record(r#"{"type":"content","delta":"#).expect_err("truncated");
        assert_eq!(error.code, ChatErrorCode::Parse);
        assert!(error.is_recoverable());

        let error = interpret_record(r#"{"delta":"no type"}"#).expect_err("missing tag");
        assert_eq!(error.code, ChatErrorCode::Parse);
    }
}
