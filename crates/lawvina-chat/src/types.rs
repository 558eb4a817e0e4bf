use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatMode {
    #[serde(rename = "law_db")]
    LawDb,
    #[serde(rename = "web")]
    Web,
    #[default]
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl ChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::LawDb => "law_db",
            ChatMode::Web => "web",
            ChatMode::Hybrid => "hybrid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "law_db" => Some(ChatMode::LawDb),
            "web" => Some(ChatMode::Web),
            "hybrid" => Some(ChatMode::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Citation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: None,
        }
    }

    /// Stand-in for a cited id the candidate pool never described.
    pub fn placeholder(id: &str) -> Self {
        Self::new(id, id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(rename = "sources", default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing)]
    pub status: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            citations: None,
            status: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            citations: None,
            status: None,
        }
    }

    /// Empty assistant message that a stream is about to fill in.
    pub fn assistant_placeholder() -> Self {
        Self {
            citations: Some(Vec::new()),
            ..Self::assistant("")
        }
    }

    pub fn citations(&self) -> &[Citation] {
        self.citations.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<Message>,
    pub mode: ChatMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_number: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Origin collection, e.g. `vbqppl` or `phapdien`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSection {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub name: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub content: Vec<DocumentSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<DocumentReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentBody<'a> {
    FullText(&'a str),
    Sections(&'a [DocumentSection]),
    Empty,
}

impl Document {
    /// A non-blank flat body wins over structural sections.
    pub fn body(&self) -> DocumentBody<'_> {
        match self.full_content.as_deref() {
            Some(text) if !text.trim().is_empty() => DocumentBody::FullText(text),
            _ if !self.content.is_empty() => DocumentBody::Sections(&self.content),
            _ => DocumentBody::Empty,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Integer(value) => value.to_string(),
        Raw::Float(value) => value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_status_is_never_persisted() {
        let mut message = Message::assistant("xin chào");
        message.status = Some("Đang tìm kiếm".to_string());
        let value = serde_json::to_value(&message).expect("serialize message");
        assert_eq!(value, json!({ "role": "assistant", "content": "xin chào" }));
    }

    #[test]
    fn citation_accepts_numeric_ids_and_ignores_extra_fields() {
        let citation: Citation = serde_json::from_value(json!({
            "id": 42,
            "title": "Bộ luật Dân sự",
            "score": 0.91
        }))
        .expect("decode citation");
        assert_eq!(citation, Citation::new("42", "Bộ luật Dân sự"));
    }

    #[test]
    fn document_body_prefers_full_text_over_sections() {
        let document: Document = serde_json::from_value(json!({
            "metadata": { "id": "d1", "title": "Luật", "url": "#" },
            "content": [{ "type": "article", "title": "Điều 1", "content": "..." }],
            "full_content": "Toàn văn"
        }))
        .expect("decode document");
        assert_eq!(document.body(), DocumentBody::FullText("Toàn văn"));

        let sections_only = Document {
            full_content: Some("   ".to_string()),
            ..document
        };
        assert!(matches!(sections_only.body(), DocumentBody::Sections(sections) if sections.len() == 1));
    }

    #[test]
    fn chat_mode_parses_wire_names() {
        assert_eq!(ChatMode::parse(" LAW_DB "), Some(ChatMode::LawDb));
        assert_eq!(ChatMode::parse("agent"), None);
        assert_eq!(ChatMode::default().as_str(), "hybrid");
    }
}
