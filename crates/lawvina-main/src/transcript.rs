use std::io::Write;

use chrono::{DateTime, Local, Utc};
use lawvina_chat::{
    Citation, Conversation, Document, DocumentBody, DocumentSummary, ExchangeUpdate, Message,
    REASONING_CLOSE, REASONING_OPEN, Role, partition_reasoning,
};

const REASONING_HEADER: &str = "[suy luận]";
const REASONING_FOOTER: &str = "[/suy luận]";
const REASONING_GUTTER: &str = "│ ";

/// Renders assistant content with its reasoning segment as a marked block.
/// A segment still being written is always shown; a finished one only when
/// `expand_finished_reasoning` is set.
pub fn render_content(content: &str, expand_finished_reasoning: bool) -> String {
    let view = partition_reasoning(content);
    let mut rendered = view.before.to_string();
    let Some(reasoning) = view.reasoning else {
        return rendered;
    };

    if !rendered.is_empty() && !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    rendered.push_str(REASONING_HEADER);
    rendered.push('\n');
    rendered.push_str(REASONING_GUTTER);
    if reasoning.expanded_by_default() || expand_finished_reasoning {
        rendered.push_str(&reasoning.body.replace('\n', &format!("\n{REASONING_GUTTER}")));
    } else {
        let lines = reasoning.body.trim().lines().count();
        rendered.push_str(&format!("({lines} dòng, đã ẩn)"));
    }
    if !reasoning.in_progress {
        rendered.push('\n');
        rendered.push_str(REASONING_FOOTER);
        rendered.push('\n');
        rendered.push_str(view.after.trim_start_matches('\n'));
    }
    rendered
}

/// Content minus a trailing fragment that may still grow into a reasoning
/// delimiter, so streamed output never has to be taken back.
fn stable_prefix(content: &str) -> &str {
    for tag in [REASONING_OPEN, REASONING_CLOSE] {
        for len in (1..tag.len()).rev() {
            if content.ends_with(&tag[..len]) {
                return &content[..content.len() - len];
            }
        }
    }
    content
}

pub fn render_citations(citations: &[Citation]) -> String {
    let mut rendered = String::new();
    for (index, citation) in citations.iter().enumerate() {
        if citation.title == citation.id {
            rendered.push_str(&format!("  [{}] {}\n", index + 1, citation.title));
        } else {
            rendered.push_str(&format!(
                "  [{}] {} ({})\n",
                index + 1,
                citation.title,
                citation.id
            ));
        }
    }
    rendered
}

pub fn render_message(message: &Message) -> String {
    let label = match message.role {
        Role::User => "Bạn",
        Role::Assistant => "LawVina",
    };
    let mut rendered = format!("{label}: {}\n", render_content(&message.content, false));
    if !message.citations().is_empty() {
        rendered.push_str("Nguồn:\n");
        rendered.push_str(&render_citations(message.citations()));
    }
    rendered
}

pub fn render_conversation_list(conversations: &[Conversation], active_id: Option<&str>) -> String {
    let mut rendered = String::new();
    for (index, conversation) in conversations.iter().enumerate() {
        let marker = if Some(conversation.id.as_str()) == active_id {
            '*'
        } else {
            ' '
        };
        rendered.push_str(&format!(
            "{marker} {}. {} ({}, {} tin nhắn)\n",
            index + 1,
            conversation.title,
            format_timestamp(conversation.updated_at),
            conversation.messages.len()
        ));
    }
    rendered
}

pub fn render_document_list(documents: &[DocumentSummary]) -> String {
    if documents.is_empty() {
        return "(không tìm thấy văn bản)\n".to_string();
    }
    let mut rendered = String::new();
    for (index, document) in documents.iter().enumerate() {
        let mut line = format!("{}. ", index + 1);
        if let Some(number) = document.doc_number.as_deref().filter(|value| !value.is_empty()) {
            line.push_str(&format!("[{number}] "));
        }
        line.push_str(&document.title);
        if let Some(date) = document.doc_date.as_deref().filter(|value| !value.is_empty()) {
            line.push_str(&format!(" | {date}"));
        }
        rendered.push_str(&line);
        rendered.push('\n');
        rendered.push_str(&format!("   id: {}", document.id));
        if !document.url.is_empty() {
            rendered.push_str(&format!("  {}", document.url));
        }
        rendered.push('\n');
    }
    rendered
}

pub fn render_document(document: &Document) -> String {
    let metadata = &document.metadata;
    let mut rendered = format!("{}\n", metadata.title);
    rendered.push_str(&format!("id: {}\n", metadata.id));
    if let Some(source) = metadata.source.as_deref() {
        rendered.push_str(&format!("nguồn: {source}\n"));
    }
    if !metadata.url.is_empty() {
        rendered.push_str(&format!("url: {}\n", metadata.url));
    }
    rendered.push('\n');

    match document.body() {
        DocumentBody::FullText(text) => {
            rendered.push_str(text.trim_end());
            rendered.push('\n');
        }
        DocumentBody::Sections(sections) => {
            for section in sections {
                if !section.title.is_empty() {
                    rendered.push_str(&format!("## {}\n", section.title));
                }
                if !section.content.is_empty() {
                    rendered.push_str(section.content.trim_end());
                    rendered.push('\n');
                }
                rendered.push('\n');
            }
        }
        DocumentBody::Empty => rendered.push_str("(văn bản không có nội dung)\n"),
    }

    if !document.references.is_empty() {
        rendered.push_str("\nVăn bản liên quan:\n");
        for reference in &document.references {
            rendered.push_str(&format!("  - {} ({})\n", reference.name, reference.link));
        }
    }
    rendered
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|timestamp| {
            timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "?".to_string())
}

/// Writes a streamed reply as it grows, plus status and warning lines.
pub struct StreamPrinter<W: Write> {
    writer: W,
    printed: String,
    last_status: Option<String>,
    line_open: bool,
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            printed: String::new(),
            last_status: None,
            line_open: false,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }

    pub fn on_update(&mut self, update: &ExchangeUpdate) -> Result<(), String> {
        match update {
            ExchangeUpdate::Progress { message, .. } => {
                self.show_status(message.status.as_deref())?;
                self.write_content(stable_prefix(&message.content))
            }
            ExchangeUpdate::Warning { message, .. } => self.write_line(&format!("! {message}")),
            ExchangeUpdate::Completed { message, .. } | ExchangeUpdate::Failed { message, .. } => {
                self.write_content(&message.content)?;
                self.end_line()?;
                if !message.citations().is_empty() {
                    self.write_raw("Nguồn:\n")?;
                    self.write_raw(&render_citations(message.citations()))?;
                }
                self.flush()
            }
        }
    }

    fn show_status(&mut self, status: Option<&str>) -> Result<(), String> {
        let Some(status) = status else {
            return Ok(());
        };
        if self.last_status.as_deref() == Some(status) {
            return Ok(());
        }
        self.last_status = Some(status.to_string());
        self.write_line(&format!("… {status}"))
    }

    fn write_content(&mut self, content: &str) -> Result<(), String> {
        let rendered = render_content(content, true);
        let suffix = match rendered.strip_prefix(self.printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => {
                self.end_line()?;
                rendered.clone()
            }
        };
        if suffix.is_empty() {
            return Ok(());
        }
        self.write_raw(&suffix)?;
        self.line_open = !suffix.ends_with('\n');
        self.printed = rendered;
        self.flush()
    }

    fn write_line(&mut self, line: &str) -> Result<(), String> {
        self.end_line()?;
        self.write_raw(line)?;
        self.write_raw("\n")?;
        self.flush()
    }

    fn end_line(&mut self) -> Result<(), String> {
        if self.line_open {
            self.write_raw("\n")?;
            self.line_open = false;
        }
        Ok(())
    }

    fn write_raw(&mut self, text: &str) -> Result<(), String> {
        self.writer
            .write_all(text.as_bytes())
            .map_err(|error| format!("stdout write failed: {error}"))
    }

    fn flush(&mut self) -> Result<(), String> {
        self.writer
            .flush()
            .map_err(|error| format!("stdout flush failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lawvina_chat::{DocumentMetadata, DocumentReference, DocumentSection};

    fn progress(content: &str) -> ExchangeUpdate {
        ExchangeUpdate::Progress {
            conversation_id: "conv-1".to_string(),
            message: Message::assistant(content),
        }
    }

    fn printed(updates: &[ExchangeUpdate]) -> String {
        let mut printer = StreamPrinter::new(Vec::new());
        for update in updates {
            printer.on_update(update).expect("print update");
        }
        String::from_utf8(printer.into_inner()).expect("utf8 output")
    }

    #[test]
    fn plain_content_renders_unchanged() {
        assert_eq!(render_content("Điều 5 quy định", false), "Điều 5 quy định");
    }

    #[test]
    fn in_progress_reasoning_is_always_shown() {
        assert_eq!(
            render_content("Hello <think>reasoning...", false),
            "Hello \n[suy luận]\n│ reasoning..."
        );
    }

    #[test]
    fn finished_reasoning_collapses_unless_expanded() {
        let content = "Hello <think>R1\nR2</think>World";
        assert_eq!(
            render_content(content, true),
            "Hello \n[suy luận]\n│ R1\n│ R2\n[/suy luận]\nWorld"
        );
        assert_eq!(
            render_content(content, false),
            "Hello \n[suy luận]\n│ (2 dòng, đã ẩn)\n[/suy luận]\nWorld"
        );
    }

    #[test]
    fn partial_delimiters_are_held_back() {
        assert_eq!(stable_prefix("Hello <thi"), "Hello ");
        assert_eq!(stable_prefix("<think>R</th"), "<think>R");
        assert_eq!(stable_prefix("a < b"), "a < b");
    }

    #[test]
    fn streamed_output_matches_the_final_rendering() {
        let final_content = "Chào <think>tra cứu\nluật</think>Kết luận.";
        let mut updates = Vec::new();
        for end in 1..=final_content.len() {
            if final_content.is_char_boundary(end) {
                updates.push(progress(&final_content[..end]));
            }
        }
        updates.push(ExchangeUpdate::Completed {
            conversation_id: "conv-1".to_string(),
            message: Message::assistant(final_content),
        });

        assert_eq!(
            printed(&updates),
            format!("{}\n", render_content(final_content, true))
        );
    }

    #[test]
    fn status_and_warnings_get_their_own_lines() {
        let mut searching = Message::assistant("");
        searching.status = Some("Đang tìm kiếm...".to_string());
        let output = printed(&[
            ExchangeUpdate::Progress {
                conversation_id: "conv-1".to_string(),
                message: searching.clone(),
            },
            ExchangeUpdate::Progress {
                conversation_id: "conv-1".to_string(),
                message: searching,
            },
            progress("Theo"),
            ExchangeUpdate::Warning {
                conversation_id: "conv-1".to_string(),
                message: "web search unavailable".to_string(),
            },
        ]);
        assert_eq!(
            output,
            "… Đang tìm kiếm...\nTheo\n! web search unavailable\n"
        );
    }

    #[test]
    fn completion_lists_citation_chips() {
        let mut reply = Message::assistant("Xem Điều 6.");
        reply.citations = Some(vec![
            Citation::new("100/2019/NĐ-CP", "Nghị định 100"),
            Citation::placeholder("X9"),
        ]);
        let output = printed(&[ExchangeUpdate::Completed {
            conversation_id: "conv-1".to_string(),
            message: reply,
        }]);
        assert_eq!(
            output,
            "Xem Điều 6.\nNguồn:\n  [1] Nghị định 100 (100/2019/NĐ-CP)\n  [2] X9\n"
        );
    }

    #[test]
    fn conversation_list_marks_the_active_entry() {
        let conversations = vec![
            Conversation {
                id: "conv-2".to_string(),
                title: "Thuế".to_string(),
                messages: vec![Message::assistant("hi")],
                created_at: 0,
                updated_at: 0,
            },
            Conversation {
                id: "conv-1".to_string(),
                title: "Đất đai".to_string(),
                messages: Vec::new(),
                created_at: 0,
                updated_at: 0,
            },
        ];
        let rendered = render_conversation_list(&conversations, Some("conv-1"));
        let lines = rendered.lines().collect::<Vec<_>>();
        assert!(lines[0].starts_with("  1. Thuế ("));
        assert!(lines[1].starts_with("* 2. Đất đai ("));
        assert!(lines[1].ends_with(", 0 tin nhắn)"));
    }

    #[test]
    fn document_prefers_full_text_and_lists_references() {
        let document = Document {
            metadata: DocumentMetadata {
                id: "59/2020/QH14".to_string(),
                title: "Luật Doanh nghiệp".to_string(),
                url: "https://example.test/59".to_string(),
                source: Some("vbqppl".to_string()),
            },
            content: vec![DocumentSection {
                kind: "chapter".to_string(),
                title: "Chương I".to_string(),
                content: "ignored".to_string(),
            }],
            full_content: Some("Điều 1. Phạm vi điều chỉnh\n".to_string()),
            references: vec![DocumentReference {
                name: "Nghị định 01/2021".to_string(),
                link: "https://example.test/01".to_string(),
            }],
        };
        let rendered = render_document(&document);
        assert!(rendered.starts_with("Luật Doanh nghiệp\nid: 59/2020/QH14\nnguồn: vbqppl\n"));
        assert!(rendered.contains("Điều 1. Phạm vi điều chỉnh\n"));
        assert!(!rendered.contains("Chương I"));
        assert!(rendered.ends_with("  - Nghị định 01/2021 (https://example.test/01)\n"));
    }

    #[test]
    fn document_without_body_says_so() {
        let document = Document {
            metadata: DocumentMetadata {
                id: "1".to_string(),
                title: "Trống".to_string(),
                url: String::new(),
                source: None,
            },
            content: Vec::new(),
            full_content: Some("   ".to_string()),
            references: Vec::new(),
        };
        assert!(render_document(&document).ends_with("(văn bản không có nội dung)\n"));
    }

    #[test]
    fn document_list_shows_number_and_date() {
        let rendered = render_document_list(&[DocumentSummary {
            id: "12".to_string(),
            title: "Luật Đất đai".to_string(),
            doc_number: Some("31/2024/QH15".to_string()),
            url: "https://example.test/12".to_string(),
            doc_date: Some("18/01/2024".to_string()),
        }]);
        assert_eq!(
            rendered,
            "1. [31/2024/QH15] Luật Đất đai | 18/01/2024\n   id: 12  https://example.test/12\n"
        );
        assert_eq!(render_document_list(&[]), "(không tìm thấy văn bản)\n");
    }
}
