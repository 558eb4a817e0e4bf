pub const REASONING_OPEN: &str = "<think>";
pub const REASONING_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningSegment<'a> {
    pub body: &'a str,
    pub in_progress: bool,
}

impl ReasoningSegment<'_> {
    /// Only a segment that is still being written starts expanded.
    pub fn expanded_by_default(&self) -> bool {
        self.in_progress
    }
}

/// Assistant content split around an optional reasoning segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningView<'a> {
    pub before: &'a str,
    pub reasoning: Option<ReasoningSegment<'a>>,
    pub after: &'a str,
}

/// Recomputed from the whole content on every render.
pub fn partition_reasoning(content: &str) -> ReasoningView<'_> {
    let Some(open) = content.find(REASONING_OPEN) else {
        return ReasoningView {
            before: content,
            reasoning: None,
            after: "",
        };
    };

    let before = &content[..open];
    let rest = &content[open + REASONING_OPEN.len()..];
    match rest.find(REASONING_CLOSE) {
        Some(close) => ReasoningView {
            before,
            reasoning: Some(ReasoningSegment {
                body: &rest[..close],
                in_progress: false,
            }),
            after: &rest[close + REASONING_CLOSE.len()..],
        },
        None => ReasoningView {
            before,
            reasoning: Some(ReasoningSegment {
                body: rest,
                in_progress: true,
            }),
            after: "",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_segment_is_in_progress_with_no_after_text() {
        let view = partition_reasoning("Hello <think>reasoning...");
        assert_eq!(view.before, "Hello ");
        assert_eq!(
            view.reasoning,
            Some(ReasoningSegment {
                body: "reasoning...",
                in_progress: true
            })
        );
        assert_eq!(view.after, "");
        assert!(view.reasoning.is_some_and(|segment| segment.expanded_by_default()));
    }

    #[test]
    fn closed_segment_partitions_into_three_parts() {
        let view = partition_reasoning("Hello <think>R</think>World");
        assert_eq!(view.before, "Hello ");
        assert_eq!(
            view.reasoning,
            Some(ReasoningSegment {
                body: "R",
                in_progress: false
            })
        );
        assert_eq!(view.after, "World");
    }

    #[test]
    fn content_without_delimiters_is_all_prose() {
        let view = partition_reasoning("Theo Điều 5");
        assert_eq!(view.before, "Theo Điều 5");
        assert_eq!(view.reasoning, None);
    }

    #[test]
    fn stray_close_before_open_is_ignored() {
        let view = partition_reasoning("a</think>b<think>c");
        assert_eq!(view.before, "a</think>b");
        assert_eq!(view.reasoning.map(|segment| segment.body), Some("c"));
    }
}
