//! Splits a finished message into typed, independently renderable blocks
//!
//! Segmentation runs in fixed passes over the message text: hidden
//! reasoning tags are extracted first, the residue is scanned for fenced
//! code blocks, and whatever remains is split into prose paragraphs.
//! Each pass only ever sees the residue of the previous one, which keeps
//! the edge cases (unterminated tags, unterminated fences) local to the
//! pass that hit them. The whole thing is a pure function over the
//! message content; segments are recomputed on every display and never
//! persisted.

use crate::message::{Message, MessageSender};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

/// Paragraphs whose lines are all shorter than this are split per line,
/// which separates list-like runs without fragmenting wrapped prose.
const SHORT_LINE_MAX: usize = 80;

/// Reasoning tag pairs, longest open tag first so `<thinking>` is never
/// half-matched as `<think>`.
const THINKING_TAGS: [(&str, &str); 2] = [("<thinking>", "</thinking>"), ("<think>", "</think>")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Thinking,
    Code,
    Diagram,
}

/// A derived view over one slice of a finished message's content.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSegment {
    pub id: String,
    pub kind: SegmentKind,
    pub content: String,
    pub language: Option<String>,
    /// Reasoning delimiter name as it appeared (`thinking` or `think`),
    /// kept so rewrapping restores the original tag
    pub thinking_tag: Option<String>,
    /// Id of the message this segment was derived from
    pub message_id: String,
}

impl MessageSegment {
    fn new(kind: SegmentKind, content: String, language: Option<String>, message_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content,
            language,
            thinking_tag: None,
            message_id: message_id.to_string(),
        }
    }

    /// Restores the delimiters the segmenter stripped, so a segment can
    /// be materialized back into standalone message content.
    pub fn rewrap(&self) -> String {
        match self.kind {
            SegmentKind::Text => self.content.clone(),
            SegmentKind::Thinking => {
                let tag = self.thinking_tag.as_deref().unwrap_or("thinking");
                format!("<{tag}>{}</{tag}>", self.content)
            }
            SegmentKind::Code | SegmentKind::Diagram => match &self.language {
                Some(language) => format!("```{}\n{}\n```", language, self.content),
                None => format!("```\n{}\n```", self.content),
            },
        }
    }

    /// Materializes the segment as a synthetic favorite message, used
    /// when a single block is starred independently of its parent.
    pub fn into_favorite_message(self) -> Message {
        let mut message = Message::assistant(self.rewrap());
        message.favorite = true;
        message
    }
}

/// Splits `message` into an ordered list of segments. Deterministic for
/// identical input, modulo the freshly generated segment ids. User
/// messages are never decomposed; they yield their content verbatim as a
/// single text segment, with any attached image left on the message.
pub fn segment_message(message: &Message) -> Vec<MessageSegment> {
    if message.sender == MessageSender::User {
        return vec![MessageSegment::new(
            SegmentKind::Text,
            message.content.clone(),
            None,
            &message.id,
        )];
    }

    let mut segments = Vec::new();
    for span in split_thinking(&message.content) {
        match span {
            Span::Thinking { tag, body } => {
                let mut segment =
                    MessageSegment::new(SegmentKind::Thinking, body, None, &message.id);
                segment.thinking_tag = Some(tag);
                segments.push(segment);
            }
            Span::Plain(text) => split_fences(&text, &message.id, &mut segments),
        }
    }
    segments
}

enum Span {
    Plain(String),
    Thinking { tag: String, body: String },
}

/// Pass 1: extract `<thinking>`/`<think>` regions, preserving the order
/// of the surrounding text. An open tag with no matching close tag stays
/// in the text literally.
fn split_thinking(content: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut plain_start = 0;
    let mut cursor = 0;

    while let Some((open_pos, open, close)) = next_open_tag(content, cursor) {
        let body_start = open_pos + open.len();
        match find_ignore_case(content, close, body_start) {
            Some(close_pos) => {
                if open_pos > plain_start {
                    spans.push(Span::Plain(content[plain_start..open_pos].to_string()));
                }
                spans.push(Span::Thinking {
                    // Tag name as it literally appeared, without brackets
                    tag: content[open_pos + 1..body_start - 1].to_string(),
                    body: content[body_start..close_pos].trim().to_string(),
                });
                cursor = close_pos + close.len();
                plain_start = cursor;
            }
            None => {
                debug!("Unterminated {} tag treated as plain text", open);
                cursor = body_start;
            }
        }
    }
    if plain_start < content.len() {
        spans.push(Span::Plain(content[plain_start..].to_string()));
    }
    spans
}

/// Earliest open tag at or after `from`. Ties favor the longer tag
/// because of the ordering in `THINKING_TAGS`.
fn next_open_tag(content: &str, from: usize) -> Option<(usize, &'static str, &'static str)> {
    let mut found: Option<(usize, &'static str, &'static str)> = None;
    for (open, close) in THINKING_TAGS {
        if let Some(pos) = find_ignore_case(content, open, from) {
            if found.map_or(true, |(best, _, _)| pos < best) {
                found = Some((pos, open, close));
            }
        }
    }
    found
}

/// ASCII case-insensitive substring search. The needles are all ASCII
/// tag literals, so byte-wise comparison is safe on UTF-8 input.
fn find_ignore_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if from + needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Pass 2: scan one plain span for triple-backtick fences. Prose before
/// each fence is flushed as paragraphs; a fence tagged `mermaid` becomes
/// a diagram. An unterminated fence downgrades everything from the start
/// of the pending prose to a single literal text segment.
fn split_fences(text: &str, message_id: &str, segments: &mut Vec<MessageSegment>) {
    let mut prose_start = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find("```") {
        let open = cursor + offset;
        let tag_start = open + 3;
        let body_start = match text[tag_start..].find('\n') {
            Some(newline) => tag_start + newline + 1,
            None => {
                // Fence with no body at end-of-string
                flush_unterminated(&text[prose_start..], message_id, segments);
                return;
            }
        };
        let Some(close_offset) = text[body_start..].find("```") else {
            flush_unterminated(&text[prose_start..], message_id, segments);
            return;
        };
        let close = body_start + close_offset;

        flush_paragraphs(&text[prose_start..open], message_id, segments);

        let tag = text[tag_start..body_start].trim();
        let body = text[body_start..close].trim().to_string();
        if tag.eq_ignore_ascii_case("mermaid") {
            segments.push(MessageSegment::new(
                SegmentKind::Diagram,
                body,
                Some("mermaid".to_string()),
                message_id,
            ));
        } else {
            let language = (!tag.is_empty()).then(|| tag.to_string());
            segments.push(MessageSegment::new(
                SegmentKind::Code,
                body,
                language,
                message_id,
            ));
        }

        cursor = close + 3;
        if text[cursor..].starts_with('\n') {
            cursor += 1;
        }
        prose_start = cursor;
    }
    flush_paragraphs(&text[prose_start..], message_id, segments);
}

fn flush_unterminated(text: &str, message_id: &str, segments: &mut Vec<MessageSegment>) {
    debug!("Unterminated code fence treated as plain text");
    let text = text.trim();
    if !text.is_empty() {
        segments.push(MessageSegment::new(
            SegmentKind::Text,
            text.to_string(),
            None,
            message_id,
        ));
    }
}

/// Pass 3: split prose on blank lines. A paragraph made entirely of
/// short lines is split per line; anything with a long line is kept
/// whole so wrapped prose is not fragmented.
fn flush_paragraphs(text: &str, message_id: &str, segments: &mut Vec<MessageSegment>) {
    static BLANK_LINE: OnceLock<Regex> = OnceLock::new();
    let blank_line = BLANK_LINE.get_or_init(|| Regex::new(r"\n[ \t]*\n").unwrap());

    for paragraph in blank_line.split(text) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let all_short = paragraph.lines().all(|line| line.trim().len() < SHORT_LINE_MAX);
        if paragraph.contains('\n') && all_short {
            for line in paragraph.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    segments.push(MessageSegment::new(
                        SegmentKind::Text,
                        line.to_string(),
                        None,
                        message_id,
                    ));
                }
            }
        } else {
            segments.push(MessageSegment::new(
                SegmentKind::Text,
                paragraph.to_string(),
                None,
                message_id,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(content: &str) -> Message {
        Message::assistant(content)
    }

    fn kinds_and_contents(segments: &[MessageSegment]) -> Vec<(SegmentKind, &str)> {
        segments
            .iter()
            .map(|s| (s.kind, s.content.as_str()))
            .collect()
    }

    #[test]
    fn interleaves_thinking_code_and_prose() {
        let message =
            assistant("Hello <think>pondering</think>world\n\n```js\nconsole.log(1)\n```");
        let segments = segment_message(&message);

        assert_eq!(
            kinds_and_contents(&segments),
            vec![
                (SegmentKind::Text, "Hello"),
                (SegmentKind::Thinking, "pondering"),
                (SegmentKind::Text, "world"),
                (SegmentKind::Code, "console.log(1)"),
            ]
        );
        assert_eq!(segments[3].language.as_deref(), Some("js"));
        assert!(segments.iter().all(|s| s.message_id == message.id));
    }

    #[test]
    fn user_messages_are_one_verbatim_segment() {
        let message = Message::user("keep <think>this</think>\n\n```js\nliteral\n```");
        let segments = segment_message(&message);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, SegmentKind::Text);
        assert_eq!(segments[0].content, message.content);
    }

    #[test]
    fn unterminated_fence_is_one_literal_text_segment() {
        let message = assistant("text ```js\nbroken");
        let segments = segment_message(&message);
        assert_eq!(
            kinds_and_contents(&segments),
            vec![(SegmentKind::Text, "text ```js\nbroken")]
        );
    }

    #[test]
    fn unterminated_thinking_tag_stays_literal() {
        let message = assistant("before <thinking>never closed");
        let segments = segment_message(&message);
        assert_eq!(
            kinds_and_contents(&segments),
            vec![(SegmentKind::Text, "before <thinking>never closed")]
        );
    }

    #[test]
    fn thinking_tags_match_case_insensitively() {
        let message = assistant("<THINKING>loud</THINKING>quiet");
        let segments = segment_message(&message);
        assert_eq!(
            kinds_and_contents(&segments),
            vec![(SegmentKind::Thinking, "loud"), (SegmentKind::Text, "quiet")]
        );
    }

    #[test]
    fn mermaid_fences_become_diagrams() {
        let message = assistant("```Mermaid\ngraph TD; A-->B;\n```");
        let segments = segment_message(&message);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, SegmentKind::Diagram);
        assert_eq!(segments[0].content, "graph TD; A-->B;");
        assert_eq!(segments[0].language.as_deref(), Some("mermaid"));
    }

    #[test]
    fn untagged_fence_is_code_without_language() {
        let message = assistant("```\nplain block\n```");
        let segments = segment_message(&message);
        assert_eq!(segments[0].kind, SegmentKind::Code);
        assert_eq!(segments[0].language, None);
    }

    #[test]
    fn short_line_paragraphs_split_per_line() {
        let message = assistant("- one\n- two\n- three");
        let segments = segment_message(&message);
        assert_eq!(
            kinds_and_contents(&segments),
            vec![
                (SegmentKind::Text, "- one"),
                (SegmentKind::Text, "- two"),
                (SegmentKind::Text, "- three"),
            ]
        );
    }

    #[test]
    fn wrapped_prose_stays_whole() {
        let long = "a".repeat(SHORT_LINE_MAX + 10);
        let content = format!("short line\n{long}");
        let message = assistant(&content);
        let segments = segment_message(&message);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].content, content);
    }

    #[test]
    fn rewrap_round_trips_modulo_whitespace() {
        let original = "Intro paragraph.\n\n<thinking>deep thought</thinking>\n\n```rust\nfn x() {}\n```\n\nOutro paragraph.";
        let message = assistant(original);
        let segments = segment_message(&message);

        let rebuilt = segments
            .iter()
            .map(MessageSegment::rewrap)
            .collect::<Vec<_>>()
            .join("\n\n");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rebuilt), normalize(original));
    }

    #[test]
    fn rewrap_restores_matched_thinking_tag() {
        for original in [
            "<think>brief</think>",
            "<thinking>long</thinking>",
            "<THINK>loud</THINK>",
        ] {
            let segments = segment_message(&assistant(original));
            assert_eq!(segments.len(), 1);
            assert_eq!(segments[0].kind, SegmentKind::Thinking);
            assert_eq!(segments[0].rewrap(), original);
        }
    }

    #[test]
    fn favorite_materializes_with_delimiters() {
        let message = assistant("```py\nprint(1)\n```");
        let segments = segment_message(&message);
        let favorite = segments.into_iter().next().unwrap().into_favorite_message();
        assert!(favorite.favorite);
        assert_eq!(favorite.sender, MessageSender::Assistant);
        assert_eq!(favorite.content, "```py\nprint(1)\n```");
        assert_ne!(favorite.id, message.id);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let message = assistant("a\n\n<think>b</think>\n\n```c\nd\n```");
        let first = kinds_and_contents(&segment_message(&message))
            .into_iter()
            .map(|(k, c)| (k, c.to_string()))
            .collect::<Vec<_>>();
        let second = kinds_and_contents(&segment_message(&message))
            .into_iter()
            .map(|(k, c)| (k, c.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(first, second);
    }
}
