//! Chat domain model shared by the UI and the streaming client
//!
//! Holds the persisted message and session types, the segmenter that
//! splits a finished assistant message into renderable blocks, and the
//! registry-driven parser for inline `@command` tokens.

pub mod commands;
pub mod message;
pub mod segmenter;

pub use commands::{CommandPosition, CommandRegistry};
pub use message::{ChatSession, Message, MessageSender};
pub use segmenter::{segment_message, MessageSegment, SegmentKind};
