//! Inline `@command` detection in free-form input
//!
//! The registry is built once at application start with the commands the
//! host exposes and is then shared by reference; parsing is stateless
//! and cheap enough to re-run on every keystroke.

use regex::Regex;

/// One recognized command occurrence in the input text. Offsets are byte
/// indices into the scanned string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPosition {
    /// The token as it literally appeared, including the `@` prefix
    pub command: String,
    /// The canonical registered command id
    pub prefix: String,
    pub start_index: usize,
    pub end_index: usize,
}

pub struct CommandRegistry {
    prefixes: Vec<String>,
    token: Regex,
}

impl CommandRegistry {
    /// Builds a registry for the given command ids. Ids are matched
    /// case-insensitively; a missing `@` prefix is added.
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let prefixes = prefixes
            .into_iter()
            .map(|prefix| {
                let prefix = prefix.into().to_ascii_lowercase();
                if prefix.starts_with('@') {
                    prefix
                } else {
                    format!("@{prefix}")
                }
            })
            .collect();
        Self {
            prefixes,
            // Maximal munch: the char after a match can never belong to
            // a token, so no separate trailing-boundary check is needed
            token: Regex::new(r"@[A-Za-z0-9][A-Za-z0-9_-]*").unwrap(),
        }
    }

    /// Scans `text` for registered command tokens, in order of
    /// appearance. A token only counts at the start of the text or after
    /// whitespace; unregistered tokens are skipped silently.
    pub fn parse(&self, text: &str) -> Vec<CommandPosition> {
        let mut positions = Vec::new();
        for found in self.token.find_iter(text) {
            let preceded_by_boundary = text[..found.start()]
                .chars()
                .next_back()
                .map_or(true, char::is_whitespace);
            if !preceded_by_boundary {
                continue;
            }
            let lowered = found.as_str().to_ascii_lowercase();
            if let Some(prefix) = self.prefixes.iter().find(|p| **p == lowered) {
                positions.push(CommandPosition {
                    command: found.as_str().to_string(),
                    prefix: prefix.clone(),
                    start_index: found.start(),
                    end_index: found.end(),
                });
            }
        }
        positions
    }
}
