//! Log segments.
//!
//! A segment is the full message list of one recorded slice, in the order
//! the log reader produced it. That order is not guaranteed to be sorted
//! by time.

use crate::message::{LogMessage, MessageKind};
use lockstep_core::{CoreError, CoreResult};
use std::path::Path;

/// Ordered, possibly unsorted, list of recorded messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSegment {
    messages: Vec<LogMessage>,
}

impl LogSegment {
    /// Wrap messages in reader order
    #[must_use]
    pub fn new(messages: Vec<LogMessage>) -> Self {
        Self { messages }
    }

    /// Parse newline-delimited JSON, one message per line
    ///
    /// # Errors
    ///
    /// Returns `Decode` naming the first malformed line
    pub fn from_json_lines(text: &str) -> CoreResult<Self> {
        let mut messages = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let msg = serde_json::from_str(line).map_err(|e| CoreError::Decode {
                reason: format!("line {}: {}", lineno + 1, e),
            })?;
            messages.push(msg);
        }
        Ok(Self { messages })
    }

    /// Render as newline-delimited JSON
    ///
    /// # Errors
    ///
    /// Returns error if a payload cannot be serialized
    pub fn to_json_lines(&self) -> CoreResult<String> {
        let mut out = String::new();
        for msg in &self.messages {
            out.push_str(&serde_json::to_string(msg)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Read a newline-delimited JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn read_from(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::io(path.display().to_string(), &e))?;
        Self::from_json_lines(&text)
    }

    /// Messages in reader order
    #[must_use]
    pub fn messages(&self) -> &[LogMessage] {
        &self.messages
    }

    /// Consume into the message list
    #[must_use]
    pub fn into_messages(self) -> Vec<LogMessage> {
        self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the segment has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// First message in reader order (not the earliest by time)
    #[must_use]
    pub fn first(&self) -> Option<&LogMessage> {
        self.messages.first()
    }

    /// First message of `kind` in reader order
    #[must_use]
    pub fn first_of(&self, kind: &str) -> Option<&LogMessage> {
        self.messages.iter().find(|m| m.is(kind))
    }

    /// All messages of `kind`, in reader order
    pub fn iter_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a LogMessage> + 'a {
        self.messages.iter().filter(move |m| m.is(kind))
    }

    /// Count of messages of `kind`
    #[must_use]
    pub fn count_of(&self, kind: &str) -> usize {
        self.iter_of(kind).count()
    }

    /// Messages stably sorted by time; equal times keep reader order
    #[must_use]
    pub fn sorted_by_time(&self) -> Vec<&LogMessage> {
        let mut sorted: Vec<&LogMessage> = self.messages.iter().collect();
        sorted.sort_by_key(|m| m.log_mono_time());
        sorted
    }

    /// Distinct kinds present, in order of first appearance
    #[must_use]
    pub fn kinds(&self) -> indexmap::IndexSet<MessageKind> {
        self.messages.iter().map(|m| m.which().clone()).collect()
    }
}

impl FromIterator<LogMessage> for LogSegment {
    fn from_iter<I: IntoIterator<Item = LogMessage>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a LogSegment {
    type Item = &'a LogMessage;
    type IntoIter = std::slice::Iter<'a, LogMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
