//! Per-conversation read state
//!
//! Entries are keyed `"<kind>:<id>"`. The read marker only moves forward on
//! local edits; merges still follow last-writer-wins.

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::types::ConfigVariant;

use super::edit::{ConfigEdit, Record};
use super::variant::CONVERSATIONS;

/// What a conversation entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    OneToOne,
    ClosedGroup,
    Community,
}

impl ConversationKind {
    fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::OneToOne => "1to1",
            ConversationKind::ClosedGroup => "group",
            ConversationKind::Community => "community",
        }
    }
}

/// Read state of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub kind: ConversationKind,
    /// Session id hex, group id hex, or `base_url/room` for communities
    pub id: String,
    pub last_read_ms: i64,
    /// Explicitly marked unread
    pub unread: bool,
}

impl Conversation {
    pub fn new(kind: ConversationKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            last_read_ms: 0,
            unread: false,
        }
    }

    /// Storage key for a conversation
    pub fn key(kind: ConversationKind, id: &str) -> String {
        format!("{}:{}", kind.as_str(), id)
    }
}

impl Record for Conversation {
    const VARIANT: ConfigVariant = ConfigVariant::ConvoInfoVolatile;
    const COLLECTION: &'static str = CONVERSATIONS;

    fn record_key(&self) -> String {
        Self::key(self.kind, &self.id)
    }
}

/// Read-state edits on a [`ConfigEdit`]
pub trait ConvoVolatileEdit {
    /// Advance the read marker; older timestamps are ignored
    fn mark_read(&mut self, kind: ConversationKind, id: &str, read_ms: i64) -> SyncResult<bool>;

    fn set_unread(&mut self, kind: ConversationKind, id: &str, unread: bool) -> SyncResult<bool>;
}

impl ConvoVolatileEdit for ConfigEdit<'_> {
    fn mark_read(&mut self, kind: ConversationKind, id: &str, read_ms: i64) -> SyncResult<bool> {
        let mut convo = self
            .record::<Conversation>(&Conversation::key(kind, id))?
            .unwrap_or_else(|| Conversation::new(kind, id));
        if read_ms <= convo.last_read_ms {
            return Ok(false);
        }
        convo.last_read_ms = read_ms;
        convo.unread = false;
        self.set_record(&convo)
    }

    fn set_unread(&mut self, kind: ConversationKind, id: &str, unread: bool) -> SyncResult<bool> {
        let mut convo = self
            .record::<Conversation>(&Conversation::key(kind, id))?
            .unwrap_or_else(|| Conversation::new(kind, id));
        convo.unread = unread;
        self.set_record(&convo)
    }
}
