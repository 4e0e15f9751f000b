//! Contact list

use serde::{Deserialize, Serialize};

use crate::types::{ConfigVariant, SessionId};

use super::edit::Record;
use super::variant::CONTACTS;

/// Disappearing-message setting of a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryMode {
    #[default]
    None,
    /// Messages expire this many seconds after sending
    AfterSend(u64),
    /// Messages expire this many seconds after being read
    AfterRead(u64),
}

/// One entry in the contact list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub session_id: SessionId,
    pub name: Option<String>,
    pub nickname: Option<String>,
    /// We accepted their message request
    pub approved: bool,
    /// They accepted ours
    pub approved_me: bool,
    pub blocked: bool,
    /// Pin priority; negative hides the conversation
    pub priority: i64,
    pub expiry: ExpiryMode,
    pub created_ms: i64,
}

impl Contact {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            name: None,
            nickname: None,
            approved: false,
            approved_me: false,
            blocked: false,
            priority: 0,
            expiry: ExpiryMode::None,
            created_ms: 0,
        }
    }

    /// Nickname if set, else the contact's own name
    pub fn display_name(&self) -> Option<&str> {
        self.nickname.as_deref().or(self.name.as_deref())
    }

    /// Whether the contact's conversation is shown
    pub fn is_visible(&self) -> bool {
        self.priority >= 0
    }
}

impl Record for Contact {
    const VARIANT: ConfigVariant = ConfigVariant::Contacts;
    const COLLECTION: &'static str = CONTACTS;

    fn record_key(&self) -> String {
        self.session_id.to_hex()
    }
}
