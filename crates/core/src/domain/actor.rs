use serde::{Deserialize, Serialize};

use crate::domain::beer::UserId;

/// A resolved chat user profile. Looked up per event, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub display_name: String,
    pub is_admin: bool,
    pub is_bot: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { id: UserId::new(id), display_name: display_name.into(), is_admin: false, is_bot: false }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Name used when addressing this user in prose, falling back to a mention.
    pub fn salutation(&self) -> String {
        if self.display_name.trim().is_empty() {
            self.id.mention()
        } else {
            self.display_name.clone()
        }
    }
}
