//! Modal input capture for the admin console.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::messenger::ChatId;

/// What the next plain-text message from an admin means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminInput {
    #[default]
    Idle,
    AwaitingBan,
    AwaitingUnban,
}

/// Result of feeding an admin's text message into their current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// No input was expected; the message is not for the console.
    Ignore,
    Abort,
    SetBan { user: ChatId, banned: bool },
    /// Input expected but not a numeric id. The state is kept.
    InvalidId,
}

impl AdminInput {
    pub fn interpret(self, text: &str) -> AdminCommand {
        let text = text.trim();
        let banned = match self {
            Self::Idle => return AdminCommand::Ignore,
            Self::AwaitingBan => true,
            Self::AwaitingUnban => false,
        };

        if text == "/cancel" {
            return AdminCommand::Abort;
        }

        match text.parse::<ChatId>() {
            Ok(user) if text.chars().all(|c| c.is_ascii_digit()) => {
                AdminCommand::SetBan { user, banned }
            }
            _ => AdminCommand::InvalidId,
        }
    }

    pub const fn action_word(self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::AwaitingBan => "ban",
            Self::AwaitingUnban => "unban",
        }
    }
}

/// Per-admin input state. Absent means [`AdminInput::Idle`].
#[derive(Debug, Default)]
pub struct AdminStates {
    states: Mutex<HashMap<ChatId, AdminInput>>,
}

impl AdminStates {
    pub async fn get(&self, admin: ChatId) -> AdminInput {
        self.states
            .lock()
            .await
            .get(&admin)
            .copied()
            .unwrap_or_default()
    }

    pub async fn set(&self, admin: ChatId, input: AdminInput) {
        let mut states = self.states.lock().await;
        if input == AdminInput::Idle {
            states.remove(&admin);
        } else {
            states.insert(admin, input);
        }
    }

    pub async fn reset(&self, admin: ChatId) {
        self.set(admin, AdminInput::Idle).await;
    }

    /// Applies `text` to the admin's state and advances it: a completed or
    /// aborted action returns the admin to idle.
    pub async fn feed(&self, admin: ChatId, text: &str) -> (AdminInput, AdminCommand) {
        let mut states = self.states.lock().await;
        let current = states.get(&admin).copied().unwrap_or_default();
        let command = current.interpret(text);
        if matches!(command, AdminCommand::Abort | AdminCommand::SetBan { .. }) {
            states.remove(&admin);
        }
        (current, command)
    }
}
