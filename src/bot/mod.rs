//! Turns incoming Telegram updates into replies and transfers.

mod handlers;
pub mod update;

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::admin::AdminStates;
use crate::backend::MediaBackend;
use crate::messenger::{ChatId, Messenger, MessengerError};
use crate::pending::PendingLinks;
use crate::pipeline::TransferPipeline;
use crate::store::{StoreError, UserStore};

pub use handlers::find_link;
pub use update::{CallbackQuery, Chat, Message, Update, User};

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct BotState {
    messenger: Arc<dyn Messenger>,
    backend: Arc<dyn MediaBackend>,
    pipeline: TransferPipeline,
    users: Arc<dyn UserStore>,
    pending: PendingLinks,
    admin_states: AdminStates,
    admins: HashSet<ChatId>,
}

impl BotState {
    pub fn new(
        pipeline: TransferPipeline,
        messenger: Arc<dyn Messenger>,
        backend: Arc<dyn MediaBackend>,
        users: Arc<dyn UserStore>,
        admins: HashSet<ChatId>,
    ) -> Self {
        Self {
            messenger,
            backend,
            pipeline,
            users,
            pending: PendingLinks::default(),
            admin_states: AdminStates::default(),
            admins,
        }
    }

    pub const fn pipeline(&self) -> &TransferPipeline {
        &self.pipeline
    }

    pub fn is_admin(&self, user: ChatId) -> bool {
        self.admins.contains(&user)
    }

    /// Handles one update. Failures are logged, never returned: Telegram
    /// has already been acknowledged.
    pub async fn dispatch(&self, update: Update) {
        let update_id = update.update_id;
        let result = if let Some(callback) = update.callback_query {
            handlers::on_callback(self, callback).await
        } else if let Some(message) = update.message {
            handlers::on_message(self, message).await
        } else {
            Ok(())
        };

        if let Err(error) = result {
            warn!("Update {update_id} failed: {error}");
        }
    }
}
