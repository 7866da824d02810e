use chrono::Utc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::update::{CallbackQuery, Message, User};
use super::{BotError, BotState};
use crate::admin::{AdminCommand, AdminInput};
use crate::backend::MediaInfo;
use crate::cancel::FlagOutcome;
use crate::error::TransferError;
use crate::format::{escape_html, format_duration, shorten_title};
use crate::messenger::{Button, ChatId, Keyboard, MessageRef, MessengerError};
use crate::pending::{PendingLink, pending_key};
use crate::transfer::{TransferId, TransferRequest};

const PROMPT_TITLE_CHARS: usize = 70;

const BUSY_TEXT: &str = "Busy with other downloads. Please try again in a moment.";
const BUSY_ALERT: &str = "Bot is currently busy with other downloads. Please try again in a moment.";
const EXPIRED_ALERT: &str = "This download confirmation has expired. Please send the link again.";
const FINISHED_ALERT: &str = "This download is already complete or has been cancelled.";
const MAINTENANCE_TEXT: &str = "🛠️ The bot is currently under maintenance. Please try again later.";
const BANNED_TEXT: &str = "🚫 You are banned from using this bot.";
const EXTRACTING_TEXT: &str = "🔎 <code>Extracting video information...</code>";
const RESOLVE_FAILED_TEXT: &str = "🚫 <b>Error:</b> Failed to process the link. It might be invalid, private, or from an unsupported site.";
const STARTING_TEXT: &str = "🚀 <code>Your download is starting...</code>";
const CANCELLING_TEXT: &str = "<b>⚠️ Cancelling Download</b>\n\nThe process will be stopped after the current operation finishes. Please wait.";

enum Access {
    Allowed,
    Maintenance,
    Banned,
}

impl Access {
    const fn refusal(&self) -> Option<&'static str> {
        match self {
            Self::Allowed => None,
            Self::Maintenance => Some(MAINTENANCE_TEXT),
            Self::Banned => Some(BANNED_TEXT),
        }
    }
}

/// Admins always pass. Everyone else is registered on first contact and
/// refused while banned or while the bot is switched off.
async fn access(bot: &BotState, user: ChatId) -> Result<Access, BotError> {
    if bot.is_admin(user) {
        return Ok(Access::Allowed);
    }
    if !bot.users.bot_active().await? {
        return Ok(Access::Maintenance);
    }
    let record = match bot.users.get(user).await? {
        Some(record) => record,
        None => {
            info!("Registered new user {user}");
            bot.users.register(user).await?
        }
    };
    if record.banned {
        return Ok(Access::Banned);
    }
    Ok(Access::Allowed)
}

pub(super) async fn on_message(bot: &BotState, message: Message) -> Result<(), BotError> {
    if !message.is_private() {
        return Ok(());
    }
    let (Some(user), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
        return Ok(());
    };
    let text = text.trim();

    if is_command(text, "start") {
        return start(bot, &message, user).await;
    }

    if bot.is_admin(user.id) {
        if is_command(text, "admin") {
            bot.admin_states.reset(user.id).await;
            let (panel, keyboard) = admin_panel(bot).await?;
            bot.messenger.send_text(user.id, &panel, Some(keyboard)).await?;
            return Ok(());
        }
        if admin_input(bot, user.id, text).await? {
            return Ok(());
        }
    }

    let Some(link) = find_link(text) else {
        return Ok(());
    };
    if let Some(refusal) = access(bot, user.id).await?.refusal() {
        bot.messenger.send_text(message.chat.id, refusal, None).await?;
        return Ok(());
    }
    offer_link(bot, &message, user, link).await
}

fn is_command(text: &str, name: &str) -> bool {
    text.split_whitespace()
        .next()
        .and_then(|head| head.strip_prefix('/'))
        .and_then(|command| command.split('@').next())
        == Some(name)
}

/// First http(s) URL in `text`, if any.
pub fn find_link(text: &str) -> Option<Url> {
    text.split_whitespace().find_map(|token| {
        let url = Url::parse(token).ok()?;
        (matches!(url.scheme(), "http" | "https") && url.host_str().is_some()).then_some(url)
    })
}

async fn start(bot: &BotState, message: &Message, user: &User) -> Result<(), BotError> {
    let chat = message.chat.id;
    if let Some(refusal) = access(bot, user.id).await?.refusal() {
        bot.messenger.send_text(chat, refusal, None).await?;
        return Ok(());
    }

    let name = if user.first_name.is_empty() {
        "there".to_string()
    } else {
        escape_html(&user.first_name)
    };
    let welcome = format!(
        "👋 <b>Welcome, {name}!</b>\n\nI'm ready to download. Just send me a valid video link."
    );
    bot.messenger.send_text(chat, &welcome, None).await?;
    Ok(())
}

async fn offer_link(
    bot: &BotState,
    message: &Message,
    user: &User,
    link: Url,
) -> Result<(), BotError> {
    let chat = message.chat.id;
    if bot.pipeline.slots().is_full() {
        bot.messenger.send_text(chat, BUSY_TEXT, None).await?;
        return Ok(());
    }

    let processing = bot.messenger.send_text(chat, EXTRACTING_TEXT, None).await?;
    let info = match bot.backend.resolve(link.as_str()).await {
        Ok(info) => info,
        Err(failure) => {
            let failure = TransferError::ResolutionFailed(failure.to_string());
            error!("Failed to resolve {link} for user {}: {failure}", user.id);
            bot.messenger.edit_text(processing, RESOLVE_FAILED_TEXT, None).await?;
            return Ok(());
        }
    };

    let key = pending_key(user.id, message.message_id);
    bot.pending
        .insert(
            key.clone(),
            PendingLink {
                url: link.to_string(),
                title: info.title.clone(),
                duration_secs: info.duration_secs,
                thumbnail_url: info.thumbnail_url.clone(),
                requester: user.id,
                origin_message_id: message.message_id,
                created_at: Utc::now(),
            },
        )
        .await;

    let prompt = confirmation_prompt(&info);
    let keyboard = vec![
        vec![Button::new("✅ Confirm Download", format!("confirm_{key}"))],
        vec![Button::new("❌ Cancel", format!("cancel_op_{key}"))],
    ];
    best_effort(
        bot.messenger.delete_message(processing).await,
        "delete the extraction notice",
    );

    if let Some(thumbnail) = info.thumbnail_url.as_deref() {
        match bot
            .messenger
            .send_photo(chat, thumbnail, &prompt, Some(keyboard.clone()), true)
            .await
        {
            Ok(_) => return Ok(()),
            Err(failure) => warn!("Thumbnail prompt failed, sending text instead: {failure}"),
        }
    }
    bot.messenger.send_text(chat, &prompt, Some(keyboard)).await?;
    Ok(())
}

fn confirmation_prompt(info: &MediaInfo) -> String {
    format!(
        "<b>🏷️ Title:</b> <code>{}</code>\n\n<b>⏱️ Duration:</b> <code>{}</code>\n\nReady to download?",
        escape_html(&shorten_title(&info.title, PROMPT_TITLE_CHARS)),
        format_duration(info.duration_secs)
    )
}

pub(super) async fn on_callback(bot: &BotState, callback: CallbackQuery) -> Result<(), BotError> {
    let data = callback.data.as_deref().unwrap_or_default();

    if let Some(key) = data.strip_prefix("confirm_") {
        confirm(bot, &callback, key).await
    } else if let Some(key) = data.strip_prefix("cancel_op_") {
        dismiss(bot, &callback, key).await
    } else if let Some(raw) = data.strip_prefix("cancel_dl_") {
        cancel_download(bot, &callback, raw).await
    } else if let Some(action) = data.strip_prefix("admin_") {
        if bot.is_admin(callback.from.id) {
            admin_action(bot, &callback, action).await
        } else {
            answer(bot, &callback, Some("You are not authorized."), true).await
        }
    } else {
        answer(bot, &callback, None, false).await
    }
}

/// Pending keys start with the requesting user's id.
fn owns_key(user: ChatId, key: &str) -> bool {
    key.split_once(':')
        .and_then(|(owner, _)| owner.parse::<ChatId>().ok())
        == Some(user)
}

async fn confirm(bot: &BotState, callback: &CallbackQuery, key: &str) -> Result<(), BotError> {
    let user = callback.from.id;
    if let Some(refusal) = access(bot, user).await?.refusal() {
        return answer(bot, callback, Some(refusal), true).await;
    }
    if bot.pipeline.slots().is_full() {
        return answer(bot, callback, Some(BUSY_ALERT), true).await;
    }

    let link = if owns_key(user, key) {
        bot.pending.take(key).await
    } else {
        None
    };
    if let Some(prompt) = callback.message.as_ref() {
        best_effort(
            bot.messenger.delete_message(prompt.reference()).await,
            "delete the confirmation prompt",
        );
    }
    let Some(link) = link else {
        return answer(bot, callback, Some(EXPIRED_ALERT), true).await;
    };

    let status = bot.messenger.send_text(link.requester, STARTING_TEXT, None).await?;
    let request = TransferRequest {
        source_url: link.url,
        title: link.title,
        duration_secs: link.duration_secs,
        thumbnail_url: link.thumbnail_url,
        requester: link.requester,
        origin_message_id: link.origin_message_id,
    };

    match bot.pipeline.submit(request, status) {
        Ok(submitted) => {
            info!("Transfer {} started for user {user}", submitted.id);
            answer(bot, callback, None, false).await
        }
        Err(rejected) => {
            warn!("Transfer for user {user} not admitted: {rejected}");
            best_effort(
                bot.messenger.edit_text(status, BUSY_TEXT, None).await,
                "report a rejected transfer",
            );
            answer(bot, callback, Some(BUSY_ALERT), true).await
        }
    }
}

async fn dismiss(bot: &BotState, callback: &CallbackQuery, key: &str) -> Result<(), BotError> {
    if owns_key(callback.from.id, key) {
        bot.pending.discard(key).await;
    }
    if let Some(prompt) = callback.message.as_ref() {
        best_effort(
            bot.messenger.delete_message(prompt.reference()).await,
            "delete the confirmation prompt",
        );
    }
    answer(bot, callback, Some("Operation cancelled."), false).await
}

async fn cancel_download(
    bot: &BotState,
    callback: &CallbackQuery,
    raw: &str,
) -> Result<(), BotError> {
    let user = callback.from.id;
    let outcome = TransferId::parse(raw)
        .filter(|id| id.requester() == Some(user) || bot.is_admin(user))
        .map(|id| bot.pipeline.cancellations().flag(&id));

    if outcome != Some(FlagOutcome::Flagged) {
        return answer(bot, callback, Some(FINISHED_ALERT), true).await;
    }

    info!("User {user} requested cancellation of transfer {raw}");
    if let Some(status) = callback.message.as_ref() {
        best_effort(
            bot.messenger.edit_text(status.reference(), CANCELLING_TEXT, None).await,
            "show the cancelling notice",
        );
    }
    answer(bot, callback, Some("Cancellation request sent."), false).await
}

async fn admin_panel(bot: &BotState) -> Result<(String, Keyboard), BotError> {
    let active = bot.users.bot_active().await?;
    let (status, toggle) = if active {
        ("ON", "🔴 Turn Bot OFF")
    } else {
        ("OFF", "🟢 Turn Bot ON")
    };
    let text = format!(
        "<b>👨‍💻 Admin Panel</b>\n\nBot status: <b>{status}</b>\nActive transfers: <b>{}/{}</b>\n\nChoose an option below.",
        bot.pipeline.slots().active_count(),
        bot.pipeline.slots().capacity()
    );
    let keyboard = vec![
        vec![Button::new("👥 User Management", "admin_users")],
        vec![Button::new(toggle, "admin_toggle_bot")],
    ];
    Ok((text, keyboard))
}

fn back_row() -> Vec<Button> {
    vec![Button::new("⬅️ Back", "admin_back")]
}

async fn admin_action(
    bot: &BotState,
    callback: &CallbackQuery,
    action: &str,
) -> Result<(), BotError> {
    let admin = callback.from.id;
    let Some(panel) = callback.message.as_ref().map(Message::reference) else {
        return answer(bot, callback, None, false).await;
    };

    match action {
        "users" => {
            let keyboard = vec![
                vec![
                    Button::new("🚫 Ban User", "admin_ban"),
                    Button::new("✅ Unban User", "admin_unban"),
                ],
                back_row(),
            ];
            edit_panel(bot, panel, "<b>👥 User Management</b>", keyboard).await;
        }
        "ban" | "unban" => {
            let input = if action == "ban" {
                AdminInput::AwaitingBan
            } else {
                AdminInput::AwaitingUnban
            };
            bot.admin_states.set(admin, input).await;
            let text = format!(
                "Enter the User ID to <b>{}</b>.\nSend /cancel to abort.",
                input.action_word()
            );
            edit_panel(bot, panel, &text, vec![back_row()]).await;
        }
        "toggle_bot" => {
            let active = !bot.users.bot_active().await?;
            bot.users.set_bot_active(active).await?;
            info!("Admin {admin} turned the bot {}", if active { "on" } else { "off" });
            let (text, keyboard) = admin_panel(bot).await?;
            edit_panel(bot, panel, &text, keyboard).await;
            let notice = if active {
                "Bot has been turned ON."
            } else {
                "Bot has been turned OFF."
            };
            return answer(bot, callback, Some(notice), true).await;
        }
        "back" => {
            bot.admin_states.reset(admin).await;
            let (text, keyboard) = admin_panel(bot).await?;
            edit_panel(bot, panel, &text, keyboard).await;
        }
        other => debug!("Ignoring unknown admin action {other:?}"),
    }

    answer(bot, callback, None, false).await
}

async fn edit_panel(bot: &BotState, panel: MessageRef, text: &str, keyboard: Keyboard) {
    best_effort(
        bot.messenger.edit_text(panel, text, Some(keyboard)).await,
        "update the admin panel",
    );
}

/// Returns whether the text was consumed by a pending admin action.
async fn admin_input(bot: &BotState, admin: ChatId, text: &str) -> Result<bool, BotError> {
    let (_, command) = bot.admin_states.feed(admin, text).await;
    match command {
        AdminCommand::Ignore => return Ok(false),
        AdminCommand::Abort => {
            bot.messenger.send_text(admin, "Action cancelled.", None).await?;
        }
        AdminCommand::InvalidId => {
            bot.messenger
                .send_text(admin, "Invalid User ID. Please provide a numeric ID.", None)
                .await?;
        }
        AdminCommand::SetBan { user, banned } => apply_ban(bot, admin, user, banned).await?,
    }
    Ok(true)
}

async fn apply_ban(
    bot: &BotState,
    admin: ChatId,
    user: ChatId,
    banned: bool,
) -> Result<(), BotError> {
    bot.users.set_banned(user, banned).await?;
    let verb = if banned { "banned" } else { "unbanned" };
    info!("Admin {admin} {verb} user {user}");

    let confirmation = format!("✅ User <code>{user}</code> has been successfully <b>{verb}</b>.");
    bot.messenger.send_text(admin, &confirmation, None).await?;

    let notice = if banned {
        "🚫 You have been <b>banned</b> from using this bot by an administrator."
    } else {
        "✅ You have been <b>unbanned</b>. You can now use the bot again."
    };
    match bot.messenger.send_text(user, notice, None).await {
        Ok(_) => {}
        Err(MessengerError::Api { code: 400 | 403, .. }) => {
            bot.messenger
                .send_text(
                    admin,
                    "ℹ️ Could not notify the user as they may have blocked the bot.",
                    None,
                )
                .await?;
        }
        Err(failure) => warn!("Could not notify user {user} about the {verb}: {failure}"),
    }
    Ok(())
}

async fn answer(
    bot: &BotState,
    callback: &CallbackQuery,
    text: Option<&str>,
    alert: bool,
) -> Result<(), BotError> {
    bot.messenger.answer_callback(&callback.id, text, alert).await?;
    Ok(())
}

fn best_effort<T>(result: Result<T, MessengerError>, action: &str) {
    if let Err(failure) = result {
        debug!("Could not {action}: {failure}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_match_with_or_without_bot_suffix() {
        assert!(is_command("/start", "start"));
        assert!(is_command("/start@vidrelay_bot payload", "start"));
        assert!(!is_command("/starter", "start"));
        assert!(!is_command("start", "start"));
        assert!(!is_command("", "start"));
    }

    #[test]
    fn find_link_takes_first_web_url() {
        let url = find_link("look at this https://example.com/watch?v=1 and http://b.example").unwrap();
        assert_eq!(url.as_str(), "https://example.com/watch?v=1");
        assert!(find_link("ftp://example.com/file").is_none());
        assert!(find_link("no links here").is_none());
        assert!(find_link("mailto:someone@example.com").is_none());
    }

    #[test]
    fn keys_belong_to_their_user() {
        assert!(owns_key(42, &pending_key(42, 7)));
        assert!(!owns_key(41, &pending_key(42, 7)));
        assert!(!owns_key(42, "garbage"));
    }

    #[test]
    fn prompt_shortens_and_escapes_title() {
        let info = MediaInfo {
            title: format!("<b>{}", "x".repeat(100)),
            duration_secs: 125,
            thumbnail_url: None,
        };
        let prompt = confirmation_prompt(&info);
        assert!(prompt.contains("&lt;b&gt;"));
        assert!(prompt.contains("..."));
        assert!(prompt.contains("2m 5s"));
    }
}
