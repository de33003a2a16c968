use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, CallbackQueryId, ChatId, ChatMemberStatus, InlineKeyboardButton,
    InlineKeyboardMarkup, Recipient, UserId, WebAppInfo,
};
use tracing::{info, warn};

use crate::config::{ChannelId, Config};
use crate::gate::AccessGate;
use crate::platform::{
    Button, ButtonKind, EventKind, InboundEvent, MembershipStatus, Messenger, OutgoingMessage,
    PlatformError,
};

type Gate = Arc<AccessGate<TelegramMessenger>>;

/// Username of the running bot, used to recognise `/cmd@username`
#[derive(Clone)]
struct BotUsername(Option<String>);

/// `Messenger` over the Telegram Bot API
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn request_error(e: teloxide::RequestError) -> PlatformError {
    PlatformError::Request(e.to_string())
}

fn recipient(channel: &ChannelId) -> Recipient {
    match channel {
        ChannelId::Username(name) => Recipient::ChannelUsername(name.clone()),
        ChannelId::Numeric(id) => Recipient::Id(ChatId(*id)),
    }
}

fn membership_status(status: ChatMemberStatus) -> MembershipStatus {
    match status {
        ChatMemberStatus::Owner => MembershipStatus::Creator,
        ChatMemberStatus::Administrator => MembershipStatus::Administrator,
        ChatMemberStatus::Member => MembershipStatus::Member,
        ChatMemberStatus::Restricted => MembershipStatus::Restricted,
        ChatMemberStatus::Left => MembershipStatus::Left,
        ChatMemberStatus::Banned => MembershipStatus::Kicked,
    }
}

fn inline_keyboard(rows: Vec<Vec<Button>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.into_iter().map(|row| {
        row.into_iter().map(|button| match button.kind {
            ButtonKind::Url(url) => InlineKeyboardButton::url(button.text, url),
            ButtonKind::Callback(data) => InlineKeyboardButton::callback(button.text, data),
            ButtonKind::WebApp(url) => {
                InlineKeyboardButton::web_app(button.text, WebAppInfo { url })
            }
        })
    }))
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<(), PlatformError> {
        let mut request = self.bot.send_message(ChatId(chat_id), message.text);
        if !message.buttons.is_empty() {
            request = request.reply_markup(inline_keyboard(message.buttons));
        }
        request.await.map_err(request_error)?;
        Ok(())
    }

    async fn fetch_membership(
        &self,
        channel: &ChannelId,
        user_id: u64,
    ) -> Result<MembershipStatus, PlatformError> {
        let member = self
            .bot
            .get_chat_member(recipient(channel), UserId(user_id))
            .await
            .map_err(request_error)?;
        Ok(membership_status(member.kind.status()))
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<(), PlatformError> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

fn message_event(msg: &Message, username: &BotUsername) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let text = msg.text()?;
    Some(InboundEvent {
        sender_id: user.id.0,
        chat_id: msg.chat.id.0,
        kind: EventKind::from_text(text, username.0.as_deref()),
    })
}

fn callback_event(q: &CallbackQuery) -> InboundEvent {
    // Reply next to the pressed button, or privately if that message is gone
    let chat_id = q
        .message
        .as_ref()
        .map(|msg| msg.chat().id)
        .unwrap_or_else(|| ChatId::from(q.from.id));

    InboundEvent {
        sender_id: q.from.id.0,
        chat_id: chat_id.0,
        kind: EventKind::CallbackPress {
            callback_id: q.id.0.clone(),
            action: q.data.clone(),
        },
    }
}

fn schema() -> UpdateHandler<PlatformError> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

async fn handle_message(
    msg: Message,
    gate: Gate,
    username: BotUsername,
) -> Result<(), PlatformError> {
    let Some(event) = message_event(&msg, &username) else {
        return Ok(());
    };

    info!("Telegram message from {}: {:?}", event.sender_id, event.kind);
    gate.handle(event).await
}

async fn handle_callback(q: CallbackQuery, gate: Gate) -> Result<(), PlatformError> {
    let event = callback_event(&q);
    info!("Telegram callback from {}: {:?}", event.sender_id, event.kind);
    gate.handle(event).await
}

async fn register_commands(bot: &Bot) {
    let commands = vec![
        BotCommand::new("start", "Проверить подписку на канал"),
        BotCommand::new("webapp", "Открыть мини-приложение"),
    ];
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("Failed to register bot commands: {}", e);
    }
}

/// Run the Telegram bot with long polling until Ctrl-C
pub async fn run(config: &Config) -> Result<()> {
    let bot = Bot::new(&config.bot_token);

    let me = bot
        .get_me()
        .await
        .context("Failed to fetch bot info (is the token valid?)")?;
    let username = BotUsername(me.user.username.clone());
    info!("Authorized as @{}", username.0.as_deref().unwrap_or("<unnamed>"));

    register_commands(&bot).await;

    let gate: Gate = Arc::new(AccessGate::new(TelegramMessenger::new(bot.clone()), config));

    info!("Starting Telegram long polling...");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![gate, username])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    #[test]
    fn test_recipient() {
        assert_eq!(
            recipient(&ChannelId::Username("@chan".to_string())),
            Recipient::ChannelUsername("@chan".to_string())
        );
        assert_eq!(
            recipient(&ChannelId::Numeric(-1001)),
            Recipient::Id(ChatId(-1001))
        );
    }

    #[test]
    fn test_membership_status_mapping() {
        assert_eq!(membership_status(ChatMemberStatus::Owner), MembershipStatus::Creator);
        assert_eq!(
            membership_status(ChatMemberStatus::Administrator),
            MembershipStatus::Administrator
        );
        assert_eq!(membership_status(ChatMemberStatus::Member), MembershipStatus::Member);
        assert_eq!(
            membership_status(ChatMemberStatus::Restricted),
            MembershipStatus::Restricted
        );
        assert_eq!(membership_status(ChatMemberStatus::Left), MembershipStatus::Left);
        assert_eq!(membership_status(ChatMemberStatus::Banned), MembershipStatus::Kicked);
    }

    #[test]
    fn test_inline_keyboard_layout() {
        let url = Url::parse("https://t.me/chan").unwrap();
        let app = Url::parse("https://app.example.com").unwrap();
        let markup = inline_keyboard(vec![
            vec![Button::url("channel", url.clone())],
            vec![
                Button::callback("check", "check_sub"),
                Button::web_app("open", app.clone()),
            ],
        ]);

        assert_eq!(
            markup,
            InlineKeyboardMarkup::new(vec![
                vec![InlineKeyboardButton::url("channel", url)],
                vec![
                    InlineKeyboardButton::callback("check", "check_sub"),
                    InlineKeyboardButton::web_app("open", WebAppInfo { url: app }),
                ],
            ])
        );
    }

    fn user_json() -> serde_json::Value {
        json!({ "id": 42, "is_bot": false, "first_name": "Ann" })
    }

    fn text_message(chat: serde_json::Value, text: &str) -> Message {
        serde_json::from_value(json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": chat,
            "from": user_json(),
            "text": text,
        }))
        .unwrap()
    }

    fn group_chat() -> serde_json::Value {
        json!({ "id": -500, "type": "group", "title": "Arena fans" })
    }

    #[test]
    fn test_message_event_classifies_text() {
        let username = BotUsername(Some("gate_bot".to_string()));
        let msg = text_message(group_chat(), "/start@gate_bot");

        let event = message_event(&msg, &username).unwrap();

        assert_eq!(
            event,
            InboundEvent {
                sender_id: 42,
                chat_id: -500,
                kind: EventKind::StartCommand,
            }
        );
    }

    #[test]
    fn test_message_event_plain_text_in_private_chat() {
        let private = json!({ "id": 42, "type": "private", "first_name": "Ann" });
        let msg = text_message(private, "hello");

        let event = message_event(&msg, &BotUsername(None)).unwrap();

        assert_eq!(event.chat_id, 42);
        assert_eq!(event.kind, EventKind::PlainText("hello".to_string()));
    }

    #[test]
    fn test_callback_event_replies_in_button_chat() {
        let q: CallbackQuery = serde_json::from_value(json!({
            "id": "cb-9",
            "from": user_json(),
            "chat_instance": "-77",
            "data": "check_sub",
            "message": {
                "message_id": 7,
                "date": 1_700_000_000,
                "chat": group_chat(),
                "text": "press below",
            },
        }))
        .unwrap();

        let event = callback_event(&q);

        assert_eq!(
            event,
            InboundEvent {
                sender_id: 42,
                chat_id: -500,
                kind: EventKind::CallbackPress {
                    callback_id: "cb-9".to_string(),
                    action: Some("check_sub".to_string()),
                },
            }
        );
    }

    #[test]
    fn test_callback_event_without_message_goes_private() {
        let q: CallbackQuery = serde_json::from_value(json!({
            "id": "cb-10",
            "from": user_json(),
            "chat_instance": "-77",
            "data": "check_sub",
        }))
        .unwrap();

        let event = callback_event(&q);

        assert_eq!(event.sender_id, 42);
        assert_eq!(event.chat_id, 42);
    }
}
