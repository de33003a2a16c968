use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ChannelConfig, Config};
use crate::platform::{
    Button, EventKind, InboundEvent, MembershipStatus, Messenger, OutgoingMessage, PlatformError,
    CHECK_SUB_ACTION,
};

const OPEN_CHANNEL_BUTTON: &str = "Перейти в канал";
const CHECK_SUB_BUTTON: &str = "Проверить подписку";
const OPEN_WEBAPP_BUTTON: &str = "Открыть Бронирование";

const SUBSCRIBED_TEXT: &str = "✅ Подписка найдена! Открывай мини-приложение для бронирования:";
const NOT_SUBSCRIBED_NOTICE: &str = "❌ Подписка не обнаружена.";
const WEBAPP_TEXT: &str = "Лови кнопку:";
const FALLBACK_TEXT: &str =
    "Напиши /start, чтобы проверить подписку, или /webapp — чтобы открыть мини-приложение.";

/// Gates the web app behind a channel subscription.
///
/// Holds no per-user state: every event is answered with exactly one message,
/// and button presses are additionally acknowledged once.
///
/// The not-subscribed reply embeds the `/start` text from `instructions()`
/// word for word after its notice line; editing one edits both.
pub struct AccessGate<M> {
    messenger: M,
    channel: ChannelConfig,
    webapp_url: Url,
}

impl<M: Messenger> AccessGate<M> {
    pub fn new(messenger: M, config: &Config) -> Self {
        Self {
            messenger,
            channel: config.channel.clone(),
            webapp_url: config.webapp_url.clone(),
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<(), PlatformError> {
        match &event.kind {
            EventKind::StartCommand => self.handle_start(&event).await,
            EventKind::WebAppCommand => self.handle_webapp_command(&event).await,
            EventKind::CallbackPress {
                callback_id,
                action,
            } => match action.as_deref() {
                Some(CHECK_SUB_ACTION) => self.handle_check_subscription(&event, callback_id).await,
                other => {
                    warn!(
                        "Unhandled callback payload {:?} from user {}",
                        other, event.sender_id
                    );
                    self.messenger.acknowledge(callback_id).await
                }
            },
            EventKind::PlainText(text) => {
                debug!(
                    "No command in {} chars of text, sending usage hint",
                    text.chars().count()
                );
                self.handle_fallback(&event).await
            }
        }
    }

    pub async fn handle_start(&self, event: &InboundEvent) -> Result<(), PlatformError> {
        let reply = OutgoingMessage::text(self.instructions()).with_buttons(self.check_keyboard());
        self.messenger.send(event.chat_id, reply).await
    }

    pub async fn handle_webapp_command(&self, event: &InboundEvent) -> Result<(), PlatformError> {
        let reply = OutgoingMessage::text(WEBAPP_TEXT).with_buttons(self.webapp_keyboard());
        self.messenger.send(event.chat_id, reply).await
    }

    pub async fn handle_check_subscription(
        &self,
        event: &InboundEvent,
        callback_id: &str,
    ) -> Result<(), PlatformError> {
        let status = self.membership(event.sender_id).await;
        info!("User {} membership status: {}", event.sender_id, status);

        let reply = if status.grants_access() {
            OutgoingMessage::text(SUBSCRIBED_TEXT).with_buttons(self.webapp_keyboard())
        } else {
            OutgoingMessage::text(format!("{}\n\n{}", NOT_SUBSCRIBED_NOTICE, self.instructions()))
                .with_buttons(self.check_keyboard())
        };

        let sent = self.messenger.send(event.chat_id, reply).await;
        let acked = self.messenger.acknowledge(callback_id).await;
        sent.and(acked)
    }

    pub async fn handle_fallback(&self, event: &InboundEvent) -> Result<(), PlatformError> {
        self.messenger
            .send(event.chat_id, OutgoingMessage::text(FALLBACK_TEXT))
            .await
    }

    /// Query failures deny access.
    async fn membership(&self, user_id: u64) -> MembershipStatus {
        match self
            .messenger
            .fetch_membership(&self.channel.id, user_id)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    "Membership query in {} failed for user {}: {}",
                    self.channel.id, user_id, e
                );
                MembershipStatus::Unknown
            }
        }
    }

    fn instructions(&self) -> String {
        format!(
            "Привет! Чтобы открыть бронирование, сначала подпишись на канал {}:\n{}\n\n\
             Когда подпишешься — нажми «{}» ниже 👇",
            self.channel.title, self.channel.url, CHECK_SUB_BUTTON
        )
    }

    fn check_keyboard(&self) -> Vec<Vec<Button>> {
        vec![
            vec![Button::url(OPEN_CHANNEL_BUTTON, self.channel.url.clone())],
            vec![Button::callback(CHECK_SUB_BUTTON, CHECK_SUB_ACTION)],
        ]
    }

    fn webapp_keyboard(&self) -> Vec<Vec<Button>> {
        vec![vec![Button::web_app(OPEN_WEBAPP_BUTTON, self.webapp_url.clone())]]
    }
}
