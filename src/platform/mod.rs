pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::config::ChannelId;

/// Callback payload carried by the "check subscription" button
pub const CHECK_SUB_ACTION: &str = "check_sub";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Platform request failed: {0}")]
    Request(String),
}

/// An event received from the messaging platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Platform user id of the sender / button presser
    pub sender_id: u64,
    /// Conversation the reply goes to
    pub chat_id: i64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    StartCommand,
    WebAppCommand,
    CallbackPress {
        callback_id: String,
        action: Option<String>,
    },
    PlainText(String),
}

impl EventKind {
    /// Classify a text message. A command counts only when it is the first
    /// word, optionally addressed as `/cmd@bot_username` to this bot.
    pub fn from_text(text: &str, bot_username: Option<&str>) -> Self {
        let head = text.split_whitespace().next().unwrap_or_default();
        let Some(command) = head.strip_prefix('/') else {
            return EventKind::PlainText(text.to_string());
        };

        let (name, mention) = match command.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (command, None),
        };

        let addressed_here = match (mention, bot_username) {
            (None, _) => true,
            (Some(mention), Some(me)) => mention.eq_ignore_ascii_case(me),
            (Some(_), None) => false,
        };

        match name {
            "start" if addressed_here => EventKind::StartCommand,
            "webapp" if addressed_here => EventKind::WebAppCommand,
            _ => EventKind::PlainText(text.to_string()),
        }
    }
}

/// Platform-reported relationship between a user and the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
    Unknown,
}

impl MembershipStatus {
    pub fn grants_access(self) -> bool {
        matches!(
            self,
            MembershipStatus::Member | MembershipStatus::Administrator | MembershipStatus::Creator
        )
    }
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipStatus::Creator => write!(f, "creator"),
            MembershipStatus::Administrator => write!(f, "administrator"),
            MembershipStatus::Member => write!(f, "member"),
            MembershipStatus::Restricted => write!(f, "restricted"),
            MembershipStatus::Left => write!(f, "left"),
            MembershipStatus::Kicked => write!(f, "kicked"),
            MembershipStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonKind {
    /// Opens an external link
    Url(Url),
    /// Sends the payload back to the bot
    Callback(String),
    /// Launches the web application inside the chat client
    WebApp(Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub kind: ButtonKind,
}

impl Button {
    pub fn url(text: impl Into<String>, url: Url) -> Self {
        Self {
            text: text.into(),
            kind: ButtonKind::Url(url),
        }
    }

    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ButtonKind::Callback(data.into()),
        }
    }

    pub fn web_app(text: impl Into<String>, url: Url) -> Self {
        Self {
            text: text.into(),
            kind: ButtonKind::WebApp(url),
        }
    }
}

/// Text with an optional inline button layout (rows of buttons)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub buttons: Vec<Vec<Button>>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// The three platform capabilities the bot consumes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<(), PlatformError>;

    async fn fetch_membership(
        &self,
        channel: &ChannelId,
        user_id: u64,
    ) -> Result<MembershipStatus, PlatformError>;

    /// Stop the client-side progress indicator on a pressed button
    async fn acknowledge(&self, callback_id: &str) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_commands() {
        assert_eq!(EventKind::from_text("/start", None), EventKind::StartCommand);
        assert_eq!(EventKind::from_text("/webapp", None), EventKind::WebAppCommand);
    }

    #[test]
    fn test_command_arguments_ignored() {
        assert_eq!(
            EventKind::from_text("/start ref42", Some("gate_bot")),
            EventKind::StartCommand
        );
        assert_eq!(
            EventKind::from_text("/webapp now please", None),
            EventKind::WebAppCommand
        );
    }

    #[test]
    fn test_addressed_commands() {
        assert_eq!(
            EventKind::from_text("/start@gate_bot", Some("gate_bot")),
            EventKind::StartCommand
        );
        assert_eq!(
            EventKind::from_text("/webapp@Gate_Bot", Some("gate_bot")),
            EventKind::WebAppCommand
        );
        assert_eq!(
            EventKind::from_text("/start@other_bot", Some("gate_bot")),
            EventKind::PlainText("/start@other_bot".to_string())
        );
        assert_eq!(
            EventKind::from_text("/start@gate_bot", None),
            EventKind::PlainText("/start@gate_bot".to_string())
        );
    }

    #[test]
    fn test_non_commands_are_plain_text() {
        assert_eq!(
            EventKind::from_text("hello", None),
            EventKind::PlainText("hello".to_string())
        );
        assert_eq!(
            EventKind::from_text("/help", None),
            EventKind::PlainText("/help".to_string())
        );
        assert_eq!(
            EventKind::from_text("/Start", None),
            EventKind::PlainText("/Start".to_string())
        );
        assert_eq!(
            EventKind::from_text("say /start", None),
            EventKind::PlainText("say /start".to_string())
        );
        assert_eq!(EventKind::from_text("", None), EventKind::PlainText(String::new()));
    }

    #[test]
    fn test_access_statuses() {
        assert!(MembershipStatus::Member.grants_access());
        assert!(MembershipStatus::Administrator.grants_access());
        assert!(MembershipStatus::Creator.grants_access());

        assert!(!MembershipStatus::Restricted.grants_access());
        assert!(!MembershipStatus::Left.grants_access());
        assert!(!MembershipStatus::Kicked.grants_access());
        assert!(!MembershipStatus::Unknown.grants_access());
    }
}
