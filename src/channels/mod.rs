pub mod telegram;

use async_trait::async_trait;

pub use telegram::TelegramAdapter;

pub type ChannelError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Document,
}

/// Platform file reference carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_id: String,
    pub kind: AttachmentKind,
}

/// Inbound payload after platform-specific unwrapping: free text and/or an
/// attachment reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, |t| t.trim().is_empty()) && self.attachment.is_none()
    }

    pub fn text_len(&self) -> usize {
        self.text.as_deref().map_or(0, |t| t.chars().count())
    }

    pub fn kind(&self) -> &'static str {
        match &self.attachment {
            Some(attachment) => match attachment.kind {
                AttachmentKind::Photo => "photo",
                AttachmentKind::Document => "document",
            },
            None => "text",
        }
    }
}

/// Where an outbound message goes. Chat and topic ids behind these variants
/// are opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The user's private chat.
    User(i64),
    /// A per-ticket discussion thread in the staff workspace.
    StaffThread(i64),
    /// The staff workspace outside any thread (alerts, reports).
    StaffGeneral,
    /// The feedback channel, when one is configured.
    FeedbackChannel,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(text: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            text: text.into(),
            attachment: Some(attachment),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryResult {
    /// Platform id of the delivered message, when the platform reports one.
    pub message_id: Option<i64>,
}

/// Narrow messaging-platform capability consumed by the core: send a message
/// somewhere, create a staff-side discussion thread.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send(
        &self,
        destination: Destination,
        message: &OutboundMessage,
    ) -> Result<DeliveryResult, ChannelError>;

    /// Creates a staff-side thread and returns its opaque handle.
    async fn create_thread(&self, title: &str) -> Result<i64, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_emptiness() {
        assert!(MessageContent::default().is_empty());
        assert!(MessageContent::text("   ").is_empty());
        assert!(!MessageContent::text("hi").is_empty());

        let photo_only = MessageContent {
            text: None,
            attachment: Some(Attachment {
                file_id: "abc".into(),
                kind: AttachmentKind::Photo,
            }),
        };
        assert!(!photo_only.is_empty());
        assert_eq!(photo_only.kind(), "photo");
    }
}
