//! Keybase chat API wire types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub members_type: String,
    #[serde(default)]
    pub topic_type: String,
    #[serde(default)]
    pub topic_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub channel: Channel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub username: String,
    #[serde(default)]
    pub device_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Text>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub sender: Sender,
    pub content: Content,
}

impl Message {
    /// Body of a text message; `None` for every other content type.
    pub fn text_body(&self) -> Option<&str> {
        if self.content.kind != "text" {
            return None;
        }
        self.content.text.as_ref().map(|t| t.body.as_str())
    }
}

/// A bot command as advertised to chat clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandAdvertisement {
    pub name: String,
    pub description: String,
    pub usage: String,
}

// Response envelopes

#[derive(Debug, Deserialize)]
pub(crate) struct Response<T> {
    pub result: Option<T>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Inbox {
    pub conversations: Option<Vec<Conversation>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thread {
    pub messages: Option<Vec<MessageHolder>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageHolder {
    pub msg: Option<Message>,
    pub error: Option<String>,
}

/// A line emitted by `chat api-listen`.
#[derive(Debug, Deserialize)]
pub(crate) struct ListenEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: Option<Message>,
}
