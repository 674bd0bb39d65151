//! Chat transport used by the command bot.
//!
//! The bot only needs a small capability set: find conversations with unread
//! messages, read them, and answer with text, reactions or file attachments.
//! It can also subscribe to a live message stream instead of polling.

pub mod keybase;
pub mod types;

use async_trait::async_trait;
use std::path::Path;

use crate::error::ChatError;
pub use types::{CommandAdvertisement, Conversation, Message};

#[async_trait]
pub trait ChatTransport: Send {
    /// Lists conversations, optionally only those with unread messages.
    async fn list_conversations(
        &mut self,
        unread_only: bool,
    ) -> Result<Vec<Conversation>, ChatError>;

    /// Reads the text messages of a conversation, oldest first.
    async fn read_messages(
        &mut self,
        conversation_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Message>, ChatError>;

    async fn send_message(&mut self, conversation_id: &str, body: &str) -> Result<(), ChatError>;

    /// Reacts to a message with an emoji shortcode such as `:+1:`.
    async fn react(
        &mut self,
        conversation_id: &str,
        message_id: u64,
        reaction: &str,
    ) -> Result<(), ChatError>;

    /// Uploads a local file into the conversation.
    async fn send_attachment(
        &mut self,
        conversation_id: &str,
        path: &Path,
        title: &str,
    ) -> Result<(), ChatError>;

    /// Publishes the bot's commands so chat clients can autocomplete them.
    /// A team name scopes the advertisement to that team's conversations.
    async fn advertise_commands(
        &mut self,
        commands: &[CommandAdvertisement],
        team_name: Option<&str>,
    ) -> Result<(), ChatError>;

    /// Starts receiving live messages for [`ChatTransport::next_message`].
    async fn subscribe(&mut self) -> Result<(), ChatError>;

    /// Blocks until the next incoming text message. `None` means the stream
    /// ended.
    async fn next_message(&mut self) -> Result<Option<Message>, ChatError>;
}
