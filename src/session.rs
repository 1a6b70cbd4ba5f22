//! Chat sessions
//!
//! A session owns the conversation log for one chat and turns it into
//! prompts for the generation server. Messages are only ever appended.

use crate::kobold::{KoboldClient, KoboldError};
use crate::types::character::Character;
use crate::types::message::{Conversation, Message, Role};

const DEFAULT_ASSISTANT_NAME: &str = "Assistant";
const USER_NAME: &str = "User";

/// One ongoing chat with the model, optionally playing a character
#[derive(Debug, Clone)]
pub struct Session {
    client: KoboldClient,
    character: Option<Character>,
    conversation: Conversation,
}

impl Session {
    pub fn new(client: KoboldClient) -> Self {
        Self {
            client,
            character: None,
            conversation: Conversation::new(),
        }
    }

    pub fn with_character(client: KoboldClient, character: Character) -> Self {
        Self {
            character: Some(character),
            ..Self::new(client)
        }
    }

    pub fn character(&self) -> Option<&Character> {
        self.character.as_ref()
    }

    /// Append a message to the conversation
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> &Message {
        self.conversation.add_message(role, content)
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Label used for the model's turns
    pub fn assistant_name(&self) -> &str {
        self.character
            .as_ref()
            .and_then(Character::name)
            .unwrap_or(DEFAULT_ASSISTANT_NAME)
    }

    /// Render the transcript as a completion prompt ending on the model's turn
    pub fn build_prompt(&self) -> String {
        let assistant = self.assistant_name();
        let mut prompt = String::new();

        if let Some(description) = self
            .character
            .as_ref()
            .and_then(|c| c.str_field("description"))
        {
            prompt.push_str(description);
            prompt.push('\n');
        }

        for message in self.conversation.messages() {
            match message.role {
                Role::System => prompt.push_str(&message.content),
                Role::User => {
                    prompt.push_str(USER_NAME);
                    prompt.push_str(": ");
                    prompt.push_str(&message.content);
                }
                Role::Assistant => {
                    prompt.push_str(assistant);
                    prompt.push_str(": ");
                    prompt.push_str(&message.content);
                }
            }
            prompt.push('\n');
        }

        prompt.push_str(assistant);
        prompt.push(':');
        prompt
    }

    /// Send a user message and record the model's reply
    pub async fn send(&mut self, user_text: &str) -> Result<String, KoboldError> {
        self.add_message(Role::User, user_text);
        let reply = self.client.generate_response(&self.build_prompt()).await?;
        Ok(self.record_reply(&reply))
    }

    /// Like [`send`](Self::send) but through the streaming endpoint
    pub async fn send_stream<F>(&mut self, user_text: &str, on_token: F) -> Result<String, KoboldError>
    where
        F: FnMut(&str),
    {
        self.add_message(Role::User, user_text);
        let reply = self
            .client
            .generate_response_stream_with(&self.build_prompt(), on_token)
            .await?;
        Ok(self.record_reply(&reply))
    }

    fn record_reply(&mut self, reply: &str) -> String {
        let reply = reply.trim().to_string();
        tracing::debug!("{} replied with {} chars", self.assistant_name(), reply.len());
        self.add_message(Role::Assistant, reply.clone());
        reply
    }
}
