//! Server command protocol
//!
//! `ServerCommand` messages carry JSON documents between a client and the
//! server: the login handshake, operator requests and rejection replies.

use serde::{Deserialize, Serialize};

use crate::message::{Command, Message, SERVER_CONTEXT};

/// Requests sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Join or create a session
    Login {
        /// Session id or alias
        session: String,
        /// Display name
        username: String,
        /// Account password, for registered users
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        /// Session password, if the session has one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_password: Option<String>,
        /// Create the session if it does not exist
        #[serde(default)]
        create: bool,
        /// Title for a newly created session
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    /// Remove a user from the session (operators only)
    Kick {
        /// Context id of the user to remove
        target: u8,
        /// Also ban the user's address from the session
        #[serde(default)]
        ban: bool,
    },
}

impl ClientRequest {
    /// Parse the JSON carried by a `ServerCommand`
    pub fn from_command(command: &Command) -> Option<serde_json::Result<Self>> {
        match command {
            Command::ServerCommand { json } => Some(serde_json::from_str(json)),
            _ => None,
        }
    }

    /// Wrap the request in a message
    pub fn to_message(&self, context_id: u8) -> serde_json::Result<Message> {
        Ok(Message::new(
            context_id,
            Command::ServerCommand {
                json: serde_json::to_string(self)?,
            },
        ))
    }
}

/// Replies sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    /// Login accepted
    Welcome {
        /// Session id
        session: String,
        /// Context id assigned to the client
        context_id: u8,
        /// Session title
        title: String,
    },

    /// Number of catch-up messages that follow
    CatchUp {
        /// Message count
        count: usize,
    },

    /// Login refused, the connection will be closed
    Rejected {
        /// Machine readable reason
        code: String,
        /// Human readable explanation
        message: String,
    },

    /// A command did not take effect
    Error {
        /// `permission`, `conflict` or `malformed`
        code: String,
        /// Human readable explanation
        message: String,
    },
}

impl ServerReply {
    /// Create an error reply
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a login rejection
    #[must_use]
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap the reply in a server-authored message
    #[must_use]
    pub fn to_message(&self) -> Message {
        // A derived Serialize on this enum cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        Message::new(SERVER_CONTEXT, Command::ServerCommand { json })
    }

    /// Parse the JSON carried by a `ServerCommand`
    pub fn from_command(command: &Command) -> Option<serde_json::Result<Self>> {
        match command {
            Command::ServerCommand { json } => Some(serde_json::from_str(json)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_json_shape() {
        let json = r#"{"cmd":"login","session":"sketch","username":"bob","create":true}"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            ClientRequest::Login {
                session: "sketch".to_string(),
                username: "bob".to_string(),
                password: None,
                session_password: None,
                create: true,
                title: None,
            }
        );
    }

    #[test]
    fn test_request_message_roundtrip() {
        let request = ClientRequest::Kick {
            target: 4,
            ban: true,
        };
        let message = request.to_message(2).unwrap();
        assert_eq!(message.context_id, 2);
        let parsed = ClientRequest::from_command(&message.command).unwrap().unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_reply_is_server_authored() {
        let message = ServerReply::error("permission", "layer is locked").to_message();
        assert_eq!(message.context_id, SERVER_CONTEXT);
        match &message.command {
            Command::ServerCommand { json } => {
                assert!(json.contains(r#""type":"error""#));
                assert!(json.contains(r#""code":"permission""#));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ServerReply::from_command(&Command::UndoPoint).is_none());
    }
}
