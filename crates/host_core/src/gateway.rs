use async_trait::async_trait;
use shared::{domain::ParticipantKey, error::CommandError, protocol::CommandBody};
use tracing::debug;

/// Header carrying the canonical participant key of the command target.
pub const PARTICIPANT_KEY_HEADER: &str = "x-participant-key";

/// Outbound confirmed-command channel. The engine only mutates its model
/// after `send` returns `Ok`; implementations must not report success for
/// commands the server did not acknowledge.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, key: &ParticipantKey, body: &CommandBody) -> Result<(), CommandError>;
}

/// Sends commands as JSON posts to the room server's command endpoint.
pub struct HttpCommandTransport {
    http: reqwest::Client,
    command_url: String,
}

impl HttpCommandTransport {
    pub fn new(server_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            command_url: format!("{}/room/command", server_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl CommandTransport for HttpCommandTransport {
    async fn send(&self, key: &ParticipantKey, body: &CommandBody) -> Result<(), CommandError> {
        debug!(key = %key, action = ?body.action, "gateway: sending command");
        let response = self
            .http
            .post(&self.command_url)
            .header(PARTICIPANT_KEY_HEADER, key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|err| CommandError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CommandError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
