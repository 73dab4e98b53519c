//! Credential and connection handshake
//!
//! The gateway authenticates each connection once, right after the
//! channel opens: the client sends a bearer token (plus an optional
//! working-context parameter) and waits for the gateway's `ready`
//! acknowledgement. Until that arrives, no session exists.

use std::time::Duration;
use tracing::debug;

use super::transport::{MessageSink, MessageSource};
use crate::error::GatewayError;
use crate::protocol::{encode_control, ControlFrame, InboundFrame};

/// Bearer credential presented at connect time.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    /// Optional working-context parameter (e.g. a share or volume scope)
    pub context: Option<String>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Run the authenticate handshake on a freshly connected channel.
///
/// Sends the authenticate frame and waits for `ready`. An error frame or
/// a close before `ready` means the credential was refused.
pub(crate) async fn authenticate(
    sink: &mut Box<dyn MessageSink>,
    source: &mut Box<dyn MessageSource>,
    credential: &Credential,
    deadline: Duration,
) -> Result<(), GatewayError> {
    debug!("Authenticating with gateway");

    let frame = encode_control(&ControlFrame::Authenticate {
        token: credential.token.clone(),
        context: credential.context.clone(),
    })?;
    sink.send(frame).await?;

    let ack = tokio::time::timeout(deadline, async {
        loop {
            match source.next().await {
                Some(Ok(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(InboundFrame::Ready) => return Ok(()),
                    Ok(InboundFrame::Error { message, .. }) => {
                        return Err(GatewayError::HandshakeRejected(message));
                    }
                    Ok(other) => {
                        // Nothing else is expected before the acknowledgement
                        debug!(frame = ?other, "Ignoring frame during handshake");
                        continue;
                    }
                    Err(e) => {
                        return Err(GatewayError::MalformedResponse(format!(
                            "Undecodable handshake reply: {}",
                            e
                        )));
                    }
                },
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(GatewayError::HandshakeRejected(
                        "Connection closed during handshake".to_string(),
                    ));
                }
            }
        }
    })
    .await;

    match ack {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Transport(
            "Timed out waiting for handshake acknowledgement".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_builder() {
        let credential = Credential::bearer("tok-123").with_context("pool-1");
        assert_eq!(credential.token, "tok-123");
        assert_eq!(credential.context.as_deref(), Some("pool-1"));

        let bare = Credential::bearer("tok-456");
        assert!(bare.context.is_none());
    }
}
