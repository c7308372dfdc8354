//! Control bus: asynchronous lifecycle messages from stages to the control loop.
//!
//! Stages and the graph post [`ControlMessage`]s through a cloneable
//! [`MessageSender`]. The single [`MessageReceiver`] is consumed by the
//! [`ControlLoop`](super::ControlLoop). Posting never blocks, so it is safe
//! from the data path and from decode-announcement threads.

use crate::element::StageState;
use std::fmt;
use tokio::sync::mpsc;

/// Messages posted to the control bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A stage or the graph completed a lifecycle step.
    StateChanged {
        /// Stage name, or the graph name for aggregate changes.
        source: String,
        /// Previous state.
        from: StageState,
        /// New state.
        to: StageState,
    },

    /// End of stream reached.
    Eos {
        /// Reporting stage.
        source: String,
    },

    /// A stage reported an error.
    Error {
        /// Reporting stage.
        source: String,
        /// Human-readable diagnostic.
        description: String,
        /// Whether the run must end.
        fatal: bool,
    },

    /// Non-fatal issue.
    Warning {
        /// Reporting stage.
        source: String,
        /// Human-readable diagnostic.
        description: String,
    },
}

impl ControlMessage {
    /// Build an error message.
    pub fn error(source: impl Into<String>, description: impl Into<String>, fatal: bool) -> Self {
        ControlMessage::Error {
            source: source.into(),
            description: description.into(),
            fatal,
        }
    }

    /// Build a warning message.
    pub fn warning(source: impl Into<String>, description: impl Into<String>) -> Self {
        ControlMessage::Warning {
            source: source.into(),
            description: description.into(),
        }
    }

    /// Build an end-of-stream message.
    pub fn eos(source: impl Into<String>) -> Self {
        ControlMessage::Eos {
            source: source.into(),
        }
    }

    /// Name of the stage that posted the message.
    pub fn source(&self) -> &str {
        match self {
            ControlMessage::StateChanged { source, .. }
            | ControlMessage::Eos { source }
            | ControlMessage::Error { source, .. }
            | ControlMessage::Warning { source, .. } => source,
        }
    }

    /// Whether this message ends the run (EOS or fatal error).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControlMessage::Eos { .. } | ControlMessage::Error { fatal: true, .. }
        )
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::StateChanged { source, from, to } => {
                write!(f, "{}: state changed {} -> {}", source, from, to)
            }
            ControlMessage::Eos { source } => write!(f, "{}: end of stream", source),
            ControlMessage::Error {
                source,
                description,
                fatal,
            } => {
                let kind = if *fatal { "error" } else { "non-fatal error" };
                write!(f, "{}: {}: {}", source, kind, description)
            }
            ControlMessage::Warning {
                source,
                description,
            } => write!(f, "{}: warning: {}", source, description),
        }
    }
}

/// Create a connected bus sender/receiver pair.
pub fn message_bus() -> (MessageSender, MessageReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (MessageSender { sender }, MessageReceiver { receiver })
}

/// Sender half of the control bus.
#[derive(Clone)]
pub struct MessageSender {
    sender: mpsc::UnboundedSender<ControlMessage>,
}

impl MessageSender {
    /// Post a message.
    ///
    /// Returns `false` if the receiver has been dropped (which is fine
    /// during shutdown).
    pub fn post(&self, message: ControlMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Post end-of-stream.
    pub fn post_eos(&self, source: impl Into<String>) {
        self.post(ControlMessage::eos(source));
    }

    /// Post an error.
    pub fn post_error(&self, source: impl Into<String>, description: impl Into<String>, fatal: bool) {
        self.post(ControlMessage::error(source, description, fatal));
    }

    /// Post a state change.
    pub fn post_state_changed(&self, source: impl Into<String>, from: StageState, to: StageState) {
        self.post(ControlMessage::StateChanged {
            source: source.into(),
            from,
            to,
        });
    }

    /// Whether the receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Receiver half of the control bus.
pub struct MessageReceiver {
    receiver: mpsc::UnboundedReceiver<ControlMessage>,
}

impl MessageReceiver {
    /// Receive the next message.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<ControlMessage> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Option<ControlMessage> {
        self.receiver.try_recv().ok()
    }

    /// Wait for EOS or a fatal error.
    ///
    /// Returns `Ok(())` on EOS, `Err(message)` on error.
    pub async fn wait_eos(&mut self) -> Result<(), String> {
        while let Some(message) = self.recv().await {
            match message {
                ControlMessage::Eos { .. } => return Ok(()),
                ControlMessage::Error {
                    source,
                    description,
                    fatal: true,
                } => return Err(format!("Error in {}: {}", source, description)),
                _ => continue,
            }
        }
        Err("Control bus closed unexpectedly".to_string())
    }
}

impl fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReceiver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_messages() {
        let (sender, mut receiver) = message_bus();

        sender.post_state_changed("graph", StageState::Null, StageState::Ready);
        sender.post_eos("src");

        let message = receiver.recv().await.unwrap();
        assert!(matches!(
            message,
            ControlMessage::StateChanged {
                to: StageState::Ready,
                ..
            }
        ));
        let message = receiver.recv().await.unwrap();
        assert_eq!(message.source(), "src");
        assert!(message.is_terminal());
    }

    #[tokio::test]
    async fn test_wait_eos_error() {
        let (sender, mut receiver) = message_bus();

        tokio::spawn(async move {
            sender.post(ControlMessage::warning("sink", "late buffer"));
            sender.post_error("rtmp-sink", "connection refused", true);
        });

        let result = receiver.wait_eos().await;
        assert_eq!(
            result.unwrap_err(),
            "Error in rtmp-sink: connection refused"
        );
    }

    #[test]
    fn test_non_fatal_error_is_not_terminal() {
        let message = ControlMessage::error("enc", "queue overrun", false);
        assert!(!message.is_terminal());
        assert_eq!(message.to_string(), "enc: non-fatal error: queue overrun");
    }

    #[test]
    fn test_post_after_receiver_dropped() {
        let (sender, receiver) = message_bus();
        drop(receiver);
        assert!(sender.is_closed());
        assert!(!sender.post(ControlMessage::eos("src")));
    }
}
