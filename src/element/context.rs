//! Stage runtime context.
//!
//! The context gives a stage backend its identity and a handle onto the
//! graph's control bus, so it can report asynchronous failures after a
//! lifecycle hook has returned.

use crate::pipeline::{ControlMessage, MessageSender};

/// Runtime context for a stage.
#[derive(Clone)]
pub struct StageContext {
    name: String,
    bus: MessageSender,
}

impl StageContext {
    /// Create a new stage context.
    pub fn new(name: impl Into<String>, bus: MessageSender) -> Self {
        Self {
            name: name.into(),
            bus,
        }
    }

    /// Get the stage's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus handle; clone it to report from another thread.
    pub fn bus(&self) -> &MessageSender {
        &self.bus
    }

    /// Post a fatal error from this stage.
    pub fn post_error(&self, description: impl Into<String>) {
        self.bus.post(ControlMessage::error(&self.name, description, true));
    }

    /// Post a warning from this stage.
    pub fn post_warning(&self, description: impl Into<String>) {
        self.bus.post(ControlMessage::warning(&self.name, description));
    }

    /// Post end-of-stream from this stage.
    pub fn post_eos(&self) {
        self.bus.post(ControlMessage::Eos {
            source: self.name.clone(),
        });
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::message_bus;

    #[test]
    fn test_context_creation() {
        let (bus, _rx) = message_bus();
        let ctx = StageContext::new("encoder", bus);
        assert_eq!(ctx.name(), "encoder");
    }

    #[test]
    fn test_context_posts_tagged_messages() {
        let (bus, mut rx) = message_bus();
        let ctx = StageContext::new("rtsp-sink", bus);

        ctx.post_warning("slow peer");
        ctx.post_error("connection refused");

        match rx.try_recv() {
            Some(ControlMessage::Warning { source, .. }) => assert_eq!(source, "rtsp-sink"),
            other => panic!("unexpected {other:?}"),
        }
        match rx.try_recv() {
            Some(ControlMessage::Error { fatal, .. }) => assert!(fatal),
            other => panic!("unexpected {other:?}"),
        }
    }
}
