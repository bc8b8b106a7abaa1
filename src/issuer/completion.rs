//! Delivery of issuance outcomes.
//!
//! A sink is consumed by the delivery, so every `issue` call completes its
//! sink exactly once.

use super::IssuanceOutcome;

pub trait CompletionSink: Send {
    fn complete(self, outcome: IssuanceOutcome);
}

/// Wraps a closure that receives the outcome.
pub struct CallbackSink<F>(pub F);

impl<F> CompletionSink for CallbackSink<F>
where
    F: FnOnce(IssuanceOutcome) + Send,
{
    fn complete(self, outcome: IssuanceOutcome) {
        (self.0)(outcome)
    }
}

impl CompletionSink for Box<dyn FnOnce(IssuanceOutcome) + Send> {
    fn complete(self, outcome: IssuanceOutcome) {
        self(outcome)
    }
}

#[cfg(feature = "std-tokio")]
pub use channel::{ChannelSink, Completion};

#[cfg(feature = "std-tokio")]
mod channel {
    use tokio::sync::{mpsc, oneshot};
    use tracing::warn;

    use super::*;

    impl CompletionSink for oneshot::Sender<IssuanceOutcome> {
        fn complete(self, outcome: IssuanceOutcome) {
            if self.send(outcome).is_err() {
                warn!("Issuance outcome dropped, receiver is gone");
            }
        }
    }

    /// An outcome tagged with the caller's request identifier.
    #[derive(Debug)]
    pub struct Completion {
        pub request_id: u64,
        pub outcome: IssuanceOutcome,
    }

    /// Posts the outcome to a runtime loop that owns the receiving end.
    #[derive(Debug, Clone)]
    pub struct ChannelSink {
        request_id: u64,
        sender: mpsc::UnboundedSender<Completion>,
    }

    impl ChannelSink {
        pub fn new(request_id: u64, sender: mpsc::UnboundedSender<Completion>) -> Self {
            Self { request_id, sender }
        }
    }

    impl CompletionSink for ChannelSink {
        fn complete(self, outcome: IssuanceOutcome) {
            let request_id = self.request_id;
            if self.sender.send(Completion { request_id, outcome }).is_err() {
                warn!(request_id, "Issuance outcome dropped, channel is closed");
            }
        }
    }
}
