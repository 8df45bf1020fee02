//! Optional lifecycle event stream.

use provisioner_types::RunEvent;
use tokio::sync::mpsc::UnboundedSender;

/// Forwards [`RunEvent`]s to a subscriber, if there is one.
///
/// A dropped receiver is not an error: the run carries on and the report still holds
/// everything the events would have said.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    sender: Option<UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub(crate) fn new(sender: Option<UnboundedSender<RunEvent>>) -> Self {
        Self { sender }
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
