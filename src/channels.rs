use tokio::sync::mpsc::UnboundedSender;

use crate::{
    envelope::{Envelope, SubmitStatus},
    forward::ForwardRequest,
};

/// Messages to the queue subsystem: each delivery envelope of a
/// session, then exactly one commit carrying the session's original
/// submit-status envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueMessage {
    Submit(Envelope),
    Commit(Envelope),
}

/// Messages back to the SMTP front-end: the recipient's reply slot,
/// sent only when expansion fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrontMessage {
    Rcpt(SubmitStatus),
}

/// Handles to the sibling components the engine talks to: the message
/// queue, the SMTP front-end, and the privileged helper that opens
/// forward files. A closed channel means the process is shutting down;
/// sends are logged and dropped rather than propagated.
#[derive(Clone, Debug)]
pub struct Channels {
    pub queue: UnboundedSender<QueueMessage>,
    pub front: UnboundedSender<FrontMessage>,
    pub helper: UnboundedSender<ForwardRequest>,
}

impl Channels {
    pub(crate) fn submit(&self, envelope: Envelope) {
        if self.queue.send(QueueMessage::Submit(envelope)).is_err() {
            tracing::warn!("queue channel closed, dropping envelope");
        }
    }

    pub(crate) fn commit(&self, envelope: Envelope) {
        if self.queue.send(QueueMessage::Commit(envelope)).is_err() {
            tracing::warn!("queue channel closed, dropping commit");
        }
    }

    pub(crate) fn rcpt(&self, status: SubmitStatus) {
        if self.front.send(FrontMessage::Rcpt(status)).is_err() {
            tracing::warn!("front-end channel closed, dropping reply");
        }
    }

    pub(crate) fn forward_open(&self, request: ForwardRequest) {
        if self.helper.send(request).is_err() {
            tracing::warn!("helper channel closed, dropping forward request");
        }
    }
}
