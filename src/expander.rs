use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    channels::Channels,
    envelope::SubmitStatus,
    forward::ForwardReply,
    rule::RuleMatcher,
    session::Session,
    table::Tables,
};

/// The collaborators every session works against: the configured
/// ruleset, the table backends, the outbound channels, and the identity
/// alias-produced file/command deliveries run under.
pub(crate) struct Services {
    pub matcher: Arc<dyn RuleMatcher>,
    pub tables: Tables,
    pub channels: Channels,
    pub daemon_user: String,
}

/// The recipient-expansion engine: starts a session per accepted
/// recipient and keeps sessions suspended on a forward-file round trip
/// registered by id until the helper's reply arrives.
///
/// The engine is single-threaded and never blocks; sessions interleave
/// only at the forward-file suspension point.
pub struct Expander {
    services: Services,
    sessions: AHashMap<u64, Session>,
    next_id: u64,
}

impl Expander {
    #[must_use]
    pub fn builder(
        matcher: Arc<dyn RuleMatcher>,
        tables: Tables,
        channels: Channels,
    ) -> ExpanderBuilder {
        ExpanderBuilder {
            matcher,
            tables,
            channels,
            daemon_user: "nobody".to_owned(),
        }
    }

    /// Starts expanding one accepted recipient. The reply slot is reset
    /// to 250; the session runs until it commits, fails, or suspends on
    /// a forward file. Returns the session id.
    pub fn begin(&mut self, status: SubmitStatus) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        tracing::debug!(session = id, dest = %status.envelope.dest, "expansion started");
        let mut session = Session::new(id, status);
        session.seed();
        session.resume(&self.services);
        if session.is_waiting() {
            self.sessions.insert(id, session);
        }
        id
    }

    /// Routes a forward-file reply to the suspended session it belongs
    /// to. Replies for unknown sessions are logged and dropped.
    pub fn forward_reply(&mut self, reply: ForwardReply) {
        let Some(mut session) = self.sessions.remove(&reply.id) else {
            tracing::warn!(session = reply.id, "forward reply for unknown session, dropping");
            return;
        };

        session.forward_reply(reply, &self.services);
        if session.is_waiting() {
            self.sessions.insert(session.id(), session);
        }
    }

    /// Number of sessions currently suspended on a forward-file reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sessions.len()
    }
}

/// Builder for [`Expander`]
pub struct ExpanderBuilder {
    matcher: Arc<dyn RuleMatcher>,
    tables: Tables,
    channels: Channels,
    daemon_user: String,
}

impl ExpanderBuilder {
    /// Sets the unprivileged account used for file and command
    /// deliveries produced by alias lookups.
    #[must_use]
    pub fn with_daemon_user(mut self, user: impl Into<String>) -> Self {
        self.daemon_user = user.into();
        self
    }

    #[must_use]
    pub fn build(self) -> Expander {
        Expander {
            services: Services {
                matcher: self.matcher,
                tables: self.tables,
                channels: self.channels,
                daemon_user: self.daemon_user,
            },
            sessions: AHashMap::new(),
            next_id: 1,
        }
    }
}
