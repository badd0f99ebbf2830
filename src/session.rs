use std::sync::Arc;

use thiserror::Error;

use crate::{
    address::Mailaddr,
    envelope::{DeliveryAgent, Envelope, MdaMethod, SubmitStatus},
    expand::{EXPAND_DEPTH, ExpandTree, InsertScope, NodeIndex, NodeKind},
    expander::Services,
    format::{self, FormatError},
    forward::{self, ForwardReply, ForwardRequest},
    rule::{Action, Decision, Rule},
    status::Status,
    table::{self, GETPWNAM, TableError},
};

/// Longest user name that can possibly name a system account.
pub const MAX_LOGNAME: usize = 32;

/// Everything that can terminate an expansion session, with the
/// SMTP-style code reported upstream for it.
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("expansion too deep")]
    TooDeep,
    #[error("no rule matched for {0}")]
    NoRule(Mailaddr),
    #[error("recipient {0} rejected by ruleset")]
    Rejected(Mailaddr),
    #[error("ruleset lookup failed: {0}")]
    RulesetBackend(TableError),
    #[error("alias lookup failed: {0}")]
    AliasBackend(TableError),
    #[error("no aliases for virtual recipient {0}")]
    NoVirtualAliases(Mailaddr),
    #[error("user name {0:?} too long for a system user")]
    UserTooLong(String),
    #[error("no system user for {0:?}")]
    UnknownUser(String),
    #[error("user lookup failed: {0}")]
    UserBackend(TableError),
    #[error("forward file unavailable for user {0:?}")]
    ForwardDenied(String),
    #[error("forward file for user {0:?} expanded to nothing")]
    EmptyForward(String),
    #[error("expanded to an empty delivery list")]
    EmptyExpansion,
    #[error("user {0:?} vanished during submission")]
    SubmitUser(String),
    #[error("format expansion failed: {0}")]
    Format(#[from] FormatError),
}

impl ExpandError {
    /// The SMTP code this failure reports: 451 for anything a retry
    /// might fix, 530 for everything permanently undeliverable.
    #[must_use]
    pub const fn code(&self) -> Status {
        match self {
            Self::RulesetBackend(_)
            | Self::AliasBackend(_)
            | Self::SubmitUser(_)
            | Self::Format(_) => Status::ActionUnavailable,
            Self::TooDeep
            | Self::NoRule(_)
            | Self::Rejected(_)
            | Self::NoVirtualAliases(_)
            | Self::UserTooLong(_)
            | Self::UnknownUser(_)
            | Self::UserBackend(_)
            | Self::ForwardDenied(_)
            | Self::EmptyForward(_)
            | Self::EmptyExpansion => Status::AccessDenied,
        }
    }
}

/// Session lifecycle. `Waiting` carries the rule and node blocked on
/// the forward-file round trip, so a session cannot be waiting without
/// exactly one outstanding request, nor waiting and failed at once.
#[derive(Debug)]
enum State {
    Running,
    Waiting { rule: Arc<Rule>, node: NodeIndex },
    Failed,
    Done,
}

/// What one expansion step asks of the driver loop.
enum Flow {
    Continue,
    Wait { rule: Arc<Rule>, node: NodeIndex },
}

/// One recipient being expanded into deliveries. The session seeds its
/// tree with the destination address, drains the pending queue through
/// [`Session::resume`], and ends by either committing every produced
/// envelope to the queue or reporting a single failure upstream, never
/// a mix of the two.
pub(crate) struct Session {
    id: u64,
    state: State,
    ss: SubmitStatus,
    /// Template for every envelope this session produces.
    envelope: Envelope,
    tree: ExpandTree,
    deliveries: Vec<Envelope>,
}

impl Session {
    pub(crate) fn new(id: u64, mut ss: SubmitStatus) -> Self {
        ss.code = Status::Ok;
        let envelope = ss.envelope.clone();
        Self {
            id,
            state: State::Running,
            ss,
            envelope,
            tree: ExpandTree::default(),
            deliveries: Vec::new(),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_waiting(&self) -> bool {
        matches!(self.state, State::Waiting { .. })
    }

    pub(crate) fn seed(&mut self) {
        self.tree.insert(
            NodeKind::Address(self.envelope.dest.clone()),
            &InsertScope::default(),
        );
    }

    /// Drains the pending queue until it empties, a step suspends on a
    /// forward file, or a step fails. On anything but suspension the
    /// session reaches its terminal step: commit or error reply.
    pub(crate) fn resume(&mut self, services: &Services) {
        if !matches!(self.state, State::Failed) {
            while let Some(index) = self.tree.pop() {
                let rule = self.tree.node(index).rule.clone();
                match self.expand(rule, index, services) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Wait { rule, node }) => {
                        self.state = State::Waiting { rule, node };
                        return;
                    }
                    Err(error) => {
                        self.fail(&error);
                        break;
                    }
                }
            }
        }

        if !matches!(self.state, State::Failed) && self.deliveries.is_empty() {
            self.fail(&ExpandError::EmptyExpansion);
        }
        self.finalise(services);
    }

    /// Routes the helper's forward-file answer into the blocked node,
    /// then resumes the main loop.
    pub(crate) fn forward_reply(&mut self, reply: ForwardReply, services: &Services) {
        let (rule, node) = match std::mem::replace(&mut self.state, State::Running) {
            State::Waiting { rule, node } => (rule, node),
            other => {
                self.state = other;
                tracing::warn!(session = self.id, "unsolicited forward reply, dropping");
                return;
            }
        };

        if let Err(error) = self.incorporate(reply, rule, node, services) {
            self.fail(&error);
        }
        self.resume(services);
    }

    fn incorporate(
        &mut self,
        reply: ForwardReply,
        rule: Arc<Rule>,
        node: NodeIndex,
        services: &Services,
    ) -> Result<(), ExpandError> {
        let NodeKind::Username(user) = self.tree.node(node).kind.clone() else {
            unreachable!("only user nodes wait on forward files");
        };

        match reply.file {
            None if reply.status => {
                // no forward file, just deliver to the local user
                tracing::debug!(session = self.id, user = %user, "no forward file, delivering");
                self.submit(&rule, node, services)
            }
            None => {
                tracing::debug!(session = self.id, user = %user, "opening forward file failed");
                Err(ExpandError::ForwardDenied(user))
            }
            Some(file) => {
                let targets = forward::parse(&file).unwrap_or_else(|error| {
                    tracing::warn!(session = self.id, user = %user, %error, "bad forward file");
                    Vec::new()
                });
                if targets.is_empty() {
                    return Err(ExpandError::EmptyForward(user));
                }
                let scope = InsertScope {
                    parent: Some(node),
                    rule: Some(rule),
                    alias: false,
                };
                for kind in targets {
                    self.tree.insert(kind, &scope);
                }
                // the file handle drops, and closes, before resumption
                Ok(())
            }
        }
    }

    fn fail(&mut self, error: &ExpandError) {
        tracing::debug!(session = self.id, %error, "expansion failed");
        self.ss.code = error.code();
        self.state = State::Failed;
    }

    /// The terminal step: either every produced envelope followed by
    /// one commit marker, or one error reply and nothing else.
    fn finalise(&mut self, services: &Services) {
        if matches!(self.state, State::Failed) {
            self.deliveries.clear();
            services.channels.rcpt(self.ss.clone());
        } else {
            for envelope in self.deliveries.drain(..) {
                services.channels.submit(envelope);
            }
            services.channels.commit(self.ss.envelope.clone());
        }
        self.state = State::Done;
    }

    fn expand(
        &mut self,
        rule: Option<Arc<Rule>>,
        index: NodeIndex,
        services: &Services,
    ) -> Result<Flow, ExpandError> {
        let node = self.tree.node(index);
        tracing::debug!(session = self.id, node = %node.kind, depth = node.depth, "expanding");
        if node.depth >= EXPAND_DEPTH {
            return Err(ExpandError::TooDeep);
        }

        match node.kind.clone() {
            NodeKind::Address(addr) => self.expand_address(addr, index, services),
            NodeKind::Username(user) => {
                let rule = rule.expect("non-root nodes carry the rule that produced them");
                self.expand_username(rule, user, index, services)
            }
            NodeKind::Filename(_) | NodeKind::Filter(_) => {
                let rule = rule.expect("non-root nodes carry the rule that produced them");
                self.submit(&rule, index, services)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn expand_address(
        &mut self,
        addr: Mailaddr,
        index: NodeIndex,
        services: &Services,
    ) -> Result<Flow, ExpandError> {
        // run the address through the ruleset on a scratch envelope;
        // nodes with a parent are expansion-generated forwards
        let mut scratch = self.envelope.clone();
        scratch.dest = addr.clone();
        if self.tree.node(index).parent.is_some() {
            scratch.internal = true;
        }

        let rule = match services.matcher.match_rule(&scratch) {
            Err(error) => return Err(ExpandError::RulesetBackend(error)),
            Ok(None) => return Err(ExpandError::NoRule(addr)),
            Ok(Some(rule)) => rule,
        };
        if rule.decision == Decision::Reject {
            return Err(ExpandError::Rejected(addr));
        }

        if rule.action.is_relay() {
            self.submit(&rule, index, services)?;
            return Ok(Flow::Continue);
        }

        if rule.condition.is_virtual() {
            let targets = match rule.alias_table.as_deref() {
                Some(aliases) => {
                    table::virtual_lookup(aliases, &addr).map_err(ExpandError::AliasBackend)?
                }
                None => Vec::new(),
            };
            if targets.is_empty() {
                return Err(ExpandError::NoVirtualAliases(addr));
            }
            let scope = InsertScope {
                parent: Some(index),
                rule: Some(rule),
                alias: true,
            };
            for kind in targets {
                self.tree.insert(kind, &scope);
            }
            return Ok(Flow::Continue);
        }

        let scope = InsertScope {
            parent: Some(index),
            rule: Some(rule),
            alias: true,
        };
        self.tree.insert(NodeKind::Username(addr.to_username()), &scope);
        Ok(Flow::Continue)
    }

    fn expand_username(
        &mut self,
        rule: Arc<Rule>,
        user: String,
        index: NodeIndex,
        services: &Services,
    ) -> Result<Flow, ExpandError> {
        if self.tree.node(index).sameuser {
            tracing::debug!(session = self.id, user = %user, "same user, submitting");
            self.submit(&rule, index, services)?;
            return Ok(Flow::Continue);
        }

        if let Some(aliases) = rule.alias_table.as_deref() {
            let targets = aliases.lookup(&user).map_err(ExpandError::AliasBackend)?;
            if !targets.is_empty() {
                let scope = InsertScope {
                    parent: Some(index),
                    rule: Some(rule),
                    alias: true,
                };
                for kind in targets {
                    self.tree.insert(kind, &scope);
                }
                return Ok(Flow::Continue);
            }
        }

        if user.len() >= MAX_LOGNAME {
            return Err(ExpandError::UserTooLong(user));
        }

        let users = services
            .tables
            .users(GETPWNAM)
            .ok_or_else(|| ExpandError::UnknownUser(user.clone()))?;
        match users.lookup(&user) {
            Err(error) => return Err(ExpandError::UserBackend(error)),
            Ok(None) => return Err(ExpandError::UnknownUser(user)),
            Ok(Some(_)) => {}
        }

        // no aliases matched; ask the helper for the user's forward file
        services.channels.forward_open(ForwardRequest {
            id: self.id,
            user,
        });
        Ok(Flow::Wait { rule, node: index })
    }

    /// Turns a terminal node into a delivery envelope appended to the
    /// pending list.
    fn submit(
        &mut self,
        rule: &Rule,
        index: NodeIndex,
        services: &Services,
    ) -> Result<(), ExpandError> {
        let node = self.tree.node(index);
        let mut envelope = self.envelope.clone();
        envelope.expire = rule.expire;

        match &rule.action {
            Action::Relay | Action::RelayVia(_) => {
                let NodeKind::Address(addr) = &node.kind else {
                    unreachable!("relay submissions expect an address node");
                };
                envelope.dest = addr.clone();
                envelope.agent = Some(DeliveryAgent::Mta {
                    relay: match &rule.action {
                        Action::RelayVia(host) => Some(host.clone()),
                        _ => None,
                    },
                });
                if let Some(as_sender) = &rule.as_sender {
                    if !as_sender.user.is_empty() {
                        envelope.sender.user = as_sender.user.clone();
                    }
                    if !as_sender.domain.is_empty() {
                        envelope.sender.domain = as_sender.domain.clone();
                    }
                }
            }
            Action::Mbox(_) | Action::Maildir(_) | Action::Filename(_) | Action::Mda(_) => {
                let dest = self
                    .tree
                    .ancestor(index, |kind| matches!(kind, NodeKind::Address(_)))
                    .expect("local deliveries descend from an address node");
                let NodeKind::Address(dest) = &self.tree.node(dest).kind else {
                    unreachable!();
                };
                envelope.dest = dest.clone();

                // file and command targets produced by an alias lookup
                // are delivered as the daemon, not as any user they
                // happened to be found under
                let username = if matches!(node.kind, NodeKind::Filename(_) | NodeKind::Filter(_))
                    && node.alias
                {
                    services.daemon_user.clone()
                } else {
                    let user = self
                        .tree
                        .ancestor(index, |kind| matches!(kind, NodeKind::Username(_)))
                        .expect("local deliveries descend from a user node");
                    let NodeKind::Username(user) = &self.tree.node(user).kind else {
                        unreachable!();
                    };
                    user.clone()
                };

                let users = services
                    .tables
                    .users(GETPWNAM)
                    .ok_or_else(|| ExpandError::SubmitUser(username.clone()))?;
                let user = match users.lookup(&username) {
                    Ok(Some(info)) => info,
                    Ok(None) | Err(_) => return Err(ExpandError::SubmitUser(username)),
                };

                let (method, buffer) = match &node.kind {
                    NodeKind::Filename(path) => (MdaMethod::Filename, path.clone()),
                    NodeKind::Filter(command) => (MdaMethod::Mda, command.clone()),
                    NodeKind::Username(_) => {
                        let (method, mut buffer) = match &rule.action {
                            Action::Mbox(path) => (MdaMethod::Mbox, path.clone()),
                            Action::Maildir(path) => (MdaMethod::Maildir, path.clone()),
                            Action::Filename(path) => (MdaMethod::Filename, path.clone()),
                            Action::Mda(command) => (MdaMethod::Mda, command.clone()),
                            Action::Relay | Action::RelayVia(_) => unreachable!(),
                        };
                        if matches!(rule.action, Action::Maildir(_)) {
                            if let Some(tag) = envelope.dest.tag() {
                                buffer.push_str("/.");
                                buffer.push_str(tag);
                            }
                        }
                        (method, buffer)
                    }
                    NodeKind::Address(_) => {
                        unreachable!("address nodes submit through relay actions")
                    }
                };

                envelope.agent = Some(DeliveryAgent::Mda {
                    method,
                    user,
                    buffer: buffer.clone(),
                });
                let expanded = format::expand(&buffer, &envelope).inspect_err(|error| {
                    tracing::warn!(session = self.id, %error, "format expansion failed");
                })?;
                if let Some(DeliveryAgent::Mda { buffer, .. }) = envelope.agent.as_mut() {
                    *buffer = expanded;
                }
            }
        }

        self.deliveries.push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::ExpandError;
    use crate::{address::Mailaddr, format::FormatError, status::Status, table::TableError};

    #[test]
    fn error_codes() {
        let addr: Mailaddr = "a@b.example".parse().unwrap();
        assert_eq!(ExpandError::TooDeep.code(), Status::AccessDenied);
        assert_eq!(ExpandError::NoRule(addr.clone()).code(), Status::AccessDenied);
        assert_eq!(ExpandError::Rejected(addr).code(), Status::AccessDenied);
        assert_eq!(
            ExpandError::UnknownUser("ghost".to_owned()).code(),
            Status::AccessDenied
        );
        assert_eq!(
            ExpandError::AliasBackend(TableError::Backend("down".to_owned())).code(),
            Status::ActionUnavailable
        );
        assert_eq!(
            ExpandError::SubmitUser("alice".to_owned()).code(),
            Status::ActionUnavailable
        );
        assert_eq!(
            ExpandError::Format(FormatError::TooLong).code(),
            Status::ActionUnavailable
        );
    }
}
