use core::fmt::{self, Debug, Formatter};
use std::{sync::Arc, time::Duration};

use ahash::AHashSet;

use crate::{
    address::Mailaddr,
    envelope::{Envelope, RelayHost},
    table::{AliasLookup, TableError},
};

/// Default queue lifetime for accepted envelopes: four days, after
/// which the queue bounces them.
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(4 * 24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// What a matching rule does with the recipient. Every local action
/// carries its target buffer (path or command template), which is run
/// through format expansion at submission time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Relay,
    RelayVia(RelayHost),
    Mbox(String),
    Maildir(String),
    Filename(String),
    Mda(String),
}

impl Action {
    #[must_use]
    pub const fn is_relay(&self) -> bool {
        matches!(self, Self::Relay | Self::RelayVia(_))
    }
}

/// Which destinations a rule applies to. Domains are matched
/// case-insensitively against the envelope destination. A virtual
/// domain resolves its addresses entirely through the rule's alias
/// table instead of mapping them onto system users.
#[derive(Clone, Debug)]
pub enum Condition {
    Any,
    Domain(AHashSet<String>),
    VirtualDomain(AHashSet<String>),
}

impl Condition {
    #[must_use]
    pub fn matches(&self, domain: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Domain(domains) | Self::VirtualDomain(domains) => {
                domains.contains(&domain.to_ascii_lowercase())
            }
        }
    }

    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::VirtualDomain(_))
    }

    /// Builds a domain set from an iterator of domain names.
    pub fn domains(domains: impl IntoIterator<Item = impl Into<String>>) -> AHashSet<String> {
        domains
            .into_iter()
            .map(|domain| domain.into().to_ascii_lowercase())
            .collect()
    }
}

/// One configured routing rule: a decision, an action, the condition
/// that selects it, and the lookup/rewrite knobs expansion consults
/// while resolving recipients under it.
#[derive(Clone)]
pub struct Rule {
    pub decision: Decision,
    pub action: Action,
    pub condition: Condition,
    /// Alias table consulted for users (and, under a virtual-domain
    /// condition, for whole addresses) matched by this rule.
    pub alias_table: Option<Arc<dyn AliasLookup>>,
    /// Sender identity override for relayed mail; user and domain are
    /// applied independently, each only when non-empty.
    pub as_sender: Option<Mailaddr>,
    pub expire: Duration,
}

impl Rule {
    #[must_use]
    pub fn builder(action: Action) -> RuleBuilder {
        RuleBuilder {
            decision: Decision::Accept,
            action,
            condition: Condition::Any,
            alias_table: None,
            as_sender: None,
            expire: DEFAULT_EXPIRE,
        }
    }
}

impl Debug for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("decision", &self.decision)
            .field("action", &self.action)
            .field("condition", &self.condition)
            .field("alias_table", &self.alias_table.as_ref().map(|_| ".."))
            .field("as_sender", &self.as_sender)
            .field("expire", &self.expire)
            .finish()
    }
}

/// Builder for [`Rule`]
pub struct RuleBuilder {
    decision: Decision,
    action: Action,
    condition: Condition,
    alias_table: Option<Arc<dyn AliasLookup>>,
    as_sender: Option<Mailaddr>,
    expire: Duration,
}

impl RuleBuilder {
    #[must_use]
    pub const fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = decision;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    #[must_use]
    pub fn with_alias_table(mut self, table: Arc<dyn AliasLookup>) -> Self {
        self.alias_table = Some(table);
        self
    }

    #[must_use]
    pub fn with_as_sender(mut self, sender: Mailaddr) -> Self {
        self.as_sender = Some(sender);
        self
    }

    #[must_use]
    pub const fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Rule> {
        Arc::new(Rule {
            decision: self.decision,
            action: self.action,
            condition: self.condition,
            alias_table: self.alias_table,
            as_sender: self.as_sender,
            expire: self.expire,
        })
    }
}

/// The ruleset interface expansion consumes: given an envelope with its
/// destination set, either a rule applies, none does, or the backend is
/// temporarily unable to answer. Matching must not mutate the envelope.
pub trait RuleMatcher: Send + Sync {
    fn match_rule(&self, envelope: &Envelope) -> Result<Option<Arc<Rule>>, TableError>;
}

/// First-match ruleset over an ordered rule list.
#[derive(Debug, Default)]
pub struct Ruleset {
    rules: Vec<Arc<Rule>>,
}

impl Ruleset {
    #[must_use]
    pub fn new(rules: Vec<Arc<Rule>>) -> Self {
        Self { rules }
    }
}

impl RuleMatcher for Ruleset {
    fn match_rule(&self, envelope: &Envelope) -> Result<Option<Arc<Rule>>, TableError> {
        Ok(self
            .rules
            .iter()
            .find(|rule| rule.condition.matches(&envelope.dest.domain))
            .cloned())
    }
}
