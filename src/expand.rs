use core::fmt::{self, Display, Formatter};
use std::{collections::VecDeque, str::FromStr, sync::Arc};

use ahash::AHashSet;
use thiserror::Error;

use crate::{address::Mailaddr, rule::Rule};

/// How many alias/forward indirections a single recipient may go
/// through before expansion gives up on it.
pub const EXPAND_DEPTH: usize = 10;

/// Index of a node in its [`ExpandTree`] arena.
pub type NodeIndex = usize;

/// One unit of expansion work: an address still to be matched against
/// the ruleset, a local user still to be resolved, or a terminal
/// file/command delivery target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Address(Mailaddr),
    Username(String),
    Filename(String),
    Filter(String),
}

impl NodeKind {
    const fn label(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Username(_) => "username",
            Self::Filename(_) => "filename",
            Self::Filter(_) => "filter",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{}: {addr}", self.label()),
            Self::Username(user) => write!(f, "{}: {user}", self.label()),
            Self::Filename(path) | Self::Filter(path) => {
                write!(f, "{}: {path}", self.label())
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed expansion target {0:?}")]
pub struct ParseNodeError(pub String);

impl FromStr for NodeKind {
    type Err = ParseNodeError;

    /// Parses one alias or forward-file target. Leading `|` is a
    /// command, leading `/` a file, leading `\` an escaped user name,
    /// anything with an `@` an address, the rest a plain user name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(command) = s.strip_prefix('|') {
            let command = command.trim_start();
            if command.is_empty() {
                return Err(ParseNodeError(s.to_owned()));
            }
            return Ok(Self::Filter(command.to_owned()));
        }
        if s.starts_with('/') {
            return Ok(Self::Filename(s.to_owned()));
        }
        if let Some(user) = s.strip_prefix('\\') {
            return parse_username(user).ok_or_else(|| ParseNodeError(s.to_owned()));
        }
        if s.contains('@') {
            return s
                .parse::<Mailaddr>()
                .map(Self::Address)
                .map_err(|_| ParseNodeError(s.to_owned()));
        }
        parse_username(s).ok_or_else(|| ParseNodeError(s.to_owned()))
    }
}

fn parse_username(user: &str) -> Option<NodeKind> {
    let valid = !user.is_empty()
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    valid.then(|| NodeKind::Username(user.to_owned()))
}

/// Parses a comma-separated alias value such as
/// `gilles, staff@example.org, |/usr/bin/archive` into targets.
pub fn parse_targets(value: &str) -> Result<Vec<NodeKind>, ParseNodeError> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// A node plus the bookkeeping expansion needs: the rule it was
/// produced under, its depth, its parent, and whether it came out of an
/// alias lookup (`alias`) or is a user aliased to itself (`sameuser`).
#[derive(Clone, Debug)]
pub struct ExpandNode {
    pub kind: NodeKind,
    pub depth: usize,
    pub parent: Option<NodeIndex>,
    pub alias: bool,
    pub sameuser: bool,
    pub rule: Option<Arc<Rule>>,
}

/// The insertion context a caller establishes before expanding a node's
/// children: who the parent is, which rule produced them, and whether
/// they came from an alias lookup.
#[derive(Clone, Debug, Default)]
pub struct InsertScope {
    pub parent: Option<NodeIndex>,
    pub rule: Option<Arc<Rule>>,
    pub alias: bool,
}

/// Structural identity of a node. Two nodes are the same piece of work
/// when their kind, payload and provenance flags agree; addresses and
/// user names compare case-insensitively, paths and commands exactly.
/// The provenance flags are part of the key on purpose: a user aliased
/// to itself must re-enter the tree as a distinct `sameuser` node, which
/// is what lets `loop: loop` terminate in a single submission.
#[derive(Hash, PartialEq, Eq)]
struct NodeKey {
    label: &'static str,
    payload: String,
    alias: bool,
    sameuser: bool,
}

impl NodeKey {
    fn new(kind: &NodeKind, alias: bool, sameuser: bool) -> Self {
        let payload = match kind {
            NodeKind::Address(addr) => {
                format!("{}@{}", addr.user.to_ascii_lowercase(), addr.domain.to_ascii_lowercase())
            }
            NodeKind::Username(user) => user.to_ascii_lowercase(),
            NodeKind::Filename(path) | NodeKind::Filter(path) => path.clone(),
        };
        Self {
            label: kind.label(),
            payload,
            alias,
            sameuser,
        }
    }
}

/// Insert-with-dedup arena of expansion nodes plus the FIFO of nodes
/// still waiting to be expanded. Parent links always point backwards
/// into the arena, so the node graph is a tree by construction.
#[derive(Default)]
pub struct ExpandTree {
    nodes: Vec<ExpandNode>,
    seen: AHashSet<NodeKey>,
    queue: VecDeque<NodeIndex>,
}

impl ExpandTree {
    /// Inserts a node under the given scope and queues it for
    /// expansion. Inserting a node structurally equal to an existing one
    /// is a no-op returning `None`; that is both the dedup and the cycle
    /// breaker.
    pub fn insert(&mut self, kind: NodeKind, scope: &InsertScope) -> Option<NodeIndex> {
        let sameuser = match (&kind, scope.parent) {
            (NodeKind::Username(user), Some(parent)) => {
                matches!(&self.nodes[parent].kind,
                    NodeKind::Username(parent_user) if parent_user.eq_ignore_ascii_case(user))
            }
            _ => false,
        };

        if !self.seen.insert(NodeKey::new(&kind, scope.alias, sameuser)) {
            return None;
        }

        let depth = scope.parent.map_or(0, |parent| self.nodes[parent].depth + 1);
        let index = self.nodes.len();
        self.nodes.push(ExpandNode {
            kind,
            depth,
            parent: scope.parent,
            alias: scope.alias,
            sameuser,
            rule: scope.rule.clone(),
        });
        self.queue.push_back(index);
        Some(index)
    }

    /// Pops the next node waiting to be expanded.
    pub fn pop(&mut self) -> Option<NodeIndex> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &ExpandNode {
        &self.nodes[index]
    }

    /// Walks parent links from `from` (inclusive) towards the root,
    /// returning the first node whose kind satisfies `want`.
    pub fn ancestor<F>(&self, from: NodeIndex, mut want: F) -> Option<NodeIndex>
    where
        F: FnMut(&NodeKind) -> bool,
    {
        let mut cursor = Some(from);
        while let Some(index) = cursor {
            if want(&self.nodes[index].kind) {
                return Some(index);
            }
            cursor = self.nodes[index].parent;
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{ExpandTree, InsertScope, NodeKind, parse_targets};

    fn address(s: &str) -> NodeKind {
        NodeKind::Address(s.parse().unwrap())
    }

    #[test]
    fn parse_target_kinds() {
        assert_eq!(
            "|/usr/bin/archive -d".parse::<NodeKind>().unwrap(),
            NodeKind::Filter("/usr/bin/archive -d".to_owned())
        );
        assert_eq!(
            "/var/mail/backup".parse::<NodeKind>().unwrap(),
            NodeKind::Filename("/var/mail/backup".to_owned())
        );
        assert_eq!(
            "\\gilles".parse::<NodeKind>().unwrap(),
            NodeKind::Username("gilles".to_owned())
        );
        assert_eq!(
            "gilles@poolp.org".parse::<NodeKind>().unwrap(),
            address("gilles@poolp.org")
        );
        assert_eq!(
            "gilles".parse::<NodeKind>().unwrap(),
            NodeKind::Username("gilles".to_owned())
        );

        assert!("|".parse::<NodeKind>().is_err());
        assert!("gi lles".parse::<NodeKind>().is_err());
        assert!("@poolp.org".parse::<NodeKind>().is_err());
    }

    #[test]
    fn parse_target_lists() {
        let targets = parse_targets("gilles, staff@example.org, |/usr/bin/archive").unwrap();
        assert_eq!(targets.len(), 3);
        assert!(parse_targets("gilles,, bad user").is_err());
        assert_eq!(parse_targets("").unwrap(), vec![]);
    }

    #[test]
    fn insert_dedups_case_insensitively() {
        let mut tree = ExpandTree::default();
        let scope = InsertScope::default();
        assert!(tree.insert(address("Alice@Example.org"), &scope).is_some());
        assert!(tree.insert(address("alice@example.ORG"), &scope).is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn depth_follows_parent() {
        let mut tree = ExpandTree::default();
        let root = tree
            .insert(address("a@example.org"), &InsertScope::default())
            .unwrap();
        let child = tree
            .insert(
                NodeKind::Username("a".to_owned()),
                &InsertScope {
                    parent: Some(root),
                    rule: None,
                    alias: true,
                },
            )
            .unwrap();
        assert_eq!(tree.node(root).depth, 0);
        assert_eq!(tree.node(child).depth, 1);
        assert!(tree.node(child).alias);
    }

    #[test]
    fn self_alias_becomes_sameuser_node() {
        let mut tree = ExpandTree::default();
        let user = tree
            .insert(NodeKind::Username("loop".to_owned()), &InsertScope::default())
            .unwrap();
        let scope = InsertScope {
            parent: Some(user),
            rule: None,
            alias: true,
        };
        // same payload, but the sameuser flag makes it a distinct node
        let again = tree.insert(NodeKind::Username("loop".to_owned()), &scope);
        assert!(again.is_some());
        assert!(tree.node(again.unwrap()).sameuser);
        // and a third insertion of the same shape is deduped
        assert!(tree.insert(NodeKind::Username("LOOP".to_owned()), &scope).is_none());
    }

    #[test]
    fn ancestor_walk_is_inclusive() {
        let mut tree = ExpandTree::default();
        let root = tree
            .insert(address("a@example.org"), &InsertScope::default())
            .unwrap();
        let user = tree
            .insert(
                NodeKind::Username("a".to_owned()),
                &InsertScope {
                    parent: Some(root),
                    rule: None,
                    alias: true,
                },
            )
            .unwrap();

        let found = tree.ancestor(user, |kind| matches!(kind, NodeKind::Address(_)));
        assert_eq!(found, Some(root));
        let found = tree.ancestor(user, |kind| matches!(kind, NodeKind::Username(_)));
        assert_eq!(found, Some(user));
        let found = tree.ancestor(root, |kind| matches!(kind, NodeKind::Filter(_)));
        assert_eq!(found, None);
    }
}
