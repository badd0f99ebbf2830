//! Recipient expansion engine for a mail transfer agent.
//!
//! Once the SMTP front-end has accepted a recipient, something has to
//! decide what actually happens to the message: relay it, drop it in a
//! mailbox or maildir, append it to a file, or pipe it through a
//! command. This crate is that decision. It matches the destination
//! against a configured ruleset, then recursively expands it through
//! virtual-domain aliases, local aliases and per-user forward files
//! until only concrete deliveries remain, and commits the resulting
//! envelopes to the queue atomically: all of them, or none plus one
//! error reply.
//!
//! The engine is driven through [`Expander::begin`] for each accepted
//! recipient and [`Expander::forward_reply`] for answers from the
//! privileged helper that opens forward files; everything it produces
//! leaves through the channels handed to the builder.

pub mod address;
pub mod channels;
pub mod envelope;
pub mod expand;
pub mod expander;
pub mod format;
pub mod forward;
pub mod logging;
pub mod rule;
pub mod session;
pub mod status;
pub mod table;

pub use expander::{Expander, ExpanderBuilder};
