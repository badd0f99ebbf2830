use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{address::Mailaddr, status::Status};

/// System-user record answered by the `<getpwnam>` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub directory: String,
    pub uid: u32,
    pub gid: u32,
}

/// Next-hop override for relayed mail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHost {
    pub hostname: String,
    pub port: Option<u16>,
}

/// How a local delivery hands the message over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MdaMethod {
    Mbox,
    Maildir,
    Filename,
    Mda,
}

/// The agent a finalised envelope is bound for. Relayed mail goes back
/// out through the transfer client; everything else is handed to a
/// delivery agent with a fully expanded target buffer (mailbox path,
/// maildir path, file path or command line).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryAgent {
    Mta {
        relay: Option<RelayHost>,
    },
    Mda {
        method: MdaMethod,
        user: UserInfo,
        buffer: String,
    },
}

/// One deliverable instance of a message. The expansion session holds a
/// template envelope and stamps out one copy per concrete delivery, each
/// with `dest` and `agent` filled in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub sender: Mailaddr,
    /// Original recipient as accepted at `RCPT` time.
    pub rcpt: Mailaddr,
    /// Current destination; rewritten as expansion walks aliases.
    pub dest: Mailaddr,
    pub expire: Duration,
    /// Set on envelopes generated by expansion itself (forwards,
    /// aliases) rather than received from a peer.
    pub internal: bool,
    pub agent: Option<DeliveryAgent>,
}

impl Envelope {
    /// The MDA user record, when the envelope is bound for local
    /// delivery.
    #[must_use]
    pub const fn mda_user(&self) -> Option<&UserInfo> {
        match &self.agent {
            Some(DeliveryAgent::Mda { user, .. }) => Some(user),
            _ => None,
        }
    }
}

/// An envelope paired with the SMTP reply slot the front-end is holding
/// open for it. The expansion session answers through this: 250 stays
/// untouched on success, a 4xx/5xx code is written back on failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitStatus {
    pub envelope: Envelope,
    pub code: Status,
}
