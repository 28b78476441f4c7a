//! Zone transfers.
//!
//! The client side keeps secondary zones current: it probes the master's
//! SOA on REFRESH and pulls an IXFR or AXFR on TRANSFER.  The server side
//! answers transfer requests from a snapshot (AXFR) or the journal (IXFR).

use std::fmt;

use herald_wire::tsig::TsigError;
use herald_wire::{ParseError, Rcode};

use crate::zone::changeset::ChangesetError;

pub mod client;
pub mod server;

/// The per-transfer soft deadline.
pub const TRANSFER_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60);

//----------- XfrError ---------------------------------------------------------

/// An error during a zone transfer.
#[derive(Debug)]
pub enum XfrError {
    /// The zone has no master configured.
    NoMaster,

    /// The configured TSIG key is not in the key store.
    UnknownKey,

    /// The network failed us.
    Io(std::io::Error),

    /// The soft deadline expired.
    Timeout,

    /// The peer answered with an error RCODE.
    Rcode(Rcode),

    /// A message in the stream did not parse.
    Parse(ParseError),

    /// A message in the stream failed TSIG verification.
    Tsig(TsigError),

    /// The stream did not have the shape of a transfer.
    Malformed(&'static str),

    /// A differential sequence could not be reassembled.
    Changeset(ChangesetError),
}

impl From<std::io::Error> for XfrError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ParseError> for XfrError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<TsigError> for XfrError {
    fn from(err: TsigError) -> Self {
        Self::Tsig(err)
    }
}

impl From<ChangesetError> for XfrError {
    fn from(err: ChangesetError) -> Self {
        Self::Changeset(err)
    }
}

impl std::error::Error for XfrError {}

impl fmt::Display for XfrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMaster => f.write_str("no master configured"),
            Self::UnknownKey => f.write_str("configured TSIG key is unknown"),
            Self::Io(err) => err.fmt(f),
            Self::Timeout => f.write_str("transfer deadline expired"),
            Self::Rcode(rcode) => write!(f, "peer answered {rcode}"),
            Self::Parse(err) => err.fmt(f),
            Self::Tsig(err) => write!(f, "transaction signature failed: {err}"),
            Self::Malformed(what) => write!(f, "malformed transfer stream: {what}"),
            Self::Changeset(err) => err.fmt(f),
        }
    }
}
