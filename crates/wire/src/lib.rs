//! The DNS wire codec for Herald.
//!
//! This crate covers everything between raw octets and typed DNS data:
//!
//! - Domain names with their canonical form and DNSSEC ordering.
//! - RFC 1982 serial arithmetic.
//! - Record data for the types an authoritative server handles, with
//!   RFC 3597 pass-through for everything else.
//! - Single-pass message parsing and compression-aware building.
//! - TSIG signing and verification, including batched streams.
//!
//! It performs no I/O and knows nothing about zones; the daemon crate builds
//! on top of it.

pub use crate::iana::{Class, Opcode, Rcode, Rtype, SecurityAlgorithm, TsigRcode};
pub use crate::message::{
    parse_message, Edns, Flags, Message, MessageBuilder, ParsedTsig, Question, Section,
    MAX_MESSAGE_LEN, UDP_PAYLOAD_LIMIT,
};
pub use crate::name::{Name, NameParseError};
pub use crate::parse::{Composer, ParseError, Parser};
pub use crate::rdata::{Rdata, Rrsig, Soa, Tsig, TypeBitmap};
pub use crate::record::{Record, Rrset};
pub use crate::serial::Serial;

pub mod base;
pub mod iana;
pub mod message;
pub mod name;
pub mod parse;
pub mod rdata;
pub mod record;
pub mod serial;
pub mod tsig;
