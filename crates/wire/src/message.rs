//! DNS messages.

use crate::iana::{Class, Opcode, Rcode, Rtype};
use crate::name::Name;
use crate::parse::{Composer, ParseError, Parser};
use crate::rdata::{Rdata, Tsig};
use crate::record::Record;

/// The size of a message header.
pub const HEADER_LEN: usize = 12;

/// The default payload limit for plain UDP responses.
pub const UDP_PAYLOAD_LIMIT: usize = 512;

/// The absolute limit on any DNS message.
pub const MAX_MESSAGE_LEN: usize = 65535;

//----------- Flags ------------------------------------------------------------

/// The flags and codes of a message header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    /// Whether this message is a response.
    pub qr: bool,

    /// The kind of query.
    pub opcode: Opcode,

    /// Whether the responder is authoritative for the question.
    pub aa: bool,

    /// Whether the response was truncated to fit its transport.
    pub tc: bool,

    /// Whether recursion is desired.  Herald never recurses; the flag is
    /// echoed into responses as RFC 1035 requires.
    pub rd: bool,

    /// Whether recursion is available.
    pub ra: bool,

    /// Whether the response data was validated (RFC 4035).
    pub ad: bool,

    /// Whether checking was disabled by the requester.
    pub cd: bool,

    /// The response code.
    pub rcode: Rcode,
}

impl Flags {
    fn to_u16(self) -> u16 {
        let mut bits = 0u16;
        bits |= u16::from(self.qr) << 15;
        bits |= u16::from(self.opcode.0 & 0xF) << 11;
        bits |= u16::from(self.aa) << 10;
        bits |= u16::from(self.tc) << 9;
        bits |= u16::from(self.rd) << 8;
        bits |= u16::from(self.ra) << 7;
        bits |= u16::from(self.ad) << 5;
        bits |= u16::from(self.cd) << 4;
        bits |= u16::from(self.rcode.0 & 0xF);
        bits
    }

    fn from_u16(bits: u16) -> Self {
        Self {
            qr: bits & (1 << 15) != 0,
            opcode: Opcode(((bits >> 11) & 0xF) as u8),
            aa: bits & (1 << 10) != 0,
            tc: bits & (1 << 9) != 0,
            rd: bits & (1 << 8) != 0,
            ra: bits & (1 << 7) != 0,
            ad: bits & (1 << 5) != 0,
            cd: bits & (1 << 4) != 0,
            rcode: Rcode((bits & 0xF) as u8),
        }
    }
}

//----------- Question ---------------------------------------------------------

/// An entry of the question section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    /// The name being asked about.
    pub qname: Name,

    /// The type being asked about.
    pub qtype: Rtype,

    /// The class being asked about.
    pub qclass: Class,
}

impl Question {
    /// Construct a question.
    pub fn new(qname: Name, qtype: Rtype, qclass: Class) -> Self {
        Self {
            qname,
            qtype,
            qclass,
        }
    }
}

//----------- Edns -------------------------------------------------------------

/// The EDNS0 information of a message (RFC 6891).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Edns {
    /// The requester's maximum UDP payload size.
    pub udp_payload_size: u16,

    /// The upper eight bits of the extended RCODE.
    pub ext_rcode: u8,

    /// The EDNS version.  Only version 0 exists.
    pub version: u8,

    /// Whether DNSSEC records are desired (RFC 3225).
    pub dnssec_ok: bool,

    /// Raw EDNS options, uninterpreted.
    pub options: Box<[u8]>,
}

//----------- ParsedTsig -------------------------------------------------------

/// The TSIG record found on a parsed message.
///
/// The record's position is retained: MAC verification needs the message
/// octets exactly as they were before the TSIG record was appended.
#[derive(Clone, Debug)]
pub struct ParsedTsig {
    /// The key name (the TSIG record's owner).
    pub owner: Name,

    /// The TSIG record data.
    pub data: Tsig,

    /// The offset of the TSIG record within the message.
    pub offset: usize,
}

//----------- Message ----------------------------------------------------------

/// A parsed DNS message.
#[derive(Clone, Debug, Default)]
pub struct Message {
    /// The message ID.
    pub id: u16,

    /// Header flags and codes.
    pub flags: Flags,

    /// The question section.
    pub questions: Vec<Question>,

    /// The answer section.
    pub answers: Vec<Record>,

    /// The authority section.
    pub authorities: Vec<Record>,

    /// The additional section, excluding OPT and TSIG.
    pub additionals: Vec<Record>,

    /// EDNS information, if an OPT record was present.
    pub edns: Option<Edns>,

    /// The transaction signature, if a TSIG record was present.
    pub tsig: Option<ParsedTsig>,
}

impl Message {
    /// The first (typically only) question.
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Iterate over the records of every section, in order.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
    }
}

/// Parse a complete message.
///
/// Parsing is a single pass.  Messages with truncated records, counts that
/// overflow the actual data, compression loops, oversized names or a TSIG
/// record anywhere but the very end of the additional section are rejected.
pub fn parse_message(wire: &[u8]) -> Result<Message, ParseError> {
    let mut parser = Parser::new(wire);

    let id = parser.read_u16()?;
    let flags = Flags::from_u16(parser.read_u16()?);
    let qdcount = parser.read_u16()?;
    let ancount = parser.read_u16()?;
    let nscount = parser.read_u16()?;
    let arcount = parser.read_u16()?;

    let mut message = Message {
        id,
        flags,
        ..Default::default()
    };

    for _ in 0..qdcount {
        message.questions.push(Question {
            qname: Name::parse(&mut parser)?,
            qtype: Rtype(parser.read_u16()?),
            qclass: Class(parser.read_u16()?),
        });
    }

    for _ in 0..ancount {
        message.answers.push(Record::parse(&mut parser)?);
    }
    for _ in 0..nscount {
        message.authorities.push(Record::parse(&mut parser)?);
    }
    for index in 0..arcount {
        let offset = parser.pos();
        let record = Record::parse(&mut parser)?;
        match record.rdata {
            Rdata::Unknown(Rtype::OPT, ref options) => {
                if message.edns.is_some() {
                    return Err(ParseError::BadRdata);
                }
                let ttl = record.ttl;
                message.edns = Some(Edns {
                    udp_payload_size: record.class.0,
                    ext_rcode: (ttl >> 24) as u8,
                    version: (ttl >> 16) as u8,
                    dnssec_ok: ttl & 0x8000 != 0,
                    options: options.clone(),
                });
            }
            Rdata::Tsig(data) => {
                // RFC 8945 §5.1: TSIG must be the final record.
                if index != arcount - 1 || message.tsig.is_some() {
                    return Err(ParseError::MisplacedTsig);
                }
                message.tsig = Some(ParsedTsig {
                    owner: record.owner,
                    data,
                    offset,
                });
            }
            _ => message.additionals.push(record),
        }
    }

    if parser.remaining() != 0 {
        return Err(ParseError::TrailingData);
    }
    Ok(message)
}

//----------- MessageBuilder ---------------------------------------------------

/// The section a record is appended to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

impl Section {
    fn count_offset(self) -> usize {
        match self {
            Self::Answer => 6,
            Self::Authority => 8,
            Self::Additional => 10,
        }
    }
}

/// An incremental builder for a wire-format message.
///
/// Records must be appended in section order.  A record that does not fit
/// within the size limit is rolled back and reported, leaving the builder
/// usable (typically to set the TC flag and stop).
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    composer: Composer,
    limit: usize,
    counts: [u16; 4],
    section: Section,
}

impl MessageBuilder {
    /// Start a message with the given ID and flags.
    pub fn new(id: u16, flags: Flags) -> Self {
        let mut composer = Composer::new();
        composer.put_u16(id);
        composer.put_u16(flags.to_u16());
        composer.put_slice(&[0; 8]);
        Self {
            composer,
            limit: MAX_MESSAGE_LEN,
            counts: [0; 4],
            section: Section::Answer,
        }
    }

    /// Start a response to a request, echoing its ID, opcode, RD flag and
    /// question.
    pub fn respond_to(request: &Message) -> Self {
        let flags = Flags {
            qr: true,
            opcode: request.flags.opcode,
            rd: request.flags.rd,
            ..Default::default()
        };
        let mut builder = Self::new(request.id, flags);
        for question in &request.questions {
            builder.push_question(question);
        }
        builder
    }

    /// Restrict the built message to `limit` octets.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.min(MAX_MESSAGE_LEN);
    }

    /// The size of the message built so far.
    pub fn len(&self) -> usize {
        self.composer.len()
    }

    /// Whether only the header has been written.
    pub fn is_empty(&self) -> bool {
        self.composer.len() <= HEADER_LEN
    }

    /// Append a question.
    pub fn push_question(&mut self, question: &Question) {
        debug_assert_eq!(self.counts[1..], [0; 3], "questions precede records");
        question.qname.compose(&mut self.composer);
        self.composer.put_u16(question.qtype.0);
        self.composer.put_u16(question.qclass.0);
        self.counts[0] += 1;
        self.composer.patch_u16(4, self.counts[0]);
    }

    /// Append a record to a section.
    ///
    /// Returns `false` (leaving the message unchanged) if the record would
    /// exceed the size limit.
    pub fn push_record(&mut self, section: Section, record: &Record) -> bool {
        debug_assert!(section >= self.section, "records are pushed in section order");
        self.section = section;

        let mark = self.composer.len();
        record.compose(&mut self.composer);
        if self.composer.len() > self.limit {
            self.composer.truncate(mark);
            return false;
        }

        let index = 1 + section as usize;
        self.counts[index] += 1;
        self.composer.patch_u16(section.count_offset(), self.counts[index]);
        true
    }

    /// Append an OPT record describing our EDNS support.
    pub fn push_edns(&mut self, udp_payload_size: u16, dnssec_ok: bool) -> bool {
        let record = Record {
            owner: Name::root(),
            class: Class(udp_payload_size),
            ttl: if dnssec_ok { 0x8000 } else { 0 },
            rdata: Rdata::Unknown(Rtype::OPT, Box::default()),
        };
        self.push_record(Section::Additional, &record)
    }

    /// Set the response code.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        let flags = self.flags();
        self.patch_flags(Flags { rcode, ..flags });
    }

    /// Set the truncation flag.
    pub fn set_tc(&mut self) {
        let flags = self.flags();
        self.patch_flags(Flags { tc: true, ..flags });
    }

    /// Set the authoritative-answer flag.
    pub fn set_aa(&mut self) {
        let flags = self.flags();
        self.patch_flags(Flags { aa: true, ..flags });
    }

    /// The header flags as built so far.
    pub fn flags(&self) -> Flags {
        let wire = self.composer.as_slice();
        Flags::from_u16(u16::from_be_bytes([wire[2], wire[3]]))
    }

    fn patch_flags(&mut self, flags: Flags) {
        self.composer.patch_u16(2, flags.to_u16());
    }

    /// Finish building and return the wire format.
    pub fn finish(self) -> Vec<u8> {
        self.composer.finish()
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn question() -> Question {
        Question::new(
            Name::from_str("example.org.").unwrap(),
            Rtype::SOA,
            Class::IN,
        )
    }

    fn a_record(owner: &str, addr: &str) -> Record {
        Record::new(
            Name::from_str(owner).unwrap(),
            Class::IN,
            3600,
            Rdata::A(addr.parse().unwrap()),
        )
    }

    #[test]
    fn build_parse_roundtrip() {
        let mut builder = MessageBuilder::new(
            4711,
            Flags {
                qr: true,
                aa: true,
                ..Default::default()
            },
        );
        builder.push_question(&question());
        assert!(builder.push_record(Section::Answer, &a_record("www.example.org.", "192.0.2.1")));
        assert!(builder.push_record(Section::Authority, &a_record("ns.example.org.", "192.0.2.53")));

        let wire = builder.finish();
        let message = parse_message(&wire).unwrap();
        assert_eq!(message.id, 4711);
        assert!(message.flags.qr);
        assert!(message.flags.aa);
        assert_eq!(message.questions, vec![question()]);
        assert_eq!(message.answers.len(), 1);
        assert_eq!(message.authorities.len(), 1);
        assert_eq!(message.answers[0], a_record("www.example.org.", "192.0.2.1"));
    }

    #[test]
    fn count_overflow_rejected() {
        let mut builder = MessageBuilder::new(1, Flags::default());
        builder.push_question(&question());
        let mut wire = builder.finish();
        // Claim an answer that is not there.
        wire[7] = 1;
        assert!(matches!(parse_message(&wire), Err(ParseError::ShortMessage)));
    }

    #[test]
    fn trailing_data_rejected() {
        let builder = MessageBuilder::new(1, Flags::default());
        let mut wire = builder.finish();
        wire.push(0);
        assert!(matches!(parse_message(&wire), Err(ParseError::TrailingData)));
    }

    #[test]
    fn size_limit_rolls_back() {
        let mut builder = MessageBuilder::new(1, Flags::default());
        builder.push_question(&question());
        builder.set_limit(builder.len() + 10);
        let before = builder.len();
        assert!(!builder.push_record(Section::Answer, &a_record("www.example.org.", "192.0.2.1")));
        assert_eq!(builder.len(), before);
        builder.set_tc();
        let message = parse_message(&builder.finish()).unwrap();
        assert!(message.flags.tc);
        assert_eq!(message.answers.len(), 0);
    }

    #[test]
    fn edns_parses() {
        let mut builder = MessageBuilder::new(1, Flags::default());
        builder.push_question(&question());
        assert!(builder.push_edns(1232, true));
        let message = parse_message(&builder.finish()).unwrap();
        let edns = message.edns.unwrap();
        assert_eq!(edns.udp_payload_size, 1232);
        assert!(edns.dnssec_ok);
    }
}
