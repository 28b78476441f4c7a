//! Resource records and RRsets.

use std::cmp::Ordering;
use std::fmt;

use crate::iana::{Class, Rtype};
use crate::name::Name;
use crate::parse::{Composer, ParseError, Parser};
use crate::rdata::Rdata;

//----------- Record -----------------------------------------------------------

/// A single resource record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// The name this record belongs to.
    pub owner: Name,

    /// The record class.
    pub class: Class,

    /// The time-to-live, in seconds.
    pub ttl: u32,

    /// The record data.
    pub rdata: Rdata,
}

impl Record {
    /// Construct a record.
    pub fn new(owner: Name, class: Class, ttl: u32, rdata: Rdata) -> Self {
        Self {
            owner,
            class,
            ttl,
            rdata,
        }
    }

    /// The record type.
    pub fn rtype(&self) -> Rtype {
        self.rdata.rtype()
    }

    /// Parse a record out of a message.
    pub fn parse(parser: &mut Parser<'_>) -> Result<Self, ParseError> {
        let owner = Name::parse(parser)?;
        let rtype = Rtype(parser.read_u16()?);
        let class = Class(parser.read_u16()?);
        let ttl = parser.read_u32()?;
        let rdlen = parser.read_u16()? as usize;
        let rdata = Rdata::parse(rtype, parser, rdlen)?;
        Ok(Self {
            owner,
            class,
            ttl,
            rdata,
        })
    }

    /// Append the record in wire format, compressing the owner name.
    pub fn compose(&self, composer: &mut Composer) {
        self.owner.compose(composer);
        composer.put_u16(self.rtype().0);
        composer.put_u16(self.class.0);
        composer.put_u32(self.ttl);
        let rdlen_at = composer.len();
        composer.put_u16(0);
        self.rdata.compose(composer);
        let rdlen = composer.len() - rdlen_at - 2;
        composer.patch_u16(rdlen_at, rdlen as u16);
    }

    /// Append the canonical wire format used for signing (RFC 4034 §3.1.8.1).
    ///
    /// The owner is lowercased and uncompressed, and the TTL may be replaced
    /// by the RRset's original TTL.
    pub fn compose_canonical(&self, ttl: u32, out: &mut Vec<u8>) {
        self.owner.compose_canonical(out);
        out.extend_from_slice(&self.rtype().0.to_be_bytes());
        out.extend_from_slice(&self.class.0.to_be_bytes());
        out.extend_from_slice(&ttl.to_be_bytes());
        let mut rdata = Vec::new();
        self.rdata.compose_canonical(&mut rdata);
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata);
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.owner,
            self.ttl,
            self.class,
            self.rtype(),
            self.rdata
        )
    }
}

//----------- Rrset ------------------------------------------------------------

/// All records sharing an owner, type and class.
///
/// An RRset carries a single TTL; when records are inserted with differing
/// TTLs, the smallest wins (RFC 2181 §5.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rrset {
    /// The name the RRset belongs to.
    pub owner: Name,

    /// The record class.
    pub class: Class,

    /// The record type.
    pub rtype: Rtype,

    /// The shared time-to-live, in seconds.
    pub ttl: u32,

    /// The data of each record.
    pub rdatas: Vec<Rdata>,
}

impl Rrset {
    /// Construct an empty RRset.
    pub fn new(owner: Name, class: Class, rtype: Rtype, ttl: u32) -> Self {
        Self {
            owner,
            class,
            rtype,
            ttl,
            rdatas: Vec::new(),
        }
    }

    /// Construct an RRset from a single record.
    pub fn from_record(record: Record) -> Self {
        Self {
            owner: record.owner,
            class: record.class,
            rtype: record.rdata.rtype(),
            ttl: record.ttl,
            rdatas: vec![record.rdata],
        }
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.rdatas.len()
    }

    /// Whether the RRset holds no records.
    pub fn is_empty(&self) -> bool {
        self.rdatas.is_empty()
    }

    /// Whether a record with this data is present.
    pub fn contains(&self, rdata: &Rdata) -> bool {
        self.rdatas.contains(rdata)
    }

    /// Insert a record's data.
    ///
    /// Duplicate data is ignored.  The RRset TTL drops to `ttl` if that is
    /// smaller.
    pub fn push(&mut self, ttl: u32, rdata: Rdata) {
        debug_assert_eq!(rdata.rtype(), self.rtype);
        if self.rdatas.is_empty() {
            self.ttl = ttl;
        } else {
            self.ttl = self.ttl.min(ttl);
        }
        if !self.rdatas.contains(&rdata) {
            self.rdatas.push(rdata);
        }
    }

    /// Remove a record's data.  Returns whether it was present.
    pub fn remove(&mut self, rdata: &Rdata) -> bool {
        match self.rdatas.iter().position(|r| r == rdata) {
            Some(index) => {
                self.rdatas.remove(index);
                true
            }
            None => false,
        }
    }

    /// Iterate the RRset as individual records.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rdatas.iter().map(|rdata| Record {
            owner: self.owner.clone(),
            class: self.class,
            ttl: self.ttl,
            rdata: rdata.clone(),
        })
    }

    /// Whether this RRset's header matches another's.
    pub fn matches(&self, other: &Self) -> bool {
        self.rtype == other.rtype && self.class == other.class && self.owner == other.owner
    }

    /// Sort the record data into DNSSEC canonical order (RFC 4034 §6.3).
    pub fn sort_canonical(&mut self) {
        self.rdatas.sort_by(canonical_rdata_cmp);
        self.rdatas.dedup();
    }

    /// The covered type, if this is an RRSIG RRset.
    pub fn covered_type(&self) -> Option<Rtype> {
        if self.rtype != Rtype::RRSIG {
            return None;
        }
        match self.rdatas.first() {
            Some(Rdata::Rrsig(rrsig)) => Some(rrsig.type_covered),
            _ => None,
        }
    }
}

/// Compare two record datas by their canonical wire form.
fn canonical_rdata_cmp(a: &Rdata, b: &Rdata) -> Ordering {
    let mut wa = Vec::new();
    let mut wb = Vec::new();
    a.compose_canonical(&mut wa);
    b.compose_canonical(&mut wb);
    wa.cmp(&wb)
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn a_rdata(addr: &str) -> Rdata {
        Rdata::A(addr.parse().unwrap())
    }

    #[test]
    fn ttl_takes_minimum() {
        let owner = Name::from_str("www.example.").unwrap();
        let mut rrset = Rrset::new(owner, Class::IN, Rtype::A, 0);
        rrset.push(3600, a_rdata("192.0.2.1"));
        assert_eq!(rrset.ttl, 3600);
        rrset.push(300, a_rdata("192.0.2.2"));
        assert_eq!(rrset.ttl, 300);
        rrset.push(7200, a_rdata("192.0.2.3"));
        assert_eq!(rrset.ttl, 300);
    }

    #[test]
    fn push_dedupes() {
        let owner = Name::from_str("www.example.").unwrap();
        let mut rrset = Rrset::new(owner, Class::IN, Rtype::A, 3600);
        rrset.push(3600, a_rdata("192.0.2.1"));
        rrset.push(3600, a_rdata("192.0.2.1"));
        assert_eq!(rrset.len(), 1);

        assert!(rrset.remove(&a_rdata("192.0.2.1")));
        assert!(!rrset.remove(&a_rdata("192.0.2.1")));
        assert!(rrset.is_empty());
    }

    #[test]
    fn record_wire_roundtrip() {
        let record = Record::new(
            Name::from_str("www.example.").unwrap(),
            Class::IN,
            3600,
            a_rdata("192.0.2.1"),
        );
        let mut composer = Composer::new();
        record.compose(&mut composer);
        let wire = composer.finish();
        let mut parser = Parser::new(&wire);
        assert_eq!(Record::parse(&mut parser).unwrap(), record);
        assert_eq!(parser.remaining(), 0);
    }
}
