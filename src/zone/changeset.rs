//! Changesets.
//!
//! A changeset is a forward delta between two versions of a zone: the SOA
//! being replaced, the SOA replacing it, and the records removed and added
//! in between.  Changesets are what the journal persists and what IXFR
//! carries on the wire.

use std::fmt;

use herald_wire::{Composer, ParseError, Parser, Rdata, Record, Rrset, Rtype, Serial};

//----------- Changeset --------------------------------------------------------

/// A forward delta between two zone versions.
#[derive(Clone, Debug, Default)]
pub struct Changeset {
    /// The SOA record of the version this delta applies to.
    pub soa_from: Option<Record>,

    /// The SOA record of the version this delta produces.
    pub soa_to: Option<Record>,

    /// The removed records, grouped into RRsets.
    removes: Vec<Rrset>,

    /// The added records, grouped into RRsets.
    adds: Vec<Rrset>,
}

impl Changeset {
    /// Construct an empty changeset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a changeset bracketed by two SOA records.
    pub fn between(soa_from: Record, soa_to: Record) -> Self {
        Self {
            soa_from: Some(soa_from),
            soa_to: Some(soa_to),
            removes: Vec::new(),
            adds: Vec::new(),
        }
    }

    /// Whether the changeset changes nothing.
    ///
    /// The SOA bracket alone does not count; a changeset whose record lists
    /// are empty is not applied or journaled.
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.adds.is_empty()
    }

    /// The removed RRsets.
    pub fn removes(&self) -> &[Rrset] {
        &self.removes
    }

    /// The added RRsets.
    pub fn adds(&self) -> &[Rrset] {
        &self.adds
    }

    /// The serial this delta applies to.
    pub fn serial_from(&self) -> Option<Serial> {
        self.soa_from.as_ref().map(soa_serial)
    }

    /// The serial this delta produces.
    pub fn serial_to(&self) -> Option<Serial> {
        self.soa_to.as_ref().map(soa_serial)
    }

    /// Record an addition.
    ///
    /// If the identical record is currently listed for removal, the two
    /// cancel out; a record never sits in both lists.
    pub fn add(&mut self, record: Record) {
        if cancel(&mut self.removes, &record) {
            return;
        }
        push(&mut self.adds, record);
    }

    /// Record a removal.
    ///
    /// If the identical record is currently listed for addition, the two
    /// cancel out.
    pub fn remove(&mut self, record: Record) {
        if cancel(&mut self.adds, &record) {
            return;
        }
        push(&mut self.removes, record);
    }

    /// Record the addition of a whole RRset.
    pub fn add_rrset(&mut self, rrset: &Rrset) {
        for record in rrset.records() {
            self.add(record);
        }
    }

    /// Record the removal of a whole RRset.
    pub fn remove_rrset(&mut self, rrset: &Rrset) {
        for record in rrset.records() {
            self.remove(record);
        }
    }

    /// Merge a later changeset into this one.
    ///
    /// The result transforms this changeset's `soa_from` version directly
    /// into `other`'s `soa_to` version.
    pub fn merge(&mut self, other: Changeset) {
        for rrset in other.removes {
            for record in rrset.records() {
                self.remove(record);
            }
        }
        for rrset in other.adds {
            for record in rrset.records() {
                self.add(record);
            }
        }
        if other.soa_to.is_some() {
            self.soa_to = other.soa_to;
        }
    }

    /// Iterate every record the changeset touches, removals first.
    pub fn touched_records(&self) -> impl Iterator<Item = Record> + '_ {
        self.removes
            .iter()
            .chain(&self.adds)
            .flat_map(|rrset| rrset.records().collect::<Vec<_>>())
    }

    /// Encode as a record sequence.
    ///
    /// The layout is the differential section of an IXFR response
    /// (RFC 1995 §4): the old SOA, the removed records, the new SOA, the
    /// added records.  The journal stores exactly these octets.
    pub fn to_wire(&self) -> Result<Vec<u8>, ChangesetError> {
        let soa_from = self.soa_from.as_ref().ok_or(ChangesetError::NoSoa)?;
        let soa_to = self.soa_to.as_ref().ok_or(ChangesetError::NoSoa)?;

        let mut composer = Composer::new();
        soa_from.compose(&mut composer);
        for rrset in &self.removes {
            for record in rrset.records() {
                record.compose(&mut composer);
            }
        }
        soa_to.compose(&mut composer);
        for rrset in &self.adds {
            for record in rrset.records() {
                record.compose(&mut composer);
            }
        }
        Ok(composer.finish())
    }

    /// Decode a record sequence produced by [`to_wire`][Self::to_wire].
    pub fn from_wire(wire: &[u8]) -> Result<Self, ChangesetError> {
        let mut parser = Parser::new(wire);
        let mut records = Vec::new();
        while parser.remaining() > 0 {
            records.push(Record::parse(&mut parser)?);
        }
        Self::from_records(records)
    }

    /// Reassemble a changeset from its record sequence.
    ///
    /// This is also the shape of one differential of an IXFR stream.
    pub fn from_records(records: Vec<Record>) -> Result<Self, ChangesetError> {
        let mut iter = records.into_iter();
        let soa_from = iter.next().ok_or(ChangesetError::BadSequence)?;
        if soa_from.rtype() != Rtype::SOA {
            return Err(ChangesetError::BadSequence);
        }

        let mut changeset = Self {
            soa_from: Some(soa_from),
            ..Self::default()
        };
        let mut in_adds = false;
        for record in iter {
            if record.rtype() == Rtype::SOA {
                if in_adds {
                    return Err(ChangesetError::BadSequence);
                }
                changeset.soa_to = Some(record);
                in_adds = true;
            } else if in_adds {
                push(&mut changeset.adds, record);
            } else {
                push(&mut changeset.removes, record);
            }
        }
        if changeset.soa_to.is_none() {
            return Err(ChangesetError::BadSequence);
        }
        Ok(changeset)
    }
}

fn soa_serial(record: &Record) -> Serial {
    match &record.rdata {
        Rdata::Soa(soa) => soa.serial,
        _ => unreachable!("SOA brackets hold SOA records"),
    }
}

/// Merge a record into an RRset list.
fn push(list: &mut Vec<Rrset>, record: Record) {
    let rtype = record.rtype();
    match list
        .iter_mut()
        .find(|rrset| rrset.rtype == rtype && rrset.owner == record.owner)
    {
        Some(rrset) => rrset.push(record.ttl, record.rdata),
        None => list.push(Rrset::from_record(record)),
    }
}

/// Drop `record` from a list if present.  Empty RRsets are pruned.
fn cancel(list: &mut Vec<Rrset>, record: &Record) -> bool {
    let rtype = record.rtype();
    let Some(index) = list
        .iter()
        .position(|rrset| rrset.rtype == rtype && rrset.owner == record.owner)
    else {
        return false;
    };
    if !list[index].remove(&record.rdata) {
        return false;
    }
    if list[index].is_empty() {
        list.remove(index);
    }
    true
}

//----------- ChangesetError ---------------------------------------------------

/// An error encoding or decoding a changeset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangesetError {
    /// The changeset lacks one of its SOA brackets.
    NoSoa,

    /// The record sequence does not have the IXFR differential layout.
    BadSequence,

    /// A record failed to parse.
    Parse(ParseError),
}

impl From<ParseError> for ChangesetError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl std::error::Error for ChangesetError {}

impl fmt::Display for ChangesetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSoa => f.write_str("changeset lacks a SOA bracket"),
            Self::BadSequence => f.write_str("malformed differential record sequence"),
            Self::Parse(err) => err.fmt(f),
        }
    }
}

//============ Tests ===========================================================
