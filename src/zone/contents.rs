//! Zone contents.
//!
//! [`ZoneContents`] is one immutable version of a zone: every node the zone
//! holds, keyed by owner name in canonical order, plus the apex.  Once a
//! version has been published it is never modified again; the apply engine
//! builds the next version and the zone swaps it in with one atomic store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use herald_wire::{Class, Name, Rdata, Record, Rrset, Rtype, Serial, Soa};

//----------- Node -------------------------------------------------------------

/// All RRsets sharing an owner name.
///
/// RRSIGs are not regular RRsets here: each one covers a type, and is kept
/// attached to the RRset it covers.
#[derive(Clone, Debug, Default)]
pub struct Node {
    /// The RRsets of this owner, by type.  Never contains RRSIG.
    rrsets: BTreeMap<Rtype, Rrset>,

    /// RRSIG RRsets, by the type they cover.
    sigs: BTreeMap<Rtype, Rrset>,
}

/// The node returned for empty non-terminals.
static EMPTY_NODE: Node = Node {
    rrsets: BTreeMap::new(),
    sigs: BTreeMap::new(),
};

impl Node {
    /// The RRset of the given type, if present.
    pub fn rrset(&self, rtype: Rtype) -> Option<&Rrset> {
        self.rrsets.get(&rtype)
    }

    /// The RRSIGs covering the given type, if present.
    pub fn sigs_for(&self, rtype: Rtype) -> Option<&Rrset> {
        self.sigs.get(&rtype)
    }

    /// Iterate over all regular RRsets of this node.
    pub fn rrsets(&self) -> impl Iterator<Item = &Rrset> {
        self.rrsets.values()
    }

    /// Iterate over all RRSIG RRsets of this node.
    pub fn sig_rrsets(&self) -> impl Iterator<Item = &Rrset> {
        self.sigs.values()
    }

    /// The types present at this node, RRSIG excluded.
    pub fn rtypes(&self) -> impl Iterator<Item = Rtype> {
        self.rrsets.keys().copied()
    }

    /// Whether the node holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty() && self.sigs.is_empty()
    }

    /// Whether the node holds an NS RRset (making it a delegation point
    /// anywhere below the apex).
    pub fn is_cut(&self) -> bool {
        self.rrsets.contains_key(&Rtype::NS)
    }

    /// Insert a record.  Routes RRSIGs to their covered type.
    pub(crate) fn insert(&mut self, record: Record) {
        match record.rdata {
            Rdata::Rrsig(ref rrsig) => {
                let covered = rrsig.type_covered;
                self.sigs
                    .entry(covered)
                    .or_insert_with(|| {
                        Rrset::new(record.owner.clone(), record.class, Rtype::RRSIG, record.ttl)
                    })
                    .push(record.ttl, record.rdata);
            }
            _ => {
                let rtype = record.rdata.rtype();
                self.rrsets
                    .entry(rtype)
                    .or_insert_with(|| {
                        Rrset::new(record.owner.clone(), record.class, rtype, record.ttl)
                    })
                    .push(record.ttl, record.rdata);
            }
        }
    }

    /// Remove a record.  Returns whether it was present.
    pub(crate) fn remove(&mut self, record: &Record) -> bool {
        let (map, key) = match record.rdata {
            Rdata::Rrsig(ref rrsig) => (&mut self.sigs, rrsig.type_covered),
            _ => (&mut self.rrsets, record.rdata.rtype()),
        };
        let Some(rrset) = map.get_mut(&key) else {
            return false;
        };
        let removed = rrset.remove(&record.rdata);
        if rrset.is_empty() {
            map.remove(&key);
        }
        removed
    }

    /// Remove a whole RRset, with its signatures.  Returns whether the type
    /// was present.
    pub(crate) fn remove_rrset(&mut self, rtype: Rtype) -> bool {
        let removed = self.rrsets.remove(&rtype).is_some();
        self.sigs.remove(&rtype);
        removed
    }

    /// Replace an RRset's TTL.
    pub(crate) fn set_ttl(&mut self, rtype: Rtype, ttl: u32) {
        if let Some(rrset) = self.rrsets.get_mut(&rtype) {
            rrset.ttl = ttl;
        }
    }

    /// Drop every RRSIG of this node.
    pub(crate) fn clear_sigs(&mut self) {
        self.sigs.clear();
    }

    /// Drop the RRSIGs covering one type.
    pub(crate) fn clear_sigs_for(&mut self, rtype: Rtype) {
        self.sigs.remove(&rtype);
    }
}

//----------- ZoneContents -----------------------------------------------------

/// One immutable version of a zone.
#[derive(Clone, Debug)]
pub struct ZoneContents {
    /// The zone's origin name.
    origin: Name,

    /// Every node of the zone, in canonical order.  The apex is included.
    ///
    /// Nodes are individually reference-counted so that successive versions
    /// share the nodes that did not change between them.
    nodes: BTreeMap<Name, Arc<Node>>,
}

impl ZoneContents {
    /// Build contents from a set of records.
    ///
    /// Records outside the origin are rejected, as are contents whose apex
    /// does not carry exactly one SOA.  A missing apex NS is tolerated here
    /// (an UPDATE may be about to add one); serving code treats the zone as
    /// broken until it exists.
    pub fn from_records(
        origin: Name,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<Self, ContentsError> {
        let mut contents = Self {
            origin,
            nodes: BTreeMap::new(),
        };
        for record in records {
            contents.insert(record)?;
        }
        let apex = contents
            .nodes
            .get(&contents.origin)
            .ok_or(ContentsError::NoSoa)?;
        match apex.rrset(Rtype::SOA) {
            Some(soa) if soa.len() == 1 => {}
            Some(_) => return Err(ContentsError::ManySoas),
            None => return Err(ContentsError::NoSoa),
        }
        Ok(contents)
    }

    /// Insert a single record.  Used by the builder paths (zone file load,
    /// AXFR) and the apply engine.
    pub(crate) fn insert(&mut self, record: Record) -> Result<(), ContentsError> {
        if !record.owner.ends_with(&self.origin) {
            return Err(ContentsError::OutOfZone(record.owner));
        }
        if !record.rtype().is_zone_type() {
            return Err(ContentsError::BadType(record.rtype()));
        }
        let node = self
            .nodes
            .entry(record.owner.clone())
            .or_insert_with(|| Arc::new(Node::default()));
        Arc::make_mut(node).insert(record);
        Ok(())
    }

    /// The node at an exact name, if present.
    pub fn node(&self, name: &Name) -> Option<&Node> {
        self.nodes.get(name).map(|node| &**node)
    }

    /// Mutable access to a node, cloning it if it is shared.
    pub(crate) fn node_mut(&mut self, name: &Name) -> Option<&mut Node> {
        self.nodes.get_mut(name).map(Arc::make_mut)
    }

    /// Drop a node if it has become empty and is not the apex and not an
    /// empty non-terminal.
    pub(crate) fn prune(&mut self, name: &Name) {
        if name == &self.origin {
            return;
        }
        let Some(node) = self.nodes.get(name) else {
            return;
        };
        if !node.is_empty() {
            return;
        }
        // Keep empty non-terminals implicit: the node is simply removed and
        // `find` re-derives its existence from its descendants.
        self.nodes.remove(name);
    }

    /// The zone's origin name.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// The apex node.
    ///
    /// ## Panics
    ///
    /// Panics if the apex node is missing, which [`from_records`] and the
    /// apply engine's integrity checks rule out for published contents.
    ///
    /// [`from_records`]: Self::from_records
    pub fn apex(&self) -> &Node {
        self.nodes
            .get(&self.origin)
            .expect("published contents have an apex")
    }

    /// The apex SOA record data.
    pub fn soa(&self) -> &Soa {
        match self
            .apex()
            .rrset(Rtype::SOA)
            .and_then(|rrset| rrset.rdatas.first())
        {
            Some(Rdata::Soa(soa)) => soa,
            _ => unreachable!("published contents have a SOA"),
        }
    }

    /// The apex SOA as a record.
    pub fn soa_record(&self) -> Record {
        let rrset = self
            .apex()
            .rrset(Rtype::SOA)
            .expect("published contents have a SOA");
        Record::new(
            self.origin.clone(),
            rrset.class,
            rrset.ttl,
            rrset.rdatas[0].clone(),
        )
    }

    /// The zone's serial, from the apex SOA.
    pub fn serial(&self) -> Serial {
        self.soa().serial
    }

    /// The NSEC3 parameters, from the apex NSEC3PARAM record.
    pub fn nsec3param(&self) -> Option<&Rdata> {
        self.apex()
            .rrset(Rtype::NSEC3PARAM)
            .and_then(|rrset| rrset.rdatas.first())
    }

    /// Whether the zone carries DNSSEC records.
    pub fn is_signed(&self) -> bool {
        self.apex().rrset(Rtype::DNSKEY).is_some()
    }

    /// The number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a name.
    ///
    /// The walk follows the rules of an authoritative lookup: a delegation
    /// point anywhere strictly between the apex and the name shadows
    /// everything below it, a CNAME at the name is surfaced for the query
    /// layer to chase, and names that only exist as part of longer names
    /// come back as (empty) nodes.
    pub fn find(&self, name: &Name) -> Find<'_> {
        if !name.ends_with(&self.origin) {
            return Find::Nxdomain;
        }

        // Walk from just below the apex towards the name, watching for
        // delegation points.
        let mut ancestors = Vec::new();
        let mut cursor = name.clone();
        while cursor != self.origin {
            ancestors.push(cursor.clone());
            cursor = cursor.parent().expect("cursor is below the origin");
        }
        for ancestor in ancestors.iter().rev() {
            let Some(node) = self.nodes.get(ancestor) else {
                continue;
            };
            if node.is_cut() && ancestor != &self.origin {
                return Find::Delegation {
                    owner: ancestor.clone(),
                    node,
                };
            }
            if ancestor == name {
                break;
            }
        }

        match self.nodes.get(name) {
            Some(node) => match node.rrset(Rtype::CNAME) {
                Some(rrset) if name != &self.origin => Find::Cname { node, rrset },
                _ => Find::Answer(node),
            },
            None => {
                // The name may still exist as an empty non-terminal: check
                // for any name below it.
                let mut range = self.nodes.range(name.clone()..);
                match range.next() {
                    Some((owner, _)) if owner.ends_with(name) => Find::Answer(&EMPTY_NODE),
                    _ => Find::Nxdomain,
                }
            }
        }
    }

    /// Iterate over all nodes in canonical order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (&Name, &Node)> {
        self.nodes.iter().map(|(name, node)| (name, &**node))
    }

    /// Iterate over every record of the zone, SOA first, in canonical order.
    ///
    /// This is the order AXFR emits and the zone-file writer uses.
    pub fn iter_records(&self) -> impl Iterator<Item = Record> + '_ {
        std::iter::once(self.soa_record()).chain(self.iter_nodes().flat_map(|(name, node)| {
            let soa_owner = name == &self.origin;
            node.rrsets()
                .filter(move |rrset| !(soa_owner && rrset.rtype == Rtype::SOA))
                .chain(node.sig_rrsets())
                .flat_map(|rrset| rrset.records().collect::<Vec<_>>())
        }))
    }

    /// Collect all records into an RRset-per-entry list, for diffing.
    pub fn all_rrsets(&self) -> Vec<Rrset> {
        let mut rrsets = Vec::new();
        for (_, node) in self.iter_nodes() {
            rrsets.extend(node.rrsets().cloned());
            rrsets.extend(node.sig_rrsets().cloned());
        }
        rrsets
    }

    /// A minimal bootstrap zone: a SOA with serial 0 and nothing else.
    ///
    /// This is the state of a freshly configured primary zone without a zone
    /// file, and of a secondary zone after EXPIRE.
    pub fn bootstrap(origin: Name) -> Self {
        let soa = Rdata::Soa(Soa {
            mname: origin.clone(),
            rname: origin.clone(),
            serial: Serial(0),
            refresh: 86400,
            retry: 7200,
            expire: 3600000,
            minimum: 3600,
        });
        let record = Record::new(origin.clone(), Class::IN, 3600, soa);
        Self::from_records(origin, [record]).expect("a lone SOA is always valid")
    }
}

//----------- Find -------------------------------------------------------------

/// The result of a name lookup in zone contents.
#[derive(Clone, Debug)]
pub enum Find<'a> {
    /// The name exists; here is its node.
    ///
    /// Empty non-terminals yield an empty node.
    Answer(&'a Node),

    /// The name is at or below a delegation point.
    Delegation {
        /// The owner of the delegation NS RRset.
        owner: Name,

        /// The delegation node.
        node: &'a Node,
    },

    /// The name exists and holds a CNAME.
    ///
    /// Chasing the target is the query layer's business.
    Cname {
        /// The node holding the CNAME.
        node: &'a Node,

        /// The CNAME RRset itself.
        rrset: &'a Rrset,
    },

    /// The name does not exist.
    Nxdomain,
}

//----------- ContentsError ----------------------------------------------------

/// An error building zone contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentsError {
    /// The apex holds no SOA record.
    NoSoa,

    /// The apex holds more than one SOA record.
    ManySoas,

    /// A record's owner is outside the zone.
    OutOfZone(Name),

    /// A record's type cannot occur in a zone.
    BadType(Rtype),
}

impl std::error::Error for ContentsError {}

impl fmt::Display for ContentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSoa => f.write_str("the apex has no SOA record"),
            Self::ManySoas => f.write_str("the apex has more than one SOA record"),
            Self::OutOfZone(name) => write!(f, "'{name}' is outside the zone"),
            Self::BadType(rtype) => write!(f, "{rtype} records cannot occur in a zone"),
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn record(owner: &str, ttl: u32, rdata: Rdata) -> Record {
        Record::new(name(owner), Class::IN, ttl, rdata)
    }

    fn soa_rdata(serial: u32) -> Rdata {
        Rdata::Soa(Soa {
            mname: name("ns1.example."),
            rname: name("hostmaster.example."),
            serial: Serial(serial),
            refresh: 10800,
            retry: 3600,
            expire: 604800,
            minimum: 3600,
        })
    }

    fn sample_zone() -> ZoneContents {
        ZoneContents::from_records(
            name("example."),
            [
                record("example.", 3600, soa_rdata(1)),
                record("example.", 3600, Rdata::Ns(name("ns1.example."))),
                record("ns1.example.", 3600, Rdata::A("192.0.2.53".parse().unwrap())),
                record("www.example.", 3600, Rdata::A("192.0.2.1".parse().unwrap())),
                record("alias.example.", 3600, Rdata::Cname(name("www.example."))),
                // A delegation, with glue below it.
                record("sub.example.", 3600, Rdata::Ns(name("ns.sub.example."))),
                record("ns.sub.example.", 3600, Rdata::A("192.0.2.99".parse().unwrap())),
                // Creates the empty non-terminal "b.example.".
                record("a.b.example.", 3600, Rdata::A("192.0.2.2".parse().unwrap())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn requires_exactly_one_soa() {
        assert!(matches!(
            ZoneContents::from_records(name("example."), []),
            Err(ContentsError::NoSoa)
        ));

        let err = ZoneContents::from_records(
            name("example."),
            [
                record("example.", 3600, soa_rdata(1)),
                record("example.", 3600, soa_rdata(2)),
            ],
        )
        .unwrap_err();
        assert_eq!(err, ContentsError::ManySoas);
    }

    #[test]
    fn rejects_out_of_zone() {
        let err = ZoneContents::from_records(
            name("example."),
            [
                record("example.", 3600, soa_rdata(1)),
                record("www.elsewhere.", 3600, Rdata::A("192.0.2.1".parse().unwrap())),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ContentsError::OutOfZone(_)));
    }

    #[test]
    fn find_positive() {
        let zone = sample_zone();
        match zone.find(&name("www.example.")) {
            Find::Answer(node) => {
                assert!(node.rrset(Rtype::A).is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn find_nxdomain_and_ent() {
        let zone = sample_zone();
        assert!(matches!(zone.find(&name("missing.example.")), Find::Nxdomain));
        assert!(matches!(zone.find(&name("elsewhere.")), Find::Nxdomain));

        // "b.example." exists only as part of "a.b.example.".
        match zone.find(&name("b.example.")) {
            Find::Answer(node) => assert!(node.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn find_delegation_shadows() {
        let zone = sample_zone();
        // Both the cut itself and names below it yield the delegation.
        for qname in ["sub.example.", "ns.sub.example.", "deep.ns.sub.example."] {
            match zone.find(&name(qname)) {
                Find::Delegation { owner, .. } => assert_eq!(owner, name("sub.example.")),
                other => panic!("unexpected result for {qname}: {other:?}"),
            }
        }
        // The apex NS is not a delegation.
        assert!(matches!(zone.find(&name("example.")), Find::Answer(_)));
    }

    #[test]
    fn find_cname() {
        let zone = sample_zone();
        match zone.find(&name("alias.example.")) {
            Find::Cname { rrset, .. } => {
                assert_eq!(rrset.rdatas[0], Rdata::Cname(name("www.example.")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn iteration_starts_with_soa() {
        let zone = sample_zone();
        let records: Vec<Record> = zone.iter_records().collect();
        assert_eq!(records[0].rtype(), Rtype::SOA);
        // Exactly one SOA in the stream.
        assert_eq!(records.iter().filter(|r| r.rtype() == Rtype::SOA).count(), 1);
    }

    #[test]
    fn rrsigs_attach_to_covered_rrset() {
        let mut zone = sample_zone();
        let rrsig = Rdata::Rrsig(herald_wire::Rrsig {
            type_covered: Rtype::A,
            algorithm: herald_wire::SecurityAlgorithm::ED25519,
            labels: 2,
            original_ttl: 3600,
            expiration: 2_000_000,
            inception: 1_000_000,
            key_tag: 42,
            signer: name("example."),
            signature: vec![0; 64].into(),
        });
        zone.insert(record("www.example.", 3600, rrsig)).unwrap();

        match zone.find(&name("www.example.")) {
            Find::Answer(node) => {
                assert!(node.rrset(Rtype::RRSIG).is_none());
                assert!(node.sigs_for(Rtype::A).is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
