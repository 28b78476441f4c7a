//! Proof-of-nonexistence chains.
//!
//! NSEC chains link every authoritative name to the next one in canonical
//! order; NSEC3 chains do the same over hashed names.  Rebuilding a chain
//! end-to-end happens on a full resign; incremental signing only touches
//! the neighbors of changed names.

use herald_wire::base;
use herald_wire::{Class, Name, Rdata, Record, Rtype, TypeBitmap};
use ring::digest;

use crate::zone::contents::ZoneContents;

/// The NSEC3 hash algorithm number for SHA-1, the only one defined.
pub const NSEC3_HASH_SHA1: u8 = 1;

//----------- Authoritative name walk ------------------------------------------

/// The names the chain covers: every authoritative name, in canonical order.
///
/// Names strictly below a delegation point are occluded and excluded; the
/// delegation point itself is part of the chain.
pub fn authoritative_names(contents: &ZoneContents) -> Vec<Name> {
    let mut names = Vec::new();
    let mut active_cut: Option<Name> = None;
    for (name, node) in contents.iter_nodes() {
        if let Some(cut) = &active_cut {
            if name.ends_with(cut) && name != cut {
                continue;
            }
            active_cut = None;
        }
        if node.is_cut() && name != contents.origin() {
            active_cut = Some(name.clone());
        }
        names.push(name.clone());
    }
    names
}

/// The authoritative name canonically following `name`, wrapping at the end.
pub fn successor(contents: &ZoneContents, name: &Name) -> Name {
    let names = authoritative_names(contents);
    match names.iter().position(|candidate| candidate > name) {
        Some(index) => names[index].clone(),
        None => names[0].clone(),
    }
}

/// The authoritative name canonically preceding `name`, wrapping at the
/// start.
pub fn predecessor(contents: &ZoneContents, name: &Name) -> Name {
    let names = authoritative_names(contents);
    match names.iter().rev().find(|candidate| *candidate < name) {
        Some(found) => found.clone(),
        None => names.last().expect("contents have an apex").clone(),
    }
}

//----------- NSEC -------------------------------------------------------------

/// Build the complete NSEC chain for the contents.
///
/// The records are returned unsigned; the signer adds their RRSIGs like any
/// other RRset's.
pub fn nsec_chain(contents: &ZoneContents) -> Vec<Record> {
    let names = authoritative_names(contents);
    let ttl = contents.soa().minimum;
    let mut records = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let next = names[(index + 1) % names.len()].clone();
        records.push(nsec_record(contents, name, next, ttl));
    }
    records
}

/// Build the NSEC record for one name.
pub fn nsec_record(contents: &ZoneContents, name: &Name, next: Name, ttl: u32) -> Record {
    let mut types = vec![Rtype::NSEC, Rtype::RRSIG];
    if let Some(node) = contents.node(name) {
        types.extend(node.rtypes());
    }
    Record::new(
        name.clone(),
        Class::IN,
        ttl,
        Rdata::Nsec {
            next,
            types: TypeBitmap::from_types(types),
        },
    )
}

//----------- NSEC3 ------------------------------------------------------------

/// The NSEC3 parameters in force for a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nsec3Params {
    pub iterations: u16,
    pub salt: Box<[u8]>,
}

impl Nsec3Params {
    /// Extract the parameters from an apex NSEC3PARAM record.
    pub fn from_rdata(rdata: &Rdata) -> Option<Self> {
        match rdata {
            Rdata::Nsec3param {
                hash_algorithm: NSEC3_HASH_SHA1,
                iterations,
                salt,
                ..
            } => Some(Self {
                iterations: *iterations,
                salt: salt.clone(),
            }),
            _ => None,
        }
    }
}

/// Hash a name for NSEC3 (RFC 5155 §5).
pub fn hash_name(name: &Name, params: &Nsec3Params) -> Vec<u8> {
    let mut input = Vec::with_capacity(name.wire_len() + params.salt.len());
    name.compose_canonical(&mut input);
    input.extend_from_slice(&params.salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input)
        .as_ref()
        .to_vec();
    for _ in 0..params.iterations {
        let mut next = Vec::with_capacity(hash.len() + params.salt.len());
        next.extend_from_slice(&hash);
        next.extend_from_slice(&params.salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &next)
            .as_ref()
            .to_vec();
    }
    hash
}

/// The NSEC3 owner name for a hashed name.
pub fn nsec3_owner(origin: &Name, hash: &[u8]) -> Name {
    origin
        .prepend(base::base32hex_encode(hash).as_bytes())
        .expect("hash labels fit in a name")
}

/// The names an NSEC3 chain covers: the authoritative names plus their
/// empty non-terminal ancestors, which NSEC3 records prove explicitly
/// (RFC 5155 §7.1).
pub fn nsec3_names(contents: &ZoneContents) -> Vec<Name> {
    let mut names: std::collections::BTreeSet<Name> =
        authoritative_names(contents).into_iter().collect();
    for name in names.clone() {
        let mut ancestor = name;
        while let Some(parent) = ancestor.parent() {
            if !parent.ends_with(contents.origin()) || &parent == contents.origin() {
                break;
            }
            names.insert(parent.clone());
            ancestor = parent;
        }
    }
    names.into_iter().collect()
}

/// Build the complete NSEC3 chain for the contents.
pub fn nsec3_chain(contents: &ZoneContents, params: &Nsec3Params) -> Vec<Record> {
    let ttl = contents.soa().minimum;

    // Hash every covered name and sort by hash; each entry links to the
    // next, the last wraps to the first.
    let mut hashed: Vec<(Vec<u8>, Name)> = nsec3_names(contents)
        .into_iter()
        .map(|name| (hash_name(&name, params), name))
        .collect();
    hashed.sort_by(|a, b| a.0.cmp(&b.0));
    hashed.dedup_by(|a, b| a.0 == b.0);

    let mut records = Vec::with_capacity(hashed.len());
    for (index, (hash, name)) in hashed.iter().enumerate() {
        let (next_hash, _) = &hashed[(index + 1) % hashed.len()];
        let mut types: Vec<Rtype> = Vec::new();
        if let Some(node) = contents.node(name) {
            types.extend(node.rtypes());
            if !types.is_empty() {
                types.push(Rtype::RRSIG);
            }
        }
        records.push(Record::new(
            nsec3_owner(contents.origin(), hash),
            Class::IN,
            ttl,
            Rdata::Nsec3 {
                hash_algorithm: NSEC3_HASH_SHA1,
                flags: 0,
                iterations: params.iterations,
                salt: params.salt.clone(),
                next_hashed: next_hash.clone().into(),
                types: TypeBitmap::from_types(types),
            },
        ));
    }
    records
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use herald_wire::{Serial, Soa};
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn zone() -> ZoneContents {
        let soa = Record::new(
            name("example."),
            Class::IN,
            3600,
            Rdata::Soa(Soa {
                mname: name("ns1.example."),
                rname: name("hostmaster.example."),
                serial: Serial(1),
                refresh: 10800,
                retry: 3600,
                expire: 604800,
                minimum: 900,
            }),
        );
        ZoneContents::from_records(
            name("example."),
            [
                soa,
                Record::new(name("example."), Class::IN, 3600, Rdata::Ns(name("ns1.example."))),
                Record::new(
                    name("ns1.example."),
                    Class::IN,
                    3600,
                    Rdata::A("192.0.2.53".parse().unwrap()),
                ),
                Record::new(
                    name("www.example."),
                    Class::IN,
                    3600,
                    Rdata::A("192.0.2.1".parse().unwrap()),
                ),
                // A delegation with glue below it; the glue is occluded.
                Record::new(name("sub.example."), Class::IN, 3600, Rdata::Ns(name("ns.sub.example."))),
                Record::new(
                    name("ns.sub.example."),
                    Class::IN,
                    3600,
                    Rdata::A("192.0.2.99".parse().unwrap()),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn occluded_names_are_excluded() {
        let names = authoritative_names(&zone());
        assert!(names.contains(&name("sub.example.")));
        assert!(!names.contains(&name("ns.sub.example.")));
    }

    #[test]
    fn chain_is_closed() {
        let contents = zone();
        let chain = nsec_chain(&contents);
        assert_eq!(chain.len(), authoritative_names(&contents).len());

        // Every next-name is an owner in the chain, so the chain is closed.
        for record in &chain {
            let Rdata::Nsec { ref next, .. } = record.rdata else {
                panic!("NSEC rdata expected");
            };
            assert!(chain.iter().any(|other| &other.owner == next));
        }

        // The apex NSEC uses the SOA minimum as its TTL.
        assert_eq!(chain[0].ttl, 900);
    }

    #[test]
    fn neighbors() {
        let contents = zone();
        assert_eq!(successor(&contents, &name("example.")), name("ns1.example."));
        assert_eq!(predecessor(&contents, &name("ns1.example.")), name("example."));
        // Wraps around the end of the zone.
        assert_eq!(successor(&contents, &name("www.example.")), name("example."));
    }

    #[test]
    fn nsec3_chain_is_closed() {
        let contents = zone();
        let params = Nsec3Params {
            iterations: 2,
            salt: b"\xAB\xCD".to_vec().into(),
        };
        let chain = nsec3_chain(&contents, &params);
        assert_eq!(chain.len(), authoritative_names(&contents).len());

        for record in &chain {
            let Rdata::Nsec3 { ref next_hashed, .. } = record.rdata else {
                panic!("NSEC3 rdata expected");
            };
            let next_label = base::base32hex_encode(next_hashed);
            assert!(chain
                .iter()
                .any(|other| other.owner.first_label() == next_label.as_bytes()));
        }
    }

    #[test]
    fn hashing_is_stable() {
        let params = Nsec3Params {
            iterations: 0,
            salt: Box::default(),
        };
        let first = hash_name(&name("example."), &params);
        let second = hash_name(&name("EXAMPLE."), &params);
        // Hashing is over the canonical form, so case does not matter.
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
    }
}
