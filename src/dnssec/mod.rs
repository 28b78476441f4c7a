//! DNSSEC signing.
//!
//! The signer takes the zone version a transaction produced and emits an
//! auxiliary changeset carrying only the signature layer: refreshed RRSIGs,
//! synchronized apex DNSKEYs, and a patched or rebuilt NSEC/NSEC3 chain.
//! The caller composes that changeset onto the unpublished version and
//! merges it with the triggering changeset before journaling.
//!
//! Two modes exist.  When the apex DNSKEY or NSEC3PARAM RRset changed, the
//! signature layer as a whole is stale and the zone is re-signed end to end
//! (in parallel, one RRset per job).  Otherwise only the RRsets the
//! transaction touched are re-signed and the chain is patched around them.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use herald_wire::{Name, Rdata, Record, Rrset, Rrsig, Rtype, Serial};
use rayon::prelude::*;
use tracing::debug;

use crate::config::DnssecConfig;
use crate::zone::changeset::Changeset;
use crate::zone::contents::ZoneContents;

pub mod keys;
pub mod nsec;

pub use keys::{KeyError, SigningKey};
use nsec::Nsec3Params;

//----------- SignOutput -------------------------------------------------------

/// What a signing pass produced.
#[derive(Debug)]
pub struct SignOutput {
    /// The signature-layer changes, unbracketed.
    pub changeset: Changeset,

    /// When the next DNSSEC event should fire: the earliest signature
    /// expiry minus the configured refresh window, in epoch seconds.
    pub refresh_at: u64,
}

//----------- Signing context --------------------------------------------------

/// Everything a signing pass needs besides the contents.
pub struct Signer<'a> {
    keys: &'a [SigningKey],
    inception: u32,
    expiration: u32,
    refresh_window: u64,
    refresh_at: u64,
}

impl<'a> Signer<'a> {
    /// Set up a signing pass.
    pub fn new(keys: &'a [SigningKey], config: &DnssecConfig, now: u64) -> Self {
        let expiration = now.saturating_add(config.sig_validity.as_secs());
        Self {
            keys,
            // Backdate slightly to tolerate validator clock skew.
            inception: now.saturating_sub(Duration::from_secs(3600).as_secs()) as u32,
            expiration: expiration as u32,
            refresh_window: config.sig_refresh.as_secs(),
            refresh_at: expiration.saturating_sub(config.sig_refresh.as_secs()),
        }
    }

    /// When the next signing pass is due: the earliest signature expiry in
    /// `contents`, minus the refresh window.
    ///
    /// Expiry timestamps live in the mod-2^32 space of RFC 4034 §3.1.5, so
    /// "earliest" is decided with serial arithmetic, not plain ordering.
    fn refresh_at(&self, contents: &ZoneContents) -> u64 {
        let mut earliest: Option<u32> = None;
        for (_, node) in contents.iter_nodes() {
            for sigs in node.sig_rrsets() {
                for rdata in &sigs.rdatas {
                    if let Rdata::Rrsig(rrsig) = rdata {
                        earliest = Some(match earliest {
                            Some(current)
                                if Serial(rrsig.expiration).newer_than(Serial(current)) =>
                            {
                                current
                            }
                            _ => rrsig.expiration,
                        });
                    }
                }
            }
        }
        match earliest {
            Some(expiration) => u64::from(expiration).saturating_sub(self.refresh_window),
            None => self.refresh_at,
        }
    }

    /// Sign an RRset, producing one RRSIG record per selected key.
    ///
    /// DNSKEY RRsets are signed by the key-signing keys; everything else by
    /// the zone-signing keys.
    pub fn sign_rrset(&self, rrset: &Rrset, zone: &Name) -> Result<Vec<Record>, SignError> {
        let keys: Vec<&SigningKey> = if rrset.rtype == Rtype::DNSKEY {
            let ksks: Vec<_> = self.keys.iter().filter(|key| key.is_ksk()).collect();
            if ksks.is_empty() {
                self.keys.iter().collect()
            } else {
                ksks
            }
        } else {
            let zsks: Vec<_> = self.keys.iter().filter(|key| key.is_zsk()).collect();
            if zsks.is_empty() {
                self.keys.iter().collect()
            } else {
                zsks
            }
        };

        let mut sorted = rrset.clone();
        sorted.sort_canonical();

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let rrsig = Rrsig {
                type_covered: rrset.rtype,
                algorithm: key.algorithm,
                labels: rrset.owner.label_count() as u8,
                original_ttl: rrset.ttl,
                expiration: self.expiration,
                inception: self.inception,
                key_tag: key.key_tag,
                signer: zone.clone(),
                signature: Box::default(),
            };

            // The signed data: the RRSIG RDATA sans signature, then every
            // record in canonical form and order (RFC 4034 §3.1.8.1).
            let mut buffer = Vec::new();
            compose_rrsig_sans_signature(&rrsig, &mut buffer);
            for record in sorted.records() {
                record.compose_canonical(rrset.ttl, &mut buffer);
            }

            let signature = key.sign(&buffer)?;
            records.push(Record::new(
                rrset.owner.clone(),
                rrset.class,
                rrset.ttl,
                Rdata::Rrsig(Rrsig {
                    signature: signature.into(),
                    ..rrsig
                }),
            ));
        }
        Ok(records)
    }
}

/// The RRSIG RDATA with an empty signature field, for the signing buffer.
fn compose_rrsig_sans_signature(rrsig: &Rrsig, out: &mut Vec<u8>) {
    out.extend_from_slice(&rrsig.type_covered.0.to_be_bytes());
    out.push(rrsig.algorithm.0);
    out.push(rrsig.labels);
    out.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
    out.extend_from_slice(&rrsig.expiration.to_be_bytes());
    out.extend_from_slice(&rrsig.inception.to_be_bytes());
    out.extend_from_slice(&rrsig.key_tag.to_be_bytes());
    rrsig.signer.compose_canonical(out);
}

//----------- Entry points -----------------------------------------------------

/// Produce the signing changeset for a transaction.
///
/// `old` is the published version, `new` the unpublished version with
/// `ddns_ch` already applied.  The mode is chosen by comparing the apex
/// DNSKEY and NSEC3PARAM RRsets between the two.
pub fn sign_update(
    old: &ZoneContents,
    new: &ZoneContents,
    ddns_ch: &Changeset,
    keys: &[SigningKey],
    config: &DnssecConfig,
    now: u64,
) -> Result<SignOutput, SignError> {
    let signer = Signer::new(keys, config, now);
    if apex_rrset_changed(old, new, Rtype::DNSKEY) || apex_rrset_changed(old, new, Rtype::NSEC3PARAM)
    {
        debug!("apex key material changed; re-signing the whole zone");
        sign_contents(new, &signer)
    } else {
        sign_incremental(new, ddns_ch, &signer)
    }
}

/// Re-sign a zone end to end.
///
/// Also used for the first signing pass of a zone and for a forced resign.
pub fn sign_zone(
    contents: &ZoneContents,
    keys: &[SigningKey],
    config: &DnssecConfig,
    now: u64,
) -> Result<SignOutput, SignError> {
    sign_contents(contents, &Signer::new(keys, config, now))
}

/// Refresh the signatures that expire within the refresh window.
///
/// The periodic DNSSEC event calls this: RRsets whose earliest signature
/// expiry falls before `now + sig_refresh` are re-signed; everything else
/// is left alone.  The chain is untouched, since name existence does not
/// change.
///
/// When anything at all is due, the apex SOA RRset is re-signed with it,
/// however fresh its signatures are: the caller runs this as a serial-
/// bumping transaction, and publishing the bumped serial under the old
/// SOA signature would break every validator and IXFR secondary.  When
/// nothing is due, the changeset comes back empty and the caller discards
/// the bump.
pub fn resign_expiring(
    contents: &ZoneContents,
    keys: &[SigningKey],
    config: &DnssecConfig,
    now: u64,
) -> Result<SignOutput, SignError> {
    let signer = Signer::new(keys, config, now);
    let origin = contents.origin().clone();
    let threshold = Serial(now.saturating_add(config.sig_refresh.as_secs()) as u32);

    let mut target = contents.clone();
    let mut expiring: BTreeSet<(Name, Rtype)> = BTreeSet::new();
    for (name, node) in contents.iter_nodes() {
        for sigs in node.sig_rrsets() {
            let Some(covered) = sigs.covered_type() else {
                continue;
            };
            let stale = sigs.rdatas.iter().any(|rdata| match rdata {
                Rdata::Rrsig(rrsig) => expires_by(rrsig.expiration, threshold),
                _ => false,
            });
            if stale {
                expiring.insert((name.clone(), covered));
            }
        }
    }

    if expiring.is_empty() {
        return Ok(SignOutput {
            changeset: Changeset::new(),
            refresh_at: signer.refresh_at(&target),
        });
    }
    expiring.insert((origin.clone(), Rtype::SOA));

    for (name, covered) in &expiring {
        let Some(rrset) = target
            .node(name)
            .and_then(|node| node.rrset(*covered))
            .cloned()
        else {
            // A signature with no RRset under it; drop it.
            if let Some(node) = target.node_mut(name) {
                node.clear_sigs_for(*covered);
            }
            continue;
        };
        if let Some(node) = target.node_mut(name) {
            node.clear_sigs_for(*covered);
        }
        for record in signer.sign_rrset(&rrset, &origin)? {
            target.insert(record).expect("RRSIGs are zone data");
        }
    }

    let changeset = diff_contents(contents, &target);
    Ok(SignOutput {
        changeset,
        refresh_at: signer.refresh_at(&target),
    })
}

/// Whether a signature expiring at `expiration` is due at `threshold`.
///
/// RFC 4034 §3.1.5 puts RRSIG timestamps in the same mod-2^32 sequence
/// space as zone serials, so the comparison uses RFC 1982 arithmetic.
fn expires_by(expiration: u32, threshold: Serial) -> bool {
    !Serial(expiration).newer_than(threshold)
}

fn apex_rrset_changed(old: &ZoneContents, new: &ZoneContents, rtype: Rtype) -> bool {
    let old_rrset = old.apex().rrset(rtype);
    let new_rrset = new.apex().rrset(rtype);
    match (old_rrset, new_rrset) {
        (None, None) => false,
        (Some(old), Some(new)) => {
            old.len() != new.len() || !old.rdatas.iter().all(|rdata| new.contains(rdata))
        }
        _ => true,
    }
}

//----------- Full resign ------------------------------------------------------

fn sign_contents(contents: &ZoneContents, signer: &Signer<'_>) -> Result<SignOutput, SignError> {
    let origin = contents.origin().clone();
    let mut target = contents.clone();

    // Synchronize the apex DNSKEY RRset with the loaded keys.
    if let Some(apex) = target.node_mut(&origin) {
        apex.remove_rrset(Rtype::DNSKEY);
    }
    for key in signer.keys {
        target
            .insert(key.dnskey.clone())
            .expect("DNSKEY records are zone data");
    }

    // Strip the old signature layer.
    let names: Vec<Name> = target.iter_nodes().map(|(name, _)| name.clone()).collect();
    for name in &names {
        if let Some(node) = target.node_mut(name) {
            node.clear_sigs();
            node.remove_rrset(Rtype::NSEC);
            node.remove_rrset(Rtype::NSEC3);
        }
        target.prune(name);
    }

    // Build a fresh chain.
    let nsec3 = target.nsec3param().and_then(Nsec3Params::from_rdata);
    let chain = match &nsec3 {
        Some(params) => nsec::nsec3_chain(&target, params),
        None => nsec::nsec_chain(&target),
    };
    for record in chain {
        target.insert(record).expect("chain records are zone data");
    }

    // Sign every authoritative RRset, in parallel.
    let signable: Vec<Rrset> = nsec::authoritative_names(&target)
        .iter()
        .filter_map(|name| target.node(name).map(|node| (name.clone(), node)))
        .flat_map(|(name, node)| {
            let at_cut = node.is_cut() && name != origin;
            node.rrsets()
                .filter(|rrset| !at_cut || matches!(rrset.rtype, Rtype::DS | Rtype::NSEC))
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect();
    let signatures: Vec<Vec<Record>> = signable
        .par_iter()
        .map(|rrset| signer.sign_rrset(rrset, &origin))
        .collect::<Result<_, _>>()?;
    for record in signatures.into_iter().flatten() {
        target.insert(record).expect("RRSIGs are zone data");
    }

    let changeset = diff_contents(contents, &target);
    Ok(SignOutput {
        changeset,
        refresh_at: signer.refresh_at(&target),
    })
}

//----------- Incremental signing ----------------------------------------------

fn sign_incremental(
    new: &ZoneContents,
    ddns_ch: &Changeset,
    signer: &Signer<'_>,
) -> Result<SignOutput, SignError> {
    let origin = new.origin().clone();
    let mut target = new.clone();
    let nsec3 = target.nsec3param().and_then(Nsec3Params::from_rdata);

    // The names the transaction touched; the apex is always among them
    // because the SOA moved.
    let mut touched: BTreeSet<Name> = ddns_ch
        .touched_records()
        .map(|record| record.owner)
        .collect();
    touched.insert(origin.clone());

    // Drop the stale signature layer of every touched name.  A node left
    // with nothing but its proofs is going away entirely.
    for name in &touched {
        if let Some(node) = target.node_mut(name) {
            node.clear_sigs();
            node.remove_rrset(Rtype::NSEC);
        }
        target.prune(name);
    }

    // Patch the chain and collect the set of names needing fresh RRSIGs.
    let mut dirty = touched.clone();
    match &nsec3 {
        Some(params) => patch_nsec3(&mut target, &touched, params, &mut dirty),
        None => patch_nsec(&mut target, &touched, &mut dirty),
    }

    // Re-sign the RRsets whose signatures were dropped above.  Chain
    // patching only drops the proof's own signature, so an untouched
    // neighbor keeps every other RRSIG it had.
    for name in &dirty {
        let Some(node) = target.node(name) else {
            continue;
        };
        let at_cut = node.is_cut() && name != &origin;
        let rrsets: Vec<Rrset> = node
            .rrsets()
            .filter(|rrset| node.sigs_for(rrset.rtype).is_none())
            .filter(|rrset| !at_cut || matches!(rrset.rtype, Rtype::DS | Rtype::NSEC))
            .cloned()
            .collect();
        for rrset in &rrsets {
            for record in signer.sign_rrset(rrset, &origin)? {
                target.insert(record).expect("RRSIGs are zone data");
            }
        }
    }

    let changeset = diff_contents(new, &target);
    Ok(SignOutput {
        changeset,
        refresh_at: signer.refresh_at(&target),
    })
}

/// Patch the NSEC chain around the touched names.
fn patch_nsec(target: &mut ZoneContents, touched: &BTreeSet<Name>, dirty: &mut BTreeSet<Name>) {
    let ttl = target.soa().minimum;

    // Whose NSEC records must be recomputed: every touched name that still
    // exists, plus the predecessor of every touched name (its next pointer
    // may have moved either way).
    let mut fix: BTreeSet<Name> = BTreeSet::new();
    let auth: BTreeSet<Name> = nsec::authoritative_names(target).into_iter().collect();
    for name in touched {
        if auth.contains(name) {
            fix.insert(name.clone());
        }
        fix.insert(nsec::predecessor(target, name));
    }

    for name in fix {
        if !auth.contains(&name) {
            continue;
        }
        let next = nsec::successor(target, &name);
        let record = nsec::nsec_record(target, &name, next, ttl);

        // Leave the neighbor alone if its NSEC is already right; this is
        // what keeps an incremental pass from rippling through the zone.
        let current = target
            .node(&name)
            .and_then(|node| node.rrset(Rtype::NSEC))
            .and_then(|rrset| rrset.rdatas.first());
        if current == Some(&record.rdata) && !touched.contains(&name) {
            continue;
        }

        if let Some(node) = target.node_mut(&name) {
            node.remove_rrset(Rtype::NSEC);
            node.clear_sigs_for(Rtype::NSEC);
        }
        target.insert(record).expect("NSEC records are zone data");
        dirty.insert(name);
    }
}

/// Patch the NSEC3 chain around the touched names.
fn patch_nsec3(
    target: &mut ZoneContents,
    touched: &BTreeSet<Name>,
    params: &Nsec3Params,
    dirty: &mut BTreeSet<Name>,
) {
    let ttl = target.soa().minimum;
    let origin = target.origin().clone();
    let covered: BTreeSet<Name> = nsec::nsec3_names(target).into_iter().collect();

    // Chain maintenance must also see the empty non-terminals a change
    // creates or destroys, so widen the touched set with every ancestor
    // between a touched name and the apex.
    let mut touched: BTreeSet<Name> = touched.clone();
    for name in touched.clone() {
        let mut ancestor = name;
        while let Some(parent) = ancestor.parent() {
            if !parent.ends_with(&origin) || parent == origin {
                break;
            }
            touched.insert(parent.clone());
            ancestor = parent;
        }
    }
    let touched = &touched;

    // The current chain, as (hash, owner) pairs sorted by hash.
    let mut chain: Vec<(Vec<u8>, Name)> = target
        .iter_nodes()
        .filter(|(_, node)| node.rrset(Rtype::NSEC3).is_some())
        .filter_map(|(name, _)| {
            herald_wire::base::base32hex_decode(
                std::str::from_utf8(name.first_label()).ok()?,
            )
            .ok()
            .map(|hash| (hash, name.clone()))
        })
        .collect();
    chain.sort();

    let link = |chain: &[(Vec<u8>, Name)], hash: &[u8]| -> Option<(Name, Vec<u8>)> {
        // The chain entry preceding `hash`, and the hash following it.
        if chain.is_empty() {
            return None;
        }
        let position = chain.partition_point(|(h, _)| h.as_slice() < hash);
        let pred = &chain[position.checked_sub(1).unwrap_or(chain.len() - 1)];
        let succ = &chain[position % chain.len()];
        Some((pred.1.clone(), succ.0.clone()))
    };

    for name in touched {
        let hash = nsec::hash_name(name, params);
        let owner = nsec::nsec3_owner(&origin, &hash);
        let exists = covered.contains(name);
        let in_chain = chain.iter().any(|(h, _)| h == &hash);

        if exists {
            // Recompute the bitmap (empty for an empty non-terminal);
            // splice the node in if it is new.
            let mut types: Vec<Rtype> = target
                .node(name)
                .map(|node| node.rtypes().collect())
                .unwrap_or_default();
            if !types.is_empty() {
                types.push(Rtype::RRSIG);
            }
            let next_hashed: Vec<u8> = if in_chain {
                match target
                    .node(&owner)
                    .and_then(|node| node.rrset(Rtype::NSEC3))
                    .and_then(|rrset| rrset.rdatas.first())
                {
                    Some(Rdata::Nsec3 { next_hashed, .. }) => next_hashed.to_vec(),
                    _ => hash.clone(),
                }
            } else if let Some((pred_owner, succ_hash)) = link(&chain, &hash) {
                // Point the predecessor at us; we take over its old target.
                retarget_nsec3(target, &pred_owner, &hash);
                dirty.insert(pred_owner);
                succ_hash
            } else {
                // First chain entry: self-referential.
                hash.clone()
            };

            if let Some(node) = target.node_mut(&owner) {
                node.remove_rrset(Rtype::NSEC3);
                node.clear_sigs_for(Rtype::NSEC3);
            }
            target
                .insert(Record::new(
                    owner.clone(),
                    herald_wire::Class::IN,
                    ttl,
                    Rdata::Nsec3 {
                        hash_algorithm: nsec::NSEC3_HASH_SHA1,
                        flags: 0,
                        iterations: params.iterations,
                        salt: params.salt.clone(),
                        next_hashed: next_hashed.into(),
                        types: herald_wire::TypeBitmap::from_types(types),
                    },
                ))
                .expect("NSEC3 records are zone data");
            if !in_chain {
                chain.push((hash, owner.clone()));
                chain.sort();
            }
            dirty.insert(owner);
        } else if in_chain {
            // The name is gone: unlink its chain node.
            let next = match target
                .node(&owner)
                .and_then(|node| node.rrset(Rtype::NSEC3))
                .and_then(|rrset| rrset.rdatas.first())
            {
                Some(Rdata::Nsec3 { next_hashed, .. }) => next_hashed.to_vec(),
                _ => continue,
            };
            if let Some(node) = target.node_mut(&owner) {
                node.remove_rrset(Rtype::NSEC3);
                node.clear_sigs();
            }
            target.prune(&owner);
            chain.retain(|(h, _)| h != &hash);
            dirty.remove(&owner);
            if let Some((pred_owner, _)) = link(&chain, &hash) {
                retarget_nsec3(target, &pred_owner, &next);
                dirty.insert(pred_owner);
            }
        }
    }
}

/// Point an NSEC3 node's next-hash at a new target.
fn retarget_nsec3(target: &mut ZoneContents, owner: &Name, next: &[u8]) {
    let Some(rdata) = target
        .node(owner)
        .and_then(|node| node.rrset(Rtype::NSEC3))
        .and_then(|rrset| rrset.rdatas.first())
        .cloned()
    else {
        return;
    };
    let Rdata::Nsec3 {
        hash_algorithm,
        flags,
        iterations,
        salt,
        types,
        ..
    } = rdata
    else {
        return;
    };
    let ttl = target
        .node(owner)
        .and_then(|node| node.rrset(Rtype::NSEC3))
        .map(|rrset| rrset.ttl)
        .unwrap_or(0);
    if let Some(node) = target.node_mut(owner) {
        node.remove_rrset(Rtype::NSEC3);
        node.clear_sigs_for(Rtype::NSEC3);
    }
    target
        .insert(Record::new(
            owner.clone(),
            herald_wire::Class::IN,
            ttl,
            Rdata::Nsec3 {
                hash_algorithm,
                flags,
                iterations,
                salt,
                next_hashed: next.to_vec().into(),
                types,
            },
        ))
        .expect("NSEC3 records are zone data");
}

//----------- Diffing ----------------------------------------------------------

/// The record-level difference between two versions, as an unbracketed
/// changeset.
pub fn diff_contents(old: &ZoneContents, new: &ZoneContents) -> Changeset {
    type Key = (Name, Rtype, Option<Rtype>);
    let key = |rrset: &Rrset| -> Key { (rrset.owner.clone(), rrset.rtype, rrset.covered_type()) };

    let old_rrsets: std::collections::BTreeMap<Key, Rrset> =
        old.all_rrsets().into_iter().map(|r| (key(&r), r)).collect();
    let new_rrsets: std::collections::BTreeMap<Key, Rrset> =
        new.all_rrsets().into_iter().map(|r| (key(&r), r)).collect();

    let mut changeset = Changeset::new();
    for (key, rrset) in &old_rrsets {
        match new_rrsets.get(key) {
            Some(counterpart) if counterpart.ttl == rrset.ttl => {
                // Record-level diff within the RRset.
                for record in rrset.records() {
                    if !counterpart.contains(&record.rdata) {
                        changeset.remove(record);
                    }
                }
            }
            _ => changeset.remove_rrset(rrset),
        }
    }
    for (key, rrset) in &new_rrsets {
        match old_rrsets.get(key) {
            Some(counterpart) if counterpart.ttl == rrset.ttl => {
                for record in rrset.records() {
                    if !counterpart.contains(&record.rdata) {
                        changeset.add(record);
                    }
                }
            }
            _ => changeset.add_rrset(rrset),
        }
    }
    changeset
}

//----------- SignError --------------------------------------------------------

/// An error during a signing pass.
#[derive(Debug)]
pub enum SignError {
    /// A key could not be loaded or used.
    Key(KeyError),

    /// The transaction being signed could not be composed.
    Compose(String),
}

impl From<KeyError> for SignError {
    fn from(err: KeyError) -> Self {
        Self::Key(err)
    }
}

impl std::error::Error for SignError {}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(err) => err.fmt(f),
            Self::Compose(reason) => f.write_str(reason),
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{apply, ApplyMode};
    use herald_wire::{Class, Serial, Soa};
    use std::str::FromStr;
    use std::time::Duration;

    const KEY_FILE: &str =
        "example.com. 3600 IN DNSKEY 256 3 15 l02Woi0iS8Aa25FQkUd9RMzZHJpBoRQwAQEX1SxZJA4=\n";
    const PRIVATE_FILE: &str = "Private-key-format: v1.3\n\
         Algorithm: 15 (ED25519)\n\
         PrivateKey: ODIyNjAzODQ2MjgwODAxMjI2NDUxOTAyMDQxNDIyNjI=\n";

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn config() -> DnssecConfig {
        DnssecConfig {
            key_dir: "unused".into(),
            sig_validity: Duration::from_secs(14 * 86400),
            sig_refresh: Duration::from_secs(7 * 86400),
        }
    }

    fn keys() -> Vec<SigningKey> {
        vec![SigningKey::from_texts(&name("example.com."), KEY_FILE, PRIVATE_FILE).unwrap()]
    }

    fn soa_record(serial: u32) -> Record {
        Record::new(
            name("example.com."),
            Class::IN,
            3600,
            Rdata::Soa(Soa {
                mname: name("ns1.example.com."),
                rname: name("hostmaster.example.com."),
                serial: Serial(serial),
                refresh: 10800,
                retry: 3600,
                expire: 604800,
                minimum: 3600,
            }),
        )
    }

    fn zone() -> ZoneContents {
        ZoneContents::from_records(
            name("example.com."),
            [
                soa_record(1),
                Record::new(
                    name("example.com."),
                    Class::IN,
                    3600,
                    Rdata::Ns(name("ns1.example.com.")),
                ),
                Record::new(
                    name("www.example.com."),
                    Class::IN,
                    3600,
                    Rdata::A("192.0.2.1".parse().unwrap()),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn full_sign_produces_complete_layer() {
        let contents = zone();
        let output = sign_zone(&contents, &keys(), &config(), 1_700_000_000).unwrap();

        let signed = apply(
            &contents,
            &[bracket(&contents, output.changeset)],
            ApplyMode::DdnsMerge,
        )
        .unwrap();

        assert!(signed.is_signed());
        // Every authoritative name carries an NSEC and signatures.
        for n in ["example.com.", "www.example.com."] {
            let node = signed.node(&name(n)).unwrap();
            assert!(node.rrset(Rtype::NSEC).is_some(), "{n} lacks NSEC");
            assert!(node.sigs_for(Rtype::NSEC).is_some(), "{n} NSEC unsigned");
        }
        assert!(signed.apex().sigs_for(Rtype::SOA).is_some());
        assert!(signed.apex().sigs_for(Rtype::DNSKEY).is_some());

        // refresh_at sits strictly before every signature expiry.
        assert!(output.refresh_at < 1_700_000_000 + 14 * 86400);
    }

    #[test]
    fn incremental_only_touches_changed_names() {
        // Sign the zone fully first.
        let unsigned = zone();
        let output = sign_zone(&unsigned, &keys(), &config(), 1_700_000_000).unwrap();
        let signed = apply(
            &unsigned,
            &[bracket(&unsigned, output.changeset)],
            ApplyMode::DdnsMerge,
        )
        .unwrap();

        // Now apply a DDNS-style change to a single name.
        let mut ddns = Changeset::between(signed.soa_record(), {
            let mut soa = signed.soa_record();
            if let Rdata::Soa(ref mut data) = soa.rdata {
                data.serial = data.serial.next();
            }
            soa
        });
        ddns.add(Record::new(
            name("mail.example.com."),
            Class::IN,
            3600,
            Rdata::A("192.0.2.25".parse().unwrap()),
        ));
        let new = apply(&signed, std::slice::from_ref(&ddns), ApplyMode::DdnsMerge).unwrap();

        let output =
            sign_update(&signed, &new, &ddns, &keys(), &config(), 1_700_000_100).unwrap();

        // The incremental patch must not touch www's signatures.
        let touches_www = output
            .changeset
            .touched_records()
            .any(|record| record.owner == name("www.example.com."));
        assert!(!touches_www, "incremental signing touched an unrelated name");

        // Composing it yields a consistent zone with mail signed and
        // chained in.
        let mut composed = new.clone();
        crate::apply::apply_directly(&mut composed, &output.changeset, ApplyMode::DdnsMerge)
            .unwrap();
        let node = composed.node(&name("mail.example.com.")).unwrap();
        assert!(node.sigs_for(Rtype::A).is_some());
        assert!(node.rrset(Rtype::NSEC).is_some());
        // Its predecessor points at it now.
        let apex_nsec = composed.apex().rrset(Rtype::NSEC).unwrap();
        let Rdata::Nsec { ref next, .. } = apex_nsec.rdatas[0] else {
            panic!("NSEC rdata expected");
        };
        assert_eq!(next, &name("mail.example.com."));
    }

    #[test]
    fn dnskey_change_forces_full_resign() {
        let unsigned = zone();
        let output = sign_zone(&unsigned, &keys(), &config(), 1_700_000_000).unwrap();
        let signed = apply(
            &unsigned,
            &[bracket(&unsigned, output.changeset)],
            ApplyMode::DdnsMerge,
        )
        .unwrap();

        // A DDNS change that replaces the apex DNSKEY set.
        let mut ddns = Changeset::between(signed.soa_record(), {
            let mut soa = signed.soa_record();
            if let Rdata::Soa(ref mut data) = soa.rdata {
                data.serial = data.serial.next();
            }
            soa
        });
        let dnskey = signed.apex().rrset(Rtype::DNSKEY).unwrap().clone();
        ddns.remove_rrset(&dnskey);
        let new = apply(&signed, std::slice::from_ref(&ddns), ApplyMode::DdnsMerge).unwrap();

        let output =
            sign_update(&signed, &new, &ddns, &keys(), &config(), 1_700_000_100).unwrap();
        // A full resign re-adds the DNSKEY from the key store and touches
        // the apex signatures wholesale.
        let readds_dnskey = output
            .changeset
            .adds()
            .iter()
            .any(|rrset| rrset.rtype == Rtype::DNSKEY);
        assert!(readds_dnskey);
    }

    #[test]
    fn expiry_comparison_uses_serial_arithmetic() {
        // Plain ordering would call a signature expiring just after the
        // mod-2^32 wrap "long expired"; serial arithmetic sees it as far in
        // the future.
        assert!(!expires_by(0x0000_0100, Serial(0xFFFF_FF00)));
        assert!(expires_by(0xFFFF_FF00, Serial(0x0000_0100)));
        assert!(expires_by(1_000, Serial(2_000)));
        assert!(!expires_by(2_000, Serial(1_000)));
        // Exactly at the threshold counts as due.
        assert!(expires_by(2_000, Serial(2_000)));
    }

    #[test]
    fn periodic_resign_covers_the_soa() {
        let t0 = 1_700_000_000u64;
        let unsigned = zone();
        let output = sign_zone(&unsigned, &keys(), &config(), t0).unwrap();
        let signed = apply(
            &unsigned,
            &[bracket(&unsigned, output.changeset)],
            ApplyMode::DdnsMerge,
        )
        .unwrap();

        // The handler bumps the serial before the periodic pass.
        let bump = Changeset::between(signed.soa_record(), crate::ddns::bump_soa(&signed));
        let bumped = apply(&signed, std::slice::from_ref(&bump), ApplyMode::DdnsMerge).unwrap();

        // Inside the refresh window nothing is due: the pass is a no-op and
        // the caller discards the serial bump.
        let output = resign_expiring(&bumped, &keys(), &config(), t0 + 3600).unwrap();
        assert!(output.changeset.is_empty());

        // Eight days in, signatures are due.  The pass must also renew the
        // apex SOA signature, which now has to cover the bumped serial.
        let output = resign_expiring(&bumped, &keys(), &config(), t0 + 8 * 86400).unwrap();
        assert!(!output.changeset.is_empty());
        let soa_sig_renewed = output.changeset.adds().iter().any(|rrset| {
            rrset.owner == name("example.com.") && rrset.covered_type() == Some(Rtype::SOA)
        });
        assert!(soa_sig_renewed, "the apex SOA signature was not renewed");

        // Composing the pass yields an SOA signature minted by it, not a
        // leftover from the original signing run.
        let mut composed = bumped.clone();
        crate::apply::apply_directly(&mut composed, &output.changeset, ApplyMode::DdnsMerge)
            .unwrap();
        let soa_sigs = composed.apex().sigs_for(Rtype::SOA).unwrap();
        let Rdata::Rrsig(ref rrsig) = soa_sigs.rdatas[0] else {
            panic!("RRSIG rdata expected");
        };
        assert_eq!(
            u64::from(rrsig.expiration),
            t0 + 8 * 86400 + config().sig_validity.as_secs()
        );
    }

    /// Bracket an unbracketed signing changeset for standalone application.
    fn bracket(contents: &ZoneContents, mut changeset: Changeset) -> Changeset {
        changeset.soa_from = Some(contents.soa_record());
        changeset.soa_to = Some(crate::ddns::bump_soa(contents));
        changeset
    }
}
