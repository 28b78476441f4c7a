//! Applying changesets to zone contents.
//!
//! The apply engine is the only way zone contents change.  It never mutates
//! a published snapshot: [`apply`] clones the node map (sharing the nodes
//! themselves) and rewrites only the nodes on paths the changesets touch.
//! The in-place variant [`apply_directly`] exists for the two-phase compose
//! of a dynamic update followed by its signing changeset, which operates on
//! a snapshot that has not been published yet.

use std::fmt;

use herald_wire::{Name, Rtype, Serial};
use tracing::trace;

use crate::zone::changeset::Changeset;
use crate::zone::contents::{ContentsError, ZoneContents};

//----------- ApplyMode --------------------------------------------------------

/// How strictly a changeset is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// The changeset must match the contents exactly: removing an absent
    /// record or re-adding one with a different TTL is an error.  Journal
    /// replay and IXFR use this.
    Strict,

    /// The changeset came out of the dynamic-update applier, which already
    /// resolved it against a live version: removals of absent records are
    /// skipped and an add's TTL replaces the RRset's.
    DdnsMerge,
}

//----------- Operations -------------------------------------------------------

/// Compute new contents from old contents plus a list of changesets.
///
/// Unchanged nodes are shared between the old and new contents; only nodes
/// on touched paths are cloned.  On error the partially-built contents are
/// discarded and the old contents are untouched.
pub fn apply(
    old: &ZoneContents,
    changesets: &[Changeset],
    mode: ApplyMode,
) -> Result<ZoneContents, ApplyError> {
    let mut new = old.clone();
    let mut expected = old.serial();
    for changeset in changesets {
        apply_directly(&mut new, changeset, mode)?;
        expected = changeset.serial_to().unwrap_or(expected);
    }
    check_integrity(&new, expected)?;
    Ok(new)
}

/// Apply a single changeset to contents in place.
///
/// Used during the compose phase, before publication.  The integrity checks
/// of [`apply`] are the caller's responsibility once composing is finished.
pub fn apply_directly(
    contents: &mut ZoneContents,
    changeset: &Changeset,
    mode: ApplyMode,
) -> Result<(), ApplyError> {
    // The changeset must continue from the serial we have.
    if let Some(from) = changeset.serial_from() {
        let have = contents.serial();
        if from != have {
            return Err(ApplyError::SerialMismatch { have, want: from });
        }
    }

    // Removals first.
    for rrset in changeset.removes() {
        for record in rrset.records() {
            let owner = record.owner.clone();
            let removed = contents
                .node_mut(&owner)
                .is_some_and(|node| node.remove(&record));
            if !removed && mode == ApplyMode::Strict {
                return Err(ApplyError::NotFound {
                    owner,
                    rtype: record.rtype(),
                });
            }
            contents.prune(&owner);
        }
    }

    // Then additions.
    for rrset in changeset.adds() {
        for record in rrset.records() {
            let existing_ttl = contents
                .node(&record.owner)
                .and_then(|node| node.rrset(record.rtype()))
                .map(|existing| existing.ttl);
            if let Some(ttl) = existing_ttl {
                if ttl != record.ttl {
                    match mode {
                        ApplyMode::Strict => {
                            return Err(ApplyError::TtlMismatch {
                                owner: record.owner.clone(),
                                rtype: record.rtype(),
                            });
                        }
                        ApplyMode::DdnsMerge => {
                            // The update's TTL replaces the RRset's.
                            let rtype = record.rtype();
                            if let Some(node) = contents.node_mut(&record.owner) {
                                node.set_ttl(rtype, record.ttl);
                            }
                        }
                    }
                }
            }
            contents.insert(record)?;
        }
    }

    // Finally, swap the SOA.
    if let Some(soa_to) = &changeset.soa_to {
        let origin = contents.origin().clone();
        if let Some(apex) = contents.node_mut(&origin) {
            apex.remove_rrset(Rtype::SOA);
        }
        contents.insert(soa_to.clone())?;
    }

    Ok(())
}

/// Discard a partially-built snapshot.
///
/// The nodes that were cloned for the new snapshot are exclusively owned by
/// it and are freed here; everything still shared with the old snapshot
/// stays alive through the old snapshot's references.
pub fn rollback(contents: ZoneContents) {
    trace!(
        "Discarding unpublished contents of '{}' at serial {}",
        contents.origin(),
        contents.serial()
    );
    drop(contents);
}

/// Check the invariants that must hold before contents may be published.
pub fn check_integrity(contents: &ZoneContents, expected: Serial) -> Result<(), ApplyError> {
    // Exactly one SOA at the apex.
    let soas = contents
        .apex()
        .rrset(Rtype::SOA)
        .map(|rrset| rrset.len())
        .unwrap_or(0);
    if soas != 1 {
        return Err(ApplyError::ApexLost);
    }

    // The serial must be the one the last changeset produced.
    let have = contents.serial();
    if have != expected {
        return Err(ApplyError::SerialMismatch {
            have,
            want: expected,
        });
    }

    // Every NSEC3 next-owner link must point at an existing NSEC3 node.
    let mut hashes = foldhash::HashSet::default();
    let mut links = Vec::new();
    for (name, node) in contents.iter_nodes() {
        let Some(rrset) = node.rrset(Rtype::NSEC3) else {
            continue;
        };
        hashes.insert(name.first_label().to_ascii_lowercase());
        for rdata in &rrset.rdatas {
            if let herald_wire::Rdata::Nsec3 { next_hashed, .. } = rdata {
                links.push(herald_wire::base::base32hex_encode(next_hashed).into_bytes());
            }
        }
    }
    if links
        .iter()
        .any(|link| !hashes.contains(link.as_slice()))
    {
        return Err(ApplyError::BrokenNsec3Chain);
    }

    Ok(())
}

//----------- ApplyError -------------------------------------------------------

/// An error applying changesets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyError {
    /// A record to remove was not present.
    NotFound {
        /// The owner of the missing record.
        owner: Name,

        /// The type of the missing record.
        rtype: Rtype,
    },

    /// An added record's TTL conflicts with its RRset.
    TtlMismatch {
        /// The owner of the RRset.
        owner: Name,

        /// The type of the RRset.
        rtype: Rtype,
    },

    /// The changeset does not continue from the contents' serial.
    SerialMismatch {
        /// The serial the contents are at.
        have: Serial,

        /// The serial the changeset wanted.
        want: Serial,
    },

    /// The apex no longer holds exactly one SOA.
    ApexLost,

    /// An NSEC3 record links to a hash that no longer exists.
    BrokenNsec3Chain,

    /// A record could not be placed into the contents.
    Contents(ContentsError),
}

impl From<ContentsError> for ApplyError {
    fn from(err: ContentsError) -> Self {
        Self::Contents(err)
    }
}

impl std::error::Error for ApplyError {}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { owner, rtype } => {
                write!(f, "record to remove not found: {owner} {rtype}")
            }
            Self::TtlMismatch { owner, rtype } => {
                write!(f, "TTL conflict within RRset {owner} {rtype}")
            }
            Self::SerialMismatch { have, want } => {
                write!(f, "changeset expects serial {want}, contents are at {have}")
            }
            Self::ApexLost => f.write_str("the apex lost its SOA"),
            Self::BrokenNsec3Chain => f.write_str("the NSEC3 chain has a dangling link"),
            Self::Contents(err) => err.fmt(f),
        }
    }
}

//============ Tests ===========================================================
