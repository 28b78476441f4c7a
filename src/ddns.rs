//! Dynamic updates (RFC 2136).
//!
//! The applier turns a batch of authenticated UPDATE queries into a single
//! changeset.  Each query is resolved against a working view of the zone:
//! its prerequisites are evaluated, its update section is applied to a
//! scratch changeset, and only if the whole query succeeds is the scratch
//! merged into the batch and the view advanced.  A failing query gets its
//! RCODE and leaves no trace, while later queries in the same batch see the
//! effects of earlier successful ones.

use herald_wire::{Class, Message, Name, Rdata, Record, Rrset, Rtype};
use tracing::debug;

use crate::apply::{apply_directly, ApplyMode};
use crate::zone::changeset::Changeset;
use crate::zone::contents::{Find, ZoneContents};

//----------- BatchOutcome -----------------------------------------------------

/// The result of processing a batch of UPDATE queries.
#[derive(Debug)]
pub struct BatchOutcome {
    /// The combined changeset; empty if nothing changed.
    pub changeset: Changeset,

    /// The per-query response codes, in input order.
    pub rcodes: Vec<herald_wire::Rcode>,
}

/// Process a batch of UPDATE queries against the current contents.
///
/// The returned changeset is bracketed with SOA records and ready for the
/// apply engine (in DDNS-merge mode); its `soa_to` serial is the current
/// serial incremented, unless one of the updates itself set a newer SOA.
pub fn process_queries(contents: &ZoneContents, queries: &[Message]) -> BatchOutcome {
    let mut view = contents.clone();
    let mut batch = Changeset::new();
    let mut rcodes = Vec::with_capacity(queries.len());

    for query in queries {
        match process_single(&view, query) {
            Ok(scratch) => {
                if !scratch.is_empty() || scratch.soa_to.is_some() {
                    // Advance the working view so later queries in the batch
                    // observe this one.
                    apply_directly(&mut view, &scratch, ApplyMode::DdnsMerge)
                        .expect("scratch changesets come from the view itself");
                    batch.merge(scratch);
                }
                rcodes.push(herald_wire::Rcode::NOERROR);
            }
            Err(rcode) => {
                debug!("update query refused with {rcode}");
                rcodes.push(rcode);
            }
        }
    }

    if !batch.is_empty() || batch.soa_to.is_some() {
        // Bracket the batch: it applies to the published contents, and
        // produces the next serial unless an update supplied its own SOA.
        batch.soa_from = Some(contents.soa_record());
        if batch.soa_to.is_none() {
            batch.soa_to = Some(bump_soa(contents));
        }
    }

    BatchOutcome {
        changeset: batch,
        rcodes,
    }
}

/// The current SOA with its serial incremented.
pub fn bump_soa(contents: &ZoneContents) -> Record {
    let mut record = contents.soa_record();
    if let Rdata::Soa(ref mut soa) = record.rdata {
        soa.serial = soa.serial.next();
    }
    record
}

/// Process one UPDATE query against the working view.
///
/// On success, the query's effect is returned as an unbracketed changeset
/// (no SOA records, except `soa_to` when the update itself added one).
fn process_single(view: &ZoneContents, query: &Message) -> Result<Changeset, herald_wire::Rcode> {
    use herald_wire::Rcode;

    // The zone section must name this zone's SOA.
    let question = query.question().ok_or(Rcode::FORMERR)?;
    if question.qtype != Rtype::SOA || question.qclass != Class::IN {
        return Err(Rcode::FORMERR);
    }
    if &question.qname != view.origin() {
        return Err(Rcode::NOTAUTH);
    }

    check_prerequisites(view, &query.answers)?;

    let mut scratch = Changeset::new();
    for record in &query.authorities {
        apply_update_record(view, record, &mut scratch)?;
    }
    Ok(scratch)
}

//----------- Prerequisites (RFC 2136 §3.2) ------------------------------------

fn check_prerequisites(
    view: &ZoneContents,
    prereqs: &[Record],
) -> Result<(), herald_wire::Rcode> {
    use herald_wire::Rcode;

    // "RRset exists (value dependent)" prerequisites accumulate into RRsets
    // and are compared wholesale at the end.
    let mut exact: Vec<Rrset> = Vec::new();

    for record in prereqs {
        if record.ttl != 0 {
            return Err(Rcode::FORMERR);
        }
        if !record.owner.ends_with(view.origin()) {
            return Err(Rcode::NOTZONE);
        }
        let empty_rdata = matches!(record.rdata, Rdata::Unknown(_, ref octets) if octets.is_empty());

        match record.class {
            Class::ANY => {
                if !empty_rdata {
                    return Err(Rcode::FORMERR);
                }
                match record.rtype() {
                    Rtype::ANY => {
                        // Name is in use.
                        if matches!(view.find(&record.owner), Find::Nxdomain) {
                            return Err(Rcode::NXDOMAIN);
                        }
                    }
                    rtype => {
                        // RRset exists (value independent).
                        if !rrset_exists(view, &record.owner, rtype) {
                            return Err(Rcode::NXRRSET);
                        }
                    }
                }
            }
            Class::NONE => {
                if !empty_rdata {
                    return Err(Rcode::FORMERR);
                }
                match record.rtype() {
                    Rtype::ANY => {
                        // Name is not in use.
                        if !matches!(view.find(&record.owner), Find::Nxdomain) {
                            return Err(Rcode::YXDOMAIN);
                        }
                    }
                    rtype => {
                        // RRset does not exist.
                        if rrset_exists(view, &record.owner, rtype) {
                            return Err(Rcode::YXRRSET);
                        }
                    }
                }
            }
            Class::IN => {
                // RRset exists (value dependent); collect for the wholesale
                // comparison below.
                match exact
                    .iter_mut()
                    .find(|rrset| rrset.rtype == record.rtype() && rrset.owner == record.owner)
                {
                    Some(rrset) => rrset.push(0, record.rdata.clone()),
                    None => exact.push(Rrset::from_record(record.clone())),
                }
            }
            _ => return Err(Rcode::FORMERR),
        }
    }

    for required in &exact {
        let Some(node) = view.node(&required.owner) else {
            return Err(Rcode::NXRRSET);
        };
        let Some(present) = node.rrset(required.rtype) else {
            return Err(Rcode::NXRRSET);
        };
        // The RRsets must match exactly, TTLs aside.
        if present.len() != required.len()
            || !required.rdatas.iter().all(|rdata| present.contains(rdata))
        {
            return Err(Rcode::NXRRSET);
        }
    }
    Ok(())
}

fn rrset_exists(view: &ZoneContents, owner: &Name, rtype: Rtype) -> bool {
    view.node(owner)
        .is_some_and(|node| node.rrset(rtype).is_some())
}

//----------- Update section (RFC 2136 §3.4) -----------------------------------

fn apply_update_record(
    view: &ZoneContents,
    record: &Record,
    scratch: &mut Changeset,
) -> Result<(), herald_wire::Rcode> {
    use herald_wire::Rcode;

    if !record.owner.ends_with(view.origin()) {
        return Err(Rcode::NOTZONE);
    }
    let at_apex = &record.owner == view.origin();

    match record.class {
        // Add.
        Class::IN => {
            if !record.rtype().is_zone_type() {
                return Err(Rcode::FORMERR);
            }
            add_record(view, record, at_apex, scratch);
        }

        // Delete an RRset (or, with ANY, everything at the name).
        Class::ANY => {
            if record.ttl != 0 || !rdata_is_empty(record) {
                return Err(Rcode::FORMERR);
            }
            match record.rtype() {
                Rtype::ANY => {
                    if let Some(node) = view.node(&record.owner) {
                        for rrset in node.rrsets() {
                            // The apex SOA and NS survive wholesale deletion.
                            if at_apex && matches!(rrset.rtype, Rtype::SOA | Rtype::NS) {
                                continue;
                            }
                            scratch.remove_rrset(rrset);
                        }
                    }
                }
                Rtype::SOA => {
                    // Deleting the SOA is meaningless; ignored.
                }
                Rtype::NS if at_apex => {
                    // Deleting the whole apex NS RRset is ignored.
                }
                rtype => {
                    if let Some(rrset) = view.node(&record.owner).and_then(|n| n.rrset(rtype)) {
                        scratch.remove_rrset(rrset);
                    }
                }
            }
        }

        // Delete a specific record.
        Class::NONE => {
            if record.ttl != 0 {
                return Err(Rcode::FORMERR);
            }
            match record.rtype() {
                Rtype::SOA => {
                    // Ignored.
                }
                rtype => {
                    let Some(present) = view.node(&record.owner).and_then(|n| n.rrset(rtype))
                    else {
                        return Ok(());
                    };
                    if !present.contains(&record.rdata) {
                        return Ok(());
                    }
                    // The last apex NS is immortal.
                    if at_apex && rtype == Rtype::NS && present.len() == 1 {
                        return Ok(());
                    }
                    scratch.remove(Record::new(
                        record.owner.clone(),
                        present.class,
                        present.ttl,
                        record.rdata.clone(),
                    ));
                }
            }
        }

        _ => return Err(Rcode::FORMERR),
    }
    Ok(())
}

fn add_record(view: &ZoneContents, record: &Record, at_apex: bool, scratch: &mut Changeset) {
    // SOA additions replace the SOA, but only if the serial moves forward.
    if record.rtype() == Rtype::SOA {
        if !at_apex {
            return;
        }
        if let Rdata::Soa(ref soa) = record.rdata {
            if soa.serial.newer_than(view.serial()) {
                scratch.soa_to = Some(record.clone());
            }
        }
        return;
    }

    let node = view.node(&record.owner);

    // CNAME exclusivity (RFC 2136 §3.4.2.2): an add that would coexist with
    // a CNAME is ignored, and a CNAME add to an occupied node is ignored.
    let has_cname = node.is_some_and(|n| n.rrset(Rtype::CNAME).is_some());
    if record.rtype() == Rtype::CNAME {
        let has_other = node.is_some_and(|n| n.rtypes().any(|t| t != Rtype::CNAME));
        if has_other {
            return;
        }
        if let Some(existing) = node.and_then(|n| n.rrset(Rtype::CNAME)) {
            // A CNAME add replaces the existing CNAME.
            scratch.remove_rrset(existing);
        }
    } else if has_cname {
        return;
    }

    scratch.add(record.clone());
}

fn rdata_is_empty(record: &Record) -> bool {
    matches!(record.rdata, Rdata::Unknown(_, ref octets) if octets.is_empty())
}

//============ Tests ===========================================================
