//! Authoritative query answering.
//!
//! Query handling runs on the I/O side: it pins a snapshot of the zone with
//! one atomic load and composes the response from it, never entering the
//! zone's executor.  CNAME chasing and delegation responses live here; the
//! contents only answer point lookups.

use herald_wire::{
    Message, MessageBuilder, Rcode, Record, Rrset, Rtype, Section, UDP_PAYLOAD_LIMIT,
};

use crate::zone::contents::{Find, ZoneContents};

/// The most CNAME links followed inside one zone.
const MAX_CNAME_CHAIN: usize = 8;

/// Answer a query from a snapshot.
///
/// `udp` limits the response to the peer's advertised payload size (or 512
/// octets without EDNS) and sets TC on overflow; TCP responses use the
/// protocol maximum.
pub fn answer(contents: &ZoneContents, request: &Message, udp: bool) -> Vec<u8> {
    let mut response = MessageBuilder::respond_to(request);
    response.set_aa();

    let dnssec_ok = request.edns.as_ref().is_some_and(|edns| edns.dnssec_ok);
    if udp {
        let limit = match &request.edns {
            Some(edns) => (edns.udp_payload_size as usize).max(UDP_PAYLOAD_LIMIT),
            None => UDP_PAYLOAD_LIMIT,
        };
        response.set_limit(limit);
    }

    let Some(question) = request.question() else {
        response.set_rcode(Rcode::FORMERR);
        return finish(response, request);
    };

    let mut qname = question.qname.clone();
    let mut chased = 0;
    loop {
        match contents.find(&qname) {
            Find::Answer(node) => {
                match question.qtype {
                    Rtype::ANY => {
                        for rrset in node.rrsets() {
                            push_rrset(&mut response, Section::Answer, rrset);
                            if dnssec_ok {
                                if let Some(sigs) = node.sigs_for(rrset.rtype) {
                                    push_rrset(&mut response, Section::Answer, sigs);
                                }
                            }
                        }
                    }
                    qtype => match node.rrset(qtype) {
                        Some(rrset) => {
                            push_rrset(&mut response, Section::Answer, rrset);
                            if dnssec_ok {
                                if let Some(sigs) = node.sigs_for(qtype) {
                                    push_rrset(&mut response, Section::Answer, sigs);
                                }
                            }
                        }
                        None => {
                            // NODATA: NOERROR with the SOA (and, when asked
                            // for, the NSEC disproving the type).
                            push_negative_authority(&mut response, contents, node, dnssec_ok);
                        }
                    },
                }
                break;
            }
            Find::Cname { node, rrset } => {
                if question.qtype == Rtype::CNAME || question.qtype == Rtype::ANY {
                    push_rrset(&mut response, Section::Answer, rrset);
                    if dnssec_ok {
                        if let Some(sigs) = node.sigs_for(Rtype::CNAME) {
                            push_rrset(&mut response, Section::Answer, sigs);
                        }
                    }
                    break;
                }
                push_rrset(&mut response, Section::Answer, rrset);
                if dnssec_ok {
                    if let Some(sigs) = node.sigs_for(Rtype::CNAME) {
                        push_rrset(&mut response, Section::Answer, sigs);
                    }
                }
                // Chase the target while it stays inside the zone.
                let herald_wire::Rdata::Cname(target) = &rrset.rdatas[0] else {
                    break;
                };
                chased += 1;
                if chased > MAX_CNAME_CHAIN || !target.ends_with(contents.origin()) {
                    break;
                }
                qname = target.clone();
            }
            Find::Delegation { owner: _, node } => {
                // Not authoritative below the cut: refer the client onward.
                // AA is cleared unless a CNAME answer was already given.
                if chased == 0 {
                    let mut builder = MessageBuilder::respond_to(request);
                    if udp {
                        builder.set_limit(match &request.edns {
                            Some(edns) => (edns.udp_payload_size as usize).max(UDP_PAYLOAD_LIMIT),
                            None => UDP_PAYLOAD_LIMIT,
                        });
                    }
                    response = builder;
                }
                if let Some(ns) = node.rrset(Rtype::NS) {
                    push_rrset(&mut response, Section::Authority, ns);
                    if dnssec_ok {
                        if let Some(ds) = node.rrset(Rtype::DS) {
                            push_rrset(&mut response, Section::Authority, ds);
                        }
                        if let Some(sigs) = node.sigs_for(Rtype::DS) {
                            push_rrset(&mut response, Section::Authority, sigs);
                        }
                    }
                    push_glue(&mut response, contents, ns);
                }
                break;
            }
            Find::Nxdomain => {
                response.set_rcode(Rcode::NXDOMAIN);
                push_soa_authority(&mut response, contents, dnssec_ok);
                break;
            }
        }
    }

    finish(response, request)
}

fn finish(mut response: MessageBuilder, request: &Message) -> Vec<u8> {
    if request.edns.is_some() {
        let dnssec_ok = request.edns.as_ref().is_some_and(|edns| edns.dnssec_ok);
        response.push_edns(1232, dnssec_ok);
    }
    response.finish()
}

fn push_rrset(response: &mut MessageBuilder, section: Section, rrset: &Rrset) {
    for record in rrset.records() {
        if !response.push_record(section, &record) {
            response.set_tc();
            return;
        }
    }
}

fn push_soa_authority(response: &mut MessageBuilder, contents: &ZoneContents, dnssec_ok: bool) {
    // Negative answers carry the SOA with the negative TTL (RFC 2308).
    let mut soa = contents.soa_record();
    soa.ttl = soa.ttl.min(contents.soa().minimum);
    if !response.push_record(Section::Authority, &soa) {
        response.set_tc();
        return;
    }
    if dnssec_ok {
        if let Some(sigs) = contents.apex().sigs_for(Rtype::SOA) {
            push_rrset(response, Section::Authority, sigs);
        }
    }
}

fn push_negative_authority(
    response: &mut MessageBuilder,
    contents: &ZoneContents,
    node: &crate::zone::contents::Node,
    dnssec_ok: bool,
) {
    push_soa_authority(response, contents, dnssec_ok);
    if dnssec_ok {
        if let Some(nsec) = node.rrset(Rtype::NSEC) {
            push_rrset(response, Section::Authority, nsec);
            if let Some(sigs) = node.sigs_for(Rtype::NSEC) {
                push_rrset(response, Section::Authority, sigs);
            }
        }
    }
}

fn push_glue(response: &mut MessageBuilder, contents: &ZoneContents, ns: &Rrset) {
    for rdata in &ns.rdatas {
        let herald_wire::Rdata::Ns(ref target) = *rdata else {
            continue;
        };
        if !target.ends_with(contents.origin()) {
            continue;
        }
        if let Some(node) = contents.node(target) {
            for rtype in [Rtype::A, Rtype::AAAA] {
                if let Some(glue) = node.rrset(rtype) {
                    for record in glue.records() {
                        let record = Record { owner: target.clone(), ..record };
                        if !response.push_record(Section::Additional, &record) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use herald_wire::{parse_message, Class, Flags, Name, Question, Rdata, Serial, Soa};
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn contents() -> ZoneContents {
        let soa = Record::new(
            name("example."),
            Class::IN,
            3600,
            Rdata::Soa(Soa {
                mname: name("ns1.example."),
                rname: name("hostmaster.example."),
                serial: Serial(3),
                refresh: 10800,
                retry: 3600,
                expire: 604800,
                minimum: 300,
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
                Record::new(
                    name("alias.example."),
                    Class::IN,
                    3600,
                    Rdata::Cname(name("www.example.")),
                ),
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

    fn query(qname: &str, qtype: Rtype) -> Message {
        let mut message = Message {
            id: 99,
            flags: Flags::default(),
            ..Default::default()
        };
        message
            .questions
            .push(Question::new(name(qname), qtype, Class::IN));
        message
    }

    #[test]
    fn positive_answer() {
        let response = answer(&contents(), &query("www.example.", Rtype::A), false);
        let parsed = parse_message(&response).unwrap();
        assert!(parsed.flags.aa);
        assert_eq!(parsed.flags.rcode, Rcode::NOERROR);
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].rdata, Rdata::A("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn nxdomain_carries_soa() {
        let response = answer(&contents(), &query("nope.example.", Rtype::A), false);
        let parsed = parse_message(&response).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::NXDOMAIN);
        assert_eq!(parsed.authorities.len(), 1);
        assert_eq!(parsed.authorities[0].rtype(), Rtype::SOA);
        // The negative TTL is capped by the SOA minimum.
        assert_eq!(parsed.authorities[0].ttl, 300);
    }

    #[test]
    fn nodata_is_noerror() {
        let response = answer(&contents(), &query("www.example.", Rtype::AAAA), false);
        let parsed = parse_message(&response).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::NOERROR);
        assert!(parsed.answers.is_empty());
        assert_eq!(parsed.authorities[0].rtype(), Rtype::SOA);
    }

    #[test]
    fn cname_is_chased_in_zone() {
        let response = answer(&contents(), &query("alias.example.", Rtype::A), false);
        let parsed = parse_message(&response).unwrap();
        assert_eq!(parsed.answers.len(), 2);
        assert_eq!(parsed.answers[0].rtype(), Rtype::CNAME);
        assert_eq!(parsed.answers[1].rtype(), Rtype::A);
    }

    #[test]
    fn referral_clears_aa_and_adds_glue() {
        let response = answer(&contents(), &query("deep.sub.example.", Rtype::A), false);
        let parsed = parse_message(&response).unwrap();
        assert!(!parsed.flags.aa);
        assert_eq!(parsed.flags.rcode, Rcode::NOERROR);
        assert!(parsed.answers.is_empty());
        assert_eq!(parsed.authorities[0].rtype(), Rtype::NS);
        assert_eq!(parsed.additionals.len(), 1);
        assert_eq!(parsed.additionals[0].owner, name("ns.sub.example."));
    }
}
