//! Serving zone transfers.
//!
//! AXFR streams the current snapshot; IXFR streams changesets out of the
//! journal, falling back to a full-zone answer when the journal does not
//! reach back to the serial the client has (RFC 1995 §4).  Either way the
//! response is a sequence of messages on one TCP connection, each signed
//! when the request was.

use std::net::IpAddr;
use std::sync::Arc;

use herald_wire::tsig::{self, SignContext};
use herald_wire::{Message, MessageBuilder, Rcode, Rdata, Record, Rtype, Section, Serial};

use crate::acl::Acl;
use crate::util::unix_now;
use crate::zone::Zone;

/// The payload-size target for stream messages.
const STREAM_MESSAGE_LIMIT: usize = 16384;

/// A verified transaction signature on the transfer request.
pub struct RequestTsig {
    /// The key the request verified against.
    pub key: Arc<tsig::Key>,

    /// The request's MAC, which the response chain starts from.
    pub mac: Vec<u8>,
}

/// Answer a transfer request.
///
/// Returns the response messages in order, unframed.  `Err` carries the
/// RCODE to answer with instead (the caller builds the error response so it
/// can sign it consistently).
pub fn respond(
    zone: &Zone,
    request: &Message,
    peer: IpAddr,
    tsig: Option<&RequestTsig>,
    udp: bool,
) -> Result<Vec<Vec<u8>>, Rcode> {
    let config = zone.config.load_full();
    let acl = Acl::from_config(&config.allow_transfer);
    if !acl.allows(peer, tsig.map(|t| &t.key.name)) {
        return Err(Rcode::REFUSED);
    }

    let Some(contents) = zone.contents() else {
        // Nothing to serve (expired or never transferred).
        return Err(Rcode::SERVFAIL);
    };

    let question = request.question().ok_or(Rcode::FORMERR)?;
    let mut stream = StreamBuilder::new(request, tsig);

    match question.qtype {
        Rtype::AXFR if !udp => {
            for record in contents.iter_records() {
                stream.push(&record);
            }
            stream.push(&contents.soa_record());
        }
        Rtype::IXFR => {
            let client_serial = request
                .authorities
                .iter()
                .find_map(|record| match &record.rdata {
                    Rdata::Soa(soa) => Some(soa.serial),
                    _ => None,
                })
                .ok_or(Rcode::FORMERR)?;

            if client_serial == contents.serial() {
                // Nothing newer: a lone SOA says so.
                stream.push(&contents.soa_record());
            } else if udp {
                // Over UDP we only confirm that a transfer is worthwhile.
                stream.push(&contents.soa_record());
            } else {
                match load_changesets(zone, client_serial) {
                    Some(changesets) if !changesets.is_empty() => {
                        stream.push(&contents.soa_record());
                        for changeset in &changesets {
                            push_changeset(&mut stream, changeset);
                        }
                        stream.push(&contents.soa_record());
                    }
                    _ => {
                        // History does not reach back that far; answer with
                        // the whole zone.
                        for record in contents.iter_records() {
                            stream.push(&record);
                        }
                        stream.push(&contents.soa_record());
                    }
                }
            }
        }
        _ => return Err(Rcode::FORMERR),
    }

    Ok(stream.finish())
}

fn load_changesets(zone: &Zone, from: Serial) -> Option<Vec<crate::zone::changeset::Changeset>> {
    let journal = zone.journal.lock().expect("journal lock");
    journal.as_ref()?.load_range(from).ok()
}

fn push_changeset(stream: &mut StreamBuilder<'_>, changeset: &crate::zone::changeset::Changeset) {
    if let Some(soa_from) = &changeset.soa_from {
        stream.push(soa_from);
    }
    for rrset in changeset.removes() {
        for record in rrset.records() {
            stream.push(&record);
        }
    }
    if let Some(soa_to) = &changeset.soa_to {
        stream.push(soa_to);
    }
    for rrset in changeset.adds() {
        for record in rrset.records() {
            stream.push(&record);
        }
    }
}

//----------- StreamBuilder ----------------------------------------------------

/// Packs a record stream into size-limited, optionally signed messages.
struct StreamBuilder<'a> {
    request: &'a Message,
    tsig: Option<&'a RequestTsig>,
    messages: Vec<Vec<u8>>,
    current: MessageBuilder,
    prior_mac: Option<Vec<u8>>,
}

impl<'a> StreamBuilder<'a> {
    fn new(request: &'a Message, tsig: Option<&'a RequestTsig>) -> Self {
        Self {
            request,
            tsig,
            messages: Vec::new(),
            current: Self::start(request),
            prior_mac: None,
        }
    }

    fn start(request: &Message) -> MessageBuilder {
        let mut builder = MessageBuilder::respond_to(request);
        builder.set_aa();
        builder.set_limit(STREAM_MESSAGE_LIMIT);
        builder
    }

    fn push(&mut self, record: &Record) {
        if self.current.push_record(Section::Answer, record) {
            return;
        }
        // Full: seal this message and put the record in the next one.
        self.seal();
        assert!(
            self.current.push_record(Section::Answer, record),
            "a single record always fits an empty message"
        );
    }

    fn seal(&mut self) {
        let builder = std::mem::replace(&mut self.current, Self::start(self.request));
        let mut wire = builder.finish();
        if let Some(tsig) = self.tsig {
            let context = match &self.prior_mac {
                None => SignContext::Response {
                    request_mac: &tsig.mac,
                },
                Some(prior) => SignContext::Subsequent { prior_mac: prior },
            };
            let mac = tsig::sign_message(&mut wire, &tsig.key, unix_now(), context);
            self.prior_mac = Some(mac);
        }
        self.messages.push(wire);
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.seal();
        self.messages
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AclEntryConfig, ZoneConfig};
    use herald_wire::{parse_message, Class, Flags, Name, Question};
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn zone_with_acl() -> Zone {
        let mut config = ZoneConfig::minimal(name("example."));
        config.allow_transfer = vec![AclEntryConfig {
            addr: Some("127.0.0.0/8".parse().unwrap()),
            key: None,
        }];
        let zone = Zone::new(config);
        zone.publish(crate::zone::ZoneContents::bootstrap(name("example.")));
        zone
    }

    fn axfr_request() -> Message {
        let mut message = Message {
            id: 21,
            flags: Flags::default(),
            ..Default::default()
        };
        message
            .questions
            .push(Question::new(name("example."), Rtype::AXFR, Class::IN));
        message
    }

    #[test]
    fn axfr_streams_the_snapshot() {
        let zone = zone_with_acl();
        let messages = respond(
            &zone,
            &axfr_request(),
            "127.0.0.1".parse().unwrap(),
            None,
            false,
        )
        .unwrap();

        // The bootstrap zone fits one message: SOA, then the trailing SOA.
        assert_eq!(messages.len(), 1);
        let parsed = parse_message(&messages[0]).unwrap();
        assert_eq!(parsed.answers.len(), 2);
        assert_eq!(parsed.answers.first().unwrap().rtype(), Rtype::SOA);
        assert_eq!(parsed.answers.last().unwrap().rtype(), Rtype::SOA);
    }

    #[test]
    fn acl_denial_is_refused() {
        let zone = zone_with_acl();
        assert!(matches!(
            respond(
                &zone,
                &axfr_request(),
                "192.0.2.1".parse().unwrap(),
                None,
                false
            ),
            Err(Rcode::REFUSED)
        ));
    }

    #[test]
    fn udp_ixfr_answers_with_soa_only() {
        let zone = zone_with_acl();
        let mut request = axfr_request();
        request.questions[0].qtype = Rtype::IXFR;
        request.authorities.push({
            let contents = zone.contents().unwrap();
            let mut soa = contents.soa_record();
            if let Rdata::Soa(ref mut data) = soa.rdata {
                data.serial = Serial(0xFFFF_FF00);
            }
            soa
        });

        let messages = respond(&zone, &request, "127.0.0.1".parse().unwrap(), None, true).unwrap();
        assert_eq!(messages.len(), 1);
        let parsed = parse_message(&messages[0]).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].rtype(), Rtype::SOA);
    }
}
