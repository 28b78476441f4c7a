//! Zone change notification (RFC 1996).
//!
//! When a zone changes, every configured peer is told with a NOTIFY query;
//! peers that do not answer are retried a few times by the NOTIFY event.
//! Inbound NOTIFY messages go the other way: an authenticated peer telling
//! us our secondary zone is stale schedules an immediate REFRESH.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use herald_wire::{
    parse_message, Class, Flags, Message, MessageBuilder, Opcode, Question, Rcode, Rdata, Rtype,
    Section,
};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::acl::Acl;
use crate::center::Center;
use crate::zone::events::{EventKind, When};
use crate::zone::Zone;

/// How long we wait for a peer to acknowledge a NOTIFY.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Send NOTIFY to every configured peer.  Returns how many did not
/// acknowledge.
pub async fn notify_peers(zone: &Arc<Zone>, _center: &Arc<Center>) -> usize {
    let config = zone.config.load_full();
    if config.notify.is_empty() {
        return 0;
    }
    let Some(contents) = zone.contents() else {
        return 0;
    };

    let mut request = MessageBuilder::new(
        rand::random(),
        Flags {
            opcode: Opcode::NOTIFY,
            aa: true,
            ..Default::default()
        },
    );
    request.push_question(&Question::new(zone.name.clone(), Rtype::SOA, Class::IN));
    // The new SOA in the answer section lets the peer skip a pointless
    // refresh (RFC 1996 §3.7).
    request.push_record(Section::Answer, &contents.soa_record());
    let wire = request.finish();

    let mut failures = 0;
    for peer in &config.notify {
        match send_one(&wire, *peer).await {
            Ok(()) => debug!("zone '{}': notified {peer}", zone.name),
            Err(err) => {
                warn!("zone '{}': notify to {peer} failed: {err}", zone.name);
                failures += 1;
            }
        }
    }
    failures
}

async fn send_one(wire: &[u8], peer: std::net::SocketAddr) -> std::io::Result<()> {
    let local = match peer {
        std::net::SocketAddr::V4(_) => "0.0.0.0:0",
        std::net::SocketAddr::V6(_) => "[::]:0",
    };
    let socket = UdpSocket::bind(local).await?;
    socket.send_to(wire, peer).await?;

    tokio::time::timeout(NOTIFY_TIMEOUT, async {
        let mut buffer = vec![0u8; 512];
        loop {
            let (length, from) = socket.recv_from(&mut buffer).await?;
            if from != peer {
                continue;
            }
            match parse_message(&buffer[..length]) {
                Ok(response) if response.flags.qr && wire[..2] == buffer[..2] => return Ok(()),
                _ => continue,
            }
        }
    })
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no acknowledgement"))?
}

/// Handle an inbound NOTIFY.  Returns the response wire.
pub fn handle_notify(
    center: &Arc<Center>,
    zone: &Arc<Zone>,
    request: &Message,
    peer: IpAddr,
    verified_key: Option<&herald_wire::Name>,
) -> Vec<u8> {
    let mut response = MessageBuilder::respond_to(request);
    let _ = center;

    let config = zone.config.load_full();
    let acl = Acl::from_config(&config.allow_notify);
    // A configured master is implicitly allowed to notify its own zone.
    let from_master = config.masters.iter().any(|master| master.addr.ip() == peer);
    if !from_master && !acl.allows(peer, verified_key) {
        warn!("zone '{}': notify from {peer} refused", zone.name);
        response.set_rcode(Rcode::REFUSED);
        return response.finish();
    }

    if !zone.is_secondary() {
        // We are the primary; a notify makes no sense here.
        response.set_rcode(Rcode::NOTAUTH);
        return response.finish();
    }

    // If the peer told us its serial, skip the refresh when we are current.
    let advertised = request.answers.iter().find_map(|record| match &record.rdata {
        Rdata::Soa(soa) if record.owner == zone.name => Some(soa.serial),
        _ => None,
    });
    let stale = match (advertised, zone.serial()) {
        (Some(theirs), Some(ours)) => theirs.newer_than(ours),
        _ => true,
    };
    if stale {
        debug!("zone '{}': notify from {peer}; scheduling refresh", zone.name);
        zone.scheduler.schedule(EventKind::Refresh, When::Now);
    } else {
        debug!("zone '{}': notify from {peer} carries nothing new", zone.name);
    }

    response.finish()
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MasterConfig, ZoneConfig};
    use herald_wire::Name;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn notify_request(serial: Option<u32>) -> Message {
        let mut message = Message {
            id: 5,
            flags: Flags {
                opcode: Opcode::NOTIFY,
                aa: true,
                ..Default::default()
            },
            ..Default::default()
        };
        message
            .questions
            .push(Question::new(name("example."), Rtype::SOA, Class::IN));
        if let Some(serial) = serial {
            message.answers.push(herald_wire::Record::new(
                name("example."),
                Class::IN,
                3600,
                Rdata::Soa(herald_wire::Soa {
                    mname: name("ns1.example."),
                    rname: name("hostmaster.example."),
                    serial: herald_wire::Serial(serial),
                    refresh: 10800,
                    retry: 3600,
                    expire: 604800,
                    minimum: 3600,
                }),
            ));
        }
        message
    }

    fn secondary_zone() -> Arc<Zone> {
        let mut config = ZoneConfig::minimal(name("example."));
        config.masters.push(MasterConfig {
            addr: "192.0.2.1:53".parse().unwrap(),
            key: None,
            source: None,
        });
        let zone = Arc::new(Zone::new(config));
        zone.publish(crate::zone::ZoneContents::bootstrap(name("example.")));
        zone
    }

    #[tokio::test]
    async fn master_notify_schedules_refresh() {
        let center = Center::for_tests();
        let zone = secondary_zone();

        let response = handle_notify(
            &center,
            &zone,
            &notify_request(Some(7)),
            "192.0.2.1".parse().unwrap(),
            None,
        );
        let parsed = parse_message(&response).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::NOERROR);
        assert!(parsed.flags.qr);
        assert!(zone.scheduler.pending(EventKind::Refresh).is_some());
    }

    #[tokio::test]
    async fn stranger_notify_is_refused() {
        let center = Center::for_tests();
        let zone = secondary_zone();

        let response = handle_notify(
            &center,
            &zone,
            &notify_request(None),
            "198.51.100.1".parse().unwrap(),
            None,
        );
        let parsed = parse_message(&response).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::REFUSED);
        assert!(zone.scheduler.pending(EventKind::Refresh).is_none());
    }

    #[tokio::test]
    async fn stale_notify_does_not_refresh() {
        let center = Center::for_tests();
        let zone = secondary_zone();

        // Our bootstrap serial is 0; a notify advertising 0 is not news.
        let response = handle_notify(
            &center,
            &zone,
            &notify_request(Some(0)),
            "192.0.2.1".parse().unwrap(),
            None,
        );
        let parsed = parse_message(&response).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::NOERROR);
        assert!(zone.scheduler.pending(EventKind::Refresh).is_none());
    }
}
