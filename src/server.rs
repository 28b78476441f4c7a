//! The DNS front-end.
//!
//! The listeners accept and parse messages on the runtime's I/O threads and
//! dispatch them by kind: queries are answered straight off a pinned
//! snapshot, transfers stream from the snapshot or journal, NOTIFY prods
//! the zone's scheduler, and UPDATE queries are queued for the zone
//! executor, whose verdict is awaited before the response goes out.
//! Nothing here ever blocks on a zone's event processing except the UPDATE
//! path, which is exactly the ordering the protocol wants.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use herald_wire::tsig::{self, SignContext};
use herald_wire::{parse_message, Message, MessageBuilder, Opcode, Rcode, Rtype};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::acl::Acl;
use crate::center::{self, Center};
use crate::util::unix_now;
use crate::zone::PendingUpdate;

/// How long an UPDATE client waits for the zone executor's verdict.
const UPDATE_VERDICT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a TCP peer may take per read.
const TCP_READ_DEADLINE: Duration = Duration::from_secs(10);

/// Run the DNS listeners until shutdown.
pub async fn serve(center: Arc<Center>) -> io::Result<()> {
    let config = center.config();
    let mut tasks = Vec::new();

    for addr in &config.listen {
        let udp = UdpSocket::bind(addr).await?;
        let tcp = TcpListener::bind(addr).await?;
        info!("listening on {addr}");

        let center_udp = center.clone();
        tasks.push(tokio::spawn(async move {
            serve_udp(center_udp, udp).await;
        }));
        let center_tcp = center.clone();
        tasks.push(tokio::spawn(async move {
            serve_tcp(center_tcp, tcp).await;
        }));
    }

    // The listeners run until shutdown is signaled.
    let mut shutdown = center.shutdown.subscribe();
    let _ = shutdown.changed().await;
    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn serve_udp(center: Arc<Center>, socket: UdpSocket) {
    let socket = Arc::new(socket);
    let mut buffer = vec![0u8; 65535];
    loop {
        let (length, peer) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(err) => {
                warn!("UDP receive failed: {err}");
                continue;
            }
        };
        let wire = buffer[..length].to_vec();
        let center = center.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            let responses = handle_packet(&center, &wire, peer.ip(), true).await;
            for response in responses {
                if let Err(err) = socket.send_to(&response, peer).await {
                    debug!("UDP send to {peer} failed: {err}");
                }
            }
        });
    }
}

async fn serve_tcp(center: Arc<Center>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("TCP accept failed: {err}");
                continue;
            }
        };
        let center = center.clone();
        tokio::spawn(async move {
            if let Err(err) = tcp_session(&center, stream, peer).await {
                debug!("TCP session with {peer} ended: {err}");
            }
        });
    }
}

async fn tcp_session(
    center: &Arc<Center>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    loop {
        let mut length = [0u8; 2];
        match tokio::time::timeout(TCP_READ_DEADLINE, stream.read_exact(&mut length)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(err)) => return Err(err),
            Err(_) => return Ok(()),
        }
        let mut wire = vec![0u8; u16::from_be_bytes(length) as usize];
        tokio::time::timeout(TCP_READ_DEADLINE, stream.read_exact(&mut wire))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read"))??;

        let responses = handle_packet(center, &wire, peer.ip(), false).await;
        for response in responses {
            stream
                .write_all(&(response.len() as u16).to_be_bytes())
                .await?;
            stream.write_all(&response).await?;
        }
        stream.flush().await?;
    }
}

/// Parse and dispatch one message; returns the response messages.
///
/// This is the whole front-end in one call: external acceptors (and the
/// integration tests) hand in a raw packet and get back what to send.
pub async fn handle_packet(
    center: &Arc<Center>,
    wire: &[u8],
    peer: IpAddr,
    udp: bool,
) -> Vec<Vec<u8>> {
    let message = match parse_message(wire) {
        Ok(message) => message,
        Err(err) => {
            debug!("unparseable message from {peer}: {err}");
            return formerr_response(wire).into_iter().collect();
        }
    };
    if message.flags.qr {
        // A response where only queries belong; drop it.
        return Vec::new();
    }

    // Verify the transaction signature, if there is one.  The verified key
    // name is the peer's identity for the ACLs; failures are answered with
    // NOTAUTH and the appropriate TSIG error before anything else runs.
    let verified = match verify_tsig(center, wire, &message) {
        Ok(verified) => verified,
        Err(response) => return vec![response],
    };

    match message.flags.opcode {
        Opcode::QUERY => handle_query(center, &message, peer, udp, verified).await,
        Opcode::NOTIFY => {
            let Some(question) = message.question() else {
                return vec![simple_response(&message, Rcode::FORMERR)];
            };
            let Some(zone) = center::get_zone(center, &question.qname) else {
                return vec![simple_response(&message, Rcode::NOTAUTH)];
            };
            let response = crate::notify::handle_notify(
                center,
                &zone,
                &message,
                peer,
                verified.as_ref().map(|(key, _)| &key.name),
            );
            vec![sign_response(response, &message, verified)]
        }
        Opcode::UPDATE => {
            let response = handle_update(center, &message, peer, &verified).await;
            vec![sign_response(response, &message, verified)]
        }
        _ => vec![simple_response(&message, Rcode::NOTIMP)],
    }
}

type VerifiedTsig = Option<(Arc<tsig::Key>, Vec<u8>)>;

/// Check the message's TSIG, if present.  `Err` carries the finished error
/// response.
fn verify_tsig(
    center: &Arc<Center>,
    wire: &[u8],
    message: &Message,
) -> Result<VerifiedTsig, Vec<u8>> {
    let Some(parsed) = &message.tsig else {
        return Ok(None);
    };

    let mut response = MessageBuilder::respond_to(message);
    response.set_rcode(Rcode::NOTAUTH);

    let Some(key) = center.tsig.get(&parsed.owner) else {
        let mut wire = response.finish();
        tsig::append_unsigned_error(&mut wire, parsed, herald_wire::TsigRcode::BADKEY);
        return Err(wire);
    };

    match tsig::verify_message(wire, message, &key, unix_now(), SignContext::Request) {
        Ok(verified) => Ok(Some((key, verified.mac))),
        Err(err) => {
            let mut wire = response.finish();
            match err {
                tsig::TsigError::BadTime => {
                    tsig::sign_badtime_error(&mut wire, &key, parsed, unix_now());
                }
                other => {
                    tsig::append_unsigned_error(&mut wire, parsed, other.tsig_rcode());
                }
            }
            Err(wire)
        }
    }
}

async fn handle_query(
    center: &Arc<Center>,
    message: &Message,
    peer: IpAddr,
    udp: bool,
    verified: VerifiedTsig,
) -> Vec<Vec<u8>> {
    let Some(question) = message.question() else {
        return vec![simple_response(message, Rcode::FORMERR)];
    };

    // Transfers take the streaming path.
    if matches!(question.qtype, Rtype::AXFR | Rtype::IXFR) {
        let Some(zone) = center::get_zone(center, &question.qname) else {
            return vec![simple_response(message, Rcode::NOTAUTH)];
        };
        let request_tsig = verified.as_ref().map(|(key, mac)| crate::xfr::server::RequestTsig {
            key: key.clone(),
            mac: mac.clone(),
        });
        return match crate::xfr::server::respond(&zone, message, peer, request_tsig.as_ref(), udp)
        {
            Ok(messages) => messages,
            Err(rcode) => {
                vec![sign_response(simple_response(message, rcode), message, verified)]
            }
        };
    }

    let Some(zone) = center::find_zone_for(center, &question.qname) else {
        // Not ours; an authoritative-only server refuses.
        return vec![simple_response(message, Rcode::REFUSED)];
    };
    let Some(contents) = zone.contents() else {
        return vec![simple_response(message, Rcode::SERVFAIL)];
    };

    let response = crate::query::answer(&contents, message, udp);
    vec![sign_response(response, message, verified)]
}

async fn handle_update(
    center: &Arc<Center>,
    message: &Message,
    peer: IpAddr,
    verified: &VerifiedTsig,
) -> Vec<u8> {
    let Some(question) = message.question() else {
        return simple_response(message, Rcode::FORMERR);
    };
    if question.qtype != Rtype::SOA {
        return simple_response(message, Rcode::FORMERR);
    }
    let Some(zone) = center::get_zone(center, &question.qname) else {
        return simple_response(message, Rcode::NOTAUTH);
    };
    if zone.is_secondary() {
        // Forwarding to the master is not implemented.
        return simple_response(message, Rcode::NOTIMP);
    }

    // The update ACL gates the queue.
    let config = zone.config.load_full();
    let acl = Acl::from_config(&config.allow_update);
    if !acl.allows(peer, verified.as_ref().map(|(key, _)| &key.name)) {
        debug!("zone '{}': update from {peer} refused", zone.name);
        return simple_response(message, Rcode::REFUSED);
    }
    if zone.contents().is_none() {
        return simple_response(message, Rcode::SERVFAIL);
    }

    // Queue the update and wait for the executor's verdict.
    let (respond, verdict) = oneshot::channel();
    let pending = PendingUpdate {
        message: message.clone(),
        respond,
    };
    if zone.enqueue_update(pending).is_err() {
        warn!("zone '{}': update queue full", zone.name);
        return simple_response(message, Rcode::SERVFAIL);
    }

    let rcode = match tokio::time::timeout(UPDATE_VERDICT_TIMEOUT, verdict).await {
        Ok(Ok(rcode)) => rcode,
        _ => Rcode::SERVFAIL,
    };
    simple_response(message, rcode)
}

fn simple_response(request: &Message, rcode: Rcode) -> Vec<u8> {
    let mut response = MessageBuilder::respond_to(request);
    response.set_rcode(rcode);
    response.finish()
}

/// Sign a response when the request was signed.
fn sign_response(mut response: Vec<u8>, _request: &Message, verified: VerifiedTsig) -> Vec<u8> {
    if let Some((key, request_mac)) = verified {
        tsig::sign_message(
            &mut response,
            &key,
            unix_now(),
            SignContext::Response {
                request_mac: &request_mac,
            },
        );
    }
    response
}

fn formerr_response(wire: &[u8]) -> Option<Vec<u8>> {
    if wire.len() < 2 {
        return None;
    }
    let id = u16::from_be_bytes([wire[0], wire[1]]);
    let mut response = MessageBuilder::new(
        id,
        herald_wire::Flags {
            qr: true,
            rcode: Rcode::FORMERR,
            ..Default::default()
        },
    );
    response.set_rcode(Rcode::FORMERR);
    Some(response.finish())
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AclEntryConfig, ZoneConfig};
    use herald_wire::{Class, Flags, Name, Question, Rdata, Record, Serial};
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn center_with_updatable_zone() -> Arc<Center> {
        let center = Center::for_tests();
        let mut config = ZoneConfig::minimal(name("example."));
        config.allow_update = vec![AclEntryConfig {
            addr: Some("127.0.0.0/8".parse().unwrap()),
            key: None,
        }];
        center::add_zone(&center, config).unwrap();
        center
    }

    fn update_wire(owner: &str) -> Vec<u8> {
        let mut builder = MessageBuilder::new(
            42,
            Flags {
                opcode: Opcode::UPDATE,
                ..Default::default()
            },
        );
        builder.push_question(&Question::new(name("example."), Rtype::SOA, Class::IN));
        builder.push_record(
            herald_wire::Section::Authority,
            &Record::new(
                name(owner),
                Class::IN,
                3600,
                Rdata::A("192.0.2.1".parse().unwrap()),
            ),
        );
        builder.finish()
    }

    #[tokio::test]
    async fn update_roundtrip_through_dispatch() {
        let center = center_with_updatable_zone();
        let responses = handle_packet(&center, &update_wire("a.example."), "127.0.0.1".parse().unwrap(), false).await;
        assert_eq!(responses.len(), 1);
        let parsed = parse_message(&responses[0]).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::NOERROR);

        let zone = center::get_zone(&center, &name("example.")).unwrap();
        assert_eq!(zone.serial(), Some(Serial(1)));
    }

    #[tokio::test]
    async fn update_from_stranger_is_refused() {
        let center = center_with_updatable_zone();
        let responses = handle_packet(&center, &update_wire("a.example."), "192.0.2.99".parse().unwrap(), false).await;
        let parsed = parse_message(&responses[0]).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::REFUSED);

        let zone = center::get_zone(&center, &name("example.")).unwrap();
        assert_eq!(zone.serial(), Some(Serial(0)));
    }

    #[tokio::test]
    async fn signed_update_with_stale_time_is_badtime() {
        let center = center_with_updatable_zone();
        let key = tsig::Key::new(
            name("update-key."),
            tsig::Algorithm::HmacSha256,
            b"0123456789abcdef0123456789abcdef".to_vec(),
        );
        center.tsig.insert(key.clone());

        // Sign 600 seconds in the past; the fudge is 300.
        let mut wire = update_wire("a.example.");
        tsig::sign_message(&mut wire, &key, unix_now() - 600, SignContext::Request);

        let responses = handle_packet(&center, &wire, "127.0.0.1".parse().unwrap(), false).await;
        let parsed = parse_message(&responses[0]).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::NOTAUTH);
        let tsig = parsed.tsig.expect("BADTIME responses are signed");
        assert_eq!(tsig.data.error, herald_wire::TsigRcode::BADTIME);

        // And nothing was published.
        let zone = center::get_zone(&center, &name("example.")).unwrap();
        assert_eq!(zone.serial(), Some(Serial(0)));
    }

    #[tokio::test]
    async fn query_for_foreign_zone_is_refused() {
        let center = center_with_updatable_zone();
        let mut builder = MessageBuilder::new(1, Flags::default());
        builder.push_question(&Question::new(name("www.elsewhere."), Rtype::A, Class::IN));
        let responses = handle_packet(&center, &builder.finish(), "127.0.0.1".parse().unwrap(), true).await;
        let parsed = parse_message(&responses[0]).unwrap();
        assert_eq!(parsed.flags.rcode, Rcode::REFUSED);
    }
}
