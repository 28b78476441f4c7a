//! The remote-control channel.
//!
//! Control commands travel as DNS queries with QCLASS CH and a QNAME of
//! `<command>.knot.`, over a UNIX or TCP stream socket with standard DNS
//! framing.  Zone arguments ride as NS records in the authority section;
//! replies come back as TXT text chunked into 255-octet strings and 16 KiB
//! messages.  TSIG authenticates callers against the control key; over a
//! UNIX socket, filesystem permissions may stand in for it.

use std::fmt;
use std::io;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use herald_wire::tsig::{self, SignContext};
use herald_wire::{
    parse_message, Class, Message, MessageBuilder, Name, Rcode, Rdata, Record, Section,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info, warn};

use crate::center::{self, Center};
use crate::log::Logger;
use crate::util::unix_now;
use crate::zone::events::{EventKind, When};

/// The realm commands live under; the leftmost QNAME label is the command.
const CONTROL_REALM: &str = "knot.";

/// The per-read deadline on control sessions.
const READ_DEADLINE: Duration = Duration::from_secs(5);

/// The size cap on one reply message.
const REPLY_MESSAGE_LIMIT: usize = 16 * 1024;

//----------- Command ----------------------------------------------------------

/// The closed set of control commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Stop,
    Reload,
    Refresh,
    Retransfer,
    Status,
    Zonestatus,
    Flush,
    Signzone,
}

impl Command {
    /// Parse a command out of a control QNAME.
    pub fn from_qname(qname: &Name) -> Option<Self> {
        let realm: Name = CONTROL_REALM.parse().expect("the realm is a valid name");
        let parent = qname.parent()?;
        if parent != realm {
            return None;
        }
        match qname.first_label() {
            b"stop" => Some(Self::Stop),
            b"reload" => Some(Self::Reload),
            b"refresh" => Some(Self::Refresh),
            b"retransfer" => Some(Self::Retransfer),
            b"status" => Some(Self::Status),
            b"zonestatus" => Some(Self::Zonestatus),
            b"flush" => Some(Self::Flush),
            b"signzone" => Some(Self::Signzone),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Reload => "reload",
            Self::Refresh => "refresh",
            Self::Retransfer => "retransfer",
            Self::Status => "status",
            Self::Zonestatus => "zonestatus",
            Self::Flush => "flush",
            Self::Signzone => "signzone",
        })
    }
}

//----------- Execution --------------------------------------------------------

/// What a command did.
#[derive(Debug)]
pub struct CommandOutcome {
    /// Human-readable reply lines.
    pub lines: Vec<String>,

    /// The RCODE of the reply.
    pub rcode: Rcode,

    /// Whether the host process should terminate.
    pub terminate: bool,
}

impl CommandOutcome {
    fn ok(lines: Vec<String>) -> Self {
        Self {
            lines,
            rcode: Rcode::NOERROR,
            terminate: false,
        }
    }

    fn rcode(rcode: Rcode) -> Self {
        Self {
            lines: Vec::new(),
            rcode,
            terminate: false,
        }
    }
}

/// Execute a parsed control message.
pub fn execute(
    center: &Arc<Center>,
    logger: Option<&'static Logger>,
    message: &Message,
) -> CommandOutcome {
    let Some(question) = message.question() else {
        return CommandOutcome::rcode(Rcode::FORMERR);
    };
    if question.qclass != Class::CH {
        return CommandOutcome::rcode(Rcode::FORMERR);
    }
    let Some(command) = Command::from_qname(&question.qname) else {
        return CommandOutcome::rcode(Rcode::FORMERR);
    };

    // Zone arguments: NS records in the authority section, each naming a
    // zone in its RDATA.
    let args: Vec<Name> = message
        .authorities
        .iter()
        .filter_map(|record| match &record.rdata {
            Rdata::Ns(name) => Some(name.clone()),
            _ => None,
        })
        .collect();

    info!("control: '{command}' ({} zone arguments)", args.len());
    match command {
        Command::Stop => CommandOutcome {
            lines: vec!["stopping".into()],
            rcode: Rcode::NOERROR,
            terminate: true,
        },
        Command::Reload => reload(center, logger),
        Command::Refresh => for_zones(center, &args, |zone| {
            if !zone.is_secondary() {
                return Err("not a secondary zone");
            }
            zone.scheduler.schedule(EventKind::Refresh, When::Now);
            Ok(())
        }),
        Command::Retransfer => for_zones(center, &args, |zone| {
            if !zone.is_secondary() {
                return Err("not a secondary zone");
            }
            zone.force_axfr.store(true, AtomicOrdering::Relaxed);
            zone.scheduler.schedule(EventKind::Transfer, When::Now);
            Ok(())
        }),
        Command::Status => CommandOutcome::ok(vec![format!(
            "up, {} zones",
            center::zones(center).len()
        )]),
        Command::Zonestatus => {
            let lines = center::zones(center)
                .iter()
                .filter(|zone| args.is_empty() || args.contains(&zone.name))
                .map(|zone| zone_status_line(zone))
                .collect();
            CommandOutcome::ok(lines)
        }
        Command::Flush => for_zones(center, &args, |zone| {
            zone.scheduler.schedule(EventKind::Flush, When::Now);
            Ok(())
        }),
        Command::Signzone => {
            if args.is_empty() {
                // Re-signing everything must be asked for zone by zone.
                return CommandOutcome::rcode(Rcode::FORMERR);
            }
            for_zones(center, &args, |zone| {
                if zone.config.load().dnssec.is_none() {
                    return Err("DNSSEC is not enabled");
                }
                zone.force_resign.store(true, AtomicOrdering::Relaxed);
                zone.scheduler.schedule(EventKind::Dnssec, When::Now);
                Ok(())
            })
        }
    }
}

fn reload(center: &Arc<Center>, logger: Option<&'static Logger>) -> CommandOutcome {
    let path = {
        let path = center
            .config_path
            .lock()
            .expect("config path lock is never poisoned");
        path.clone()
    };
    let Some(path) = path else {
        return CommandOutcome {
            lines: vec!["no configuration file to reload".into()],
            rcode: Rcode::SERVFAIL,
            terminate: false,
        };
    };
    match crate::config::Config::load(&path) {
        Ok(config) => {
            if let Some(logger) = logger {
                if let Err(err) = logger.apply(&config.logging) {
                    warn!("reload: could not apply logging config: {err}");
                }
            }
            match center::apply_config(center, config) {
                Ok(()) => CommandOutcome::ok(vec![format!("reloaded '{path}'")]),
                Err(err) => CommandOutcome {
                    lines: vec![err],
                    rcode: Rcode::SERVFAIL,
                    terminate: false,
                },
            }
        }
        Err(err) => CommandOutcome {
            lines: vec![err],
            rcode: Rcode::SERVFAIL,
            terminate: false,
        },
    }
}

/// Apply an operation to the listed zones, or all of them.
///
/// A zone the operation rejects is reported and turns the reply into
/// SERVFAIL, but the remaining zones are still processed.
fn for_zones(
    center: &Arc<Center>,
    args: &[Name],
    operation: impl Fn(&Arc<crate::zone::Zone>) -> Result<(), &'static str>,
) -> CommandOutcome {
    let mut lines = Vec::new();
    let mut rcode = Rcode::NOERROR;

    if args.is_empty() {
        for zone in center::zones(center) {
            if let Err(reason) = operation(&zone) {
                lines.push(format!("{}: {reason}", zone.name));
                rcode = Rcode::SERVFAIL;
            }
        }
    } else {
        for name in args {
            match center::get_zone(center, name) {
                Some(zone) => {
                    if let Err(reason) = operation(&zone) {
                        lines.push(format!("{name}: {reason}"));
                        rcode = Rcode::SERVFAIL;
                    }
                }
                None => {
                    lines.push(format!("{name}: no such zone"));
                    rcode = Rcode::SERVFAIL;
                }
            }
        }
    }

    CommandOutcome {
        lines,
        rcode,
        terminate: false,
    }
}

/// One line of `zonestatus` output.
fn zone_status_line(zone: &Arc<crate::zone::Zone>) -> String {
    let kind = if zone.is_secondary() { "slave" } else { "master" };
    let serial = match zone.serial() {
        Some(serial) => serial.to_string(),
        None => "none".into(),
    };
    let next_event = match zone.scheduler.next_due() {
        Some((kind, due)) => {
            let in_secs = due
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_default()
                .as_secs();
            format!("{kind} in {in_secs}s")
        }
        None => "idle".into(),
    };
    let dnssec = match (zone.config.load().dnssec.is_some(), zone.resign_at()) {
        (false, _) => "unsigned".into(),
        (true, None) => "signed".into(),
        (true, Some(at)) => {
            let now = unix_now();
            format!("re-sign in {}s", at.saturating_sub(now))
        }
    };
    format!("{}\ttype={kind} | serial={serial} | {next_event} | {dnssec}", zone.name)
}

//----------- The server -------------------------------------------------------

/// Run the control listener until `stop` arrives or shutdown is signaled.
pub async fn serve(center: Arc<Center>, logger: Option<&'static Logger>) -> io::Result<()> {
    let config = center.config();
    let control = config.control.clone();

    if let Some(path) = &control.listen {
        if path.as_std_path().exists() {
            let _ = std::fs::remove_file(path);
        }
        let listener = UnixListener::bind(path)?;
        // Group-accessible, world-inaccessible (umask 0007).
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;
        info!("control channel on '{path}'");

        let mut shutdown = center.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    if session(&center, logger, stream, &control.key).await {
                        center.initiate_shutdown();
                        return Ok(());
                    }
                }
            }
        }
    } else if let Some(addr) = control.listen_tcp {
        if control.key.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a TCP control channel requires a TSIG key",
            ));
        }
        let listener = TcpListener::bind(addr).await?;
        info!("control channel on {addr}");

        let mut shutdown = center.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    if session(&center, logger, stream, &control.key).await {
                        center.initiate_shutdown();
                        return Ok(());
                    }
                }
            }
        }
    } else {
        debug!("control channel disabled");
        Ok(())
    }
}

/// Handle one control session.  Returns whether `stop` was executed.
async fn session<S: AsyncRead + AsyncWrite + Unpin>(
    center: &Arc<Center>,
    logger: Option<&'static Logger>,
    mut stream: S,
    key_name: &Option<Name>,
) -> bool {
    loop {
        let request = match read_framed(&mut stream).await {
            Ok(Some(wire)) => wire,
            Ok(None) => return false,
            Err(err) => {
                debug!("control session ended: {err}");
                return false;
            }
        };
        let message = match parse_message(&request) {
            Ok(message) => message,
            Err(err) => {
                debug!("unparseable control message: {err}");
                let responses = vec![error_response(&request)];
                let _ = write_all_framed(&mut stream, &responses).await;
                continue;
            }
        };

        // Authenticate.  With a configured key, the request must verify
        // against it; without one (UNIX socket), unsigned requests pass.
        let mut verified = None;
        if let Some(key_name) = key_name {
            let Some(key) = center.tsig.get(key_name) else {
                warn!("control key '{key_name}' is not in the key store");
                let responses =
                    build_responses(&message, Rcode::SERVFAIL, &[], None);
                let _ = write_all_framed(&mut stream, &responses).await;
                continue;
            };
            match tsig::verify_message(&request, &message, &key, unix_now(), SignContext::Request)
            {
                Ok(v) => verified = Some((key, v.mac)),
                Err(err) => {
                    warn!("control authentication failed: {err}");
                    let mut response = MessageBuilder::respond_to(&message);
                    response.set_rcode(Rcode::NOTAUTH);
                    let mut wire = response.finish();
                    match (err, message.tsig.as_ref()) {
                        (tsig::TsigError::BadTime, Some(request_tsig)) => {
                            tsig::sign_badtime_error(&mut wire, &key, request_tsig, unix_now());
                        }
                        (other, Some(request_tsig)) => {
                            tsig::append_unsigned_error(&mut wire, request_tsig, other.tsig_rcode());
                        }
                        _ => {}
                    }
                    let _ = write_all_framed(&mut stream, &[wire]).await;
                    continue;
                }
            }
        }

        let outcome = execute(center, logger, &message);
        let responses = build_responses(&message, outcome.rcode, &outcome.lines, verified);
        if write_all_framed(&mut stream, &responses).await.is_err() {
            return outcome.terminate;
        }
        if outcome.terminate {
            return true;
        }
    }
}

/// A bare FORMERR reply for requests that did not even parse.
fn error_response(request: &[u8]) -> Vec<u8> {
    let id = if request.len() >= 2 {
        u16::from_be_bytes([request[0], request[1]])
    } else {
        0
    };
    let mut response = MessageBuilder::new(
        id,
        herald_wire::Flags {
            qr: true,
            rcode: Rcode::FORMERR,
            ..Default::default()
        },
    );
    response.set_rcode(Rcode::FORMERR);
    response.finish()
}

/// Build the reply messages: text lines as TXT records in the authority
/// section, chunked into 255-octet strings and 16 KiB messages.
fn build_responses(
    request: &Message,
    rcode: Rcode,
    lines: &[String],
    verified: Option<(Arc<tsig::Key>, Vec<u8>)>,
) -> Vec<Vec<u8>> {
    let owner = request
        .question()
        .map(|question| question.qname.clone())
        .unwrap_or_else(Name::root);

    let mut unsigned = Vec::new();
    let mut current = start_reply(request, rcode);
    for line in lines {
        let chunks: Vec<Box<[u8]>> = line
            .as_bytes()
            .chunks(255)
            .map(|chunk| chunk.to_vec().into())
            .collect();
        let record = Record::new(owner.clone(), Class::CH, 0, Rdata::Txt(chunks));
        if !current.push_record(Section::Authority, &record) {
            // This message is full; the reply continues in the next one.
            unsigned.push(current.finish());
            current = start_reply(request, rcode);
            let pushed = current.push_record(Section::Authority, &record);
            debug_assert!(pushed, "a single line always fits an empty message");
        }
    }
    unsigned.push(current.finish());

    match verified {
        None => unsigned,
        Some((key, request_mac)) => {
            // Sign the reply stream, chaining from the request MAC.
            let mut prior = request_mac;
            let mut first = true;
            unsigned
                .into_iter()
                .map(|mut wire| {
                    let context = if first {
                        SignContext::Response { request_mac: &prior }
                    } else {
                        SignContext::Subsequent { prior_mac: &prior }
                    };
                    let mac = tsig::sign_message(&mut wire, &key, unix_now(), context);
                    prior = mac;
                    first = false;
                    wire
                })
                .collect()
        }
    }
}

fn start_reply(request: &Message, rcode: Rcode) -> MessageBuilder {
    let mut builder = MessageBuilder::respond_to(request);
    builder.set_limit(REPLY_MESSAGE_LIMIT);
    builder.set_rcode(rcode);
    builder
}

async fn read_framed<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<Vec<u8>>> {
    let mut length = [0u8; 2];
    match tokio::time::timeout(READ_DEADLINE, stream.read_exact(&mut length)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "control read")),
    }
    let mut payload = vec![0u8; u16::from_be_bytes(length) as usize];
    match tokio::time::timeout(READ_DEADLINE, stream.read_exact(&mut payload)).await {
        Ok(Ok(_)) => Ok(Some(payload)),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "control read")),
    }
}

async fn write_all_framed<S: AsyncWrite + Unpin>(
    stream: &mut S,
    messages: &[Vec<u8>],
) -> io::Result<()> {
    for message in messages {
        stream.write_all(&(message.len() as u16).to_be_bytes()).await?;
        stream.write_all(message).await?;
    }
    stream.flush().await
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MasterConfig, ZoneConfig};
    use herald_wire::{Flags, Question, Rtype};
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn control_query(command: &str, zones: &[&str]) -> Message {
        let mut message = Message {
            id: 11,
            flags: Flags::default(),
            ..Default::default()
        };
        message.questions.push(Question::new(
            name(&format!("{command}.knot.")),
            Rtype::TXT,
            Class::CH,
        ));
        for zone in zones {
            message.authorities.push(Record::new(
                name(&format!("{command}.knot.")),
                Class::CH,
                0,
                Rdata::Ns(name(zone)),
            ));
        }
        message
    }

    fn center_with_secondary() -> Arc<Center> {
        let center = Center::for_tests();
        let mut config = ZoneConfig::minimal(name("example."));
        config.masters.push(MasterConfig {
            addr: "192.0.2.1:53".parse().unwrap(),
            key: None,
            source: None,
        });
        center::add_zone(&center, config).unwrap();
        center
    }

    #[test]
    fn command_names_parse() {
        assert_eq!(Command::from_qname(&name("stop.knot.")), Some(Command::Stop));
        assert_eq!(
            Command::from_qname(&name("zonestatus.knot.")),
            Some(Command::Zonestatus)
        );
        assert_eq!(Command::from_qname(&name("bogus.knot.")), None);
        assert_eq!(Command::from_qname(&name("stop.elsewhere.")), None);
        assert_eq!(Command::from_qname(&name("stop.")), None);
    }

    #[tokio::test]
    async fn refresh_schedules_for_listed_zones() {
        let center = center_with_secondary();
        let outcome = execute(&center, None, &control_query("refresh", &["example."]));
        assert_eq!(outcome.rcode, Rcode::NOERROR);
        assert!(!outcome.terminate);

        let zone = center::get_zone(&center, &name("example.")).unwrap();
        assert!(zone.scheduler.pending(EventKind::Refresh).is_some());
    }

    #[tokio::test]
    async fn refresh_on_primary_is_servfail() {
        let center = Center::for_tests();
        center::add_zone(&center, ZoneConfig::minimal(name("example."))).unwrap();

        let outcome = execute(&center, None, &control_query("refresh", &["example."]));
        assert_eq!(outcome.rcode, Rcode::SERVFAIL);
        assert_eq!(outcome.lines.len(), 1);
    }

    #[tokio::test]
    async fn retransfer_forces_axfr() {
        let center = center_with_secondary();
        let outcome = execute(&center, None, &control_query("retransfer", &["example."]));
        assert_eq!(outcome.rcode, Rcode::NOERROR);

        let zone = center::get_zone(&center, &name("example.")).unwrap();
        assert!(zone.force_axfr.load(AtomicOrdering::Relaxed));
        assert!(zone.scheduler.pending(EventKind::Transfer).is_some());
    }

    #[tokio::test]
    async fn stop_terminates() {
        let center = Center::for_tests();
        let outcome = execute(&center, None, &control_query("stop", &[]));
        assert!(outcome.terminate);
    }

    #[tokio::test]
    async fn signzone_requires_zone_list() {
        let center = Center::for_tests();
        let outcome = execute(&center, None, &control_query("signzone", &[]));
        assert_eq!(outcome.rcode, Rcode::FORMERR);
    }

    #[tokio::test]
    async fn zonestatus_formats_lines() {
        let center = center_with_secondary();
        let outcome = execute(&center, None, &control_query("zonestatus", &[]));
        assert_eq!(outcome.lines.len(), 1);
        let line = &outcome.lines[0];
        assert!(line.starts_with("example.\ttype=slave"), "line: {line}");
        assert!(line.contains("| serial="), "line: {line}");
    }

    #[tokio::test]
    async fn replies_chunk_into_txt() {
        let request = control_query("zonestatus", &[]);
        let long_line = "x".repeat(600);
        let responses = build_responses(&request, Rcode::NOERROR, &[long_line], None);
        assert_eq!(responses.len(), 1);

        let parsed = parse_message(&responses[0]).unwrap();
        assert_eq!(parsed.authorities.len(), 1);
        let Rdata::Txt(ref strings) = parsed.authorities[0].rdata else {
            panic!("TXT rdata expected");
        };
        // 600 octets chunk into 255 + 255 + 90.
        assert_eq!(strings.len(), 3);
        assert_eq!(strings[0].len(), 255);
        assert_eq!(strings[2].len(), 90);
    }

    #[tokio::test]
    async fn wrong_class_is_formerr() {
        let center = Center::for_tests();
        let mut request = control_query("status", &[]);
        request.questions[0].qclass = Class::IN;
        let outcome = execute(&center, None, &request);
        assert_eq!(outcome.rcode, Rcode::FORMERR);
    }
}
