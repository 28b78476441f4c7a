//! The transfer client.
//!
//! REFRESH probes the master's SOA over UDP (falling back to TCP on
//! truncation); TRANSFER pulls the zone over one TCP connection.  The
//! response stream drives a small state machine: we do not know whether an
//! IXFR request will be answered incrementally, with a full zone, or with a
//! lone SOA, until the records start arriving.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use herald_wire::tsig::{self, SignContext};
use herald_wire::{
    parse_message, Class, Flags, Message, MessageBuilder, Name, Opcode, Question, Rcode, Rdata,
    Record, Rtype, Section, Serial,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, info};

use crate::center::Center;
use crate::config::MasterConfig;
use crate::util::unix_now;
use crate::xfr::{XfrError, TRANSFER_DEADLINE};
use crate::zone::changeset::Changeset;
use crate::zone::contents::ZoneContents;
use crate::zone::Zone;

/// How long a lone SOA probe may take.
const SOA_PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

//----------- Refresh ----------------------------------------------------------

/// The verdict of a refresh probe.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The master has nothing newer.
    UpToDate,

    /// The master is ahead; a transfer is due.
    Outdated {
        /// The serial the master advertised.
        master_serial: Serial,
    },

    /// This zone has no master; refresh does not apply.
    NoMaster,

    /// The probe failed.
    Failed(XfrError),
}

/// Probe the master's SOA and compare serials.
pub async fn check_refresh(zone: &Arc<Zone>, center: &Arc<Center>) -> RefreshOutcome {
    let config = zone.config.load_full();
    let Some(master) = config.masters.first().cloned() else {
        return RefreshOutcome::NoMaster;
    };

    match probe_soa(&zone.name, &master, center).await {
        Ok(master_serial) => match zone.serial() {
            Some(local) if !master_serial.newer_than(local) => RefreshOutcome::UpToDate,
            _ => RefreshOutcome::Outdated { master_serial },
        },
        Err(err) => RefreshOutcome::Failed(err),
    }
}

/// Ask a master for the zone's SOA; returns the advertised serial.
async fn probe_soa(
    zone: &Name,
    master: &MasterConfig,
    center: &Arc<Center>,
) -> Result<Serial, XfrError> {
    let mut request = MessageBuilder::new(
        rand::random(),
        Flags {
            opcode: Opcode::QUERY,
            ..Default::default()
        },
    );
    request.push_question(&Question::new(zone.clone(), Rtype::SOA, Class::IN));
    let mut wire = request.finish();

    let key = lookup_key(master, center)?;
    let request_mac = key
        .as_ref()
        .map(|key| tsig::sign_message(&mut wire, key, unix_now(), SignContext::Request));

    // UDP first; a truncated answer moves us to TCP.
    let response = tokio::time::timeout(SOA_PROBE_TIMEOUT, async {
        let local: SocketAddr = match (master.source, master.addr.ip()) {
            (Some(source), _) => (source, 0).into(),
            (None, IpAddr::V4(_)) => "0.0.0.0:0".parse().expect("a valid socket address"),
            (None, IpAddr::V6(_)) => "[::]:0".parse().expect("a valid socket address"),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.send_to(&wire, master.addr).await?;
        let mut buffer = vec![0u8; 4096];
        let (length, _) = socket.recv_from(&mut buffer).await?;
        buffer.truncate(length);

        let message = parse_message(&buffer)?;
        if message.flags.tc {
            // Retry the probe over TCP.
            let mut stream = connect(master).await?;
            write_framed(&mut stream, &wire).await?;
            let framed = read_framed(&mut stream).await?;
            return Ok::<_, XfrError>(framed);
        }
        Ok(buffer)
    })
    .await
    .map_err(|_| XfrError::Timeout)??;

    let message = parse_message(&response)?;
    if let (Some(key), Some(request_mac)) = (&key, &request_mac) {
        tsig::verify_message(
            &response,
            &message,
            key,
            unix_now(),
            SignContext::Response { request_mac },
        )?;
    }
    if message.flags.rcode != Rcode::NOERROR {
        return Err(XfrError::Rcode(message.flags.rcode));
    }

    message
        .answers
        .iter()
        .find_map(|record| match &record.rdata {
            Rdata::Soa(soa) if &record.owner == zone => Some(soa.serial),
            _ => None,
        })
        .ok_or(XfrError::Malformed("SOA answer missing"))
}

//----------- Transfer ---------------------------------------------------------

/// What a completed transfer produced.
#[derive(Debug)]
pub enum TransferOutcome {
    /// A full new version of the zone.
    Full(ZoneContents),

    /// A chain of changesets to apply on top of the current version.
    Incremental(Vec<Changeset>),

    /// The master answered with a lone SOA: nothing newer exists.
    UpToDate,
}

/// Transfer the zone from its master.
///
/// IXFR is chosen when a local serial exists and a full transfer was not
/// forced.  A refused or unusable IXFR falls back to AXFR within the same
/// call, preserving the retry path of the transfer event.
pub async fn transfer(zone: &Arc<Zone>, center: &Arc<Center>) -> Result<TransferOutcome, XfrError> {
    let config = zone.config.load_full();
    let master = config
        .masters
        .first()
        .cloned()
        .ok_or(XfrError::NoMaster)?;

    let force_axfr = zone.force_axfr.load(std::sync::atomic::Ordering::Relaxed);
    let local_serial = if force_axfr { None } else { zone.serial() };

    match run_transfer(zone, center, &master, local_serial).await {
        Err(err) if local_serial.is_some() && ixfr_fallback(&err) => {
            info!(
                "zone '{}': IXFR unavailable ({err}); falling back to AXFR",
                zone.name
            );
            run_transfer(zone, center, &master, None).await
        }
        other => other,
    }
}

/// Whether an IXFR failure should be retried as AXFR.
fn ixfr_fallback(err: &XfrError) -> bool {
    matches!(
        err,
        XfrError::Rcode(Rcode::REFUSED)
            | XfrError::Rcode(Rcode::NOTIMP)
            | XfrError::Malformed(_)
            | XfrError::Changeset(_)
    )
}

async fn run_transfer(
    zone: &Arc<Zone>,
    center: &Arc<Center>,
    master: &MasterConfig,
    local_serial: Option<Serial>,
) -> Result<TransferOutcome, XfrError> {
    let qtype = match local_serial {
        Some(_) => Rtype::IXFR,
        None => Rtype::AXFR,
    };
    debug!("zone '{}': starting {qtype} from {}", zone.name, master.addr);

    let mut request = MessageBuilder::new(
        rand::random(),
        Flags {
            opcode: Opcode::QUERY,
            ..Default::default()
        },
    );
    request.push_question(&Question::new(zone.name.clone(), qtype, Class::IN));
    if local_serial.is_some() {
        // IXFR carries our current SOA in the authority section.
        let contents = zone.contents().ok_or(XfrError::Malformed("no local copy"))?;
        request.push_record(Section::Authority, &contents.soa_record());
    }
    let mut wire = request.finish();

    let key = lookup_key(master, center)?;
    let request_mac = key
        .as_ref()
        .map(|key| tsig::sign_message(&mut wire, key, unix_now(), SignContext::Request));

    tokio::time::timeout(TRANSFER_DEADLINE, async {
        let mut stream = connect(master).await?;
        write_framed(&mut stream, &wire).await?;

        let mut verifier = StreamVerifier::new(key, request_mac);
        let mut parser = StreamParser::new(zone.name.clone(), local_serial);
        loop {
            let payload = read_framed(&mut stream).await?;
            let message = parse_message(&payload)?;
            if message.flags.rcode != Rcode::NOERROR {
                return Err(XfrError::Rcode(message.flags.rcode));
            }
            verifier.verify(&payload, &message)?;

            for record in &message.answers {
                parser.feed(record.clone())?;
            }
            if let Some(outcome) = parser.take_outcome() {
                verifier.finish()?;
                return Ok(outcome);
            }
        }
    })
    .await
    .map_err(|_| XfrError::Timeout)?
}

fn lookup_key(
    master: &MasterConfig,
    center: &Arc<Center>,
) -> Result<Option<Arc<tsig::Key>>, XfrError> {
    match &master.key {
        Some(name) => center.tsig.get(name).map(Some).ok_or(XfrError::UnknownKey),
        None => Ok(None),
    }
}

async fn connect(master: &MasterConfig) -> Result<TcpStream, XfrError> {
    let socket = match master.addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(source) = master.source {
        socket.bind((source, 0).into())?;
    }
    Ok(socket.connect(master.addr).await?)
}

async fn write_framed(stream: &mut TcpStream, wire: &[u8]) -> Result<(), XfrError> {
    stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
    stream.write_all(wire).await?;
    Ok(())
}

async fn read_framed(stream: &mut TcpStream) -> Result<Vec<u8>, XfrError> {
    let mut length = [0u8; 2];
    stream.read_exact(&mut length).await?;
    let mut payload = vec![0u8; u16::from_be_bytes(length) as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

//----------- StreamVerifier ---------------------------------------------------

/// TSIG verification across a response stream.
///
/// The first signed message chains from the request MAC, every later one
/// from its predecessor.  When a key is configured we require every message
/// to be signed, which is what our own server side produces.
struct StreamVerifier {
    key: Option<Arc<tsig::Key>>,
    prior_mac: Option<Vec<u8>>,
    first: bool,
}

impl StreamVerifier {
    fn new(key: Option<Arc<tsig::Key>>, request_mac: Option<Vec<u8>>) -> Self {
        Self {
            key,
            prior_mac: request_mac,
            first: true,
        }
    }

    fn verify(&mut self, wire: &[u8], message: &Message) -> Result<(), XfrError> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        let prior = self
            .prior_mac
            .as_deref()
            .expect("a signed request always has a MAC");
        let context = if self.first {
            SignContext::Response { request_mac: prior }
        } else {
            SignContext::Subsequent { prior_mac: prior }
        };
        let verified = tsig::verify_message(wire, message, key, unix_now(), context)?;
        self.prior_mac = Some(verified.mac);
        self.first = false;
        Ok(())
    }

    fn finish(&self) -> Result<(), XfrError> {
        if self.key.is_some() && self.first {
            // A keyed transfer where nothing was ever signed.
            return Err(XfrError::Tsig(herald_wire::tsig::TsigError::BadSig));
        }
        Ok(())
    }
}

//----------- StreamParser -----------------------------------------------------

/// The transfer flavors a response stream can turn out to be.
enum TransferState {
    /// Nothing seen yet; the first record must be the master's SOA.
    WaitSoa,

    /// The stream is a full zone; accumulate until the SOA repeats.
    RunningAxfr { records: Vec<Record> },

    /// The stream answered an IXFR request; whether it is differential or
    /// a full zone is decided by the second record (RFC 1995 §4).
    RunningIxfr {
        /// The header SOA, kept in case the stream turns out to be a full
        /// zone.
        header: Record,

        /// The serial the stream ends at.
        target: Serial,

        /// The changeset being assembled.
        current: Option<Changeset>,

        /// Completed changesets.
        changesets: Vec<Changeset>,
    },

    /// The stream is complete.
    Finalizing(TransferOutcome),
}

/// Reassembles a transfer stream into its outcome.
struct StreamParser {
    origin: Name,
    local_serial: Option<Serial>,
    state: TransferState,
}

impl StreamParser {
    fn new(origin: Name, local_serial: Option<Serial>) -> Self {
        Self {
            origin,
            local_serial,
            state: TransferState::WaitSoa,
        }
    }

    fn feed(&mut self, record: Record) -> Result<(), XfrError> {
        // The state is advanced by value; a borrow of the old state cannot
        // outlive its replacement.
        let state = std::mem::replace(&mut self.state, TransferState::WaitSoa);
        self.state = self.advance(state, record)?;
        Ok(())
    }

    fn advance(
        &mut self,
        state: TransferState,
        record: Record,
    ) -> Result<TransferState, XfrError> {
        let is_apex_soa = record.rtype() == Rtype::SOA && record.owner == self.origin;
        Ok(match state {
            TransferState::WaitSoa => {
                if !is_apex_soa {
                    return Err(XfrError::Malformed("stream does not start with the SOA"));
                }
                let Rdata::Soa(ref soa) = record.rdata else {
                    unreachable!("SOA records hold SOA data");
                };
                let target = soa.serial;
                if self.local_serial == Some(target) {
                    // Already current; expect nothing further.
                    TransferState::Finalizing(TransferOutcome::UpToDate)
                } else if self.local_serial.is_some() {
                    // An IXFR request: the second record decides the shape.
                    TransferState::RunningIxfr {
                        header: record,
                        target,
                        current: None,
                        changesets: Vec::new(),
                    }
                } else {
                    TransferState::RunningAxfr {
                        records: vec![record],
                    }
                }
            }

            TransferState::RunningAxfr { mut records } => {
                if is_apex_soa {
                    // The trailing SOA closes the stream.
                    let contents = ZoneContents::from_records(self.origin.clone(), records)
                        .map_err(|_| XfrError::Malformed("transferred zone is inconsistent"))?;
                    TransferState::Finalizing(TransferOutcome::Full(contents))
                } else {
                    records.push(record);
                    TransferState::RunningAxfr { records }
                }
            }

            TransferState::RunningIxfr {
                header,
                target,
                mut current,
                mut changesets,
            } => {
                if is_apex_soa {
                    let Rdata::Soa(ref soa) = record.rdata else {
                        unreachable!("SOA records hold SOA data");
                    };
                    match current.take() {
                        None => {
                            if soa.serial == target && !changesets.is_empty() {
                                // Trailing SOA; the stream is complete.
                                return Ok(TransferState::Finalizing(
                                    TransferOutcome::Incremental(changesets),
                                ));
                            }
                            if soa.serial == target {
                                // The header repeated without differentials:
                                // nothing newer after all.
                                return Ok(TransferState::Finalizing(TransferOutcome::UpToDate));
                            }
                            // A differential opens, starting at our serial.
                            let mut changeset = Changeset::new();
                            changeset.soa_from = Some(record);
                            current = Some(changeset);
                        }
                        Some(mut changeset) if changeset.soa_to.is_none() => {
                            changeset.soa_to = Some(record);
                            current = Some(changeset);
                        }
                        Some(finished) => {
                            // The changeset is complete; this SOA either
                            // closes the stream or opens the next delta.
                            changesets.push(finished);
                            if soa.serial == target {
                                return Ok(TransferState::Finalizing(
                                    TransferOutcome::Incremental(changesets),
                                ));
                            }
                            let mut changeset = Changeset::new();
                            changeset.soa_from = Some(record);
                            current = Some(changeset);
                        }
                    }
                } else {
                    match current.as_mut() {
                        None if changesets.is_empty() => {
                            // A non-SOA record straight after the header:
                            // the master answered the IXFR with a full zone
                            // instead (RFC 1995 permits this).
                            return Ok(TransferState::RunningAxfr {
                                records: vec![header, record],
                            });
                        }
                        None => {
                            return Err(XfrError::Malformed("record outside any differential"));
                        }
                        Some(changeset) => {
                            if changeset.soa_to.is_none() {
                                changeset.remove(record);
                            } else {
                                changeset.add(record);
                            }
                        }
                    }
                }
                TransferState::RunningIxfr {
                    header,
                    target,
                    current,
                    changesets,
                }
            }

            TransferState::Finalizing(_) => {
                return Err(XfrError::Malformed("records after the end of the stream"));
            }
        })
    }

    fn take_outcome(&mut self) -> Option<TransferOutcome> {
        match std::mem::replace(&mut self.state, TransferState::WaitSoa) {
            TransferState::Finalizing(outcome) => Some(outcome),
            other => {
                self.state = other;
                None
            }
        }
    }
}

//============ Tests ===========================================================
