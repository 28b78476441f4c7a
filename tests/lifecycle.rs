//! End-to-end exercises of the zone lifecycle: dynamic updates, transfer
//! fallback, signing, and the control channel, driven through the library
//! API with the zone event handlers invoked directly so every step is
//! deterministic.

use std::str::FromStr;
use std::sync::Arc;

use herald_wire::tsig::{self, SignContext};
use herald_wire::{
    parse_message, Class, Flags, Message, MessageBuilder, Name, Opcode, Question, Rcode, Rdata,
    Record, Rtype, Section, Serial, Soa,
};
use heraldd::center::{Center, ZoneByName};
use heraldd::config::{Config, DnssecConfig, MasterConfig, ZoneConfig};
use heraldd::zone::events::EventKind;
use heraldd::zone::{PendingUpdate, Zone, ZoneContents};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn test_center() -> Arc<Center> {
    let mut config: Config = toml::from_str("").unwrap();
    let dir = tempfile::tempdir().unwrap();
    config.journal_dir =
        camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    std::mem::forget(dir);
    Center::new(config).unwrap()
}

/// A zone wired up like `center::add_zone` would, but without an executor
/// task, so the tests drive every event by hand.
fn manual_zone(center: &Arc<Center>, config: ZoneConfig) -> Arc<Zone> {
    let zone = Arc::new(Zone::new(config));
    zone.open_journal(
        &center
            .config()
            .journal_dir
            .join(format!("{}", rand::random::<u64>())),
    );
    center
        .state
        .lock()
        .unwrap()
        .zones
        .insert(ZoneByName(zone.clone()));
    zone
}

fn soa_record(serial: u32) -> Record {
    Record::new(
        name("example."),
        Class::IN,
        3600,
        Rdata::Soa(Soa {
            mname: name("ns1.example."),
            rname: name("hostmaster.example."),
            serial: Serial(serial),
            refresh: 10800,
            retry: 3600,
            expire: 604800,
            minimum: 3600,
        }),
    )
}

fn update_query(prereqs: Vec<Record>, updates: Vec<Record>) -> Message {
    let mut message = Message {
        id: 4711,
        flags: Flags {
            opcode: Opcode::UPDATE,
            ..Default::default()
        },
        ..Default::default()
    };
    message
        .questions
        .push(Question::new(name("example."), Rtype::SOA, Class::IN));
    message.answers = prereqs;
    message.authorities = updates;
    message
}

fn a_record(owner: &str, addr: &str) -> Record {
    Record::new(
        name(owner),
        Class::IN,
        3600,
        Rdata::A(addr.parse().unwrap()),
    )
}

async fn run_update(zone: &Arc<Zone>, center: &Arc<Center>, query: Message) -> Rcode {
    let (tx, rx) = oneshot::channel();
    zone.enqueue_update(PendingUpdate {
        message: query,
        respond: tx,
    })
    .unwrap();
    zone.handle_event(EventKind::Update, center).await;
    rx.await.unwrap()
}

/// An empty zone takes a dynamic update: the serial moves from 0 to 1, the
/// record resolves, and the journal holds exactly the (0, 1) delta.
#[tokio::test]
async fn update_on_empty_zone() {
    let center = test_center();
    let zone = manual_zone(&center, ZoneConfig::minimal(name("example.")));
    zone.publish(ZoneContents::bootstrap(name("example.")));

    let rcode = run_update(
        &zone,
        &center,
        update_query(vec![], vec![a_record("a.example.", "192.0.2.1")]),
    )
    .await;
    assert_eq!(rcode, Rcode::NOERROR);

    let contents = zone.contents().unwrap();
    assert_eq!(contents.serial(), Serial(1));

    // The record answers.
    let mut query = Message::default();
    query
        .questions
        .push(Question::new(name("a.example."), Rtype::A, Class::IN));
    let response = heraldd::query::answer(&contents, &query, false);
    let parsed = parse_message(&response).unwrap();
    assert_eq!(parsed.flags.rcode, Rcode::NOERROR);
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.answers[0].ttl, 3600);
    assert_eq!(
        parsed.answers[0].rdata,
        Rdata::A("192.0.2.1".parse().unwrap())
    );

    // One journal entry, spanning 0 -> 1.
    let journal = zone.journal.lock().unwrap();
    assert_eq!(
        journal.as_ref().unwrap().window(),
        Some((Serial(0), Serial(1)))
    );
}

/// Two updates batch together; a failing prerequisite skips only its own
/// query and answers YXRRSET.
#[tokio::test]
async fn batched_updates_with_failing_prerequisite() {
    let center = test_center();
    let zone = manual_zone(&center, ZoneConfig::minimal(name("example.")));
    zone.publish(ZoneContents::bootstrap(name("example.")));

    let first = update_query(vec![], vec![a_record("b.example.", "192.0.2.2")]);
    // Prerequisite: "b.example. A" must not exist.  The first query in the
    // batch creates it, so this must fail.
    let second = update_query(
        vec![Record::new(
            name("b.example."),
            Class::NONE,
            0,
            Rdata::Unknown(Rtype::A, Box::default()),
        )],
        vec![a_record("c.example.", "192.0.2.3")],
    );

    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    zone.enqueue_update(PendingUpdate {
        message: first,
        respond: tx1,
    })
    .unwrap();
    zone.enqueue_update(PendingUpdate {
        message: second,
        respond: tx2,
    })
    .unwrap();
    zone.handle_event(EventKind::Update, &center).await;

    assert_eq!(rx1.await.unwrap(), Rcode::NOERROR);
    assert_eq!(rx2.await.unwrap(), Rcode::YXRRSET);

    let contents = zone.contents().unwrap();
    assert!(matches!(
        contents.find(&name("b.example.")),
        heraldd::zone::contents::Find::Answer(_)
    ));
    assert!(matches!(
        contents.find(&name("c.example.")),
        heraldd::zone::contents::Find::Nxdomain
    ));
}

/// A master that refuses IXFR: the client falls back to AXFR, the journal
/// is truncated for the rebase, and a NOTIFY is scheduled.
#[tokio::test]
async fn ixfr_refused_falls_back_to_axfr() {
    let center = test_center();

    // A toy master: refuses the IXFR connection, serves AXFR on the next.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let master_addr = listener.local_addr().unwrap();
    let master = tokio::spawn(async move {
        // First connection: IXFR -> REFUSED.
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_framed(&mut stream).await;
        let message = parse_message(&request).unwrap();
        assert_eq!(message.question().unwrap().qtype, Rtype::IXFR);
        let mut response = MessageBuilder::respond_to(&message);
        response.set_rcode(Rcode::REFUSED);
        write_framed(&mut stream, &response.finish()).await;

        // Second connection: AXFR -> the full zone at serial 9.
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_framed(&mut stream).await;
        let message = parse_message(&request).unwrap();
        assert_eq!(message.question().unwrap().qtype, Rtype::AXFR);
        let mut response = MessageBuilder::respond_to(&message);
        response.set_aa();
        response.push_record(Section::Answer, &soa_record(9));
        response.push_record(
            Section::Answer,
            &Record::new(name("example."), Class::IN, 3600, Rdata::Ns(name("ns1.example."))),
        );
        response.push_record(Section::Answer, &a_record("www.example.", "192.0.2.9"));
        response.push_record(Section::Answer, &soa_record(9));
        write_framed(&mut stream, &response.finish()).await;
    });

    let mut config = ZoneConfig::minimal(name("example."));
    config.masters.push(MasterConfig {
        addr: master_addr,
        key: None,
        source: None,
    });
    let zone = manual_zone(&center, config);

    // Local serial 5, with journal history that is about to be obsoleted.
    zone.publish(
        ZoneContents::from_records(
            name("example."),
            [
                soa_record(5),
                Record::new(name("example."), Class::IN, 3600, Rdata::Ns(name("ns1.example."))),
            ],
        )
        .unwrap(),
    );
    {
        let mut changeset =
            heraldd::zone::changeset::Changeset::between(soa_record(4), soa_record(5));
        changeset.add(a_record("old.example.", "192.0.2.4"));
        let mut journal = zone.journal.lock().unwrap();
        journal.as_mut().unwrap().store(&changeset).unwrap();
    }

    zone.handle_event(EventKind::Transfer, &center).await;
    master.await.unwrap();

    // The zone now matches the master.
    assert_eq!(zone.serial(), Some(Serial(9)));
    let contents = zone.contents().unwrap();
    assert!(matches!(
        contents.find(&name("www.example.")),
        heraldd::zone::contents::Find::Answer(_)
    ));

    // The journal was truncated and rebased.
    assert!(zone.journal.lock().unwrap().as_ref().unwrap().is_empty());

    // A NOTIFY is on its way.
    assert!(zone.scheduler.pending(EventKind::Notify).is_some());
}

async fn read_framed(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut length = [0u8; 2];
    stream.read_exact(&mut length).await.unwrap();
    let mut payload = vec![0u8; u16::from_be_bytes(length) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

async fn write_framed(stream: &mut tokio::net::TcpStream, wire: &[u8]) {
    stream
        .write_all(&(wire.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(wire).await.unwrap();
}

/// The RFC 8080 Ed25519 test key, as a zone-signing key.
const KEY_FILE: &str =
    "example. 3600 IN DNSKEY 256 3 15 l02Woi0iS8Aa25FQkUd9RMzZHJpBoRQwAQEX1SxZJA4=\n";
const PRIVATE_FILE: &str = "Private-key-format: v1.3\n\
     Algorithm: 15 (ED25519)\n\
     PrivateKey: ODIyNjAzODQ2MjgwODAxMjI2NDUxOTAyMDQxNDIyNjI=\n";

/// A signed zone takes a dynamic update to a non-DNSKEY RRset: the signer
/// patches incrementally, and the next DNSSEC event lands strictly before
/// any signature expires.
#[tokio::test]
async fn signed_update_is_incremental() {
    let center = test_center();

    let key_dir = tempfile::tempdir().unwrap();
    std::fs::write(key_dir.path().join("Kexample.+015+03613.key"), KEY_FILE).unwrap();
    std::fs::write(
        key_dir.path().join("Kexample.+015+03613.private"),
        PRIVATE_FILE,
    )
    .unwrap();

    let mut config = ZoneConfig::minimal(name("example."));
    config.dnssec = Some(DnssecConfig {
        key_dir: camino::Utf8PathBuf::from_path_buf(key_dir.path().to_path_buf()).unwrap(),
        sig_validity: std::time::Duration::from_secs(14 * 86400),
        sig_refresh: std::time::Duration::from_secs(7 * 86400),
    });
    let zone = manual_zone(&center, config);
    zone.publish(
        ZoneContents::from_records(
            name("example."),
            [
                soa_record(1),
                Record::new(name("example."), Class::IN, 3600, Rdata::Ns(name("ns1.example."))),
                a_record("www.example.", "192.0.2.1"),
            ],
        )
        .unwrap(),
    );

    // First DNSSEC event: the zone is unsigned, so this is the initial
    // full signing pass.
    zone.handle_event(EventKind::Dnssec, &center).await;
    let signed = zone.contents().unwrap();
    assert!(signed.is_signed());
    let www_sig_before = signed
        .node(&name("www.example."))
        .unwrap()
        .sigs_for(Rtype::A)
        .unwrap()
        .clone();

    // A dynamic update touching one name only.
    let rcode = run_update(
        &zone,
        &center,
        update_query(vec![], vec![a_record("mail.example.", "192.0.2.25")]),
    )
    .await;
    assert_eq!(rcode, Rcode::NOERROR);

    let after = zone.contents().unwrap();
    // The new name is signed and chained in.
    let mail = after.node(&name("mail.example.")).unwrap();
    assert!(mail.sigs_for(Rtype::A).is_some());
    assert!(mail.rrset(Rtype::NSEC).is_some());
    // The untouched name kept its exact signatures: the patch was
    // incremental.
    let www_sig_after = after
        .node(&name("www.example."))
        .unwrap()
        .sigs_for(Rtype::A)
        .unwrap();
    assert_eq!(&www_sig_before, www_sig_after);

    // The next signing pass is scheduled, before any signature expires.
    assert!(zone.scheduler.pending(EventKind::Dnssec).is_some());
    let resign_at = zone.resign_at().unwrap();
    let expiry_floor = heraldd::util::unix_now() + 14 * 86400 + 60;
    assert!(resign_at < expiry_floor);
}

/// `refresh.knot.` over the UNIX control socket, unsigned: accepted, and a
/// REFRESH is scheduled promptly for the targeted zones.
#[tokio::test]
async fn control_refresh_over_unix_socket() {
    let socket_dir = tempfile::tempdir().unwrap();
    let socket_path = socket_dir.path().join("control.sock");

    let mut config: Config = toml::from_str("").unwrap();
    let journal_dir = tempfile::tempdir().unwrap();
    config.journal_dir =
        camino::Utf8PathBuf::from_path_buf(journal_dir.path().to_path_buf()).unwrap();
    config.control.listen =
        Some(camino::Utf8PathBuf::from_path_buf(socket_path.clone()).unwrap());
    let center = Center::new(config).unwrap();

    let mut zone_config = ZoneConfig::minimal(name("example."));
    zone_config.masters.push(MasterConfig {
        addr: "192.0.2.1:53".parse().unwrap(),
        key: None,
        source: None,
    });
    let zone = manual_zone(&center, zone_config);

    let server = tokio::spawn(heraldd::control::serve(center.clone(), None));

    // Give the listener a moment to bind.
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let mut request = MessageBuilder::new(77, Flags::default());
    request.push_question(&Question::new(name("refresh.knot."), Rtype::TXT, Class::CH));
    let wire = request.finish();
    stream
        .write_all(&(wire.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&wire).await.unwrap();

    let mut length = [0u8; 2];
    stream.read_exact(&mut length).await.unwrap();
    let mut payload = vec![0u8; u16::from_be_bytes(length) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    let response = parse_message(&payload).unwrap();
    assert_eq!(response.flags.rcode, Rcode::NOERROR);

    // The refresh landed immediately.
    let due = zone.scheduler.pending(EventKind::Refresh).unwrap();
    assert!(due <= tokio::time::Instant::now() + std::time::Duration::from_millis(100));

    server.abort();
}

/// A TSIG-signed update whose signing time is stale: NOTAUTH with BADTIME,
/// and nothing is published.
#[tokio::test]
async fn stale_tsig_update_is_badtime() {
    let center = test_center();
    let mut config = ZoneConfig::minimal(name("example."));
    config.allow_update = vec![heraldd::config::AclEntryConfig {
        addr: None,
        key: Some(name("update-key.")),
    }];
    let zone = manual_zone(&center, config);
    zone.publish(ZoneContents::bootstrap(name("example.")));

    let key = tsig::Key::new(
        name("update-key."),
        tsig::Algorithm::HmacSha256,
        b"0123456789abcdef0123456789abcdef".to_vec(),
    );
    center.tsig.insert(key.clone());

    let mut builder = MessageBuilder::new(
        99,
        Flags {
            opcode: Opcode::UPDATE,
            ..Default::default()
        },
    );
    builder.push_question(&Question::new(name("example."), Rtype::SOA, Class::IN));
    builder.push_record(Section::Authority, &a_record("a.example.", "192.0.2.1"));
    let mut wire = builder.finish();
    // Signed 600 seconds ago; the fudge is 300.
    tsig::sign_message(
        &mut wire,
        &key,
        heraldd::util::unix_now() - 600,
        SignContext::Request,
    );

    let responses =
        heraldd::server::handle_packet(&center, &wire, "127.0.0.1".parse().unwrap(), false).await;
    assert_eq!(responses.len(), 1);
    let parsed = parse_message(&responses[0]).unwrap();
    assert_eq!(parsed.flags.rcode, Rcode::NOTAUTH);
    let response_tsig = parsed.tsig.expect("BADTIME responses carry a TSIG");
    assert_eq!(response_tsig.data.error, herald_wire::TsigRcode::BADTIME);

    // No change was published, and nothing is queued.
    assert_eq!(zone.serial(), Some(Serial(0)));
    assert!(zone.scheduler.pending(EventKind::Update).is_none());
}
