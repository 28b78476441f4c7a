//! Transaction signatures (RFC 8945).
//!
//! Signing appends a TSIG record to an already-built message and patches its
//! ARCOUNT; verification reconstructs the signed octets from a parsed
//! message and its original wire form.  Streams of messages (XFR) use the
//! batched scheme of RFC 8945 §5.3: every message is signed, each MAC
//! chaining from the previous one.

use std::fmt;

use ring::hmac;

use crate::base;
use crate::iana::{Class, Rtype, TsigRcode};
use crate::message::{Message, ParsedTsig};
use crate::name::Name;
use crate::parse::Composer;
use crate::rdata::{Rdata, Tsig};

/// The default permitted clock skew, in seconds (RFC 8945 §10).
pub const DEFAULT_FUDGE: u16 = 300;

//----------- Algorithm --------------------------------------------------------

/// A TSIG MAC algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    HmacSha1,
    HmacSha256,
    HmacSha512,
}

impl Algorithm {
    /// The algorithm's name on the wire.
    pub fn wire_name(self) -> Name {
        let name = match self {
            Self::HmacSha1 => "hmac-sha1.",
            Self::HmacSha256 => "hmac-sha256.",
            Self::HmacSha512 => "hmac-sha512.",
        };
        name.parse().expect("algorithm names are valid")
    }

    /// Look an algorithm up by its wire name.
    pub fn from_wire_name(name: &Name) -> Option<Self> {
        let text = name.to_string();
        match text.as_str() {
            "hmac-sha1." => Some(Self::HmacSha1),
            "hmac-sha256." => Some(Self::HmacSha256),
            "hmac-sha512." => Some(Self::HmacSha512),
            _ => None,
        }
    }

    /// The full MAC length, in octets.
    pub fn mac_len(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }

    /// The shortest truncated MAC we accept (RFC 8945 §5.2.2.1).
    pub fn min_mac_len(self) -> usize {
        (self.mac_len() / 2).max(10)
    }

    fn hmac(self) -> hmac::Algorithm {
        match self {
            Self::HmacSha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::HmacSha256 => hmac::HMAC_SHA256,
            Self::HmacSha512 => hmac::HMAC_SHA512,
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = TsigError;

    /// Parse the configuration spelling (`hmac-sha256`).
    fn from_str(s: &str) -> Result<Self, TsigError> {
        match s {
            "hmac-sha1" => Ok(Self::HmacSha1),
            "hmac-sha256" => Ok(Self::HmacSha256),
            "hmac-sha512" => Ok(Self::HmacSha512),
            _ => Err(TsigError::BadKey),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HmacSha1 => "hmac-sha1",
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha512 => "hmac-sha512",
        })
    }
}

//----------- Key --------------------------------------------------------------

/// A shared TSIG key.
#[derive(Clone)]
pub struct Key {
    /// The key's name.
    pub name: Name,

    /// The MAC algorithm.
    pub algorithm: Algorithm,

    /// The shared secret.
    secret: Box<[u8]>,
}

impl Key {
    /// Construct a key from raw secret octets.
    pub fn new(name: Name, algorithm: Algorithm, secret: Vec<u8>) -> Self {
        Self {
            name,
            algorithm,
            secret: secret.into(),
        }
    }

    /// Construct a key from a base64 secret, as found in configuration.
    pub fn from_base64(name: Name, algorithm: Algorithm, secret: &str) -> Result<Self, TsigError> {
        let secret = base::base64_decode(secret).map_err(|_| TsigError::BadKey)?;
        Ok(Self::new(name, algorithm, secret))
    }

    fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(self.algorithm.hmac(), &self.secret)
    }
}

impl fmt::Debug for Key {
    /// The secret is deliberately omitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

//----------- Signing ----------------------------------------------------------

/// What role the message being signed plays in its exchange.
#[derive(Clone, Copy, Debug)]
pub enum SignContext<'a> {
    /// A request; nothing precedes it.
    Request,

    /// The first (or only) response to a signed request.
    Response {
        /// The MAC of the request.
        request_mac: &'a [u8],
    },

    /// A later message of a multi-message response stream.
    Subsequent {
        /// The MAC of the preceding message.
        prior_mac: &'a [u8],
    },
}

/// Sign a complete message in place.
///
/// The TSIG record is appended to `wire` and ARCOUNT is patched.  The MAC is
/// returned so the caller can chain it into the next signing or verification
/// step.
pub fn sign_message(wire: &mut Vec<u8>, key: &Key, now: u64, context: SignContext<'_>) -> Vec<u8> {
    let data = Tsig {
        algorithm: key.algorithm.wire_name(),
        time_signed: now & 0xFFFF_FFFF_FFFF,
        fudge: DEFAULT_FUDGE,
        mac: Box::default(),
        original_id: u16::from_be_bytes([wire[0], wire[1]]),
        error: TsigRcode::NOERROR,
        other: Box::default(),
    };

    let mut ctx = hmac::Context::with_key(&key.hmac_key());
    match context {
        SignContext::Request => {}
        SignContext::Response { request_mac } => {
            // The request MAC is digested with a two-octet length prefix.
            ctx.update(&(request_mac.len() as u16).to_be_bytes());
            ctx.update(request_mac);
        }
        SignContext::Subsequent { prior_mac } => ctx.update(prior_mac),
    }
    ctx.update(wire);
    match context {
        SignContext::Subsequent { .. } => digest_timers(&mut ctx, &data),
        _ => digest_variables(&mut ctx, &key.name, &data),
    }
    let mac: Vec<u8> = ctx.sign().as_ref().to_vec();

    append_tsig_record(
        wire,
        &key.name,
        Tsig {
            mac: mac.clone().into(),
            ..data
        },
    );
    mac
}

/// Append an unsigned TSIG error record to a response (RFC 8945 §5.2.1).
///
/// Used for BADKEY and BADSIG, where no shared secret is available to sign
/// with.  The failed request's TSIG data is echoed.
pub fn append_unsigned_error(wire: &mut Vec<u8>, request: &ParsedTsig, error: TsigRcode) {
    append_tsig_record(
        wire,
        &request.owner,
        Tsig {
            algorithm: request.data.algorithm.clone(),
            time_signed: request.data.time_signed,
            fudge: request.data.fudge,
            mac: Box::default(),
            original_id: request.data.original_id,
            error,
            other: Box::default(),
        },
    );
}

/// Sign a BADTIME error response (RFC 8945 §5.2.3).
///
/// BADTIME responses are signed, and carry the server's clock in the other
/// data so the client can spot the skew.
pub fn sign_badtime_error(wire: &mut Vec<u8>, key: &Key, request: &ParsedTsig, now: u64) {
    let data = Tsig {
        algorithm: key.algorithm.wire_name(),
        // Echo the client's time; ours goes into the other data.
        time_signed: request.data.time_signed,
        fudge: request.data.fudge,
        mac: Box::default(),
        original_id: request.data.original_id,
        error: TsigRcode::BADTIME,
        other: (now & 0xFFFF_FFFF_FFFF).to_be_bytes()[2..].to_vec().into(),
    };

    let mut ctx = hmac::Context::with_key(&key.hmac_key());
    ctx.update(&(request.data.mac.len() as u16).to_be_bytes());
    ctx.update(&request.data.mac);
    ctx.update(wire);
    digest_variables(&mut ctx, &key.name, &data);
    let mac: Vec<u8> = ctx.sign().as_ref().to_vec();

    append_tsig_record(
        wire,
        &key.name,
        Tsig {
            mac: mac.into(),
            ..data
        },
    );
}

/// Append a TSIG record and patch ARCOUNT.
///
/// The record's owner (the key name) is never compressed.
fn append_tsig_record(wire: &mut Vec<u8>, key_name: &Name, data: Tsig) {
    let mut composer = Composer::new();
    composer.put_slice(key_name.as_wire());
    composer.put_u16(Rtype::TSIG.0);
    composer.put_u16(Class::ANY.0);
    composer.put_u32(0);
    let rdata = Rdata::Tsig(data);
    let mut rdata_wire = Composer::new();
    rdata.compose(&mut rdata_wire);
    composer.put_u16(rdata_wire.len() as u16);
    composer.put_slice(rdata_wire.as_slice());
    wire.extend_from_slice(composer.as_slice());

    let arcount = u16::from_be_bytes([wire[10], wire[11]]) + 1;
    wire[10..12].copy_from_slice(&arcount.to_be_bytes());
}

/// Digest the full TSIG variables (RFC 8945 §4.3.3).
fn digest_variables(ctx: &mut hmac::Context, key_name: &Name, data: &Tsig) {
    let mut vars = Vec::with_capacity(64);
    key_name.compose_canonical(&mut vars);
    vars.extend_from_slice(&Class::ANY.0.to_be_bytes());
    vars.extend_from_slice(&0u32.to_be_bytes());
    data.algorithm.compose_canonical(&mut vars);
    vars.extend_from_slice(&data.time_signed.to_be_bytes()[2..]);
    vars.extend_from_slice(&data.fudge.to_be_bytes());
    vars.extend_from_slice(&data.error.0.to_be_bytes());
    vars.extend_from_slice(&(data.other.len() as u16).to_be_bytes());
    vars.extend_from_slice(&data.other);
    ctx.update(&vars);
}

/// Digest only the TSIG timers, for later messages of a stream
/// (RFC 8945 §5.3.1).
fn digest_timers(ctx: &mut hmac::Context, data: &Tsig) {
    let mut vars = [0u8; 8];
    vars[..6].copy_from_slice(&data.time_signed.to_be_bytes()[2..]);
    vars[6..].copy_from_slice(&data.fudge.to_be_bytes());
    ctx.update(&vars);
}

//----------- Verification -----------------------------------------------------

/// A successfully verified TSIG.
#[derive(Clone, Debug)]
pub struct Verified {
    /// The MAC of the verified message, for chaining.
    pub mac: Vec<u8>,

    /// The signing time the peer claimed.
    pub time_signed: u64,
}

/// Verify a signed message.
///
/// `wire` must be the exact octets `message` was parsed from.  The MAC is
/// checked before the time window, so a BADTIME verdict is only reached for
/// messages that were genuinely signed with this key (RFC 8945 §5.2.3).
pub fn verify_message(
    wire: &[u8],
    message: &Message,
    key: &Key,
    now: u64,
    context: SignContext<'_>,
) -> Result<Verified, TsigError> {
    let tsig = message.tsig.as_ref().ok_or(TsigError::Malformed)?;

    if tsig.owner != key.name || Algorithm::from_wire_name(&tsig.data.algorithm) != Some(key.algorithm)
    {
        return Err(TsigError::BadKey);
    }
    let mac_len = tsig.data.mac.len();
    if mac_len > key.algorithm.mac_len() || mac_len < key.algorithm.min_mac_len() {
        return Err(TsigError::Malformed);
    }

    // Reconstruct the octets that were signed: the message up to the TSIG
    // record, with ARCOUNT decremented and the original ID restored.
    let mut signed = wire[..tsig.offset].to_vec();
    let arcount = u16::from_be_bytes([signed[10], signed[11]]) - 1;
    signed[10..12].copy_from_slice(&arcount.to_be_bytes());
    signed[0..2].copy_from_slice(&tsig.data.original_id.to_be_bytes());

    let mut ctx = hmac::Context::with_key(&key.hmac_key());
    match context {
        SignContext::Request => {}
        SignContext::Response { request_mac } => {
            ctx.update(&(request_mac.len() as u16).to_be_bytes());
            ctx.update(request_mac);
        }
        SignContext::Subsequent { prior_mac } => ctx.update(prior_mac),
    }
    ctx.update(&signed);
    match context {
        SignContext::Subsequent { .. } => digest_timers(&mut ctx, &tsig.data),
        _ => digest_variables(&mut ctx, &tsig.owner, &tsig.data),
    }
    let expected = ctx.sign();

    ring::constant_time::verify_slices_are_equal(&expected.as_ref()[..mac_len], &tsig.data.mac)
        .map_err(|_| TsigError::BadSig)?;

    let skew = now.abs_diff(tsig.data.time_signed);
    if skew > u64::from(tsig.data.fudge) {
        return Err(TsigError::BadTime);
    }

    Ok(Verified {
        mac: tsig.data.mac.to_vec(),
        time_signed: tsig.data.time_signed,
    })
}

//----------- TsigError --------------------------------------------------------

/// A TSIG verification failure.
///
/// Each variant maps onto a TSIG RCODE; every one is answered with message
/// RCODE NOTAUTH.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsigError {
    /// The key name or algorithm is not one we share.
    BadKey,

    /// The MAC did not verify.
    BadSig,

    /// The signing time fell outside the fudge window.
    BadTime,

    /// The TSIG record itself was unusable.
    Malformed,
}

impl TsigError {
    /// The TSIG-level RCODE reported to the peer.
    pub fn tsig_rcode(self) -> TsigRcode {
        match self {
            Self::BadKey => TsigRcode::BADKEY,
            Self::BadSig => TsigRcode::BADSIG,
            Self::BadTime => TsigRcode::BADTIME,
            Self::Malformed => TsigRcode::NOERROR,
        }
    }
}

impl std::error::Error for TsigError {}

impl fmt::Display for TsigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BadKey => "unknown key or algorithm",
            Self::BadSig => "MAC verification failed",
            Self::BadTime => "signing time outside the allowed window",
            Self::Malformed => "malformed transaction signature",
        })
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iana::Rtype;
    use crate::message::{parse_message, Flags, MessageBuilder, Question};
    use std::str::FromStr;

    fn key() -> Key {
        Key::new(
            Name::from_str("control-key.").unwrap(),
            Algorithm::HmacSha256,
            b"0123456789abcdef0123456789abcdef".to_vec(),
        )
    }

    fn build_query() -> Vec<u8> {
        let mut builder = MessageBuilder::new(4711, Flags::default());
        builder.push_question(&Question::new(
            Name::from_str("example.org.").unwrap(),
            Rtype::SOA,
            Class::IN,
        ));
        builder.finish()
    }

    #[test]
    fn sign_verify_roundtrip() {
        let key = key();
        let mut wire = build_query();
        let mac = sign_message(&mut wire, &key, 1_000_000, SignContext::Request);

        let message = parse_message(&wire).unwrap();
        assert!(message.tsig.is_some());
        let verified =
            verify_message(&wire, &message, &key, 1_000_100, SignContext::Request).unwrap();
        assert_eq!(verified.mac, mac);
    }

    #[test]
    fn response_chains_request_mac() {
        let key = key();
        let mut request = build_query();
        let request_mac = sign_message(&mut request, &key, 1_000_000, SignContext::Request);

        let mut response = build_query();
        response[2] |= 0x80;
        sign_message(
            &mut response,
            &key,
            1_000_001,
            SignContext::Response {
                request_mac: &request_mac,
            },
        );

        let message = parse_message(&response).unwrap();
        // Verifying without the chained request MAC must fail.
        assert_eq!(
            verify_message(&response, &message, &key, 1_000_001, SignContext::Request).unwrap_err(),
            TsigError::BadSig
        );
        verify_message(
            &response,
            &message,
            &key,
            1_000_001,
            SignContext::Response {
                request_mac: &request_mac,
            },
        )
        .unwrap();
    }

    #[test]
    fn wrong_key_name_is_badkey() {
        let key = key();
        let mut wire = build_query();
        sign_message(&mut wire, &key, 1_000_000, SignContext::Request);

        let other = Key::new(
            Name::from_str("other-key.").unwrap(),
            Algorithm::HmacSha256,
            b"0123456789abcdef0123456789abcdef".to_vec(),
        );
        let message = parse_message(&wire).unwrap();
        assert_eq!(
            verify_message(&wire, &message, &other, 1_000_000, SignContext::Request).unwrap_err(),
            TsigError::BadKey
        );
    }

    #[test]
    fn tampering_is_badsig() {
        let key = key();
        let mut wire = build_query();
        sign_message(&mut wire, &key, 1_000_000, SignContext::Request);

        // Flip a bit in the question name.
        wire[13] ^= 0x01;
        let message = parse_message(&wire).unwrap();
        assert_eq!(
            verify_message(&wire, &message, &key, 1_000_000, SignContext::Request).unwrap_err(),
            TsigError::BadSig
        );
    }

    #[test]
    fn stale_time_is_badtime_despite_valid_mac() {
        let key = key();
        let mut wire = build_query();
        sign_message(&mut wire, &key, 1_000_000, SignContext::Request);

        let message = parse_message(&wire).unwrap();
        // 600 seconds of skew, fudge is 300: BADTIME even though the MAC
        // itself is fine.
        assert_eq!(
            verify_message(&wire, &message, &key, 1_000_600, SignContext::Request).unwrap_err(),
            TsigError::BadTime
        );
    }

    #[test]
    fn subsequent_stream_messages_verify() {
        let key = key();
        let mut first = build_query();
        let first_mac = sign_message(&mut first, &key, 1_000_000, SignContext::Request);

        let mut second = build_query();
        let second_mac = sign_message(
            &mut second,
            &key,
            1_000_002,
            SignContext::Subsequent {
                prior_mac: &first_mac,
            },
        );

        let message = parse_message(&second).unwrap();
        let verified = verify_message(
            &second,
            &message,
            &key,
            1_000_002,
            SignContext::Subsequent {
                prior_mac: &first_mac,
            },
        )
        .unwrap();
        assert_eq!(verified.mac, second_mac);
    }
}
