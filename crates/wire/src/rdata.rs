//! Record data.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::iana::{Rtype, SecurityAlgorithm, TsigRcode};
use crate::name::Name;
use crate::parse::{Composer, ParseError, Parser};
use crate::serial::Serial;

//----------- Soa --------------------------------------------------------------

/// The data of a SOA record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Soa {
    /// The primary name server for the zone.
    pub mname: Name,

    /// The mailbox of the person responsible for the zone.
    pub rname: Name,

    /// The zone's serial number.
    pub serial: Serial,

    /// How often secondaries check for changes, in seconds.
    pub refresh: u32,

    /// How soon a failed refresh is retried, in seconds.
    pub retry: u32,

    /// How long secondaries keep serving without a successful refresh.
    pub expire: u32,

    /// The TTL for negative answers (RFC 2308).
    pub minimum: u32,
}

//----------- Rrsig ------------------------------------------------------------

/// The data of an RRSIG record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rrsig {
    /// The type of the covered RRset.
    pub type_covered: Rtype,

    /// The signing algorithm.
    pub algorithm: SecurityAlgorithm,

    /// The number of labels in the owner name, ignoring a wildcard label.
    pub labels: u8,

    /// The TTL of the covered RRset as it appears in the zone.
    pub original_ttl: u32,

    /// Expiration of the signature's validity, in seconds since the epoch.
    pub expiration: u32,

    /// Start of the signature's validity, in seconds since the epoch.
    pub inception: u32,

    /// The key tag of the signing DNSKEY.
    pub key_tag: u16,

    /// The owner of the signing DNSKEY.
    pub signer: Name,

    /// The signature itself.
    pub signature: Box<[u8]>,
}

//----------- Tsig -------------------------------------------------------------

/// The data of a TSIG record (RFC 8945).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tsig {
    /// The MAC algorithm, as a domain name.
    pub algorithm: Name,

    /// Signing time, in seconds since the epoch (48 bits).
    pub time_signed: u64,

    /// Permitted clock skew around `time_signed`, in seconds.
    pub fudge: u16,

    /// The message authentication code.
    pub mac: Box<[u8]>,

    /// The message ID before any forwarder rewrote it.
    pub original_id: u16,

    /// The TSIG-level error code.
    pub error: TsigRcode,

    /// Additional data; the server's clock for BADTIME errors.
    pub other: Box<[u8]>,
}

//----------- TypeBitmap -------------------------------------------------------

/// The type bitmap of an NSEC or NSEC3 record.
///
/// Stored as the sorted list of present types; the window encoding of
/// RFC 4034 §4.1.2 exists only on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeBitmap(Vec<Rtype>);

impl TypeBitmap {
    /// Construct from a list of types.
    pub fn from_types(mut types: Vec<Rtype>) -> Self {
        types.sort_unstable();
        types.dedup();
        Self(types)
    }

    /// The types present, in ascending order.
    pub fn types(&self) -> &[Rtype] {
        &self.0
    }

    /// Whether `rtype` is present.
    pub fn contains(&self, rtype: Rtype) -> bool {
        self.0.binary_search(&rtype).is_ok()
    }

    fn compose(&self, composer: &mut Composer) {
        let mut window = None::<(u8, Vec<u8>)>;
        for rtype in &self.0 {
            let [hi, lo] = rtype.0.to_be_bytes();
            if window.as_ref().is_none_or(|(w, _)| *w != hi) {
                if let Some((w, bits)) = window.take() {
                    composer.put_u8(w);
                    composer.put_u8(bits.len() as u8);
                    composer.put_slice(&bits);
                }
                window = Some((hi, Vec::new()));
            }
            let (_, bits) = window.as_mut().expect("a window was just opened");
            let byte = usize::from(lo / 8);
            if bits.len() <= byte {
                bits.resize(byte + 1, 0);
            }
            bits[byte] |= 0x80 >> (lo % 8);
        }
        if let Some((w, bits)) = window {
            composer.put_u8(w);
            composer.put_u8(bits.len() as u8);
            composer.put_slice(&bits);
        }
    }

    fn parse(parser: &mut Parser<'_>, end: usize) -> Result<Self, ParseError> {
        let mut types = Vec::new();
        let mut prev_window = None;
        while parser.pos() < end {
            let window = parser.read_u8()?;
            if prev_window.is_some_and(|p| window <= p) {
                return Err(ParseError::BadRdata);
            }
            prev_window = Some(window);
            let len = parser.read_u8()? as usize;
            if len == 0 || len > 32 {
                return Err(ParseError::BadRdata);
            }
            let bits = parser.read_slice(len)?;
            for (byte, &value) in bits.iter().enumerate() {
                for bit in 0..8 {
                    if value & (0x80 >> bit) != 0 {
                        let lo = (byte * 8 + bit) as u16;
                        types.push(Rtype((u16::from(window) << 8) | lo));
                    }
                }
            }
        }
        Ok(Self(types))
    }
}

//----------- Rdata ------------------------------------------------------------

/// The data of a resource record.
///
/// Types the server does not interpret are carried verbatim as
/// [`Rdata::Unknown`] (RFC 3597).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    Txt(Vec<Box<[u8]>>),
    Soa(Soa),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Ds {
        key_tag: u16,
        algorithm: SecurityAlgorithm,
        digest_type: u8,
        digest: Box<[u8]>,
    },
    Dnskey {
        flags: u16,
        protocol: u8,
        algorithm: SecurityAlgorithm,
        public_key: Box<[u8]>,
    },
    Rrsig(Rrsig),
    Nsec {
        next: Name,
        types: TypeBitmap,
    },
    Nsec3 {
        hash_algorithm: u8,
        flags: u8,
        iterations: u16,
        salt: Box<[u8]>,
        next_hashed: Box<[u8]>,
        types: TypeBitmap,
    },
    Nsec3param {
        hash_algorithm: u8,
        flags: u8,
        iterations: u16,
        salt: Box<[u8]>,
    },
    Tsig(Tsig),
    Unknown(Rtype, Box<[u8]>),
}

impl Rdata {
    /// The record type of this data.
    pub fn rtype(&self) -> Rtype {
        match self {
            Self::A(_) => Rtype::A,
            Self::Aaaa(_) => Rtype::AAAA,
            Self::Ns(_) => Rtype::NS,
            Self::Cname(_) => Rtype::CNAME,
            Self::Ptr(_) => Rtype::PTR,
            Self::Mx { .. } => Rtype::MX,
            Self::Txt(_) => Rtype::TXT,
            Self::Soa(_) => Rtype::SOA,
            Self::Srv { .. } => Rtype::SRV,
            Self::Ds { .. } => Rtype::DS,
            Self::Dnskey { .. } => Rtype::DNSKEY,
            Self::Rrsig(_) => Rtype::RRSIG,
            Self::Nsec { .. } => Rtype::NSEC,
            Self::Nsec3 { .. } => Rtype::NSEC3,
            Self::Nsec3param { .. } => Rtype::NSEC3PARAM,
            Self::Tsig(_) => Rtype::TSIG,
            Self::Unknown(rtype, _) => *rtype,
        }
    }

    /// Parse record data of the given type.
    ///
    /// The parser must be positioned at the start of the RDATA; `rdlen` is
    /// the advertised length.  Name decompression is only performed for the
    /// types whose RDATA predates RFC 3597.
    pub fn parse(rtype: Rtype, parser: &mut Parser<'_>, rdlen: usize) -> Result<Self, ParseError> {
        if parser.remaining() < rdlen {
            return Err(ParseError::ShortMessage);
        }
        if rdlen == 0 {
            // Empty RDATA of any type.  Well-formed data never has this, but
            // UPDATE prerequisite and deletion records do (RFC 2136 §2.4).
            return Ok(Self::Unknown(rtype, Box::default()));
        }
        let end = parser.pos() + rdlen;
        let data = match rtype {
            Rtype::A => {
                let octets: [u8; 4] =
                    parser.read_slice(4)?.try_into().expect("4 octets were read");
                Self::A(octets.into())
            }
            Rtype::AAAA => {
                let octets: [u8; 16] =
                    parser.read_slice(16)?.try_into().expect("16 octets were read");
                Self::Aaaa(octets.into())
            }
            Rtype::NS => Self::Ns(Name::parse(parser)?),
            Rtype::CNAME => Self::Cname(Name::parse(parser)?),
            Rtype::PTR => Self::Ptr(Name::parse(parser)?),
            Rtype::MX => Self::Mx {
                preference: parser.read_u16()?,
                exchange: Name::parse(parser)?,
            },
            Rtype::TXT => {
                let mut strings = Vec::new();
                while parser.pos() < end {
                    let len = parser.read_u8()? as usize;
                    if parser.pos() + len > end {
                        return Err(ParseError::BadRdata);
                    }
                    strings.push(parser.read_slice(len)?.into());
                }
                if strings.is_empty() {
                    return Err(ParseError::BadRdata);
                }
                Self::Txt(strings)
            }
            Rtype::SOA => Self::Soa(Soa {
                mname: Name::parse(parser)?,
                rname: Name::parse(parser)?,
                serial: Serial(parser.read_u32()?),
                refresh: parser.read_u32()?,
                retry: parser.read_u32()?,
                expire: parser.read_u32()?,
                minimum: parser.read_u32()?,
            }),
            Rtype::SRV => Self::Srv {
                priority: parser.read_u16()?,
                weight: parser.read_u16()?,
                port: parser.read_u16()?,
                // RFC 2782 forbids compressing the target, so don't emit
                // pointers, but accept them on input.
                target: Name::parse(parser)?,
            },
            Rtype::DS => Self::Ds {
                key_tag: parser.read_u16()?,
                algorithm: SecurityAlgorithm(parser.read_u8()?),
                digest_type: parser.read_u8()?,
                digest: parser
                    .read_slice(end.checked_sub(parser.pos()).ok_or(ParseError::BadRdata)?)?
                    .into(),
            },
            Rtype::DNSKEY => Self::Dnskey {
                flags: parser.read_u16()?,
                protocol: parser.read_u8()?,
                algorithm: SecurityAlgorithm(parser.read_u8()?),
                public_key: parser
                    .read_slice(end.checked_sub(parser.pos()).ok_or(ParseError::BadRdata)?)?
                    .into(),
            },
            Rtype::RRSIG => {
                let type_covered = Rtype(parser.read_u16()?);
                let algorithm = SecurityAlgorithm(parser.read_u8()?);
                let labels = parser.read_u8()?;
                let original_ttl = parser.read_u32()?;
                let expiration = parser.read_u32()?;
                let inception = parser.read_u32()?;
                let key_tag = parser.read_u16()?;
                // RFC 4034 §3.1.7: the signer's name is never compressed.
                let signer = Name::parse(parser)?;
                let signature = parser
                    .read_slice(end.checked_sub(parser.pos()).ok_or(ParseError::BadRdata)?)?
                    .into();
                Self::Rrsig(Rrsig {
                    type_covered,
                    algorithm,
                    labels,
                    original_ttl,
                    expiration,
                    inception,
                    key_tag,
                    signer,
                    signature,
                })
            }
            Rtype::NSEC => Self::Nsec {
                next: Name::parse(parser)?,
                types: TypeBitmap::parse(parser, end)?,
            },
            Rtype::NSEC3 => {
                let hash_algorithm = parser.read_u8()?;
                let flags = parser.read_u8()?;
                let iterations = parser.read_u16()?;
                let salt_len = parser.read_u8()? as usize;
                let salt = parser.read_slice(salt_len)?.into();
                let hash_len = parser.read_u8()? as usize;
                let next_hashed = parser.read_slice(hash_len)?.into();
                Self::Nsec3 {
                    hash_algorithm,
                    flags,
                    iterations,
                    salt,
                    next_hashed,
                    types: TypeBitmap::parse(parser, end)?,
                }
            }
            Rtype::NSEC3PARAM => {
                let hash_algorithm = parser.read_u8()?;
                let flags = parser.read_u8()?;
                let iterations = parser.read_u16()?;
                let salt_len = parser.read_u8()? as usize;
                Self::Nsec3param {
                    hash_algorithm,
                    flags,
                    iterations,
                    salt: parser.read_slice(salt_len)?.into(),
                }
            }
            Rtype::TSIG => {
                let algorithm = Name::parse(parser)?;
                let time_signed = parser.read_u48()?;
                let fudge = parser.read_u16()?;
                let mac_len = parser.read_u16()? as usize;
                let mac = parser.read_slice(mac_len)?.into();
                let original_id = parser.read_u16()?;
                let error = TsigRcode(parser.read_u16()?);
                let other_len = parser.read_u16()? as usize;
                let other = parser.read_slice(other_len)?.into();
                Self::Tsig(Tsig {
                    algorithm,
                    time_signed,
                    fudge,
                    mac,
                    original_id,
                    error,
                    other,
                })
            }
            _ => Self::Unknown(rtype, parser.read_slice(rdlen)?.into()),
        };
        if parser.pos() != end {
            return Err(ParseError::BadRdata);
        }
        Ok(data)
    }

    /// Append the wire format, without the RDLENGTH prefix.
    ///
    /// Names inside RDATA are never compressed.
    pub fn compose(&self, composer: &mut Composer) {
        match self {
            Self::A(addr) => composer.put_slice(&addr.octets()),
            Self::Aaaa(addr) => composer.put_slice(&addr.octets()),
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) => {
                composer.put_slice(name.as_wire())
            }
            Self::Mx {
                preference,
                exchange,
            } => {
                composer.put_u16(*preference);
                composer.put_slice(exchange.as_wire());
            }
            Self::Txt(strings) => {
                for string in strings {
                    composer.put_u8(string.len() as u8);
                    composer.put_slice(string);
                }
            }
            Self::Soa(soa) => {
                composer.put_slice(soa.mname.as_wire());
                composer.put_slice(soa.rname.as_wire());
                composer.put_u32(soa.serial.get());
                composer.put_u32(soa.refresh);
                composer.put_u32(soa.retry);
                composer.put_u32(soa.expire);
                composer.put_u32(soa.minimum);
            }
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                composer.put_u16(*priority);
                composer.put_u16(*weight);
                composer.put_u16(*port);
                composer.put_slice(target.as_wire());
            }
            Self::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                composer.put_u16(*key_tag);
                composer.put_u8(algorithm.0);
                composer.put_u8(*digest_type);
                composer.put_slice(digest);
            }
            Self::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                composer.put_u16(*flags);
                composer.put_u8(*protocol);
                composer.put_u8(algorithm.0);
                composer.put_slice(public_key);
            }
            Self::Rrsig(rrsig) => {
                composer.put_u16(rrsig.type_covered.0);
                composer.put_u8(rrsig.algorithm.0);
                composer.put_u8(rrsig.labels);
                composer.put_u32(rrsig.original_ttl);
                composer.put_u32(rrsig.expiration);
                composer.put_u32(rrsig.inception);
                composer.put_u16(rrsig.key_tag);
                composer.put_slice(rrsig.signer.as_wire());
                composer.put_slice(&rrsig.signature);
            }
            Self::Nsec { next, types } => {
                composer.put_slice(next.as_wire());
                types.compose(composer);
            }
            Self::Nsec3 {
                hash_algorithm,
                flags,
                iterations,
                salt,
                next_hashed,
                types,
            } => {
                composer.put_u8(*hash_algorithm);
                composer.put_u8(*flags);
                composer.put_u16(*iterations);
                composer.put_u8(salt.len() as u8);
                composer.put_slice(salt);
                composer.put_u8(next_hashed.len() as u8);
                composer.put_slice(next_hashed);
                types.compose(composer);
            }
            Self::Nsec3param {
                hash_algorithm,
                flags,
                iterations,
                salt,
            } => {
                composer.put_u8(*hash_algorithm);
                composer.put_u8(*flags);
                composer.put_u16(*iterations);
                composer.put_u8(salt.len() as u8);
                composer.put_slice(salt);
            }
            Self::Tsig(tsig) => {
                composer.put_slice(tsig.algorithm.as_wire());
                composer.put_u48(tsig.time_signed);
                composer.put_u16(tsig.fudge);
                composer.put_u16(tsig.mac.len() as u16);
                composer.put_slice(&tsig.mac);
                composer.put_u16(tsig.original_id);
                composer.put_u16(tsig.error.0);
                composer.put_u16(tsig.other.len() as u16);
                composer.put_slice(&tsig.other);
            }
            Self::Unknown(_, octets) => composer.put_slice(octets),
        }
    }

    /// Append the canonical wire format (RFC 4034 §6.2).
    ///
    /// Like [`compose`][Self::compose], but domain names in the RDATA of
    /// the legacy record types are lowercased.
    pub fn compose_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) => {
                name.compose_canonical(out);
            }
            Self::Mx {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                exchange.compose_canonical(out);
            }
            Self::Soa(soa) => {
                soa.mname.compose_canonical(out);
                soa.rname.compose_canonical(out);
                out.extend_from_slice(&soa.serial.get().to_be_bytes());
                out.extend_from_slice(&soa.refresh.to_be_bytes());
                out.extend_from_slice(&soa.retry.to_be_bytes());
                out.extend_from_slice(&soa.expire.to_be_bytes());
                out.extend_from_slice(&soa.minimum.to_be_bytes());
            }
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                target.compose_canonical(out);
            }
            _ => {
                let mut composer = Composer::new();
                self.compose(&mut composer);
                out.extend_from_slice(composer.as_slice());
            }
        }
    }

    /// The wire format as a standalone byte string.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut composer = Composer::new();
        self.compose(&mut composer);
        composer.finish()
    }
}

//--- Presentation format

impl fmt::Display for Rdata {
    /// Master-file presentation of the RDATA fields.
    ///
    /// RRSIG validity timestamps are printed as epoch seconds, which RFC 4034
    /// §3.2 permits; the zone-file emitter pretty-prints them instead.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(addr) => write!(f, "{addr}"),
            Self::Aaaa(addr) => write!(f, "{addr}"),
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) => write!(f, "{name}"),
            Self::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            Self::Txt(strings) => {
                for (i, string) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str("\"")?;
                    for &b in string.iter() {
                        match b {
                            b'"' | b'\\' => write!(f, "\\{}", b as char)?,
                            0x20..=0x7E => write!(f, "{}", b as char)?,
                            _ => write!(f, "\\{b:03}")?,
                        }
                    }
                    f.write_str("\"")?;
                }
                Ok(())
            }
            Self::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
            Self::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                write!(f, "{key_tag} {} {digest_type} ", algorithm.0)?;
                f.write_str(&crate::base::hex_encode(digest))
            }
            Self::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                write!(f, "{flags} {protocol} {} ", algorithm.0)?;
                f.write_str(&crate::base::base64_encode(public_key))
            }
            Self::Rrsig(rrsig) => {
                write!(
                    f,
                    "{} {} {} {} {} {} {} {} ",
                    rrsig.type_covered,
                    rrsig.algorithm.0,
                    rrsig.labels,
                    rrsig.original_ttl,
                    rrsig.expiration,
                    rrsig.inception,
                    rrsig.key_tag,
                    rrsig.signer,
                )?;
                f.write_str(&crate::base::base64_encode(&rrsig.signature))
            }
            Self::Nsec { next, types } => {
                write!(f, "{next}")?;
                for rtype in types.types() {
                    write!(f, " {rtype}")?;
                }
                Ok(())
            }
            Self::Nsec3 {
                hash_algorithm,
                flags,
                iterations,
                salt,
                next_hashed,
                types,
            } => {
                write!(f, "{hash_algorithm} {flags} {iterations} ")?;
                if salt.is_empty() {
                    f.write_str("-")?;
                } else {
                    f.write_str(&crate::base::hex_encode(salt))?;
                }
                write!(f, " {}", crate::base::base32hex_encode(next_hashed))?;
                for rtype in types.types() {
                    write!(f, " {rtype}")?;
                }
                Ok(())
            }
            Self::Nsec3param {
                hash_algorithm,
                flags,
                iterations,
                salt,
            } => {
                write!(f, "{hash_algorithm} {flags} {iterations} ")?;
                if salt.is_empty() {
                    f.write_str("-")
                } else {
                    f.write_str(&crate::base::hex_encode(salt))
                }
            }
            Self::Tsig(tsig) => write!(
                f,
                "{} {} {} {}",
                tsig.algorithm, tsig.time_signed, tsig.fudge, tsig.error
            ),
            Self::Unknown(_, octets) => {
                // RFC 3597 generic notation.
                write!(f, "\\# {}", octets.len())?;
                if !octets.is_empty() {
                    write!(f, " {}", crate::base::hex_encode(octets))?;
                }
                Ok(())
            }
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn roundtrip(rtype: Rtype, rdata: &Rdata) {
        let wire = rdata.to_wire();
        let mut parser = Parser::new(&wire);
        let parsed = Rdata::parse(rtype, &mut parser, wire.len()).unwrap();
        assert_eq!(&parsed, rdata);
    }

    #[test]
    fn wire_roundtrips() {
        roundtrip(Rtype::A, &Rdata::A("192.0.2.1".parse().unwrap()));
        roundtrip(Rtype::AAAA, &Rdata::Aaaa("2001:db8::1".parse().unwrap()));
        roundtrip(Rtype::NS, &Rdata::Ns(Name::from_str("ns1.example.").unwrap()));
        roundtrip(
            Rtype::MX,
            &Rdata::Mx {
                preference: 10,
                exchange: Name::from_str("mail.example.").unwrap(),
            },
        );
        roundtrip(
            Rtype::TXT,
            &Rdata::Txt(vec![b"hello".to_vec().into(), b"world".to_vec().into()]),
        );
        roundtrip(
            Rtype::SOA,
            &Rdata::Soa(Soa {
                mname: Name::from_str("ns1.example.").unwrap(),
                rname: Name::from_str("hostmaster.example.").unwrap(),
                serial: Serial(2024010101),
                refresh: 10800,
                retry: 3600,
                expire: 604800,
                minimum: 3600,
            }),
        );
        roundtrip(
            Rtype::NSEC,
            &Rdata::Nsec {
                next: Name::from_str("b.example.").unwrap(),
                types: TypeBitmap::from_types(vec![Rtype::A, Rtype::NS, Rtype::RRSIG, Rtype::TSIG]),
            },
        );
        roundtrip(Rtype(4711), &Rdata::Unknown(Rtype(4711), b"\x01\x02".to_vec().into()));
    }

    #[test]
    fn type_bitmap_windows() {
        let bitmap = TypeBitmap::from_types(vec![Rtype::A, Rtype::MX, Rtype::RRSIG, Rtype::TSIG]);
        let mut composer = Composer::new();
        bitmap.compose(&mut composer);
        let wire = composer.finish();
        let mut parser = Parser::new(&wire);
        let parsed = TypeBitmap::parse(&mut parser, wire.len()).unwrap();
        assert_eq!(parsed, bitmap);
        assert!(parsed.contains(Rtype::MX));
        assert!(!parsed.contains(Rtype::AAAA));
    }

    #[test]
    fn reject_bad_txt() {
        // A character-string pointing past the RDATA.
        let wire = [5u8, b'a', b'b'];
        let mut parser = Parser::new(&wire);
        assert!(Rdata::parse(Rtype::TXT, &mut parser, wire.len()).is_err());
    }

    #[test]
    fn reject_short_rdata() {
        let wire = [192u8, 0, 2];
        let mut parser = Parser::new(&wire);
        assert!(Rdata::parse(Rtype::A, &mut parser, wire.len()).is_err());
    }
}
