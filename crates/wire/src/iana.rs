//! DNS parameter registries.
//!
//! The types here are thin newtypes over their registry value rather than
//! Rust enums: unknown values must survive a parse/compose round trip
//! unchanged (RFC 3597).

use std::fmt;
use std::str::FromStr;

//----------- Rtype ------------------------------------------------------------

/// A resource record type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rtype(pub u16);

macro_rules! rtype_consts {
    ($( $name:ident = $value:expr, $mnemonic:expr; )*) => {
        impl Rtype {
            $( pub const $name: Self = Self($value); )*

            /// The registered mnemonic, if any.
            fn mnemonic(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some($mnemonic), )*
                    _ => None,
                }
            }

            /// Look up a mnemonic.
            fn from_mnemonic(s: &str) -> Option<Self> {
                $( if s.eq_ignore_ascii_case($mnemonic) {
                    return Some(Self($value));
                } )*
                None
            }
        }
    };
}

rtype_consts! {
    A = 1, "A";
    NS = 2, "NS";
    CNAME = 5, "CNAME";
    SOA = 6, "SOA";
    PTR = 12, "PTR";
    MX = 15, "MX";
    TXT = 16, "TXT";
    AAAA = 28, "AAAA";
    SRV = 33, "SRV";
    OPT = 41, "OPT";
    DS = 43, "DS";
    RRSIG = 46, "RRSIG";
    NSEC = 47, "NSEC";
    DNSKEY = 48, "DNSKEY";
    NSEC3 = 50, "NSEC3";
    NSEC3PARAM = 51, "NSEC3PARAM";
    TSIG = 250, "TSIG";
    IXFR = 251, "IXFR";
    AXFR = 252, "AXFR";
    ANY = 255, "ANY";
}

impl Rtype {
    /// Whether records of this type can appear in zone contents.
    ///
    /// Pseudo-types only occur in messages.
    pub fn is_zone_type(self) -> bool {
        !matches!(self, Self::OPT | Self::TSIG | Self::IXFR | Self::AXFR | Self::ANY)
    }
}

impl fmt::Display for Rtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(m) => f.write_str(m),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

impl FromStr for Rtype {
    type Err = UnknownMnemonic;

    fn from_str(s: &str) -> Result<Self, UnknownMnemonic> {
        if let Some(rtype) = Self::from_mnemonic(s) {
            return Ok(rtype);
        }
        parse_generic(s, "TYPE").map(Self)
    }
}

//----------- Class ------------------------------------------------------------

/// A record class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Class(pub u16);

impl Class {
    pub const IN: Self = Self(1);
    pub const CH: Self = Self(3);
    /// RFC 2136: "delete an RR from an RRset".
    pub const NONE: Self = Self(254);
    pub const ANY: Self = Self(255);
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::IN => f.write_str("IN"),
            Self::CH => f.write_str("CH"),
            Self::NONE => f.write_str("NONE"),
            Self::ANY => f.write_str("ANY"),
            Self(value) => write!(f, "CLASS{value}"),
        }
    }
}

impl FromStr for Class {
    type Err = UnknownMnemonic;

    fn from_str(s: &str) -> Result<Self, UnknownMnemonic> {
        match s {
            _ if s.eq_ignore_ascii_case("IN") => Ok(Self::IN),
            _ if s.eq_ignore_ascii_case("CH") => Ok(Self::CH),
            _ if s.eq_ignore_ascii_case("NONE") => Ok(Self::NONE),
            _ if s.eq_ignore_ascii_case("ANY") => Ok(Self::ANY),
            _ => parse_generic(s, "CLASS").map(Self),
        }
    }
}

//----------- Opcode -----------------------------------------------------------

/// A message opcode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const QUERY: Self = Self(0);
    pub const NOTIFY: Self = Self(4);
    pub const UPDATE: Self = Self(5);
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::QUERY => f.write_str("QUERY"),
            Self::NOTIFY => f.write_str("NOTIFY"),
            Self::UPDATE => f.write_str("UPDATE"),
            Self(value) => write!(f, "OPCODE{value}"),
        }
    }
}

//----------- Rcode ------------------------------------------------------------

/// A response code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rcode(pub u8);

impl Rcode {
    pub const NOERROR: Self = Self(0);
    pub const FORMERR: Self = Self(1);
    pub const SERVFAIL: Self = Self(2);
    pub const NXDOMAIN: Self = Self(3);
    pub const NOTIMP: Self = Self(4);
    pub const REFUSED: Self = Self(5);
    /// RFC 2136: a name exists when it should not.
    pub const YXDOMAIN: Self = Self(6);
    /// RFC 2136: an RRset exists when it should not.
    pub const YXRRSET: Self = Self(7);
    /// RFC 2136: an RRset does not exist when it should.
    pub const NXRRSET: Self = Self(8);
    pub const NOTAUTH: Self = Self(9);
    /// RFC 2136: a name is outside the zone named in the zone section.
    pub const NOTZONE: Self = Self(10);
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match *self {
            Self::NOERROR => "NOERROR",
            Self::FORMERR => "FORMERR",
            Self::SERVFAIL => "SERVFAIL",
            Self::NXDOMAIN => "NXDOMAIN",
            Self::NOTIMP => "NOTIMP",
            Self::REFUSED => "REFUSED",
            Self::YXDOMAIN => "YXDOMAIN",
            Self::YXRRSET => "YXRRSET",
            Self::NXRRSET => "NXRRSET",
            Self::NOTAUTH => "NOTAUTH",
            Self::NOTZONE => "NOTZONE",
            Self(value) => return write!(f, "RCODE{value}"),
        };
        f.write_str(text)
    }
}

//----------- TsigRcode --------------------------------------------------------

/// An error code in a TSIG record.
///
/// The first sixteen values coincide with [`Rcode`]; the remainder are
/// specific to transaction signatures (RFC 8945 §5.3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TsigRcode(pub u16);

impl TsigRcode {
    pub const NOERROR: Self = Self(0);
    pub const BADSIG: Self = Self(16);
    pub const BADKEY: Self = Self(17);
    pub const BADTIME: Self = Self(18);
}

impl fmt::Display for TsigRcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NOERROR => f.write_str("NOERROR"),
            Self::BADSIG => f.write_str("BADSIG"),
            Self::BADKEY => f.write_str("BADKEY"),
            Self::BADTIME => f.write_str("BADTIME"),
            Self(value) => write!(f, "RCODE{value}"),
        }
    }
}

//----------- SecurityAlgorithm ------------------------------------------------

/// A DNSSEC signing algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecurityAlgorithm(pub u8);

impl SecurityAlgorithm {
    pub const RSASHA256: Self = Self(8);
    pub const ECDSAP256SHA256: Self = Self(13);
    pub const ED25519: Self = Self(15);
}

impl fmt::Display for SecurityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::RSASHA256 => f.write_str("RSASHA256"),
            Self::ECDSAP256SHA256 => f.write_str("ECDSAP256SHA256"),
            Self::ED25519 => f.write_str("ED25519"),
            Self(value) => write!(f, "ALG{value}"),
        }
    }
}

//----------- UnknownMnemonic --------------------------------------------------

/// An unrecognized registry mnemonic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownMnemonic(pub Box<str>);

impl std::error::Error for UnknownMnemonic {}

impl fmt::Display for UnknownMnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mnemonic '{}'", self.0)
    }
}

/// Parse the RFC 3597 `TYPE###` / `CLASS###` notation.
fn parse_generic(s: &str, prefix: &str) -> Result<u16, UnknownMnemonic> {
    s.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| s[prefix.len()..].parse().ok())
        .ok_or_else(|| UnknownMnemonic(s.into()))
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics() {
        assert_eq!("AAAA".parse::<Rtype>().unwrap(), Rtype::AAAA);
        assert_eq!("nsec3param".parse::<Rtype>().unwrap(), Rtype::NSEC3PARAM);
        assert_eq!(Rtype::SOA.to_string(), "SOA");
    }

    #[test]
    fn generic_notation() {
        assert_eq!("TYPE4711".parse::<Rtype>().unwrap(), Rtype(4711));
        assert_eq!(Rtype(4711).to_string(), "TYPE4711");
        assert_eq!("CLASS3".parse::<Class>().unwrap(), Class::CH);
        assert!("TYPEx".parse::<Rtype>().is_err());
        assert!("NOPE".parse::<Rtype>().is_err());
    }
}
