//! Master-file reading and writing (RFC 1035 §5).
//!
//! The parser handles the full syntax the server emits and the common
//! hand-written forms: `$ORIGIN` and `$TTL`, parenthesized continuation,
//! quoted strings, escapes, `@`, and omitted owner, TTL or class.  The
//! writer produces one record per line with absolute names, SOA first, in
//! canonical order; FLUSH replaces the file atomically.

use std::fmt::Write as _;
use std::str::FromStr;

use camino::Utf8Path;
use herald_wire::base;
use herald_wire::{Class, Name, Rdata, Record, Rrsig, Rtype, Serial, Soa, TypeBitmap};

use crate::zone::contents::{ContentsError, ZoneContents};

//----------- Loading ----------------------------------------------------------

/// Load a zone from a master file.
pub fn load(path: &Utf8Path, origin: &Name) -> Result<ZoneContents, ZonefileError> {
    let text = std::fs::read_to_string(path).map_err(ZonefileError::Io)?;
    let records = parse(&text, origin)?;
    ZoneContents::from_records(origin.clone(), records).map_err(ZonefileError::Contents)
}

/// Parse master-file text into records.
pub fn parse(text: &str, origin: &Name) -> Result<Vec<Record>, ZonefileError> {
    let mut records = Vec::new();
    let mut state = ParseState {
        origin: origin.clone(),
        last_owner: None,
        default_ttl: None,
    };

    for (number, line) in LogicalLines::new(text) {
        let line = line?;
        if line.tokens.is_empty() {
            continue;
        }
        match line.tokens[0].text.as_str() {
            "$ORIGIN" => {
                let token = line.tokens.get(1).ok_or(ZonefileError::Syntax {
                    line: number,
                    what: "$ORIGIN needs a name",
                })?;
                state.origin = Name::from_str_relative(&token.text, &state.origin)
                    .map_err(|_| ZonefileError::Syntax {
                        line: number,
                        what: "invalid $ORIGIN name",
                    })?;
            }
            "$TTL" => {
                let token = line.tokens.get(1).ok_or(ZonefileError::Syntax {
                    line: number,
                    what: "$TTL needs a value",
                })?;
                state.default_ttl =
                    Some(parse_ttl(&token.text).ok_or(ZonefileError::Syntax {
                        line: number,
                        what: "invalid $TTL value",
                    })?);
            }
            directive if directive.starts_with('$') => {
                return Err(ZonefileError::Syntax {
                    line: number,
                    what: "unsupported directive",
                });
            }
            _ => {
                records.push(parse_record(&line, &mut state, number)?);
            }
        }
    }
    Ok(records)
}

struct ParseState {
    origin: Name,
    last_owner: Option<Name>,
    default_ttl: Option<u32>,
}

fn parse_record(
    line: &LogicalLine,
    state: &mut ParseState,
    number: usize,
) -> Result<Record, ZonefileError> {
    let syntax = |what: &'static str| ZonefileError::Syntax { line: number, what };
    let mut tokens = line.tokens.iter();

    // The owner: either the first token, or carried over when the line
    // started with whitespace.
    let owner = if line.leading_blank {
        state.last_owner.clone().ok_or(syntax("no previous owner"))?
    } else {
        let token = tokens.next().expect("non-empty line");
        Name::from_str_relative(&token.text, &state.origin)
            .map_err(|_| syntax("invalid owner name"))?
    };
    state.last_owner = Some(owner.clone());

    // TTL and class may both appear, in either order, before the type.
    let mut ttl = None;
    let mut class = Class::IN;
    let rtype = loop {
        let token = tokens.next().ok_or(syntax("record type missing"))?;
        if let Some(value) = parse_ttl(&token.text) {
            ttl = Some(value);
            continue;
        }
        if let Ok(parsed) = Class::from_str(&token.text) {
            class = parsed;
            continue;
        }
        break Rtype::from_str(&token.text).map_err(|_| syntax("unknown record type"))?;
    };
    let ttl = ttl
        .or(state.default_ttl)
        .ok_or(syntax("no TTL and no $TTL default"))?;

    let rest: Vec<&Token> = tokens.collect();
    let rdata = parse_rdata(rtype, &rest, &state.origin).map_err(|what| syntax(what))?;
    Ok(Record::new(owner, class, ttl, rdata))
}

/// Parse RDATA from its presentation tokens.
fn parse_rdata(rtype: Rtype, tokens: &[&Token], origin: &Name) -> Result<Rdata, &'static str> {
    let text = |index: usize| -> Result<&str, &'static str> {
        tokens.get(index).map(|t| t.text.as_str()).ok_or("missing RDATA field")
    };
    let name_at = |index: usize| -> Result<Name, &'static str> {
        Name::from_str_relative(text(index)?, origin).map_err(|_| "invalid name in RDATA")
    };
    let int = |index: usize| -> Result<u64, &'static str> {
        text(index)?.parse().map_err(|_| "invalid integer in RDATA")
    };

    // Generic RFC 3597 notation works for any type.
    if tokens.first().is_some_and(|t| t.text == "\\#") {
        let length: usize = int(1)? as usize;
        let hex: String = tokens[2..].iter().map(|t| t.text.as_str()).collect();
        let octets = base::hex_decode(&hex).map_err(|_| "invalid hex in generic RDATA")?;
        if octets.len() != length {
            return Err("generic RDATA length mismatch");
        }
        return Ok(Rdata::Unknown(rtype, octets.into()));
    }

    Ok(match rtype {
        Rtype::A => Rdata::A(text(0)?.parse().map_err(|_| "invalid IPv4 address")?),
        Rtype::AAAA => Rdata::Aaaa(text(0)?.parse().map_err(|_| "invalid IPv6 address")?),
        Rtype::NS => Rdata::Ns(name_at(0)?),
        Rtype::CNAME => Rdata::Cname(name_at(0)?),
        Rtype::PTR => Rdata::Ptr(name_at(0)?),
        Rtype::MX => Rdata::Mx {
            preference: int(0)? as u16,
            exchange: name_at(1)?,
        },
        Rtype::TXT => {
            if tokens.is_empty() {
                return Err("TXT needs at least one string");
            }
            Rdata::Txt(tokens.iter().map(|t| t.data.clone().into()).collect())
        }
        Rtype::SOA => Rdata::Soa(Soa {
            mname: name_at(0)?,
            rname: name_at(1)?,
            serial: Serial(int(2)? as u32),
            refresh: parse_ttl(text(3)?).ok_or("invalid SOA refresh")?,
            retry: parse_ttl(text(4)?).ok_or("invalid SOA retry")?,
            expire: parse_ttl(text(5)?).ok_or("invalid SOA expire")?,
            minimum: parse_ttl(text(6)?).ok_or("invalid SOA minimum")?,
        }),
        Rtype::SRV => Rdata::Srv {
            priority: int(0)? as u16,
            weight: int(1)? as u16,
            port: int(2)? as u16,
            target: name_at(3)?,
        },
        Rtype::DS => Rdata::Ds {
            key_tag: int(0)? as u16,
            algorithm: herald_wire::SecurityAlgorithm(int(1)? as u8),
            digest_type: int(2)? as u8,
            digest: {
                let hex: String = tokens[3..].iter().map(|t| t.text.as_str()).collect();
                base::hex_decode(&hex).map_err(|_| "invalid DS digest")?.into()
            },
        },
        Rtype::DNSKEY => Rdata::Dnskey {
            flags: int(0)? as u16,
            protocol: int(1)? as u8,
            algorithm: herald_wire::SecurityAlgorithm(int(2)? as u8),
            public_key: {
                let b64: String = tokens[3..].iter().map(|t| t.text.as_str()).collect();
                base::base64_decode(&b64).map_err(|_| "invalid DNSKEY key")?.into()
            },
        },
        Rtype::RRSIG => Rdata::Rrsig(Rrsig {
            type_covered: Rtype::from_str(text(0)?).map_err(|_| "invalid covered type")?,
            algorithm: herald_wire::SecurityAlgorithm(int(1)? as u8),
            labels: int(2)? as u8,
            original_ttl: int(3)? as u32,
            expiration: parse_timestamp(text(4)?)?,
            inception: parse_timestamp(text(5)?)?,
            key_tag: int(6)? as u16,
            signer: name_at(7)?,
            signature: {
                let b64: String = tokens[8..].iter().map(|t| t.text.as_str()).collect();
                base::base64_decode(&b64).map_err(|_| "invalid signature")?.into()
            },
        }),
        Rtype::NSEC => Rdata::Nsec {
            next: name_at(0)?,
            types: {
                let types: Result<Vec<Rtype>, _> = tokens[1..]
                    .iter()
                    .map(|t| Rtype::from_str(&t.text))
                    .collect();
                TypeBitmap::from_types(types.map_err(|_| "invalid type in NSEC bitmap")?)
            },
        },
        Rtype::NSEC3 => Rdata::Nsec3 {
            hash_algorithm: int(0)? as u8,
            flags: int(1)? as u8,
            iterations: int(2)? as u16,
            salt: parse_salt(text(3)?)?,
            next_hashed: base::base32hex_decode(text(4)?)
                .map_err(|_| "invalid NSEC3 next hash")?
                .into(),
            types: {
                let types: Result<Vec<Rtype>, _> = tokens[5..]
                    .iter()
                    .map(|t| Rtype::from_str(&t.text))
                    .collect();
                TypeBitmap::from_types(types.map_err(|_| "invalid type in NSEC3 bitmap")?)
            },
        },
        Rtype::NSEC3PARAM => Rdata::Nsec3param {
            hash_algorithm: int(0)? as u8,
            flags: int(1)? as u8,
            iterations: int(2)? as u16,
            salt: parse_salt(text(3)?)?,
        },
        _ => return Err("type needs RFC 3597 generic notation"),
    })
}

fn parse_salt(text: &str) -> Result<Box<[u8]>, &'static str> {
    if text == "-" {
        return Ok(Box::default());
    }
    base::hex_decode(text).map(Into::into).map_err(|_| "invalid salt")
}

/// Parse a TTL: plain seconds or the `1d2h` unit notation.
fn parse_ttl(text: &str) -> Option<u32> {
    if let Ok(value) = text.parse() {
        return Some(value);
    }
    let mut total: u64 = 0;
    let mut value: u64 = 0;
    let mut any_digit = false;
    for c in text.chars() {
        match c {
            '0'..='9' => {
                value = value * 10 + u64::from(c as u8 - b'0');
                any_digit = true;
            }
            _ => {
                let unit: u64 = match c.to_ascii_lowercase() {
                    's' => 1,
                    'm' => 60,
                    'h' => 3600,
                    'd' => 86400,
                    'w' => 604800,
                    _ => return None,
                };
                if !any_digit {
                    return None;
                }
                total += value * unit;
                value = 0;
                any_digit = false;
            }
        }
    }
    if any_digit {
        total += value;
    }
    u32::try_from(total).ok()
}

/// Parse an RRSIG timestamp: `YYYYMMDDHHMMSS` or epoch seconds.
fn parse_timestamp(text: &str) -> Result<u32, &'static str> {
    if text.len() == 14 {
        let datetime = jiff::civil::DateTime::strptime("%Y%m%d%H%M%S", text)
            .map_err(|_| "invalid timestamp")?;
        let zoned = datetime
            .to_zoned(jiff::tz::TimeZone::UTC)
            .map_err(|_| "invalid timestamp")?;
        return u32::try_from(zoned.timestamp().as_second()).map_err(|_| "timestamp out of range");
    }
    text.parse().map_err(|_| "invalid timestamp")
}

/// Render an RRSIG timestamp in `YYYYMMDDHHMMSS` form.
fn format_timestamp(epoch: u32) -> String {
    let timestamp =
        jiff::Timestamp::from_second(i64::from(epoch)).expect("u32 epochs are in range");
    timestamp.strftime("%Y%m%d%H%M%S").to_string()
}

//----------- Writing ----------------------------------------------------------

/// Serialize contents to master-file text.
pub fn format_contents(contents: &ZoneContents) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "$ORIGIN {}", contents.origin());

    for record in contents.iter_records() {
        match &record.rdata {
            Rdata::Rrsig(rrsig) => {
                // Pretty-print the validity window.
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}\tRRSIG\t{} {} {} {} {} {} {} {} {}",
                    record.owner,
                    record.ttl,
                    record.class,
                    rrsig.type_covered,
                    rrsig.algorithm.0,
                    rrsig.labels,
                    rrsig.original_ttl,
                    format_timestamp(rrsig.expiration),
                    format_timestamp(rrsig.inception),
                    rrsig.key_tag,
                    rrsig.signer,
                    base::base64_encode(&rrsig.signature),
                );
            }
            _ => {
                let _ = writeln!(out, "{record}");
            }
        }
    }
    out
}

/// Write contents to a zone file, atomically.
pub fn write_contents(path: &Utf8Path, contents: &ZoneContents) -> std::io::Result<()> {
    crate::util::write_file(path, format_contents(contents).as_bytes())
}

//----------- Tokenizer --------------------------------------------------------

/// One token: its raw text (for names and numbers) and its decoded data
/// (for quoted strings).
struct Token {
    text: String,
    data: Vec<u8>,
}

/// One logical line: entries between newlines, with parentheses joining
/// physical lines.
struct LogicalLine {
    tokens: Vec<Token>,
    leading_blank: bool,
}

struct LogicalLines<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    done: bool,
}

impl<'a> LogicalLines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 0,
            done: false,
        }
    }
}

impl Iterator for LogicalLines<'_> {
    type Item = (usize, Result<LogicalLine, ZonefileError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.line += 1;
        let number = self.line;

        let mut tokens = Vec::new();
        let mut depth = 0usize;
        let leading_blank = matches!(self.chars.peek(), Some(' ' | '\t'));
        let mut current: Option<(String, Vec<u8>)> = None;

        macro_rules! flush {
            () => {
                if let Some((text, data)) = current.take() {
                    tokens.push(Token { text, data });
                }
            };
        }

        loop {
            let Some(c) = self.chars.next() else {
                self.done = true;
                break;
            };
            match c {
                '\n' => {
                    self.line += 1;
                    if depth == 0 {
                        self.line -= 1;
                        break;
                    }
                }
                ';' => {
                    // A comment runs to the end of the physical line.
                    flush!();
                    while let Some(&next) = self.chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '(' => {
                    flush!();
                    depth += 1;
                }
                ')' => {
                    flush!();
                    match depth.checked_sub(1) {
                        Some(next) => depth = next,
                        None => {
                            return Some((
                                number,
                                Err(ZonefileError::Syntax {
                                    line: number,
                                    what: "unbalanced parentheses",
                                }),
                            ));
                        }
                    }
                }
                ' ' | '\t' | '\r' => flush!(),
                '"' => {
                    // A quoted string is one token; quotes do not nest.
                    flush!();
                    let mut data = Vec::new();
                    loop {
                        match self.chars.next() {
                            Some('"') => break,
                            Some('\\') => match parse_escape(&mut self.chars) {
                                Some(byte) => data.push(byte),
                                None => {
                                    return Some((
                                        number,
                                        Err(ZonefileError::Syntax {
                                            line: number,
                                            what: "bad escape in quoted string",
                                        }),
                                    ));
                                }
                            },
                            Some(c) => {
                                let mut buffer = [0u8; 4];
                                data.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
                            }
                            None => {
                                return Some((
                                    number,
                                    Err(ZonefileError::Syntax {
                                        line: number,
                                        what: "unterminated quoted string",
                                    }),
                                ));
                            }
                        }
                    }
                    tokens.push(Token {
                        text: String::from_utf8_lossy(&data).into_owned(),
                        data,
                    });
                }
                _ => {
                    let (text, data) = current.get_or_insert_with(Default::default);
                    text.push(c);
                    let mut buffer = [0u8; 4];
                    data.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
                }
            }
        }
        flush!();

        if depth != 0 {
            return Some((
                number,
                Err(ZonefileError::Syntax {
                    line: number,
                    what: "unbalanced parentheses",
                }),
            ));
        }
        Some((
            number,
            Ok(LogicalLine {
                tokens,
                leading_blank,
            }),
        ))
    }
}

/// Decode the escape following a backslash inside a quoted string.
fn parse_escape(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<u8> {
    match chars.next()? {
        d0 @ '0'..='9' => {
            let d1 = chars.next()?.to_digit(10)?;
            let d2 = chars.next()?.to_digit(10)?;
            let value = d0.to_digit(10)? * 100 + d1 * 10 + d2;
            u8::try_from(value).ok()
        }
        other if other.is_ascii() => Some(other as u8),
        _ => None,
    }
}

//----------- ZonefileError ----------------------------------------------------

/// An error reading a master file.
#[derive(Debug)]
pub enum ZonefileError {
    /// The file could not be read.
    Io(std::io::Error),

    /// The text did not parse.
    Syntax {
        /// The line the problem was found on.
        line: usize,

        /// What the problem was.
        what: &'static str,
    },

    /// The records do not form a zone.
    Contents(ContentsError),
}

impl std::error::Error for ZonefileError {}

impl std::fmt::Display for ZonefileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::Syntax { line, what } => write!(f, "line {line}: {what}"),
            Self::Contents(err) => err.fmt(f),
        }
    }
}

//============ Tests ===========================================================
