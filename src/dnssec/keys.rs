//! Signing keys.
//!
//! Keys live in a per-zone directory as BIND-style pairs: `K<zone>+<alg>+
//! <tag>.key` holds the DNSKEY record in master-file notation, and the
//! matching `.private` file holds the secret in the `Private-key-format`
//! text layout.  Ed25519 and ECDSA P-256 are supported.

use std::fmt;

use camino::Utf8Path;
use herald_wire::base;
use herald_wire::{Class, Name, Rdata, Record, SecurityAlgorithm};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

/// The flags word marking a zone-signing key.
pub const FLAGS_ZSK: u16 = 256;

/// The flags word marking a key-signing key.
pub const FLAGS_KSK: u16 = 257;

//----------- SigningKey -------------------------------------------------------

/// A private key the server signs with, paired with its DNSKEY record.
pub struct SigningKey {
    /// The public half, as the apex DNSKEY record.
    pub dnskey: Record,

    /// The DNSKEY flags (256 for a ZSK, 257 for a KSK).
    pub flags: u16,

    /// The signing algorithm.
    pub algorithm: SecurityAlgorithm,

    /// The key tag derived from the public key (RFC 4034 appendix B).
    pub key_tag: u16,

    /// The private half.
    signer: Signer,

    /// Randomness for the algorithms that need it.
    rng: SystemRandom,
}

enum Signer {
    Ed25519(Ed25519KeyPair),
    EcdsaP256(EcdsaKeyPair),
}

impl SigningKey {
    /// Load every key pair for `zone` from a directory.
    pub fn load_all(dir: &Utf8Path, zone: &Name) -> Result<Vec<Self>, KeyError> {
        let mut keys = Vec::new();
        let entries =
            std::fs::read_dir(dir).map_err(|err| KeyError::Io(dir.to_owned().into(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| KeyError::Io(dir.to_owned().into(), err))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with('K') || !name.ends_with(".private") {
                continue;
            }
            let private_path = Utf8Path::new(dir).join(name);
            let key_path = private_path.with_extension("key");
            let key_text = std::fs::read_to_string(&key_path)
                .map_err(|err| KeyError::Io(key_path.to_string(), err))?;
            let private_text = std::fs::read_to_string(&private_path)
                .map_err(|err| KeyError::Io(private_path.to_string(), err))?;
            let key = Self::from_texts(zone, &key_text, &private_text)?;
            keys.push(key);
        }
        if keys.is_empty() {
            return Err(KeyError::NoKeys);
        }
        keys.sort_by_key(|key| key.key_tag);
        Ok(keys)
    }

    /// Parse a key pair from the contents of its two files.
    pub fn from_texts(zone: &Name, key_text: &str, private_text: &str) -> Result<Self, KeyError> {
        let (ttl, flags, algorithm, public_key) = parse_dnskey_line(key_text)?;
        let secret = parse_private_text(private_text, algorithm)?;

        let signer = match algorithm {
            SecurityAlgorithm::ED25519 => Signer::Ed25519(
                Ed25519KeyPair::from_seed_and_public_key(&secret, &public_key)
                    .map_err(|_| KeyError::BadPrivateKey)?,
            ),
            SecurityAlgorithm::ECDSAP256SHA256 => {
                // The DNSKEY form is the bare 64-octet point; ring wants the
                // uncompressed SEC 1 encoding.
                let mut point = Vec::with_capacity(65);
                point.push(0x04);
                point.extend_from_slice(&public_key);
                Signer::EcdsaP256(
                    EcdsaKeyPair::from_private_key_and_public_key(
                        &ECDSA_P256_SHA256_FIXED_SIGNING,
                        &secret,
                        &point,
                        &SystemRandom::new(),
                    )
                    .map_err(|_| KeyError::BadPrivateKey)?,
                )
            }
            other => return Err(KeyError::UnsupportedAlgorithm(other)),
        };

        let rdata = Rdata::Dnskey {
            flags,
            protocol: 3,
            algorithm,
            public_key: public_key.into(),
        };
        let key_tag = key_tag(&rdata);
        Ok(Self {
            dnskey: Record::new(zone.clone(), Class::IN, ttl, rdata),
            flags,
            algorithm,
            key_tag,
            signer,
            rng: SystemRandom::new(),
        })
    }

    /// Whether this is a zone-signing key (the SEP bit is clear).
    pub fn is_zsk(&self) -> bool {
        self.flags & 1 == 0
    }

    /// Whether this is a key-signing key (the SEP bit is set).
    pub fn is_ksk(&self) -> bool {
        self.flags & 1 != 0
    }

    /// Sign a buffer, producing the RRSIG signature field.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        match &self.signer {
            Signer::Ed25519(pair) => Ok(pair.sign(data).as_ref().to_vec()),
            Signer::EcdsaP256(pair) => pair
                .sign(&self.rng, data)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| KeyError::SigningFailed),
        }
    }
}

impl fmt::Debug for SigningKey {
    /// The private half is deliberately omitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("flags", &self.flags)
            .field("algorithm", &self.algorithm)
            .field("key_tag", &self.key_tag)
            .finish_non_exhaustive()
    }
}

/// Compute a DNSKEY's key tag (RFC 4034 appendix B).
pub fn key_tag(rdata: &Rdata) -> u16 {
    let wire = rdata.to_wire();
    let mut accumulator: u32 = 0;
    for (index, &octet) in wire.iter().enumerate() {
        if index & 1 == 0 {
            accumulator += u32::from(octet) << 8;
        } else {
            accumulator += u32::from(octet);
        }
    }
    accumulator += (accumulator >> 16) & 0xFFFF;
    (accumulator & 0xFFFF) as u16
}

/// Pull the DNSKEY fields out of a `.key` file.
///
/// The file holds one record in master-file notation, e.g.
/// `example. 3600 IN DNSKEY 257 3 15 l02Woi...=`.  Comment lines are
/// skipped.
fn parse_dnskey_line(text: &str) -> Result<(u32, u16, SecurityAlgorithm, Vec<u8>), KeyError> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let position = tokens
            .iter()
            .position(|token| token.eq_ignore_ascii_case("DNSKEY"))
            .ok_or(KeyError::BadKeyFile)?;
        if tokens.len() < position + 4 {
            return Err(KeyError::BadKeyFile);
        }
        // An optional TTL sits between the owner and the class.
        let ttl = tokens[1..position]
            .iter()
            .find_map(|token| token.parse().ok())
            .unwrap_or(3600);
        let flags: u16 = tokens[position + 1].parse().map_err(|_| KeyError::BadKeyFile)?;
        let protocol: u8 = tokens[position + 2].parse().map_err(|_| KeyError::BadKeyFile)?;
        if protocol != 3 {
            return Err(KeyError::BadKeyFile);
        }
        let algorithm: u8 = tokens[position + 3].parse().map_err(|_| KeyError::BadKeyFile)?;
        let public_key = base::base64_decode(&tokens[position + 4..].concat())
            .map_err(|_| KeyError::BadKeyFile)?;
        return Ok((ttl, flags, SecurityAlgorithm(algorithm), public_key));
    }
    Err(KeyError::BadKeyFile)
}

/// Pull the secret out of a `.private` file.
fn parse_private_text(text: &str, algorithm: SecurityAlgorithm) -> Result<Vec<u8>, KeyError> {
    let mut found_algorithm = None;
    let mut private_key = None;
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("Algorithm:") {
            found_algorithm = value.trim().split_whitespace().next().and_then(|t| t.parse::<u8>().ok());
        } else if let Some(value) = line.strip_prefix("PrivateKey:") {
            private_key =
                Some(base::base64_decode(value.trim()).map_err(|_| KeyError::BadPrivateKey)?);
        }
    }
    if found_algorithm != Some(algorithm.0) {
        return Err(KeyError::BadPrivateKey);
    }
    private_key.ok_or(KeyError::BadPrivateKey)
}

//----------- KeyError ---------------------------------------------------------

/// An error loading or using signing keys.
#[derive(Debug)]
pub enum KeyError {
    /// The key directory held no usable key pair.
    NoKeys,

    /// A `.key` file was not a DNSKEY record.
    BadKeyFile,

    /// A `.private` file was unusable or inconsistent with its `.key`.
    BadPrivateKey,

    /// The algorithm is not one we can sign with.
    UnsupportedAlgorithm(SecurityAlgorithm),

    /// The signing operation itself failed.
    SigningFailed,

    /// A file could not be read.
    Io(String, std::io::Error),
}

impl std::error::Error for KeyError {}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKeys => f.write_str("no signing keys found"),
            Self::BadKeyFile => f.write_str("malformed .key file"),
            Self::BadPrivateKey => f.write_str("malformed or mismatched .private file"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm {alg}"),
            Self::SigningFailed => f.write_str("signing operation failed"),
            Self::Io(path, err) => write!(f, "could not read '{path}': {err}"),
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // A deterministic Ed25519 test key (RFC 8080 test vector key material).
    const KEY_FILE: &str =
        "example.com. 3600 IN DNSKEY 257 3 15 l02Woi0iS8Aa25FQkUd9RMzZHJpBoRQwAQEX1SxZJA4=\n";
    const PRIVATE_FILE: &str = "Private-key-format: v1.3\n\
         Algorithm: 15 (ED25519)\n\
         PrivateKey: ODIyNjAzODQ2MjgwODAxMjI2NDUxOTAyMDQxNDIyNjI=\n";

    #[test]
    fn parse_key_pair() {
        let zone = Name::from_str("example.com.").unwrap();
        let key = SigningKey::from_texts(&zone, KEY_FILE, PRIVATE_FILE).unwrap();
        assert!(key.is_ksk());
        assert_eq!(key.algorithm, SecurityAlgorithm::ED25519);

        // Signing round-trips through ring's own verification.
        let signature = key.sign(b"sample data").unwrap();
        assert_eq!(signature.len(), 64);
        let Rdata::Dnskey { ref public_key, .. } = key.dnskey.rdata else {
            panic!("DNSKEY rdata expected");
        };
        ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, public_key.as_ref())
            .verify(b"sample data", &signature)
            .unwrap();
    }

    #[test]
    fn key_tag_matches_reference() {
        let zone = Name::from_str("example.com.").unwrap();
        let key = SigningKey::from_texts(&zone, KEY_FILE, PRIVATE_FILE).unwrap();
        // The tag from the RFC 8080 vectors for this key.
        assert_eq!(key.key_tag, 3613);
    }

    #[test]
    fn mismatched_private_algorithm_rejected() {
        let zone = Name::from_str("example.com.").unwrap();
        let bad = PRIVATE_FILE.replace("15 (ED25519)", "13 (ECDSAP256SHA256)");
        assert!(matches!(
            SigningKey::from_texts(&zone, KEY_FILE, &bad),
            Err(KeyError::BadPrivateKey)
        ));
    }
}
