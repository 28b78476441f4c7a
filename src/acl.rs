//! Access control.
//!
//! ACLs gate the operations a peer may trigger: transfers, dynamic updates,
//! NOTIFY and the control channel.  An ACL entry matches on the peer address
//! and/or the TSIG key the request was signed with; an empty ACL denies
//! everything.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use herald_wire::tsig;
use herald_wire::Name;
use ipnet::IpNet;

use crate::config::{AclEntryConfig, TsigKeyConfig};

//----------- TsigStore --------------------------------------------------------

/// The TSIG keys the server knows, by name.
#[derive(Debug, Default)]
pub struct TsigStore {
    keys: Mutex<foldhash::HashMap<Name, Arc<tsig::Key>>>,
}

impl TsigStore {
    /// Build the store from configuration.
    pub fn from_config(configs: &[TsigKeyConfig]) -> Result<Self, String> {
        let store = Self::default();
        for config in configs {
            let algorithm = config
                .algorithm
                .parse()
                .map_err(|_| format!("key '{}': unknown algorithm '{}'", config.name, config.algorithm))?;
            let key = tsig::Key::from_base64(config.name.clone(), algorithm, &config.secret)
                .map_err(|_| format!("key '{}': secret is not valid base64", config.name))?;
            store.insert(key);
        }
        Ok(store)
    }

    /// Insert a key, replacing any of the same name.
    pub fn insert(&self, key: tsig::Key) {
        let mut keys = self.keys.lock().expect("key store lock is never poisoned");
        keys.insert(key.name.clone(), Arc::new(key));
    }

    /// Look a key up by name.
    pub fn get(&self, name: &Name) -> Option<Arc<tsig::Key>> {
        let keys = self.keys.lock().expect("key store lock is never poisoned");
        keys.get(name).cloned()
    }
}

//----------- Acl --------------------------------------------------------------

/// One matching rule of an ACL.
#[derive(Clone, Debug, Default)]
pub struct AclEntry {
    /// The network the peer must come from, if restricted.
    pub net: Option<IpNet>,

    /// The TSIG key the request must carry, if any.
    pub key: Option<Name>,
}

impl AclEntry {
    fn matches(&self, addr: IpAddr, key: Option<&Name>) -> bool {
        if let Some(net) = &self.net {
            if !net.contains(&addr) {
                return false;
            }
        }
        match &self.key {
            Some(required) => key == Some(required),
            None => true,
        }
    }
}

/// An access control list.
///
/// A peer passes if any entry matches.  The empty list denies everything.
#[derive(Clone, Debug, Default)]
pub struct Acl {
    entries: Vec<AclEntry>,
}

impl Acl {
    /// Build an ACL from configuration.
    pub fn from_config(configs: &[AclEntryConfig]) -> Self {
        Self {
            entries: configs
                .iter()
                .map(|config| AclEntry {
                    net: config.addr,
                    key: config.key.clone(),
                })
                .collect(),
        }
    }

    /// Whether a peer passes this ACL.
    ///
    /// `key` is the name of the TSIG key the request was *successfully*
    /// verified with; the caller performs the verification.
    pub fn allows(&self, addr: IpAddr, key: Option<&Name>) -> bool {
        self.entries.iter().any(|entry| entry.matches(addr, key))
    }

    /// Whether the ACL can match requests signed with `key` at all.
    ///
    /// Used to decide which key to verify against before the ACL proper is
    /// evaluated.
    pub fn requires_key(&self) -> bool {
        self.entries.iter().all(|entry| entry.key.is_some())
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn empty_acl_denies() {
        let acl = Acl::default();
        assert!(!acl.allows("127.0.0.1".parse().unwrap(), None));
    }

    #[test]
    fn address_and_key_must_both_match() {
        let key_name = Name::from_str("update-key.").unwrap();
        let acl = Acl {
            entries: vec![AclEntry {
                net: Some("192.0.2.0/24".parse().unwrap()),
                key: Some(key_name.clone()),
            }],
        };

        assert!(acl.allows("192.0.2.7".parse().unwrap(), Some(&key_name)));
        assert!(!acl.allows("192.0.2.7".parse().unwrap(), None));
        assert!(!acl.allows("198.51.100.1".parse().unwrap(), Some(&key_name)));
    }

    #[test]
    fn address_only_entries_accept_unsigned() {
        let acl = Acl {
            entries: vec![AclEntry {
                net: Some("127.0.0.0/8".parse().unwrap()),
                key: None,
            }],
        };
        assert!(acl.allows("127.0.0.1".parse().unwrap(), None));
        assert!(!acl.requires_key());
    }
}
