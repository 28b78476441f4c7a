//! Herald's central command.

use std::collections::HashMap;
use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex},
};

use herald_wire::Name;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::acl::TsigStore;
use crate::config::{Config, ZoneConfig};
use crate::zone::events::{EventKind, When};
use crate::zone::{Zone, ZoneContents};

//----------- Center -----------------------------------------------------------

/// Herald's central command.
#[derive(Debug)]
pub struct Center {
    /// Global state.
    pub state: Mutex<State>,

    /// The configuration.  Replaced wholesale on reload.
    pub config: Mutex<Arc<Config>>,

    /// The TSIG key store.
    ///
    /// TSIG keys authenticate transfer peers, update clients, and the
    /// control channel.
    pub tsig: TsigStore,

    /// Where the configuration was loaded from, for `reload`.
    pub config_path: Mutex<Option<camino::Utf8PathBuf>>,

    /// The shutdown signal every executor subscribes to.
    pub shutdown: watch::Sender<bool>,
}

/// Global state for Herald.
#[derive(Debug, Default)]
pub struct State {
    /// Known zones.
    ///
    /// This field stores the live state of every zone.  Crucially, zones
    /// are concurrently accessible: the set itself is behind this lock, but
    /// each zone manages its own interior state.
    pub zones: foldhash::HashSet<ZoneByName>,
}

impl Center {
    /// Set up the center from a parsed configuration.
    pub fn new(config: Config) -> Result<Arc<Self>, String> {
        let tsig = TsigStore::from_config(&config.keys)?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            state: Mutex::new(State::default()),
            config: Mutex::new(Arc::new(config)),
            tsig,
            config_path: Mutex::new(None),
            shutdown,
        }))
    }

    /// The current configuration.
    pub fn config(&self) -> Arc<Config> {
        self.config.lock().expect("config lock is never poisoned").clone()
    }

    /// A bare center for unit tests: no zones, no keys, default config,
    /// journals out of the way in a fresh temp directory.
    #[cfg(test)]
    pub fn for_tests() -> Arc<Self> {
        let mut config: Config = toml::from_str("").expect("the empty config is valid");
        let dir = tempfile::tempdir().expect("a temp directory is available");
        config.journal_dir = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .expect("temp paths are UTF-8");
        // Leak the directory handle; the journals must outlive this call.
        std::mem::forget(dir);
        Self::new(config).expect("the empty config has no keys")
    }

    /// Signal every executor to wind down.
    pub fn initiate_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

//--- Actions

/// Add a zone and start its executor.
pub fn add_zone(center: &Arc<Center>, config: ZoneConfig) -> Result<Arc<Zone>, ZoneAddError> {
    let zone = Arc::new(Zone::new(config.clone()));

    {
        let mut state = center.state.lock().expect("center lock is never poisoned");
        let zone_by_name = ZoneByName(zone.clone());
        if !state.zones.insert(zone_by_name) {
            return Err(ZoneAddError::AlreadyExists);
        }
    }

    zone.open_journal(&center.config().journal_dir);

    // Initial contents: a primary zone loads its file, a secondary starts
    // empty and refreshes immediately.
    if config.is_secondary() {
        zone.scheduler.schedule(EventKind::Refresh, When::Now);
    } else {
        match &config.file {
            Some(path) => match crate::zonefile::load(path, &config.name) {
                Ok(contents) => {
                    let serial = contents.serial();
                    zone.publish(contents);
                    info!("loaded zone '{}' at serial {serial}", config.name);
                }
                Err(err) => {
                    warn!("could not load zone '{}' from '{path}': {err}", config.name);
                    zone.poison(format!("zone file unusable: {err}"));
                }
            },
            None => {
                // A primary without a file begins at serial 0 and waits for
                // dynamic updates.
                zone.publish(ZoneContents::bootstrap(config.name.clone()));
            }
        }
        if config.dnssec.is_some() {
            zone.scheduler.schedule(EventKind::Dnssec, When::Now);
        }
    }

    zone.spawn(center);
    info!("added zone '{}'", zone.name);
    Ok(zone)
}

/// Remove a zone.  Its executor winds down after in-flight work.
pub fn remove_zone(center: &Arc<Center>, name: &Name) -> Result<(), ZoneRemoveError> {
    let mut state = center.state.lock().expect("center lock is never poisoned");
    let zone = state.zones.take(name).ok_or(ZoneRemoveError::NotFound)?;
    zone.0.retire();
    info!("removed zone '{name}'");
    Ok(())
}

/// Look a zone up by name.
pub fn get_zone(center: &Center, name: &Name) -> Option<Arc<Zone>> {
    let state = center.state.lock().expect("center lock is never poisoned");
    state.zones.get(name).map(|zone| zone.0.clone())
}

/// The zone a name belongs to: the one with the longest matching suffix.
pub fn find_zone_for(center: &Center, name: &Name) -> Option<Arc<Zone>> {
    let state = center.state.lock().expect("center lock is never poisoned");
    state
        .zones
        .iter()
        .filter(|zone| name.ends_with(&zone.0.name))
        .max_by_key(|zone| zone.0.name.label_count())
        .map(|zone| zone.0.clone())
}

/// A snapshot of every zone, sorted by name.
pub fn zones(center: &Center) -> Vec<Arc<Zone>> {
    let state = center.state.lock().expect("center lock is never poisoned");
    let mut zones: Vec<Arc<Zone>> = state.zones.iter().map(|zone| zone.0.clone()).collect();
    zones.sort_by(|a, b| a.name.cmp(&b.name));
    zones
}

/// Apply a reloaded configuration: zones are added, removed and updated to
/// match, and the key store is rebuilt.
pub fn apply_config(center: &Arc<Center>, config: Config) -> Result<(), String> {
    let fresh = TsigStore::from_config(&config.keys)?;
    // Replace the keys in place so existing references keep working.
    for key_config in &config.keys {
        if let Some(key) = fresh.get(&key_config.name) {
            center.tsig.insert((*key).clone());
        }
    }

    let config = Arc::new(config);
    *center.config.lock().expect("config lock is never poisoned") = config.clone();

    // Diff the zone sets.
    let existing: HashMap<Name, Arc<Zone>> = zones(center)
        .into_iter()
        .map(|zone| (zone.name.clone(), zone))
        .collect();
    for zone_config in &config.zones {
        match existing.get(&zone_config.name) {
            Some(zone) => {
                zone.config.store(Arc::new(zone_config.clone()));
                // Reloading a zone also clears a poisoned state.
                zone.revive();
            }
            None => {
                if let Err(err) = add_zone(center, zone_config.clone()) {
                    warn!("reload: could not add zone '{}': {err}", zone_config.name);
                }
            }
        }
    }
    for (name, _) in existing {
        if config.zone(&name).is_none() {
            let _ = remove_zone(center, &name);
        }
    }
    Ok(())
}

//----------- ZoneByName -------------------------------------------------------

/// A [`Zone`] keyed by its name.
#[derive(Clone)]
pub struct ZoneByName(pub Arc<Zone>);

impl Borrow<Name> for ZoneByName {
    fn borrow(&self) -> &Name {
        &self.0.name
    }
}

impl PartialEq for ZoneByName {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for ZoneByName {}

impl PartialOrd for ZoneByName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ZoneByName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Hash for ZoneByName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state)
    }
}

impl fmt::Debug for ZoneByName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//----------- ZoneAddError -----------------------------------------------------

/// An error adding a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneAddError {
    /// A zone of the same name already exists.
    AlreadyExists,
}

impl std::error::Error for ZoneAddError {}

impl fmt::Display for ZoneAddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyExists => "a zone of this name already exists",
        })
    }
}

//----------- ZoneRemoveError --------------------------------------------------

/// An error removing a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneRemoveError {
    /// No such name could be found.
    NotFound,
}

impl std::error::Error for ZoneRemoveError {}

impl fmt::Display for ZoneRemoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "no such zone was found",
        })
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn add_and_find_zones() {
        let center = Center::for_tests();
        let name = Name::from_str("example.org.").unwrap();
        add_zone(&center, ZoneConfig::minimal(name.clone())).unwrap();

        assert!(get_zone(&center, &name).is_some());
        assert!(matches!(
            add_zone(&center, ZoneConfig::minimal(name.clone())),
            Err(ZoneAddError::AlreadyExists)
        ));

        // Longest-suffix matching.
        let qname = Name::from_str("www.example.org.").unwrap();
        assert_eq!(find_zone_for(&center, &qname).unwrap().name, name);
        let other = Name::from_str("www.example.net.").unwrap();
        assert!(find_zone_for(&center, &other).is_none());

        remove_zone(&center, &name).unwrap();
        assert!(get_zone(&center, &name).is_none());
    }
}
