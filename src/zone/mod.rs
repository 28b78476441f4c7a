//! Zone-specific state and management.
//!
//! A [`Zone`] is the long-lived object behind one served zone: its current
//! contents (an atomically swapped snapshot), its event scheduler, its
//! journal, its pending dynamic updates, and the flags the control channel
//! pokes.  Every zone runs a single executor task that processes its events
//! strictly in order; nothing else ever mutates the zone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use herald_wire::{Message, Rcode, Serial};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::apply::{apply, ApplyMode};
use crate::center::Center;
use crate::config::ZoneConfig;
use crate::journal::Journal;
use crate::util::unix_now;
use crate::zone::changeset::Changeset;
use crate::zone::events::{Backoff, EventKind, Scheduler, When};

pub mod changeset;
pub mod contents;
pub mod events;

pub use contents::ZoneContents;

/// How many dynamic updates may sit in a zone's queue.
const UPDATE_QUEUE_LIMIT: usize = 128;

/// How often NOTIFY is retried before giving up.
const NOTIFY_MAX_ATTEMPTS: u32 = 3;

//----------- Zone -------------------------------------------------------------

/// A zone.
#[derive(Debug)]
pub struct Zone {
    /// The name of this zone.
    pub name: herald_wire::Name,

    /// The zone's configuration.  Replaced wholesale on reload.
    pub config: ArcSwap<ZoneConfig>,

    /// The current contents.
    ///
    /// `None` for a secondary zone that has never transferred (or has
    /// expired).  Readers pin a snapshot with one atomic load; the executor
    /// publishes a new one with one atomic store.
    contents: ArcSwapOption<ZoneContents>,

    /// The pending events.
    pub scheduler: Scheduler,

    /// The changeset journal.
    pub journal: Mutex<Option<Journal>>,

    /// Force the next transfer to be a full AXFR.
    pub force_axfr: AtomicBool,

    /// Force the next DNSSEC event to re-sign the whole zone.
    pub force_resign: AtomicBool,

    /// Dynamic updates waiting for the next UPDATE event.
    pending_updates: Mutex<VecDeque<PendingUpdate>>,

    /// State only the executor touches.
    runtime: Mutex<Runtime>,
}

/// A dynamic update waiting to be batched.
#[derive(Debug)]
pub struct PendingUpdate {
    /// The parsed UPDATE query.
    pub message: Message,

    /// Where the outcome is delivered; the enqueueing side owns the
    /// response wire and its transaction signature.
    pub respond: oneshot::Sender<Rcode>,
}

/// Executor-side state of a zone.
#[derive(Debug, Default)]
struct Runtime {
    /// Retry backoff per event kind.
    backoff: Backoff,

    /// Whether the zone has expired and serves nothing.
    expired: bool,

    /// Set when a fatal error poisoned this zone; cleared by reload.
    unhealthy: Option<String>,

    /// NOTIFY attempts since the last content change.
    notify_attempts: u32,

    /// When the next signature refresh is due, for status reporting.
    resign_at: Option<u64>,

    /// Set once the executor should wind down.
    stopped: bool,
}

impl Zone {
    /// Construct a zone from its configuration.
    ///
    /// The zone starts without contents and with nothing scheduled; the
    /// caller loads or bootstraps contents and kicks off the first events.
    pub fn new(config: ZoneConfig) -> Self {
        Self {
            name: config.name.clone(),
            config: ArcSwap::from_pointee(config),
            contents: ArcSwapOption::empty(),
            scheduler: Scheduler::new(),
            journal: Mutex::new(None),
            force_axfr: AtomicBool::new(false),
            force_resign: AtomicBool::new(false),
            pending_updates: Mutex::new(VecDeque::new()),
            runtime: Mutex::new(Runtime::default()),
        }
    }

    /// The current contents, if any.
    pub fn contents(&self) -> Option<Arc<ZoneContents>> {
        self.contents.load_full()
    }

    /// The current serial, if contents exist.
    pub fn serial(&self) -> Option<Serial> {
        self.contents().map(|contents| contents.serial())
    }

    /// Whether this zone transfers from a master.
    pub fn is_secondary(&self) -> bool {
        self.config.load().is_secondary()
    }

    /// Publish new contents.
    ///
    /// A single atomic store; readers that pinned the previous snapshot
    /// keep it alive until they drop it, so publication never waits for
    /// them.
    pub fn publish(&self, contents: ZoneContents) {
        let serial = contents.serial();
        self.contents.store(Some(Arc::new(contents)));
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime.expired = false;
        runtime.notify_attempts = 0;
        debug!("zone '{}' now at serial {serial}", self.name);
    }

    /// Drop the contents, leaving the zone empty (EXPIRE).
    pub fn clear_contents(&self) {
        self.contents.store(None);
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime.expired = true;
    }

    /// Whether the zone is expired.
    pub fn is_expired(&self) -> bool {
        self.runtime.lock().expect("zone lock is never poisoned").expired
    }

    /// The poison reason, if a fatal error marked this zone unhealthy.
    pub fn unhealthy(&self) -> Option<String> {
        self.runtime
            .lock()
            .expect("zone lock is never poisoned")
            .unhealthy
            .clone()
    }

    /// Mark the zone unhealthy.  Its executor stops handling events until
    /// the zone is reloaded.
    pub fn poison(&self, reason: String) {
        error!("zone '{}' marked unhealthy: {reason}", self.name);
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime.unhealthy = Some(reason);
    }

    /// Clear the unhealthy mark; done when the zone is reloaded.
    pub fn revive(&self) {
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime.unhealthy = None;
    }

    /// When the next signature refresh is due, for status reporting.
    pub fn resign_at(&self) -> Option<u64> {
        self.runtime.lock().expect("zone lock is never poisoned").resign_at
    }

    /// Stop the executor; used when the zone is removed from configuration.
    pub fn retire(&self) {
        {
            let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
            runtime.stopped = true;
        }
        self.scheduler.cancel_all();
        // Kick the executor so it notices.
        self.scheduler.schedule(EventKind::Flush, When::Now);
        self.scheduler.cancel(EventKind::Flush);
    }

    fn stopped(&self) -> bool {
        self.runtime.lock().expect("zone lock is never poisoned").stopped
    }

    /// Queue a dynamic update for the next UPDATE event.
    ///
    /// The queue is bounded; a full queue refuses the update, which the
    /// caller answers with SERVFAIL.
    pub fn enqueue_update(&self, update: PendingUpdate) -> Result<(), PendingUpdate> {
        {
            let mut queue = self
                .pending_updates
                .lock()
                .expect("update queue lock is never poisoned");
            if queue.len() >= UPDATE_QUEUE_LIMIT {
                return Err(update);
            }
            queue.push_back(update);
        }
        self.scheduler.schedule(EventKind::Update, When::Now);
        Ok(())
    }

    /// Take every queued update.
    fn drain_updates(&self) -> Vec<PendingUpdate> {
        let mut queue = self
            .pending_updates
            .lock()
            .expect("update queue lock is never poisoned");
        queue.drain(..).collect()
    }
}

//--- The executor

impl Zone {
    /// Spawn the zone's executor task.
    pub fn spawn(self: &Arc<Self>, center: &Arc<Center>) -> JoinHandle<()> {
        let zone = self.clone();
        let center = center.clone();
        tokio::spawn(async move {
            let mut shutdown = center.shutdown.subscribe();
            loop {
                if zone.stopped() {
                    break;
                }
                let next = zone.scheduler.next_due();
                tokio::select! {
                    _ = zone.scheduler.changed() => continue,
                    _ = shutdown.changed() => break,
                    _ = async {
                        match next {
                            Some((_, due)) => tokio::time::sleep_until(due).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        while let Some(kind) = zone.scheduler.pop_due(Instant::now()) {
                            // A panicking handler is an invariant violation;
                            // it poisons this zone but must not take down
                            // the process or the other zones.
                            let task = {
                                let zone = zone.clone();
                                let center = center.clone();
                                tokio::spawn(async move {
                                    zone.handle_event(kind, &center).await;
                                })
                            };
                            if let Err(err) = task.await {
                                if err.is_panic() {
                                    zone.poison(format!("{kind} handler panicked"));
                                }
                            }
                        }
                    }
                }
            }
            debug!("executor for zone '{}' stopped", zone.name);
        })
    }

    /// Handle one event.  Events run strictly one at a time per zone.
    pub async fn handle_event(self: &Arc<Self>, kind: EventKind, center: &Arc<Center>) {
        if self.unhealthy().is_some() {
            warn!("zone '{}' is unhealthy; dropping {kind} event", self.name);
            return;
        }
        match kind {
            EventKind::Refresh => self.handle_refresh(center).await,
            EventKind::Transfer => self.handle_transfer(center).await,
            EventKind::Update => self.handle_update(center).await,
            EventKind::Dnssec => self.handle_dnssec(center).await,
            EventKind::Flush => self.handle_flush().await,
            EventKind::Notify => self.handle_notify(center).await,
            EventKind::Expire => self.handle_expire(),
        }
    }

    async fn handle_refresh(self: &Arc<Self>, center: &Arc<Center>) {
        use crate::xfr::client::RefreshOutcome;

        match crate::xfr::client::check_refresh(self, center).await {
            RefreshOutcome::UpToDate => {
                self.backoff_reset(EventKind::Refresh);
                self.schedule_soa_timers();
            }
            RefreshOutcome::Outdated { master_serial } => {
                info!(
                    "zone '{}': master at serial {master_serial}, scheduling transfer",
                    self.name
                );
                self.backoff_reset(EventKind::Refresh);
                self.scheduler.schedule(EventKind::Transfer, When::Now);
                self.schedule_soa_timers();
            }
            RefreshOutcome::NoMaster => {}
            RefreshOutcome::Failed(err) => {
                let retry = self.backoff_next(EventKind::Refresh);
                warn!(
                    "zone '{}': refresh failed ({err}); retrying in {}s",
                    self.name,
                    retry.as_secs()
                );
                self.scheduler.schedule(EventKind::Refresh, When::In(retry));
            }
        }
    }

    async fn handle_transfer(self: &Arc<Self>, center: &Arc<Center>) {
        use crate::xfr::client::TransferOutcome;

        match crate::xfr::client::transfer(self, center).await {
            Ok(TransferOutcome::UpToDate) => {
                self.backoff_reset(EventKind::Transfer);
                self.schedule_soa_timers();
            }
            Ok(TransferOutcome::Full(contents)) => {
                let serial = contents.serial();
                // A full transfer rebases history: the journal restarts at
                // the new serial.
                if let Some(journal) = self.journal.lock().expect("journal lock").as_mut() {
                    if let Err(err) = journal.truncate() {
                        warn!("zone '{}': journal truncation failed: {err}", self.name);
                    }
                }
                self.force_axfr.store(false, AtomicOrdering::Relaxed);
                self.publish(contents);
                info!("zone '{}' transferred (AXFR) to serial {serial}", self.name);
                self.after_content_change(center);
                self.backoff_reset(EventKind::Transfer);
                self.schedule_soa_timers();
            }
            Ok(TransferOutcome::Incremental(changesets)) => {
                let Some(old) = self.contents() else {
                    // Cannot apply a diff to nothing; force a full retry.
                    self.force_axfr.store(true, AtomicOrdering::Relaxed);
                    self.scheduler.schedule(EventKind::Transfer, When::Now);
                    return;
                };
                match apply(&old, &changesets, ApplyMode::Strict) {
                    Ok(new) => {
                        let serial = new.serial();
                        if let Err(err) = self.journal_store_all(&changesets) {
                            warn!("zone '{}': journaling IXFR failed: {err}", self.name);
                        }
                        self.publish(new);
                        info!("zone '{}' transferred (IXFR) to serial {serial}", self.name);
                        self.after_content_change(center);
                        self.backoff_reset(EventKind::Transfer);
                        self.schedule_soa_timers();
                    }
                    Err(err) => {
                        // A state error during IXFR triggers AXFR fallback.
                        warn!(
                            "zone '{}': IXFR did not apply ({err}); falling back to AXFR",
                            self.name
                        );
                        self.force_axfr.store(true, AtomicOrdering::Relaxed);
                        self.scheduler.schedule(EventKind::Transfer, When::Now);
                    }
                }
            }
            Err(err) => {
                let retry = self.backoff_next(EventKind::Transfer);
                warn!(
                    "zone '{}': transfer failed ({err}); retrying in {}s",
                    self.name,
                    retry.as_secs()
                );
                self.scheduler.schedule(EventKind::Transfer, When::In(retry));
            }
        }
    }

    async fn handle_update(self: &Arc<Self>, center: &Arc<Center>) {
        let pending = self.drain_updates();
        if pending.is_empty() {
            return;
        }

        let Some(old) = self.contents() else {
            // No contents to update (expired or never loaded).
            for update in pending {
                let _ = update.respond.send(Rcode::SERVFAIL);
            }
            return;
        };

        let queries: Vec<Message> = pending.iter().map(|u| u.message.clone()).collect();
        let outcome = crate::ddns::process_queries(&old, &queries);
        let mut rcodes = outcome.rcodes;
        let mut ddns_ch = outcome.changeset;

        if ddns_ch.is_empty() && ddns_ch.soa_to.is_none() {
            debug!("zone '{}': update batch made no change", self.name);
            respond_all(pending, rcodes);
            return;
        }

        let published = match self.compose_and_publish(&old, &mut ddns_ch, center).await {
            Ok(()) => true,
            Err(rcode) => {
                for entry in rcodes.iter_mut() {
                    if *entry == Rcode::NOERROR {
                        *entry = rcode;
                    }
                }
                false
            }
        };
        respond_all(pending, rcodes);

        if published {
            info!(
                "zone '{}': dynamic update applied, serial {} -> {}",
                self.name,
                old.serial(),
                self.serial().unwrap_or(old.serial()),
            );
            self.after_content_change(center);
        }
    }

    /// Apply a DDNS changeset, compose signatures, journal and publish.
    ///
    /// On any failure the published contents are left untouched and the
    /// RCODE to answer every pending query with is returned.
    async fn compose_and_publish(
        self: &Arc<Self>,
        old: &Arc<ZoneContents>,
        ddns_ch: &mut Changeset,
        _center: &Arc<Center>,
    ) -> Result<(), Rcode> {
        let mut new = match apply(old, std::slice::from_ref(&*ddns_ch), ApplyMode::DdnsMerge) {
            Ok(new) => new,
            Err(crate::apply::ApplyError::TtlMismatch { .. }) => return Err(Rcode::REFUSED),
            Err(err) => {
                error!("zone '{}': update did not apply: {err}", self.name);
                return Err(Rcode::SERVFAIL);
            }
        };

        // Compose the signing changeset, if the zone is signed.
        let config = self.config.load();
        if let Some(dnssec) = &config.dnssec {
            let now = unix_now();
            let keys = match crate::dnssec::SigningKey::load_all(&dnssec.key_dir, &self.name) {
                Ok(keys) => keys,
                Err(err) => {
                    error!("zone '{}': cannot load signing keys: {err}", self.name);
                    return Err(Rcode::SERVFAIL);
                }
            };
            let output = match crate::dnssec::sign_update(old, &new, ddns_ch, &keys, dnssec, now) {
                Ok(output) => output,
                Err(err) => {
                    error!("zone '{}': signing failed: {err}", self.name);
                    crate::apply::rollback(new);
                    return Err(Rcode::SERVFAIL);
                }
            };
            if let Err(err) =
                crate::apply::apply_directly(&mut new, &output.changeset, ApplyMode::DdnsMerge)
            {
                error!("zone '{}': signing changeset did not apply: {err}", self.name);
                crate::apply::rollback(new);
                return Err(Rcode::SERVFAIL);
            }
            ddns_ch.merge(output.changeset);
            self.note_resign_at(output.refresh_at);
            // Pull the next signing pass forward if these signatures expire
            // sooner; earliest-wins keeps an already nearer event.
            self.schedule_resign(output.refresh_at, now);
        }

        let expected = ddns_ch.serial_to().expect("DDNS changesets are bracketed");
        if let Err(err) = crate::apply::check_integrity(&new, expected) {
            error!("zone '{}': composed contents are inconsistent: {err}", self.name);
            crate::apply::rollback(new);
            return Err(Rcode::SERVFAIL);
        }

        // Journal, then publish.
        if let Err(err) = self.journal_store(ddns_ch) {
            error!("zone '{}': journaling failed: {err}", self.name);
            crate::apply::rollback(new);
            return Err(Rcode::SERVFAIL);
        }
        self.publish(new);
        Ok(())
    }

    async fn handle_dnssec(self: &Arc<Self>, center: &Arc<Center>) {
        let config = self.config.load();
        let Some(dnssec) = config.dnssec.clone() else {
            return;
        };
        let Some(old) = self.contents() else {
            return;
        };

        let now = unix_now();
        let full = self.force_resign.swap(false, AtomicOrdering::Relaxed) || !old.is_signed();
        let result = (|| {
            let keys = crate::dnssec::SigningKey::load_all(&dnssec.key_dir, &self.name)
                .map_err(crate::dnssec::SignError::from)?;
            // The signing pass is an UPDATE-like transaction: bump the
            // serial, sign against the bumped contents, merge, publish.
            let mut ch = Changeset::between(old.soa_record(), crate::ddns::bump_soa(&old));
            let bumped = apply(&old, std::slice::from_ref(&ch), ApplyMode::DdnsMerge)
                .map_err(|err| crate::dnssec::SignError::Compose(err.to_string()))?;
            let output = if full {
                crate::dnssec::sign_zone(&bumped, &keys, &dnssec, now)?
            } else {
                crate::dnssec::resign_expiring(&bumped, &keys, &dnssec, now)?
            };
            Ok::<_, crate::dnssec::SignError>((ch, bumped, output))
        })();

        match result {
            Ok((mut ch, bumped, output)) => {
                if output.changeset.is_empty() {
                    debug!("zone '{}': signatures are current", self.name);
                    self.note_resign_at(output.refresh_at);
                    self.schedule_resign(output.refresh_at, now);
                    return;
                }
                let mut new = bumped;
                if let Err(err) =
                    crate::apply::apply_directly(&mut new, &output.changeset, ApplyMode::DdnsMerge)
                {
                    error!("zone '{}': signing changeset did not apply: {err}", self.name);
                    self.retry_dnssec();
                    return;
                }
                ch.merge(output.changeset);
                if let Err(err) = self.journal_store(&ch) {
                    error!("zone '{}': journaling signatures failed: {err}", self.name);
                    self.retry_dnssec();
                    return;
                }
                let serial = new.serial();
                self.publish(new);
                info!("zone '{}' re-signed at serial {serial}", self.name);
                self.note_resign_at(output.refresh_at);
                self.schedule_resign(output.refresh_at, now);
                self.after_content_change(center);
            }
            Err(err) => {
                error!("zone '{}': signing failed: {err}", self.name);
                self.retry_dnssec();
            }
        }
    }

    fn retry_dnssec(&self) {
        let retry = self.backoff_next(EventKind::Dnssec);
        self.scheduler.schedule(EventKind::Dnssec, When::In(retry));
    }

    fn schedule_resign(&self, refresh_at: u64, now: u64) {
        self.backoff_reset(EventKind::Dnssec);
        let delay = Duration::from_secs(refresh_at.saturating_sub(now).max(60));
        self.scheduler.schedule(EventKind::Dnssec, When::In(delay));
    }

    async fn handle_flush(self: &Arc<Self>) {
        let Some(contents) = self.contents() else {
            return;
        };
        let config = self.config.load();
        let Some(path) = config.file.clone() else {
            debug!("zone '{}' has no zone file; flush skipped", self.name);
            return;
        };

        match crate::zonefile::write_contents(&path, &contents) {
            Ok(()) => {
                info!(
                    "zone '{}' flushed to '{path}' at serial {}",
                    self.name,
                    contents.serial()
                );
                // Only a successful flush may truncate history.
                if let Some(journal) = self.journal.lock().expect("journal lock").as_mut() {
                    if let Err(err) = journal.truncate() {
                        warn!("zone '{}': journal truncation failed: {err}", self.name);
                    }
                }
            }
            Err(err) => {
                // The journal keeps its entries so nothing is lost.
                error!("zone '{}': flush to '{path}' failed: {err}", self.name);
            }
        }
    }

    async fn handle_notify(self: &Arc<Self>, center: &Arc<Center>) {
        let failures = crate::notify::notify_peers(self, center).await;
        if failures == 0 {
            self.backoff_reset(EventKind::Notify);
            let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
            runtime.notify_attempts = 0;
            return;
        }

        let attempts = {
            let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
            runtime.notify_attempts += 1;
            runtime.notify_attempts
        };
        if attempts < NOTIFY_MAX_ATTEMPTS {
            let retry = self.backoff_next(EventKind::Notify);
            self.scheduler.schedule(EventKind::Notify, When::In(retry));
        } else {
            warn!(
                "zone '{}': {failures} peers unreachable after {attempts} notify attempts",
                self.name
            );
        }
    }

    fn handle_expire(self: &Arc<Self>) {
        warn!("zone '{}' expired; dropping contents", self.name);
        self.clear_contents();
        // Start over as if bootstrapping.
        self.scheduler.schedule(EventKind::Refresh, When::Now);
    }

    /// Events common to every content change: tell the peers, and get the
    /// change onto disk eventually.
    pub fn after_content_change(&self, _center: &Arc<Center>) {
        self.scheduler.schedule(EventKind::Notify, When::Now);
        let config = self.config.load();
        if config.dbsync_timeout.is_zero() {
            self.scheduler.schedule(EventKind::Flush, When::Now);
        } else {
            self.scheduler
                .schedule(EventKind::Flush, When::In(config.dbsync_timeout));
        }
    }

    /// Schedule REFRESH and EXPIRE from the SOA timers.
    pub fn schedule_soa_timers(&self) {
        if !self.is_secondary() {
            return;
        }
        let Some(contents) = self.contents() else {
            // Bootstrap: no SOA to go by yet.
            self.scheduler
                .schedule(EventKind::Refresh, When::In(Duration::from_secs(60)));
            return;
        };
        let soa = contents.soa();
        let refresh = Duration::from_secs(u64::from(soa.refresh.max(60)));
        let expire = Duration::from_secs(u64::from(soa.expire.max(soa.refresh)));
        self.scheduler.schedule(EventKind::Refresh, When::In(refresh));
        self.scheduler.schedule(EventKind::Expire, When::In(expire));
    }

    fn note_resign_at(&self, refresh_at: u64) {
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime.resign_at = Some(refresh_at);
    }

    fn backoff_next(&self, kind: EventKind) -> Duration {
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime
            .backoff
            .next(kind)
            .expect("only retryable kinds reach backoff_next")
    }

    fn backoff_reset(&self, kind: EventKind) {
        let mut runtime = self.runtime.lock().expect("zone lock is never poisoned");
        runtime.backoff.reset(kind);
    }

    //--- Journal plumbing

    /// Open the zone's journal if it is not open yet.
    pub fn open_journal(&self, dir: &camino::Utf8Path) {
        let mut journal = self.journal.lock().expect("journal lock");
        if journal.is_some() {
            return;
        }
        let path = dir.join(format!("{}journal", self.name));
        match Journal::open(path) {
            Ok(opened) => *journal = Some(opened),
            Err(err) => {
                warn!("zone '{}': cannot open journal: {err}", self.name);
            }
        }
    }

    fn journal_store(&self, changeset: &Changeset) -> Result<(), crate::journal::JournalError> {
        let mut journal = self.journal.lock().expect("journal lock");
        match journal.as_mut() {
            Some(journal) => journal.store(changeset),
            None => Ok(()),
        }
    }

    fn journal_store_all(
        &self,
        changesets: &[Changeset],
    ) -> Result<(), crate::journal::JournalError> {
        for changeset in changesets {
            self.journal_store(changeset)?;
        }
        Ok(())
    }
}

fn respond_all(pending: Vec<PendingUpdate>, rcodes: Vec<Rcode>) {
    for (update, rcode) in pending.into_iter().zip(rcodes) {
        // A dropped receiver means the client went away; nothing to do.
        let _ = update.respond.send(rcode);
    }
}

//============ Tests ===========================================================
