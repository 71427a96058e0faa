//! Per-account rolling behavior aggregates.
//!
//! Each account keeps the transactions seen inside a trailing window
//! (24h by default) together with running aggregates. The window is pruned
//! on every update, so the aggregates always describe exactly the entries
//! that survive.

use crate::config::{BehaviorConfig, MAX_WINDOW_SECS};
use crate::types::transaction::{Transaction, UNKNOWN_TRANSACTION_ID};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Read-only view of an account's window after an update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// `total_amount / max(count, 1)`
    pub avg_amount: f64,
    pub total_amount: f64,
    pub count: usize,
    pub distinct_location_count: usize,
}

/// One transaction as remembered inside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub transaction_id: String,
    pub amount: f64,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Transaction> for WindowEntry {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id.clone(),
            amount: tx.amount,
            location: tx.location.clone(),
            timestamp: tx.timestamp,
        }
    }
}

/// Serializable form of an account, used by checkpoints.
///
/// Aggregates are not stored; they are rebuilt from the entries on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub last_updated: DateTime<Utc>,
    pub entries: Vec<WindowEntry>,
}

/// Window contents and aggregates for a single account.
#[derive(Debug, Clone)]
pub struct AccountState {
    /// Entries in timestamp order
    entries: VecDeque<WindowEntry>,
    /// Ids currently in the window, for replay detection
    ids: HashSet<String>,
    total_amount: f64,
    /// Reference count per distinct location
    locations: HashMap<String, usize>,
    last_updated: DateTime<Utc>,
}

impl AccountState {
    fn new(last_updated: DateTime<Utc>) -> Self {
        Self {
            entries: VecDeque::new(),
            ids: HashSet::new(),
            total_amount: 0.0,
            locations: HashMap::new(),
            last_updated,
        }
    }

    fn contains(&self, transaction_id: &str) -> bool {
        transaction_id != UNKNOWN_TRANSACTION_ID && self.ids.contains(transaction_id)
    }

    fn insert(&mut self, entry: WindowEntry) {
        self.total_amount += entry.amount;
        if let Some(location) = &entry.location {
            *self.locations.entry(location.clone()).or_insert(0) += 1;
        }
        self.ids.insert(entry.transaction_id.clone());

        let in_order = self
            .entries
            .back()
            .map_or(true, |last| last.timestamp <= entry.timestamp);
        if in_order {
            self.entries.push_back(entry);
        } else {
            let pos = self
                .entries
                .partition_point(|e| e.timestamp <= entry.timestamp);
            self.entries.insert(pos, entry);
        }
    }

    /// Drop every entry strictly older than `cutoff`.
    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while self
            .entries
            .front()
            .is_some_and(|front| front.timestamp < cutoff)
        {
            if let Some(entry) = self.entries.pop_front() {
                self.remove_aggregates(&entry);
                removed += 1;
            }
        }
        if self.entries.is_empty() {
            self.total_amount = 0.0;
        }
        removed
    }

    fn remove_aggregates(&mut self, entry: &WindowEntry) {
        self.total_amount -= entry.amount;
        self.ids.remove(&entry.transaction_id);
        if let Some(location) = &entry.location {
            if let Some(count) = self.locations.get_mut(location) {
                *count -= 1;
                if *count == 0 {
                    self.locations.remove(location);
                }
            }
        }
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        let count = self.entries.len();
        let total_amount = self.total_amount.max(0.0);
        AccountSnapshot {
            avg_amount: total_amount / count.max(1) as f64,
            total_amount,
            count,
            distinct_location_count: self.locations.len(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

/// Rolling per-account aggregator.
///
/// Owned by exactly one partition worker; it is never shared, so it has no
/// internal locking.
#[derive(Debug)]
pub struct WindowedBehaviorTracker {
    window: Duration,
    idle_ttl: Duration,
    accounts: HashMap<String, AccountState>,
}

impl WindowedBehaviorTracker {
    pub fn new(window: Duration, idle_ttl: Duration) -> Self {
        Self {
            window,
            idle_ttl,
            accounts: HashMap::new(),
        }
    }

    pub fn from_config(config: &BehaviorConfig) -> Self {
        Self::new(
            Duration::seconds(config.window_secs.min(MAX_WINDOW_SECS) as i64),
            Duration::seconds(config.idle_ttl_secs.min(MAX_WINDOW_SECS) as i64),
        )
    }

    /// Record a transaction and return the account's pruned aggregates.
    ///
    /// The window end is the latest event time the account has seen, so a
    /// late event never moves the window backwards. A transaction id that is
    /// already inside the window is not counted twice.
    pub fn update(&mut self, account_id: &str, tx: &Transaction) -> AccountSnapshot {
        let window = self.window;
        let state = self
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(tx.timestamp));

        if state.contains(&tx.id) {
            debug!(
                account_id = %account_id,
                transaction_id = %tx.id,
                "Transaction already in window, skipping replay"
            );
        } else {
            state.insert(WindowEntry::from(tx));
        }

        let now = state.last_updated.max(tx.timestamp);
        state.last_updated = now;
        let pruned = state.prune(now - window);
        if pruned > 0 {
            debug!(account_id = %account_id, pruned, "Pruned expired window entries");
        }

        state.snapshot()
    }

    /// Current aggregates for an account, if it is tracked.
    pub fn snapshot(&self, account_id: &str) -> Option<AccountSnapshot> {
        self.accounts.get(account_id).map(AccountState::snapshot)
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountState> {
        self.accounts.get(account_id)
    }

    /// Drop accounts idle for longer than the configured TTL.
    pub fn evict_idle(&mut self, now: DateTime<Utc>) -> usize {
        let idle_ttl = self.idle_ttl;
        let before = self.accounts.len();
        self.accounts
            .retain(|_, state| now - state.last_updated <= idle_ttl);
        before - self.accounts.len()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Export all accounts for a checkpoint, sorted by account id.
    pub fn export(&self) -> Vec<AccountRecord> {
        let mut records: Vec<AccountRecord> = self
            .accounts
            .iter()
            .map(|(account_id, state)| AccountRecord {
                account_id: account_id.clone(),
                last_updated: state.last_updated,
                entries: state.entries.iter().cloned().collect(),
            })
            .collect();
        records.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        records
    }

    /// Replace tracked state with checkpointed records, rebuilding aggregates.
    pub fn restore(&mut self, records: Vec<AccountRecord>) {
        self.accounts.clear();
        for record in records {
            let mut state = AccountState::new(record.last_updated);
            for entry in record.entries {
                if !state.contains(&entry.transaction_id) {
                    state.insert(entry);
                }
            }
            state.prune(record.last_updated - self.window);
            self.accounts.insert(record.account_id, state);
        }
    }
}

impl Default for WindowedBehaviorTracker {
    fn default() -> Self {
        Self::from_config(&BehaviorConfig::default())
    }
}
