//! In-memory allowlist built from crawled account and delegation records.
//!
//! Each refresh builds a new immutable [`Snapshot`] and swaps it in whole.
//! Readers keep whatever snapshot was current when they asked.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use newsnet_core::{AccountRecord, DelegationRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::storage::Storage;

/// One immutable allowlist state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    owners: HashSet<Address>,
    /// Active grants, delegate to delegator.
    delegations: HashMap<Address, Address>,
}

impl Snapshot {
    /// Build from both record sets, each in ordering-key order.
    pub fn build(accounts: &[AccountRecord], delegations: &[DelegationRecord]) -> Self {
        Self {
            owners: owners_of(accounts),
            delegations: active_delegations(delegations),
        }
    }

    /// Whether `address` may write: an owner, or the active delegate of one.
    pub fn is_allowed(&self, address: Address) -> bool {
        self.owners.contains(&address)
            || self
                .delegations
                .get(&address)
                .is_some_and(|delegator| self.owners.contains(delegator))
    }

    /// The account `address` writes for: its delegator if it holds an active
    /// delegation, otherwise itself.
    pub fn resolve_owner(&self, address: Address) -> Address {
        self.delegations.get(&address).copied().unwrap_or(address)
    }

    /// Number of token owners.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Number of active delegations.
    pub fn delegation_count(&self) -> usize {
        self.delegations.len()
    }

    /// Size of the allowlist: owners plus delegates of owners.
    pub fn allowlist_size(&self) -> usize {
        let delegates = self
            .delegations
            .iter()
            .filter(|(delegate, delegator)| {
                self.owners.contains(*delegator) && !self.owners.contains(*delegate)
            })
            .count();
        self.owners.len() + delegates
    }
}

/// Latest owner per token, without burned tokens.
fn owners_of(accounts: &[AccountRecord]) -> HashSet<Address> {
    let mut by_token: HashMap<U256, Address> = HashMap::new();
    for account in accounts {
        by_token.insert(account.token_id, account.owner);
    }
    by_token
        .into_values()
        .filter(|owner| !owner.is_zero())
        .collect()
}

/// Replay grants and revocations in order. A revocation only removes the
/// delegation it names.
fn active_delegations(records: &[DelegationRecord]) -> HashMap<Address, Address> {
    let mut active = HashMap::new();
    for record in records {
        if record.authorize {
            active.insert(record.delegate, record.delegator);
        } else if active.get(&record.delegate) == Some(&record.delegator) {
            active.remove(&record.delegate);
        }
    }
    active
}

/// Shared handle to the current allowlist snapshot.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    storage: Option<Storage>,
    accounts_path: Option<String>,
    delegations_path: Option<String>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    refresh: Mutex<()>,
}

impl Registry {
    /// A registry reading records from the crawler database. Empty until the
    /// first refresh.
    pub fn new(
        storage: Storage,
        accounts_path: Option<String>,
        delegations_path: Option<String>,
    ) -> Self {
        Self::with_snapshot(
            Some(storage),
            accounts_path,
            delegations_path,
            Snapshot::default(),
        )
    }

    /// A fixed registry over the given records. Refreshes are no-ops.
    pub fn from_records(accounts: &[AccountRecord], delegations: &[DelegationRecord]) -> Self {
        Self::with_snapshot(None, None, None, Snapshot::build(accounts, delegations))
    }

    fn with_snapshot(
        storage: Option<Storage>,
        accounts_path: Option<String>,
        delegations_path: Option<String>,
        snapshot: Snapshot,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(snapshot));
        Self {
            inner: Arc::new(RegistryInner {
                storage,
                accounts_path,
                delegations_path,
                snapshot,
                refresh: Mutex::new(()),
            }),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// See [`Snapshot::is_allowed`].
    pub fn is_allowed(&self, address: Address) -> bool {
        self.snapshot().is_allowed(address)
    }

    /// See [`Snapshot::resolve_owner`].
    pub fn resolve_owner(&self, address: Address) -> Address {
        self.snapshot().resolve_owner(address)
    }

    /// Rebuild both halves.
    pub async fn refresh_all(&self) -> Result<()> {
        self.refresh_accounts().await?;
        self.refresh_delegations().await?;
        Ok(())
    }

    /// Rebuild the owner set from the accounts path. Returns the owner count.
    pub async fn refresh_accounts(&self) -> Result<usize> {
        let (Some(storage), Some(path)) = (&self.inner.storage, &self.inner.accounts_path) else {
            return Ok(self.snapshot().owner_count());
        };

        let _guard = self.inner.refresh.lock().await;
        let accounts: Vec<AccountRecord> = decode_records(storage, path).await?;
        let owners = owners_of(&accounts);

        let current = self.snapshot();
        let next = Snapshot {
            owners,
            delegations: current.delegations.clone(),
        };
        let count = next.owner_count();
        self.inner.snapshot.send_replace(Arc::new(next));

        info!(path = %path, records = accounts.len(), owners = count, "Refreshed accounts");
        Ok(count)
    }

    /// Rebuild active delegations from the delegations path. Returns the
    /// number of active delegations.
    pub async fn refresh_delegations(&self) -> Result<usize> {
        let (Some(storage), Some(path)) = (&self.inner.storage, &self.inner.delegations_path)
        else {
            return Ok(self.snapshot().delegation_count());
        };

        let _guard = self.inner.refresh.lock().await;
        let records: Vec<DelegationRecord> = decode_records(storage, path).await?;
        let delegations = active_delegations(&records);

        let current = self.snapshot();
        let next = Snapshot {
            owners: current.owners.clone(),
            delegations,
        };
        let count = next.delegation_count();
        self.inner.snapshot.send_replace(Arc::new(next));

        info!(path = %path, records = records.len(), active = count, "Refreshed delegations");
        Ok(count)
    }
}

async fn decode_records<T: serde::de::DeserializeOwned>(
    storage: &Storage,
    path: &str,
) -> Result<Vec<T>> {
    storage
        .records(path)
        .await?
        .iter()
        .map(|record| {
            serde_json::from_str(&record.value)
                .with_context(|| format!("Invalid record {} in path {}", record.key, path))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_storage;

    fn account(owner: u8, token: u64) -> AccountRecord {
        AccountRecord {
            owner: Address::repeat_byte(owner),
            token_id: U256::from(token),
            timestamp: 0,
            value: U256::ZERO,
        }
    }

    fn delegation(delegator: u8, delegate: u8, authorize: bool, block: u64) -> DelegationRecord {
        DelegationRecord {
            delegator: Address::repeat_byte(delegator),
            delegate: Address::repeat_byte(delegate),
            sender: Address::repeat_byte(delegator),
            block_number: block,
            tx_index: 0,
            log_index: 0,
            authorize,
        }
    }

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_owners_and_delegates_are_allowed() {
        let registry = Registry::from_records(
            &[account(1, 1), account(2, 2)],
            &[delegation(1, 0xd1, true, 10)],
        );

        assert!(registry.is_allowed(addr(1)));
        assert!(registry.is_allowed(addr(2)));
        assert!(registry.is_allowed(addr(0xd1)));
        assert!(!registry.is_allowed(addr(3)));
        assert_eq!(registry.resolve_owner(addr(0xd1)), addr(1));
        assert_eq!(registry.resolve_owner(addr(3)), addr(3));
        assert_eq!(registry.snapshot().allowlist_size(), 3);
    }

    #[test]
    fn test_delegate_of_non_owner_is_not_allowed() {
        let registry = Registry::from_records(&[account(1, 1)], &[delegation(5, 0xd5, true, 10)]);
        assert!(!registry.is_allowed(addr(0xd5)));
        assert_eq!(registry.resolve_owner(addr(0xd5)), addr(5));
    }

    #[test]
    fn test_latest_transfer_owns_token() {
        let registry = Registry::from_records(&[account(1, 7), account(2, 7)], &[]);
        assert!(!registry.is_allowed(addr(1)));
        assert!(registry.is_allowed(addr(2)));
    }

    #[test]
    fn test_burned_token_has_no_owner() {
        let registry = Registry::from_records(&[account(1, 7), account(0, 7)], &[]);
        assert_eq!(registry.snapshot().owner_count(), 0);
        assert!(!registry.is_allowed(Address::ZERO));
    }

    #[test]
    fn test_revocation_is_final_until_regranted() {
        let records = [
            delegation(1, 0xd1, true, 10),
            delegation(1, 0xd1, false, 11),
        ];
        let registry = Registry::from_records(&[account(1, 1)], &records);
        assert!(!registry.is_allowed(addr(0xd1)));

        let records = [
            delegation(1, 0xd1, true, 10),
            delegation(1, 0xd1, false, 11),
            delegation(1, 0xd1, true, 12),
        ];
        let registry = Registry::from_records(&[account(1, 1)], &records);
        assert!(registry.is_allowed(addr(0xd1)));
    }

    #[test]
    fn test_most_recent_grant_wins() {
        let records = [
            delegation(1, 0xdd, true, 10),
            delegation(2, 0xdd, true, 11),
        ];
        let registry = Registry::from_records(&[account(1, 1), account(2, 2)], &records);
        assert_eq!(registry.resolve_owner(addr(0xdd)), addr(2));

        // A revocation by the earlier delegator does not touch the later grant.
        let records = [
            delegation(1, 0xdd, true, 10),
            delegation(2, 0xdd, true, 11),
            delegation(1, 0xdd, false, 12),
        ];
        let registry = Registry::from_records(&[account(1, 1), account(2, 2)], &records);
        assert_eq!(registry.resolve_owner(addr(0xdd)), addr(2));
    }

    #[tokio::test]
    async fn test_refresh_from_storage_swaps_snapshot() {
        let (storage, _file) = temp_storage().await;
        let registry = Registry::new(
            storage.clone(),
            Some("mints".to_string()),
            Some("delegations".to_string()),
        );
        assert!(!registry.is_allowed(addr(1)));

        let before = registry.snapshot();

        storage
            .append_record("mints", "01", &serde_json::to_string(&account(1, 1)).unwrap())
            .await
            .unwrap();
        storage
            .append_record(
                "delegations",
                "01",
                &serde_json::to_string(&delegation(1, 0xd1, true, 1)).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(registry.refresh_accounts().await.unwrap(), 1);
        assert!(registry.is_allowed(addr(1)));
        assert!(!registry.is_allowed(addr(0xd1)));

        assert_eq!(registry.refresh_delegations().await.unwrap(), 1);
        assert!(registry.is_allowed(addr(0xd1)));

        // A snapshot taken earlier is unaffected.
        assert!(!before.is_allowed(addr(1)));
    }

    #[tokio::test]
    async fn test_refresh_rejects_malformed_record() {
        let (storage, _file) = temp_storage().await;
        storage.append_record("mints", "01", "not json").await.unwrap();

        let registry = Registry::new(storage, Some("mints".to_string()), None);
        let err = registry.refresh_accounts().await.unwrap_err().to_string();
        assert!(err.contains("Invalid record"), "{}", err);
    }
}
