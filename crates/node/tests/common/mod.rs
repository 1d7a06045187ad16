#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use anyhow::{bail, Result};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use newsnet_core::hashing::message_signing_hash;
use newsnet_core::SignedMessage;
use newsnet_node::config::{
    CoordinatorConfig, EndHook, ExtractorArgs, ExtractorConfig, LoaderConfig, LoaderModule,
    OrderKey, PathConfig, TransformerConfig,
};
use newsnet_node::crawler::events::Transfer;
use newsnet_node::crawler::{ChainSource, LogQuery, RawLog};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

pub const ENDPOINT: &str = "http://mock.rpc";
pub const CONTRACT: Address = Address::new([0xee; 20]);

pub fn key(n: u8) -> SigningKey {
    SigningKey::from_slice(&[n; 32]).unwrap()
}

pub fn address(key: &SigningKey) -> Address {
    Address::from_private_key(key)
}

pub fn signed_message(key: &SigningKey, title: &str, timestamp: u64) -> SignedMessage {
    let href = "https://example.com/story";
    let prehash = message_signing_hash(title, href, "amplify", timestamp);
    let (sig, recid) = key.sign_prehash_recoverable(prehash.as_slice()).unwrap();
    let mut raw = sig.to_bytes().to_vec();
    raw.push(27 + recid.to_byte());
    SignedMessage {
        title: title.to_string(),
        href: href.to_string(),
        kind: "amplify".to_string(),
        timestamp,
        signature: format!("0x{}", hex::encode(raw)),
    }
}

/// A mint of `token` to `to` at `(block, tx, 0)`.
pub fn transfer_log(to: Address, token: u64, block: u64, tx: u64) -> RawLog {
    RawLog {
        address: CONTRACT,
        topics: vec![
            Transfer::SIGNATURE_HASH,
            B256::ZERO,
            to.into_word(),
            B256::from(U256::from(token)),
        ],
        data: Bytes::new(),
        block_number: block,
        transaction_index: tx,
        log_index: 0,
        transaction_hash: B256::from(U256::from(block * 1_000 + tx)),
        sender: None,
        block_timestamp: None,
        value: None,
    }
}

pub fn accounts_path(name: &str, start: u64, blockspan: u64) -> PathConfig {
    PathConfig {
        name: name.to_string(),
        coordinator: CoordinatorConfig::default(),
        extractor: ExtractorConfig {
            endpoint: ENDPOINT.to_string(),
            args: ExtractorArgs {
                start,
                end: None,
                address: CONTRACT,
                topics: vec![Transfer::SIGNATURE_HASH],
                blockspan,
                include_timestamp: false,
                include_value: false,
                include_sender: false,
            },
        },
        transformer: TransformerConfig::default(),
        loader: LoaderConfig {
            module: LoaderModule::Accounts,
            order: OrderKey::BlockTxLog,
        },
        end: Some(EndHook::RefreshAccounts),
    }
}

/// In-memory chain with switchable failures.
pub struct MockChain {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    senders: Mutex<HashMap<B256, Address>>,
    failing_senders: Mutex<HashSet<B256>>,
    fail_logs: AtomicBool,
    head_gate: Semaphore,
    head_calls: AtomicU64,
    log_calls: AtomicU64,
}

impl MockChain {
    pub fn new(head: u64, logs: Vec<RawLog>) -> Self {
        Self::with_permits(head, logs, Semaphore::MAX_PERMITS)
    }

    /// `block_number` waits until [`MockChain::open_gate`].
    pub fn gated(head: u64, logs: Vec<RawLog>) -> Self {
        Self::with_permits(head, logs, 0)
    }

    fn with_permits(head: u64, logs: Vec<RawLog>, permits: usize) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(logs),
            senders: Mutex::new(HashMap::new()),
            failing_senders: Mutex::new(HashSet::new()),
            fail_logs: AtomicBool::new(false),
            head_gate: Semaphore::new(permits),
            head_calls: AtomicU64::new(0),
            log_calls: AtomicU64::new(0),
        }
    }

    pub fn open_gate(&self) {
        self.head_gate.add_permits(Semaphore::MAX_PERMITS);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_sender(&self, tx: B256, sender: Address) {
        self.senders.lock().unwrap().insert(tx, sender);
    }

    pub fn fail_sender(&self, tx: B256, fail: bool) {
        let mut failing = self.failing_senders.lock().unwrap();
        if fail {
            failing.insert(tx);
        } else {
            failing.remove(&tx);
        }
    }

    pub fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn head_calls(&self) -> u64 {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> u64 {
        self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_number(&self) -> Result<u64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.head_gate.acquire().await?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logs.load(Ordering::SeqCst) {
            bail!("connection reset");
        }
        let mut logs: Vec<RawLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.address == query.address
                    && log.block_number >= query.from_block
                    && log.block_number <= query.to_block
            })
            .cloned()
            .collect();
        logs.sort_by_key(RawLog::position);
        Ok(logs)
    }

    async fn transaction_sender(&self, tx: B256) -> Result<Address> {
        if self.failing_senders.lock().unwrap().contains(&tx) {
            bail!("receipt not found for {}", tx);
        }
        match self.senders.lock().unwrap().get(&tx) {
            Some(sender) => Ok(*sender),
            None => bail!("unknown transaction {}", tx),
        }
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        Ok(1_600_000_000 + block * 12)
    }

    async fn transaction_value(&self, _tx: B256) -> Result<U256> {
        Ok(U256::ZERO)
    }
}
