//! Wire types for blocks, transactions and logs.
//!
//! These wrap the `ethers` primitive types (`H256`, `H160`, `U256`) rather
//! than redefining them, the same way the teacher's `EthNumberBloom`/
//! `Block<Transaction>` lean on `web3`/`ethers` types instead of inventing
//! parallel ones.

use ethers::types::{Bytes, H160, H256, U256};

/// A single EVM log entry, reduced to the fields the event filter needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: H160,
    pub topics: Vec<H256>,
}

/// A transaction as it appears inside a mined block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub hash: H256,
    pub to: Option<H160>,
    pub from: H160,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: U256,
    pub nonce: u64,
    pub chain_id: u64,
}

/// An immutable block as delivered by a [`crate::chain::rpc::BlockSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub transactions: Vec<Tx>,
    pub logs: Vec<Log>,
}

impl Block {
    pub fn contains_tx_hash(&self, hash: H256) -> bool {
        self.transactions.iter().any(|tx| tx.hash == hash)
    }
}

/// An event filter: a contract address plus a positional topic match, where
/// `None` at a position means "match anything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub address: H160,
    pub topics: Vec<Option<H256>>,
}

impl EventFilter {
    /// `log.address == filter.address` AND for each provided topic position
    /// `i`, `filter.topics[i] == None || filter.topics[i] == log.topics[i]`.
    pub fn matches(&self, log: &Log) -> bool {
        if log.address != self.address {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, expected)| match expected {
            None => true,
            Some(expected_topic) => log.topics.get(i) == Some(expected_topic),
        })
    }
}
