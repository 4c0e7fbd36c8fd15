//! The signing port `MultiResponder` submits transactions through, plus the
//! gas estimator it consults on `startResponse`.
//!
//! Grounded on the teacher's `EthRpcSigningClient` (`eth/rpc.rs`): a
//! `SignerMiddleware` wrapping a `Provider<Http>` and a `LocalWallet` loaded
//! from a private-key file, with the node's transaction count read lazily.
//! Unlike the teacher's nonce cache (needed because multiple call sites there
//! request nonces independently), nonce assignment here is centralised in
//! `GasQueue` — this adapter is asked for the nonce exactly once, at
//! `MultiResponder` construction.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer as EthersSignerTrait};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, Eip1559TransactionRequest, H160, H256, U256};

use crate::responder::gas_queue::OutgoingTransaction;

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> H160;
    async fn chain_id(&self) -> anyhow::Result<u64>;
    async fn get_transaction_count(&self) -> anyhow::Result<u64>;
    async fn send_transaction(&self, tx: OutgoingTransaction) -> anyhow::Result<H256>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate(&self, to: H160, data: ethers::types::Bytes) -> anyhow::Result<U256>;
}

pub struct EthersSigner {
    client: SignerMiddleware<Arc<Provider<Http>>, LocalWallet>,
}

impl EthersSigner {
    pub fn new(private_key_file: &Path, provider: Arc<Provider<Http>>, chain_id: u64) -> anyhow::Result<Self> {
        let key = std::fs::read_to_string(private_key_file)?;
        let wallet = LocalWallet::from_str(key.trim())?.with_chain_id(chain_id);
        Ok(Self { client: SignerMiddleware::new(provider, wallet) })
    }
}

#[async_trait::async_trait]
impl Signer for EthersSigner {
    fn address(&self) -> H160 {
        self.client.address()
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self.client.get_chainid().await?.as_u64())
    }

    async fn get_transaction_count(&self) -> anyhow::Result<u64> {
        let count = self
            .client
            .get_transaction_count(self.address(), Some(BlockNumber::Pending.into()))
            .await?;
        Ok(count.as_u64())
    }

    async fn send_transaction(&self, tx: OutgoingTransaction) -> anyhow::Result<H256> {
        let request = Eip1559TransactionRequest::new()
            .to(tx.to)
            .data(tx.data)
            .value(tx.value)
            .nonce(tx.nonce)
            .gas(tx.gas_limit)
            .max_fee_per_gas(tx.gas_price)
            .chain_id(tx.chain_id);
        let pending = self.client.send_transaction(TypedTransaction::Eip1559(request), None).await?;
        Ok(pending.tx_hash())
    }
}

pub struct EthersGasEstimator {
    provider: Arc<Provider<Http>>,
    from: H160,
}

impl EthersGasEstimator {
    pub fn new(provider: Arc<Provider<Http>>, from: H160) -> Self {
        Self { provider, from }
    }
}

#[async_trait::async_trait]
impl GasEstimator for EthersGasEstimator {
    async fn estimate(&self, to: H160, data: ethers::types::Bytes) -> anyhow::Result<U256> {
        let request = Eip1559TransactionRequest::new().to(to).data(data).from(self.from);
        Ok(self.provider.estimate_gas(&TypedTransaction::Eip1559(request), None).await?)
    }
}
