use ethers::abi::Token;
use ethers::types::{Bytes, H160, U256};

use crate::chain::types::EventFilter;

/// A customer's authorisation for PISA to post a specific transaction if a
/// specific event occurs within a block window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: String,
    pub state_locator: String,
    pub state_nonce: u64,
    pub contract_address: H160,
    pub event_filter: EventFilter,
    pub response_data: ResponseData,
    pub start_block: u64,
    pub end_block: u64,
    pub challenge_period: u64,
}

/// Deterministically encodes to the calldata PISA submits on the customer's
/// behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseData {
    pub contract_address: H160,
    pub contract_abi: ethers::abi::Abi,
    pub function_name: String,
    pub function_args: Vec<Token>,
}

impl ResponseData {
    pub fn encode_calldata(&self) -> anyhow::Result<Bytes> {
        let function = self
            .contract_abi
            .function(&self.function_name)
            .map_err(|e| anyhow::anyhow!("unknown function {}: {e}", self.function_name))?;
        let data = function.encode_input(&self.function_args)?;
        Ok(Bytes::from(data))
    }
}

/// A semantic transaction identity independent of nonce/gas price. Two queue
/// items with equal `TxId` are considered the same logical response;
/// transactions mined with a matching `TxId` prove response delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId {
    pub chain_id: u64,
    pub data: Bytes,
    pub to: H160,
    pub value: U256,
    pub gas_limit: U256,
}

impl TxId {
    pub fn new(chain_id: u64, data: Bytes, to: H160, gas_limit: U256) -> Self {
        Self { chain_id, data, to, value: U256::zero(), gas_limit }
    }
}
