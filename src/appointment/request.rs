//! The appointment-request wire shape and its canonical signing digest.
//!
//! This is data-shape plus cryptography only: there is no HTTP server here
//! (the "HTTP appointment-acceptance API" is an explicit non-goal), no
//! payment-hash verification, and no customer-side signing helper. What's
//! here is the shared contract both sides need to agree on: given a request,
//! what bytes does the customer actually sign, and how do we recover the
//! signer's address from a `customerSig` to check it against the expected
//! customer.

use ethers::abi::{self, Token};
use ethers::types::{Bytes, H160, Signature, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub id: U256,
    pub job_id: U256,
    pub start_block: U256,
    pub end_block: U256,
    pub challenge_period: U256,
    pub refund: U256,
    pub payment_hash: [u8; 32],
    pub contract_address: H160,
    pub customer_address: H160,
    pub gas_limit: U256,
    pub data: Bytes,
    pub event_abi: String,
    pub event_args: Bytes,
    pub pre_condition: Bytes,
    pub post_condition: Bytes,
    pub mode: U256,
    pub customer_sig: Bytes,
}

/// `keccak256(abi.encode(abi.encode(...), abi.encode(...), abi.encode(...)))`
/// per the three-tuple grouping in the specification.
pub fn digest(request: &AppointmentRequest) -> [u8; 32] {
    let group_a = abi::encode(&[
        Token::Uint(request.id),
        Token::Uint(request.job_id),
        Token::Uint(request.start_block),
        Token::Uint(request.end_block),
        Token::Uint(request.challenge_period),
        Token::Uint(request.refund),
        Token::FixedBytes(request.payment_hash.to_vec()),
    ]);

    let group_b = abi::encode(&[
        Token::Address(request.contract_address),
        Token::Address(request.customer_address),
        Token::Uint(request.gas_limit),
        Token::Bytes(request.data.to_vec()),
    ]);

    let group_c = abi::encode(&[
        Token::Bytes(request.event_abi.as_bytes().to_vec()),
        Token::Bytes(request.event_args.to_vec()),
        Token::Bytes(request.pre_condition.to_vec()),
        Token::Bytes(request.post_condition.to_vec()),
        Token::Uint(request.mode),
    ]);

    let outer = abi::encode(&[
        Token::Bytes(group_a),
        Token::Bytes(group_b),
        Token::Bytes(group_c),
    ]);

    keccak256(outer)
}

/// Recovers the address that produced `customerSig` over `digest`'s EIP-191
/// personal-sign-prefixed hash. Callers compare the result against
/// `request.customer_address`; this function does not itself enforce that
/// match, nor does it check the payment hash — those remain outside the
/// core's scope.
pub fn recover_signer(request: &AppointmentRequest) -> anyhow::Result<H160> {
    let hash = digest(request);
    let signature = Signature::try_from(request.customer_sig.as_ref())
        .map_err(|e| anyhow::anyhow!("malformed customer signature: {e}"))?;
    // `Data` applies the EIP-191 personal-sign prefix before hashing; a
    // bare `H256` would skip it.
    Ok(signature.recover(hash.to_vec())?)
}
