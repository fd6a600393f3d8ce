//! 0x v3 coordinator call encoding and protocol fee

use crate::types::SignedZeroExTransaction;
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

/// Gas units charged per filled order by the 0x v3 staking proxy
pub const PROTOCOL_FEE_MULTIPLIER: u64 = 150_000;

const EXECUTE_TRANSACTION: &str =
    "executeTransaction((uint256,uint256,uint256,address,bytes),address,bytes,bytes[])";

/// `gas_price * multiplier * orders`, saturating
pub fn protocol_fee(gas_price: U256, orders: usize, multiplier: u64) -> U256 {
    gas_price
        .saturating_mul(U256::from(multiplier))
        .saturating_mul(U256::from(orders))
}

/// Calldata for `Coordinator.executeTransaction`
pub fn execute_transaction_calldata(
    tx: &SignedZeroExTransaction,
    tx_origin: Address,
    approval_signatures: &[Bytes],
) -> Bytes {
    let zero_ex_tx = Token::Tuple(vec![
        Token::Uint(tx.salt),
        Token::Uint(tx.expiration_time_seconds),
        Token::Uint(tx.gas_price),
        Token::Address(tx.signer_address),
        Token::Bytes(tx.data.to_vec()),
    ]);
    let approvals = approval_signatures
        .iter()
        .map(|sig| Token::Bytes(sig.to_vec()))
        .collect();

    let mut data = id(EXECUTE_TRANSACTION).to_vec();
    data.extend(abi::encode(&[
        zero_ex_tx,
        Token::Address(tx_origin),
        Token::Bytes(tx.signature.to_vec()),
        Token::Array(approvals),
    ]));
    data.into()
}
