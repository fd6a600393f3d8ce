//! Shared chain-facing types

use ethers::types::{
    Address, Block, Bytes, Log, Transaction, TransactionReceipt, H256, U256, U64,
};
use serde::{Deserialize, Serialize};

/// Deployed contract addresses the committer talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSet {
    pub coordinator: Address,
    pub dev_utils: Address,
    pub exchange: Address,
    pub futures: Address,
}

/// A 0x v3 transaction signed by its signer, ready for the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedZeroExTransaction {
    pub salt: U256,
    pub expiration_time_seconds: U256,
    pub gas_price: U256,
    pub signer_address: Address,
    pub data: Bytes,
    pub signature: Bytes,
    /// Orders filled by `data`, decoded upstream; drives the protocol fee
    pub orders_count: usize,
}

/// Transaction lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub hash: H256,
    pub block_number: Option<U64>,
    pub nonce: U256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

impl From<Transaction> for TxInfo {
    fn from(tx: Transaction) -> Self {
        Self {
            hash: tx.hash,
            block_number: tx.block_number,
            nonce: tx.nonce,
            from: tx.from,
            to: tx.to,
            value: tx.value,
        }
    }
}

/// Transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub block_number: Option<U64>,
    pub status: Option<U64>,
    pub cumulative_gas_used: U256,
    pub logs: Vec<Log>,
    pub hash: H256,
    pub contract_address: Option<Address>,
    pub gas_used: Option<U256>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == Some(U64::one())
    }
}

impl From<TransactionReceipt> for TxReceipt {
    fn from(r: TransactionReceipt) -> Self {
        Self {
            block_number: r.block_number,
            status: r.status,
            cumulative_gas_used: r.cumulative_gas_used,
            logs: r.logs,
            hash: r.transaction_hash,
            contract_address: r.contract_address,
            gas_used: r.gas_used,
        }
    }
}

/// Block header fields used by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub coinbase: Option<Address>,
    pub root: H256,
    pub difficulty: U256,
    pub number: Option<U64>,
    pub gas_limit: U256,
    pub time: U256,
}

impl BlockHeader {
    pub fn number_u64(&self) -> Option<u64> {
        self.number.map(|n| n.as_u64())
    }
}

impl<T> From<Block<T>> for BlockHeader {
    fn from(b: Block<T>) -> Self {
        Self {
            parent_hash: b.parent_hash,
            coinbase: b.author,
            root: b.state_root,
            difficulty: b.difficulty,
            number: b.number,
            gas_limit: b.gas_limit,
            time: b.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_status() {
        let mut receipt = TxReceipt::from(TransactionReceipt::default());
        assert!(!receipt.succeeded());
        receipt.status = Some(U64::one());
        assert!(receipt.succeeded());
    }

    #[test]
    fn test_header_from_block() {
        let block = Block::<H256> {
            number: Some(U64::from(42)),
            gas_limit: U256::from(30_000_000u64),
            ..Default::default()
        };
        let header = BlockHeader::from(block);
        assert_eq!(header.number_u64(), Some(42));
        assert_eq!(header.gas_limit, U256::from(30_000_000u64));
    }
}
