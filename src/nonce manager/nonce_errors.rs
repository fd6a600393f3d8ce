use ethers::types::Address;
use thiserror::Error;

/// Nonce cache specific errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NonceError {
    /// The cached counter went below zero and cannot be used as a tx nonce
    #[error("Negative nonce {nonce} cached for account {account:?}")]
    Negative { account: Address, nonce: i64 },

    /// Pending nonce could not be fetched from the chain
    #[error("Nonce sync failed for account {account:?}: {message}")]
    SyncFailed { account: Address, message: String },
}

impl NonceError {
    /// Convert a cached counter value into a transaction nonce
    pub fn checked_nonce(account: Address, nonce: i64) -> NonceResult<u64> {
        u64::try_from(nonce).map_err(|_| NonceError::Negative { account, nonce })
    }
}

pub type NonceResult<T> = Result<T, NonceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_nonce() {
        let account = Address::repeat_byte(0xab);
        assert_eq!(NonceError::checked_nonce(account, 5), Ok(5));
        assert_eq!(
            NonceError::checked_nonce(account, -1),
            Err(NonceError::Negative { account, nonce: -1 })
        );
    }
}
