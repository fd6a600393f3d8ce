//! ethers-backed node clients and the dialer that builds them

use super::rpc_errors::{RpcManagerError, RpcResult};
use super::{ChainClient, NodeDialer};
use crate::types::{BlockHeader, TxInfo, TxReceipt};
use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, Ws};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes, Filter, Log,
    H256, U256,
};
use std::sync::Arc;
use tracing::debug;

/// Single-node client over any ethers transport
#[derive(Debug)]
pub struct EthersClient<P> {
    provider: Provider<P>,
    endpoint: String,
}

impl<P: JsonRpcClient> EthersClient<P> {
    pub fn new(provider: Provider<P>, endpoint: impl Into<String>) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
        }
    }

    fn classify(&self, err: ethers::providers::ProviderError) -> RpcManagerError {
        RpcManagerError::from_provider_error(err, &self.endpoint)
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> ChainClient for EthersClient<P> {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_id(&self) -> RpcResult<u64> {
        let id = self.provider.get_chainid().await.map_err(|e| self.classify(e))?;
        Ok(id.as_u64())
    }

    async fn block_number(&self) -> RpcResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| self.classify(e))?;
        Ok(number.as_u64())
    }

    async fn balance(&self, account: Address, block: Option<BlockNumber>) -> RpcResult<U256> {
        self.provider
            .get_balance(account, block.map(BlockId::Number))
            .await
            .map_err(|e| self.classify(e))
    }

    async fn pending_nonce(&self, account: Address) -> RpcResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(account, Some(BlockId::Number(BlockNumber::Pending)))
            .await
            .map_err(|e| self.classify(e))?;
        Ok(nonce.as_u64())
    }

    async fn code_at(&self, account: Address, block: Option<BlockNumber>) -> RpcResult<Bytes> {
        self.provider
            .get_code(account, block.map(BlockId::Number))
            .await
            .map_err(|e| self.classify(e))
    }

    async fn call(&self, tx: &TypedTransaction, block: Option<BlockNumber>) -> RpcResult<Bytes> {
        self.provider
            .call(tx, block.map(BlockId::Number))
            .await
            .map_err(|e| self.classify(e))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn gas_price(&self) -> RpcResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.classify(e))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(pending.tx_hash())
    }

    async fn transaction_by_hash(&self, hash: H256) -> RpcResult<Option<TxInfo>> {
        let tx = self
            .provider
            .get_transaction(hash)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(tx.map(TxInfo::from))
    }

    async fn transaction_receipt(&self, hash: H256) -> RpcResult<Option<TxReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(receipt.map(TxReceipt::from))
    }

    async fn block_header(&self, block: Option<BlockNumber>) -> RpcResult<Option<BlockHeader>> {
        let block = self
            .provider
            .get_block(BlockId::Number(block.unwrap_or(BlockNumber::Latest)))
            .await
            .map_err(|e| self.classify(e))?;
        Ok(block.map(BlockHeader::from))
    }

    async fn logs(&self, filter: &Filter) -> RpcResult<Vec<Log>> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| self.classify(e))
    }
}

/// Dials `http(s)://` and `ws(s)://` addresses
#[derive(Debug, Default, Clone, Copy)]
pub struct EthersDialer;

#[async_trait]
impl NodeDialer for EthersDialer {
    async fn dial(&self, addr: &str) -> RpcResult<Arc<dyn ChainClient>> {
        let transport = |message: String| RpcManagerError::Transport {
            endpoint: addr.to_string(),
            message,
        };

        if addr.starts_with("ws://") || addr.starts_with("wss://") {
            let ws = Ws::connect(addr)
                .await
                .map_err(|e| transport(e.to_string()))?;
            debug!(endpoint = %addr, "Connected websocket node");
            Ok(Arc::new(EthersClient::new(Provider::new(ws), addr)))
        } else if addr.starts_with("http://") || addr.starts_with("https://") {
            let provider =
                Provider::<Http>::try_from(addr).map_err(|e| transport(e.to_string()))?;
            Ok(Arc::new(EthersClient::new(provider, addr)))
        } else {
            Err(transport(format!("unsupported node address: {}", addr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dialer_rejects_unknown_scheme() {
        let err = EthersDialer.dial("ipc:///tmp/geth.ipc").await.unwrap_err();
        assert!(matches!(err, RpcManagerError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_dialer_builds_http_client() {
        let client = EthersDialer.dial("http://127.0.0.1:8545").await.unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8545");
    }
}
