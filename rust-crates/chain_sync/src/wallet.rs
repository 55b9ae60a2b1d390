//! Wallet and receipt delivery backed by a JSON-RPC node with unlocked accounts.

use crate::{
    error::{
        Error,
        ReadError,
        RpcError,
    },
    lock,
    orchestrator::{
        PreparedTransaction,
        Receipt,
        ReceiptWatcher,
        SignError,
        TransactionSigner,
        WalletSession,
    },
    reader::{
        RpcTransport,
        parse_quantity,
    },
};
use game_abi::{
    Address,
    TxHash,
    codec::encode_hex,
};
use serde_json::{
    Value,
    json,
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

/// Signs through `eth_sendTransaction`, so the node (or the wallet behind it) holds
/// the key.
pub struct RpcWallet<T> {
    transport: Arc<T>,
    session: Mutex<Option<WalletSession>>,
}

impl<T: RpcTransport> RpcWallet<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            session: Mutex::new(None),
        }
    }

    /// Picks the first exposed account and records the chain it is on.
    pub async fn connect(&self) -> Result<WalletSession, Error> {
        let accounts = self
            .transport
            .request("eth_accounts", json!([]))
            .await
            .map_err(ReadError::from)?;
        let account = first_account(&accounts)
            .map_err(ReadError::from)?
            .ok_or(Error::NotConnected)?;
        let chain_id = self.chain_id().await?;
        let session = WalletSession { account, chain_id };
        info!(account = %account, chain_id, "wallet connected");
        *lock(&self.session) = Some(session);
        Ok(session)
    }

    /// Re-reads the chain the wallet is on; a switch shows up as a new session.
    pub async fn refresh_chain(&self) -> Result<Option<WalletSession>, Error> {
        let chain_id = self.chain_id().await?;
        let mut session = lock(&self.session);
        if let Some(current) = session.as_mut() {
            if current.chain_id != chain_id {
                info!(from = current.chain_id, to = chain_id, "wallet switched chain");
                current.chain_id = chain_id;
            }
        }
        Ok(*session)
    }

    pub fn disconnect(&self) {
        *lock(&self.session) = None;
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        let raw = self
            .transport
            .request("eth_chainId", json!([]))
            .await
            .map_err(ReadError::from)?;
        Ok(parse_quantity(&raw, "chainId").map_err(ReadError::from)?)
    }
}

fn first_account(accounts: &Value) -> Result<Option<Address>, RpcError> {
    let list = accounts
        .as_array()
        .ok_or_else(|| RpcError::Malformed("eth_accounts did not return a list".to_string()))?;
    list.first()
        .map(|raw| {
            raw.as_str()
                .ok_or_else(|| RpcError::Malformed("account is not a string".to_string()))?
                .parse::<Address>()
                .map_err(|e| RpcError::Malformed(format!("bad account: {e}")))
        })
        .transpose()
}

impl<T: RpcTransport> TransactionSigner for RpcWallet<T> {
    fn session(&self) -> Option<WalletSession> {
        *lock(&self.session)
    }

    async fn refresh_session(&self) -> Result<Option<WalletSession>, Error> {
        if lock(&self.session).is_none() {
            return Ok(None);
        }
        self.refresh_chain().await
    }

    async fn sign_and_submit(&self, tx: &PreparedTransaction) -> Result<TxHash, SignError> {
        let params = json!([{
            "from": tx.from.to_string(),
            "to": tx.to.to_string(),
            "data": encode_hex(&tx.data()),
            "chainId": format!("0x{:x}", tx.chain_id),
        }]);
        debug!(to = %tx.to, call = ?tx.call, "eth_sendTransaction");
        match self.transport.request("eth_sendTransaction", params).await {
            Ok(Value::String(raw)) => raw
                .parse()
                .map_err(|e| SignError::Transport(format!("bad transaction hash {raw}: {e}"))),
            Ok(other) => Err(SignError::Transport(format!(
                "unexpected eth_sendTransaction result: {other}"
            ))),
            Err(RpcError::Rpc { code, .. }) if code == USER_REJECTED_CODE => {
                Err(SignError::Rejected)
            }
            Err(err) => Err(SignError::Transport(err.to_string())),
        }
    }
}

/// Polls `eth_getTransactionReceipt` until the node reports the transaction mined.
///
/// Transport errors are logged and retried; the orchestrator's timeout bounds the wait.
pub struct RpcReceiptWatcher<T> {
    transport: Arc<T>,
    poll_interval: Duration,
}

impl<T: RpcTransport> RpcReceiptWatcher<T> {
    pub fn new(transport: Arc<T>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }
}

fn parse_receipt(hash: TxHash, raw: &Value) -> Result<Receipt, RpcError> {
    let block_number = parse_quantity(&raw["blockNumber"], "blockNumber")?;
    let status = parse_quantity(&raw["status"], "status")?;
    Ok(Receipt {
        hash,
        block_number,
        succeeded: status == 1,
    })
}

impl<T: RpcTransport> ReceiptWatcher for RpcReceiptWatcher<T> {
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, ReadError> {
        loop {
            match self
                .transport
                .request("eth_getTransactionReceipt", json!([hash.to_string()]))
                .await
            {
                Ok(Value::Null) => debug!(%hash, "not mined yet"),
                Ok(raw) => return Ok(parse_receipt(hash, &raw)?),
                Err(err @ RpcError::Malformed(_)) => return Err(err.into()),
                Err(err) => warn!(%hash, %err, "receipt poll failed"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
