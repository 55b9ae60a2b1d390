use crate::{
    cache::SnapshotSource,
    error::{
        ReadError,
        RpcError,
    },
    snapshot::{
        BlockHeight,
        CacheKey,
        GameSnapshot,
        ParticipantSnapshot,
        Snapshot,
        TokenBalanceSnapshot,
        VoteTally,
    },
};
use game_abi::{
    Address,
    ContractEvent,
    DecodeError,
    GameDetails,
    GameId,
    Log,
    ParticipantInfo,
    ReadCall,
    TokenAmount,
    Word,
    calls,
    codec::{
        decode_hex,
        encode_hex,
    },
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tracing::{
    debug,
    warn,
};

/// Something that can answer JSON-RPC requests.
pub trait RpcTransport: Send + Sync + 'static {
    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::with_timeout(url, Self::DEFAULT_TIMEOUT)
    }

    /// Every request, body included, fails with a transport error once `timeout` passes.
    /// Loopback nodes are reached directly, bypassing any configured proxy.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if is_loopback(&url) {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url,
            http,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn failure(&self, method: &str, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Transport(format!("{method} timed out after {:?}", self.timeout))
        } else if err.is_connect() {
            RpcError::Unreachable(format!("{}: {err}", self.url))
        } else {
            RpcError::Transport(format!("{method} request failed: {err}"))
        }
    }
}

fn is_loopback(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    match parsed.host() {
        Some(url::Host::Domain(name)) => name == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcEnvelope {
    fn into_result(self) -> Result<Value, RpcError> {
        match (self.error, self.result) {
            (Some(err), _) => Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

impl RpcTransport for HttpTransport {
    async fn request(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let res = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failure(method, e))?;
        let status = res.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!(
                "node responded with {status} to {method}"
            )));
        }
        let envelope: RpcEnvelope = res.json().await.map_err(|e| {
            if e.is_decode() {
                RpcError::Malformed(format!("{method}: {e}"))
            } else {
                self.failure(method, e)
            }
        })?;
        envelope.into_result()
    }
}

/// Parses a `0x`-prefixed JSON-RPC quantity.
pub fn parse_quantity(value: &Value, field: &'static str) -> Result<u64, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Malformed(format!("{field} is not a string")))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::Malformed(format!("{field} is not a hex quantity: {e}")))
}

fn block_tag(at: Option<BlockHeight>) -> Value {
    match at {
        Some(height) => Value::String(format!("0x{height:x}")),
        None => Value::String("latest".to_string()),
    }
}

/// Typed accessors over the game contract and its payment token.
///
/// Every accessor is a plain request/response with no caching; `at` pins the read to a
/// block, `None` reads the latest state.
pub struct ChainReader<T> {
    transport: Arc<T>,
    game_contract: Address,
    token_contract: Address,
}

impl<T> Clone for ChainReader<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            game_contract: self.game_contract,
            token_contract: self.token_contract,
        }
    }
}

impl<T: RpcTransport> ChainReader<T> {
    pub fn new(transport: T, game_contract: Address, token_contract: Address) -> Self {
        Self::with_shared(Arc::new(transport), game_contract, token_contract)
    }

    pub fn with_shared(
        transport: Arc<T>,
        game_contract: Address,
        token_contract: Address,
    ) -> Self {
        Self {
            transport,
            game_contract,
            token_contract,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn game_contract(&self) -> Address {
        self.game_contract
    }

    pub fn token_contract(&self) -> Address {
        self.token_contract
    }

    async fn call(&self, call: ReadCall, at: Option<BlockHeight>) -> Result<Vec<u8>, ReadError> {
        let to = if call.targets_token() {
            self.token_contract
        } else {
            self.game_contract
        };
        let params = json!([
            {
                "to": to.to_string(),
                "data": encode_hex(&call.encode()),
            },
            block_tag(at),
        ]);
        debug!(signature = call.signature(), ?at, "eth_call");
        let value = self.transport.request("eth_call", params).await?;
        let raw = value.as_str().ok_or_else(|| {
            ReadError::Decode(DecodeError::Hex(format!(
                "{} returned a non-string result",
                call.signature()
            )))
        })?;
        Ok(decode_hex(raw)?)
    }

    pub async fn current_game_id(&self, at: Option<BlockHeight>) -> Result<GameId, ReadError> {
        let data = self.call(ReadCall::CurrentGameId, at).await?;
        Ok(calls::decode_game_id(&data)?)
    }

    pub async fn game(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<GameSnapshot, ReadError> {
        let data = self.call(ReadCall::GameDetails { game_id }, at).await?;
        let details = GameDetails::decode(&data)?;
        Ok(GameSnapshot::from_details(game_id, details))
    }

    pub async fn participant(
        &self,
        game_id: GameId,
        account: Address,
        at: Option<BlockHeight>,
    ) -> Result<ParticipantSnapshot, ReadError> {
        let data = self
            .call(
                ReadCall::Participant {
                    game_id,
                    user: account,
                },
                at,
            )
            .await?;
        let info = ParticipantInfo::decode(&data)?;
        Ok(ParticipantSnapshot::from_info(game_id, account, info))
    }

    pub async fn participant_count(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<u128, ReadError> {
        let data = self.call(ReadCall::ParticipantCount { game_id }, at).await?;
        Ok(calls::decode_uint(&data, "participantCount")?)
    }

    pub async fn active_participants(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<Vec<Address>, ReadError> {
        let data = self.call(ReadCall::ActiveParticipants { game_id }, at).await?;
        Ok(calls::decode_addresses(&data, "activeParticipants")?)
    }

    pub async fn vote_tally(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<VoteTally, ReadError> {
        let data = self.call(ReadCall::VoteTallies { game_id }, at).await?;
        let (continue_votes, stop_votes) = calls::decode_vote_tallies(&data)?;
        Ok(VoteTally {
            continue_votes,
            stop_votes,
        })
    }

    pub async fn consolation_prize_pool(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<TokenAmount, ReadError> {
        let data = self.call(ReadCall::ConsolationPrizePool { game_id }, at).await?;
        Ok(calls::decode_uint(&data, "consolationPrizePool")?)
    }

    pub async fn final_prize_pool(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<TokenAmount, ReadError> {
        let data = self.call(ReadCall::FinalPrizePool { game_id }, at).await?;
        Ok(calls::decode_uint(&data, "finalPrizePool")?)
    }

    pub async fn game_winner(
        &self,
        game_id: GameId,
        at: Option<BlockHeight>,
    ) -> Result<Address, ReadError> {
        let data = self.call(ReadCall::GameWinner { game_id }, at).await?;
        Ok(calls::decode_address(&data, "gameWinner")?)
    }

    pub async fn total_prize_pool(&self, at: Option<BlockHeight>) -> Result<TokenAmount, ReadError> {
        let data = self.call(ReadCall::TotalPrizePoolAllGames, at).await?;
        Ok(calls::decode_uint(&data, "totalPrizePoolAllGames")?)
    }

    /// Payment token address as configured in the game contract.
    pub async fn payment_token(&self, at: Option<BlockHeight>) -> Result<Address, ReadError> {
        let data = self.call(ReadCall::PaymentToken, at).await?;
        Ok(calls::decode_address(&data, "lusdToken")?)
    }

    pub async fn platform_fee_wallet(
        &self,
        at: Option<BlockHeight>,
    ) -> Result<Address, ReadError> {
        let data = self.call(ReadCall::PlatformFeeWallet, at).await?;
        Ok(calls::decode_address(&data, "platformFeeWallet")?)
    }

    pub async fn owner(&self, at: Option<BlockHeight>) -> Result<Address, ReadError> {
        let data = self.call(ReadCall::Owner, at).await?;
        Ok(calls::decode_address(&data, "owner")?)
    }

    pub async fn is_operator(
        &self,
        account: Address,
        at: Option<BlockHeight>,
    ) -> Result<bool, ReadError> {
        let data = self.call(ReadCall::IsOperator { account }, at).await?;
        Ok(calls::decode_bool(&data, "isOperator")?)
    }

    pub async fn paused(&self, at: Option<BlockHeight>) -> Result<bool, ReadError> {
        let data = self.call(ReadCall::Paused, at).await?;
        Ok(calls::decode_bool(&data, "paused")?)
    }

    pub async fn balance_of(
        &self,
        holder: Address,
        at: Option<BlockHeight>,
    ) -> Result<TokenAmount, ReadError> {
        let data = self.call(ReadCall::BalanceOf { holder }, at).await?;
        Ok(calls::decode_uint(&data, "balance")?)
    }

    pub async fn allowance(
        &self,
        owner: Address,
        spender: Address,
        at: Option<BlockHeight>,
    ) -> Result<TokenAmount, ReadError> {
        let data = self.call(ReadCall::Allowance { owner, spender }, at).await?;
        Ok(calls::decode_uint(&data, "allowance")?)
    }

    pub async fn token_position(
        &self,
        holder: Address,
        spender: Address,
        at: Option<BlockHeight>,
    ) -> Result<TokenBalanceSnapshot, ReadError> {
        let (balance, allowance) = futures::try_join!(
            self.balance_of(holder, at),
            self.allowance(holder, spender, at)
        )?;
        Ok(TokenBalanceSnapshot {
            holder,
            spender,
            balance,
            allowance,
        })
    }

    pub async fn decimals(&self, at: Option<BlockHeight>) -> Result<u8, ReadError> {
        let data = self.call(ReadCall::Decimals, at).await?;
        Ok(calls::decode_decimals(&data)?)
    }

    pub async fn symbol(&self, at: Option<BlockHeight>) -> Result<String, ReadError> {
        let data = self.call(ReadCall::Symbol, at).await?;
        Ok(calls::decode_string(&data, "symbol")?)
    }

    pub async fn block_number(&self) -> Result<BlockHeight, ReadError> {
        let value = self.transport.request("eth_blockNumber", json!([])).await?;
        Ok(parse_quantity(&value, "blockNumber")?)
    }

    pub async fn chain_id(&self) -> Result<u64, ReadError> {
        let value = self.transport.request("eth_chainId", json!([])).await?;
        Ok(parse_quantity(&value, "chainId")?)
    }

    /// Game contract events in the inclusive block range. Logs with unknown topics are skipped.
    pub async fn events(
        &self,
        from: BlockHeight,
        to: BlockHeight,
    ) -> Result<Vec<ContractEvent>, ReadError> {
        let topics: Vec<String> = ContractEvent::known_topics()
            .iter()
            .map(ToString::to_string)
            .collect();
        let params = json!([{
            "address": self.game_contract.to_string(),
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "topics": [topics],
        }]);
        let value = self.transport.request("eth_getLogs", params).await?;
        let entries = value.as_array().ok_or_else(|| {
            ReadError::Decode(DecodeError::Hex("eth_getLogs result is not an array".into()))
        })?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let log = parse_log(entry)?;
            match ContractEvent::decode(&log) {
                Ok(event) => events.push(event),
                Err(DecodeError::UnknownEvent(topic)) => {
                    warn!(?topic, "skipping log with unknown topic");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(events)
    }

    /// Reads whatever value `key` names.
    pub async fn read(&self, key: &CacheKey, at: Option<BlockHeight>) -> Result<Snapshot, ReadError> {
        let snapshot = match key {
            CacheKey::CurrentGameId => Snapshot::GameId(self.current_game_id(at).await?),
            CacheKey::Game(game_id) => Snapshot::Game(self.game(*game_id, at).await?),
            CacheKey::Participant { game_id, account } => {
                Snapshot::Participant(self.participant(*game_id, *account, at).await?)
            }
            CacheKey::ParticipantCount(game_id) => {
                Snapshot::Count(self.participant_count(*game_id, at).await?)
            }
            CacheKey::ActiveParticipants(game_id) => {
                Snapshot::Addresses(self.active_participants(*game_id, at).await?)
            }
            CacheKey::VoteTally(game_id) => {
                Snapshot::VoteTally(self.vote_tally(*game_id, at).await?)
            }
            CacheKey::GameWinner(game_id) => {
                Snapshot::Address(self.game_winner(*game_id, at).await?)
            }
            CacheKey::ConsolationPrizePool(game_id) => {
                Snapshot::Amount(self.consolation_prize_pool(*game_id, at).await?)
            }
            CacheKey::FinalPrizePool(game_id) => {
                Snapshot::Amount(self.final_prize_pool(*game_id, at).await?)
            }
            CacheKey::TotalPrizePool => Snapshot::Amount(self.total_prize_pool(at).await?),
            CacheKey::Owner => Snapshot::Address(self.owner(at).await?),
            CacheKey::Operator(account) => Snapshot::Flag(self.is_operator(*account, at).await?),
            CacheKey::Paused => Snapshot::Flag(self.paused(at).await?),
            CacheKey::PlatformFeeWallet => {
                Snapshot::Address(self.platform_fee_wallet(at).await?)
            }
            CacheKey::TokenPosition { holder, spender } => {
                Snapshot::TokenPosition(self.token_position(*holder, *spender, at).await?)
            }
            CacheKey::TokenDecimals => Snapshot::Decimals(self.decimals(at).await?),
        };
        Ok(snapshot)
    }
}

/// Block 0 means the cache has not been told about any block yet; such reads use `latest`.
impl<T: RpcTransport> SnapshotSource for ChainReader<T> {
    fn fetch(
        &self,
        key: &CacheKey,
        at: BlockHeight,
    ) -> impl Future<Output = Result<Snapshot, ReadError>> + Send + 'static {
        let reader = self.clone();
        let key = key.clone();
        async move { reader.read(&key, (at > 0).then_some(at)).await }
    }
}

fn parse_log(entry: &Value) -> Result<Log, ReadError> {
    let malformed = |what: &str| ReadError::Decode(DecodeError::Hex(format!("log {what}")));
    let address = entry
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("has no address"))?
        .parse::<Address>()
        .map_err(|e| malformed(&format!("address: {e}")))?;
    let topics = entry
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("has no topics"))?
        .iter()
        .map(|topic| {
            topic
                .as_str()
                .ok_or_else(|| malformed("topic is not a string"))?
                .parse::<Word>()
                .map_err(|e| malformed(&format!("topic: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let data = decode_hex(
        entry
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("has no data"))?,
    )?;
    let block_number = entry
        .get("blockNumber")
        .filter(|v| !v.is_null())
        .map(|v| parse_quantity(v, "blockNumber"))
        .transpose()?;
    Ok(Log {
        address,
        topics,
        data,
        block_number,
    })
}
