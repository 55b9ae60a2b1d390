use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use game_abi::{
    Address,
    TokenAmount,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use url::Url;

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const NETWORK_FILE: &str = "network.json";

pub const ENV_RPC_URL: &str = "LOTTERY_RPC_URL";
pub const ENV_GAME_CONTRACT: &str = "LOTTERY_GAME_CONTRACT";
pub const ENV_TOKEN_CONTRACT: &str = "LOTTERY_TOKEN_CONTRACT";

/// One share costs one whole token (18 decimals).
pub const DEFAULT_SHARE_PRICE: TokenAmount = 1_000_000_000_000_000_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkEnv {
    Testnet,
    Mainnet,
    Local,
}

impl NetworkEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            NetworkEnv::Testnet => "testnet",
            NetworkEnv::Mainnet => "mainnet",
            NetworkEnv::Local => "local",
        }
    }

    pub fn all() -> [NetworkEnv; 3] {
        [NetworkEnv::Testnet, NetworkEnv::Mainnet, NetworkEnv::Local]
    }
}

impl fmt::Display for NetworkEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkEnv::Testnet => "Testnet",
            NetworkEnv::Mainnet => "Mainnet",
            NetworkEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// Everything the client needs to talk to one deployment of the game.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkProfile {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    #[serde(default)]
    pub block_explorer: Option<String>,
    pub game_contract: Address,
    pub token_contract: Address,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub recorded_at: Option<String>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl NetworkProfile {
    pub fn builtin(env: NetworkEnv) -> Self {
        match env {
            NetworkEnv::Testnet => NetworkProfile {
                chain_id: 421_614,
                name: "Arbitrum Sepolia".to_string(),
                rpc_url: "https://sepolia-rollup.arbitrum.io/rpc".to_string(),
                block_explorer: Some("https://sepolia.arbiscan.io".to_string()),
                game_contract: Address([
                    0xf4, 0xab, 0xd3, 0xf1, 0xef, 0x02, 0x98, 0xfd, 0x3f, 0x02, 0x90, 0x81,
                    0x14, 0xfd, 0x13, 0x9b, 0x67, 0x50, 0xd6, 0xc6,
                ]),
                token_contract: Address([
                    0xcc, 0x4a, 0xd4, 0x85, 0x62, 0x22, 0x04, 0x4a, 0xf1, 0x87, 0xe7, 0x27,
                    0x58, 0x20, 0xbc, 0x43, 0x67, 0xa0, 0xfd, 0xdf,
                ]),
                is_testnet: true,
                recorded_at: None,
                sync: SyncConfig::default(),
            },
            NetworkEnv::Mainnet => NetworkProfile {
                chain_id: 42_161,
                name: "Arbitrum One".to_string(),
                rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
                block_explorer: Some("https://arbiscan.io".to_string()),
                // not deployed yet; must come from the network file or environment
                game_contract: Address::ZERO,
                token_contract: Address([
                    0x93, 0xb3, 0x46, 0xb6, 0xbc, 0x25, 0x48, 0xda, 0x6a, 0x1e, 0x7d, 0x98,
                    0xe9, 0xa4, 0x21, 0xb4, 0x25, 0x41, 0x42, 0x5b,
                ]),
                is_testnet: false,
                recorded_at: None,
                sync: SyncConfig::default(),
            },
            NetworkEnv::Local => NetworkProfile {
                chain_id: 31_337,
                name: "Local".to_string(),
                rpc_url: "http://127.0.0.1:8545".to_string(),
                block_explorer: None,
                game_contract: Address::ZERO,
                token_contract: Address::ZERO,
                is_testnet: true,
                recorded_at: None,
                sync: SyncConfig::default(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.rpc_url)
            .with_context(|| format!("invalid RPC URL for {}: {}", self.name, self.rpc_url))?;
        if self.game_contract.is_zero() {
            return Err(anyhow!("no game contract configured for {}", self.name));
        }
        if self.token_contract.is_zero() {
            return Err(anyhow!("no payment token configured for {}", self.name));
        }
        Ok(())
    }

    /// Explorer link for a transaction hash, when the network has an explorer.
    pub fn tx_url(&self, hash: impl fmt::Display) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|base| format!("{}/tx/{hash}", base.trim_end_matches('/')))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc_url = url;
        }
        if let Some(raw) = lookup(ENV_GAME_CONTRACT) {
            self.game_contract = raw
                .parse()
                .map_err(|e| anyhow!("{ENV_GAME_CONTRACT} is not an address: {e}"))?;
        }
        if let Some(raw) = lookup(ENV_TOKEN_CONTRACT) {
            self.token_contract = raw
                .parse()
                .map_err(|e| anyhow!("{ENV_TOKEN_CONTRACT} is not an address: {e}"))?;
        }
        Ok(())
    }
}

/// Timing and pricing knobs for the sync layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub block_poll_interval_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    /// Upper bound on a single JSON-RPC request.
    pub rpc_timeout_secs: u64,
    pub share_price: TokenAmount,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_poll_interval_ms: 2_000,
            receipt_poll_interval_ms: 1_000,
            confirmation_timeout_secs: 180,
            rpc_timeout_secs: 15,
            share_price: DEFAULT_SHARE_PRICE,
        }
    }
}

impl SyncConfig {
    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Per-network override file under `.deployments/<env>/network.json`.
#[derive(Debug)]
pub struct NetworkStore {
    path: PathBuf,
}

impl NetworkStore {
    pub fn new(env: NetworkEnv) -> Result<Self> {
        Self::new_in(DEPLOYMENTS_ROOT, env)
    }

    pub fn new_in(root: impl AsRef<Path>, env: NetworkEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<NetworkProfile>> {
        read_profile(&self.path)
    }

    pub fn save(&self, mut profile: NetworkProfile) -> Result<()> {
        profile.recorded_at = Some(Utc::now().to_rfc3339());
        write_profile(&self.path, &profile)
    }
}

/// Stored profile (or the built-in one) with environment overrides applied, validated.
pub fn resolve_profile(env: NetworkEnv, store: &NetworkStore) -> Result<NetworkProfile> {
    resolve_profile_with(env, store, |key| std::env::var(key).ok())
}

pub fn resolve_profile_with(
    env: NetworkEnv,
    store: &NetworkStore,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<NetworkProfile> {
    let mut profile = store
        .load()
        .with_context(|| format!("loading network profile for {env}"))?
        .unwrap_or_else(|| NetworkProfile::builtin(env));
    profile.apply_overrides(lookup)?;
    profile.validate()?;
    Ok(profile)
}

pub fn ensure_structure() -> Result<()> {
    for env in NetworkEnv::all() {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: NetworkEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(NETWORK_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!("Failed to initialize network profile file for {env}")
        })?;
    }

    Ok(file_path)
}

fn read_profile(path: impl AsRef<Path>) -> Result<Option<NetworkProfile>> {
    let data = fs::read(path.as_ref()).context("Failed to read network profile")?;
    if data.is_empty() || data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<NetworkProfile>(&data)
        .map(Some)
        .context("Failed to parse network profile JSON")
}

fn write_profile(path: impl AsRef<Path>, profile: &NetworkProfile) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(profile).context("Failed to serialize network profile")?;
    fs::write(path.as_ref(), json).context("Failed to write network profile")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn resolve_profile__falls_back_to_builtin_when_file_is_empty() {
        // given
        let dir = TempDir::new("networks").unwrap();
        let store = NetworkStore::new_in(dir.path(), NetworkEnv::Testnet).unwrap();

        // when
        let profile = resolve_profile_with(NetworkEnv::Testnet, &store, |_| None).unwrap();

        // then
        assert_eq!(profile, NetworkProfile::builtin(NetworkEnv::Testnet));
        assert_eq!(profile.chain_id, 421_614);
    }

    #[test]
    fn resolve_profile__prefers_saved_profile_and_env_overrides() {
        // given
        let dir = TempDir::new("networks").unwrap();
        let store = NetworkStore::new_in(dir.path(), NetworkEnv::Local).unwrap();
        let mut saved = NetworkProfile::builtin(NetworkEnv::Local);
        saved.game_contract = Address([1; 20]);
        saved.token_contract = Address([2; 20]);
        store.save(saved).unwrap();
        let game_override = Address([3; 20]).to_string();

        // when
        let profile = resolve_profile_with(NetworkEnv::Local, &store, |key| {
            (key == ENV_GAME_CONTRACT).then(|| game_override.clone())
        })
        .unwrap();

        // then
        assert_eq!(profile.game_contract, Address([3; 20]));
        assert_eq!(profile.token_contract, Address([2; 20]));
        assert!(profile.recorded_at.is_some());
    }

    #[test]
    fn resolve_profile__rejects_missing_game_contract() {
        let dir = TempDir::new("networks").unwrap();
        let store = NetworkStore::new_in(dir.path(), NetworkEnv::Mainnet).unwrap();

        let err = resolve_profile_with(NetworkEnv::Mainnet, &store, |_| None).unwrap_err();

        assert!(err.to_string().contains("no game contract"));
    }

    #[test]
    fn sync_config__missing_fields_use_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"block_poll_interval_ms": 500}"#).unwrap();
        assert_eq!(config.block_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.share_price, DEFAULT_SHARE_PRICE);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn tx_url__joins_explorer_and_hash() {
        let profile = NetworkProfile::builtin(NetworkEnv::Testnet);
        assert_eq!(
            profile.tx_url("0xabc").as_deref(),
            Some("https://sepolia.arbiscan.io/tx/0xabc")
        );
    }
}
