use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use rand::Rng;
use crate::Error;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for NativeCurrency {
    fn default() -> Self {
        Self {
            name: "Ether".to_string(),
            symbol: "ETH".to_string(),
            decimals: 18,
        }
    }
}

/// 注册表中的一条链
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChainConfig {
    pub id: u64,
    pub name: String,
    /// 展示用的颜色标签
    pub tag: String,
    pub block_explorer: String,
    pub rpc_url: String,
    #[serde(default)]
    pub native_currency: NativeCurrency,
}

impl ChainConfig {
    fn testnet(id: u64, name: &str, tag: &str, block_explorer: &str, rpc_url: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            tag: tag.to_string(),
            block_explorer: block_explorer.to_string(),
            rpc_url: rpc_url.to_string(),
            native_currency: NativeCurrency::default(),
        }
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.block_explorer.trim_end_matches('/'), tx_hash)
    }
}

/// 内置支持的测试网
pub fn supported_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig::testnet(
            11155111,
            "Ethereum Sepolia",
            "bg-blue-500",
            "https://sepolia.etherscan.io",
            "https://sepolia.infura.io/v3/YOUR_INFURA_KEY",
        ),
        ChainConfig::testnet(
            421614,
            "Arbitrum Sepolia",
            "bg-cyan-500",
            "https://sepolia.arbiscan.io",
            "https://sepolia-rollup.arbitrum.io/rpc",
        ),
        ChainConfig::testnet(
            84532,
            "Base Sepolia",
            "bg-indigo-500",
            "https://sepolia.basescan.org",
            "https://sepolia.base.org",
        ),
        ChainConfig::testnet(
            11155420,
            "Optimism Sepolia",
            "bg-red-500",
            "https://sepolia-optimism.etherscan.io",
            "https://sepolia.optimism.io",
        ),
    ]
}

/// 以毫秒表示的随机延迟区间（闭区间）
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample(&self) -> Duration {
        let ms = if self.min_ms >= self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub source_delay: DelayWindow,
    pub destination_delay: DelayWindow,
    /// 源链确认失败的注入概率，默认不注入
    pub source_failure_rate: f64,
    /// 提交时是否要求链 id 存在于注册表
    pub enforce_chain_registry: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_delay: DelayWindow::new(2_000, 5_000),
            destination_delay: DelayWindow::new(8_000, 15_000),
            source_failure_rate: 0.0,
            enforce_chain_registry: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub history_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".messenger"),
            history_key: "hyperlane_messages".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct GasConfig {
    pub simulated_latency_ms: u64,
    pub debounce_ms: u64,
    pub cache_ttl_secs: u64,
    pub native_usd_price: f64,
    pub estimated_time: String,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            simulated_latency_ms: 1_000,
            debounce_ms: 300,
            cache_ttl_secs: 30,
            native_usd_price: 2_000.0,
            estimated_time: "2-5 minutes".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub gas: GasConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: supported_chains(),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
            gas: GasConfig::default(),
        }
    }
}

impl Config {
    /// 读取 JSON 配置文件，扩展名为 `.toml` 时按 TOML 解析
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let is_toml = path.extension().map_or(false, |ext| ext == "toml");
        let config: Config = if is_toml {
            toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        // 链注册表
        if self.chains.len() < 2 {
            return Err(Error::Config("At least two chains must be configured".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                return Err(Error::Config(format!("Duplicate chain ID: {}", chain.id)));
            }
            if chain.name.trim().is_empty() {
                return Err(Error::Config(format!("Chain {} has an empty name", chain.id)));
            }
        }

        // 生命周期参数
        for (name, window) in [
            ("source_delay", &self.engine.source_delay),
            ("destination_delay", &self.engine.destination_delay),
        ] {
            if window.min_ms > window.max_ms {
                return Err(Error::Config(format!(
                    "Invalid {} window: min {}ms > max {}ms",
                    name, window.min_ms, window.max_ms
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.engine.source_failure_rate) {
            return Err(Error::Config(format!(
                "Source failure rate must be within [0, 1], got {}",
                self.engine.source_failure_rate
            )));
        }

        if self.storage.history_key.trim().is_empty() {
            return Err(Error::Config("History key must not be empty".to_string()));
        }

        if !(self.gas.native_usd_price > 0.0) {
            return Err(Error::Config("Native USD price must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn get_chain_config(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id.to_string() == chain_id)
    }

    pub fn is_supported_chain(&self, chain_id: &str) -> bool {
        self.get_chain_config(chain_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chains.len(), 4);
        assert!(config.is_supported_chain("421614"));
        assert!(!config.is_supported_chain("1"));
    }

    #[test]
    fn test_explorer_url() {
        let config = Config::default();
        let chain = config.get_chain_config("11155111").unwrap();
        assert_eq!(chain.explorer_tx_url("0xabc"), "https://sepolia.etherscan.io/tx/0xabc");
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "engine": {{ "source_delay": {{ "min_ms": 10, "max_ms": 20 }} }} }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.source_delay, DelayWindow::new(10, 20));
        assert_eq!(config.engine.destination_delay, DelayWindow::new(8_000, 15_000));
        assert_eq!(config.chains.len(), 4);
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            "[storage]\nhistory_key = \"custom\"\n\n[gas]\ndebounce_ms = 0\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.storage.history_key, "custom");
        assert_eq!(config.gas.debounce_ms, 0);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = Config::default();
        config.engine.destination_delay = DelayWindow::new(10, 5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.source_failure_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chains.push(config.chains[0].clone());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chains.truncate(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delay_window_sample_bounds() {
        let window = DelayWindow::new(2_000, 5_000);
        for _ in 0..100 {
            let d = window.sample();
            assert!(d >= Duration::from_millis(2_000) && d <= Duration::from_millis(5_000));
        }
        assert_eq!(DelayWindow::new(7, 7).sample(), Duration::from_millis(7));
    }
}
