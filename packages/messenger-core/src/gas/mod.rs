//! Gas 费用估算
//!
//! 表现层每次输入变化都可能触发估算，只有最新一次请求的结果是权威的：
//! 每个请求领取一个递增的代号，去抖等待或报价返回后代号已过期的请求
//! 直接丢弃，不会覆盖较新参数的结果。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use log::{debug, warn};
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use crate::{
    config::GasConfig,
    types::{now_millis, GasEstimate, GasEstimateParams, GasTrend},
    Error,
};

const BASE_GAS: f64 = 0.001;
const GAS_PER_CHAR: f64 = 0.00001;

/// 报价来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn quote(&self, params: &GasEstimateParams) -> Result<GasEstimate, Error>;
}

/// 模拟报价：基础费用加按消息长度计的费用，再叠加随机波动
pub struct SimulatedGasOracle {
    config: GasConfig,
}

impl SimulatedGasOracle {
    pub fn new(config: GasConfig) -> Self {
        Self { config }
    }

    fn price(&self, params: &GasEstimateParams) -> GasEstimate {
        let mut rng = rand::thread_rng();
        let message_factor = params.message.chars().count() as f64 * GAS_PER_CHAR;

        let source_gas = round_to(BASE_GAS + message_factor + rng.gen::<f64>() * 0.002, 6);
        let destination_gas = round_to(BASE_GAS * 0.5 + message_factor + rng.gen::<f64>() * 0.001, 6);
        let total_gas = round_to(source_gas + destination_gas, 6);

        let usd = self.config.native_usd_price;
        let trends = [GasTrend::Up, GasTrend::Down, GasTrend::Stable];

        GasEstimate {
            source_gas: format!("{:.6}", source_gas),
            destination_gas: format!("{:.6}", destination_gas),
            total_gas: format!("{:.6}", total_gas),
            source_usd: format!("{:.2}", source_gas * usd),
            destination_usd: format!("{:.2}", destination_gas * usd),
            total_usd: format!("{:.2}", total_gas * usd),
            source_trend: trends[rng.gen_range(0..trends.len())],
            destination_trend: trends[rng.gen_range(0..trends.len())],
            estimated_time: self.config.estimated_time.clone(),
            timestamp: now_millis(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[async_trait]
impl GasOracle for SimulatedGasOracle {
    async fn quote(&self, params: &GasEstimateParams) -> Result<GasEstimate, Error> {
        // 模拟一次 API 调用的延迟
        sleep(Duration::from_millis(self.config.simulated_latency_ms)).await;
        Ok(self.price(params))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EstimateOutcome {
    /// 参数未就绪（缺少链或两条链相同），没有发起估算
    Skipped,
    /// 已有更新的请求，本次结果被丢弃
    Superseded,
    Ready(GasEstimate),
}

pub struct GasEstimator {
    oracle: Arc<dyn GasOracle>,
    debounce: Duration,
    cache_ttl: Duration,
    generation: Mutex<u64>,
    cache: Mutex<HashMap<GasEstimateParams, (Instant, GasEstimate)>>,
    latest: watch::Sender<Option<GasEstimate>>,
}

impl GasEstimator {
    pub fn new(oracle: Arc<dyn GasOracle>, config: &GasConfig) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            oracle,
            debounce: Duration::from_millis(config.debounce_ms),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            generation: Mutex::new(0),
            cache: Mutex::new(HashMap::new()),
            latest,
        }
    }

    pub fn simulated(config: &GasConfig) -> Self {
        Self::new(Arc::new(SimulatedGasOracle::new(config.clone())), config)
    }

    /// 最新的权威报价，`None` 表示暂无可用估算
    pub fn latest(&self) -> Option<GasEstimate> {
        self.latest.borrow().clone()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<GasEstimate>> {
        self.latest.subscribe()
    }

    pub async fn estimate_gas(&self, params: GasEstimateParams) -> Result<EstimateOutcome, Error> {
        if !params.is_ready() {
            debug!("Skipping gas estimate, chain selection incomplete");
            return Ok(EstimateOutcome::Skipped);
        }

        let generation = {
            let mut current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
            *current += 1;

            // 缓存命中与领号在同一把锁内完成，不会被并发请求插队
            if let Some(hit) = self.cached(&params) {
                debug!("Gas estimate cache hit for {} -> {}", params.source_chain, params.destination_chain);
                self.latest.send_replace(Some(hit.clone()));
                return Ok(EstimateOutcome::Ready(hit));
            }
            *current
        };

        if !self.debounce.is_zero() {
            sleep(self.debounce).await;
            if self.is_stale(generation) {
                return Ok(EstimateOutcome::Superseded);
            }
        }

        let result = self.oracle.quote(&params).await;

        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            debug!("Discarding stale gas estimate (request {} < {})", generation, *current);
            return Ok(EstimateOutcome::Superseded);
        }

        match result {
            Ok(estimate) => {
                let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                // 每次写入前清掉过期条目，逐字输入产生的参数不会一直留在内存里
                cache.retain(|_, (at, _)| at.elapsed() < self.cache_ttl);
                cache.insert(params, (Instant::now(), estimate.clone()));
                drop(cache);
                self.latest.send_replace(Some(estimate.clone()));
                Ok(EstimateOutcome::Ready(estimate))
            }
            Err(e) => {
                warn!("Gas estimation failed: {}", e);
                self.latest.send_replace(None);
                Err(match e {
                    Error::Estimation(reason) => Error::Estimation(reason),
                    other => Error::Estimation(other.to_string()),
                })
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner) != generation
    }

    fn cached(&self, params: &GasEstimateParams) -> Option<GasEstimate> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(params) {
            Some((at, estimate)) if at.elapsed() < self.cache_ttl => Some(estimate.clone()),
            Some(_) => {
                cache.remove(params);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(message: &str) -> GasEstimateParams {
        GasEstimateParams {
            source_chain: "11155111".to_string(),
            destination_chain: "84532".to_string(),
            message: message.to_string(),
            recipient: format!("0x{}", "1".repeat(40)),
        }
    }

    fn fixed_estimate(total_usd: &str) -> GasEstimate {
        GasEstimate {
            source_gas: "0.002000".to_string(),
            destination_gas: "0.001000".to_string(),
            total_gas: "0.003000".to_string(),
            source_usd: "4.00".to_string(),
            destination_usd: "2.00".to_string(),
            total_usd: total_usd.to_string(),
            source_trend: GasTrend::Stable,
            destination_trend: GasTrend::Up,
            estimated_time: "2-5 minutes".to_string(),
            timestamp: 0,
        }
    }

    /// 报价耗时与消息长度成正比，便于构造乱序返回
    struct LengthDelayedOracle;

    #[async_trait]
    impl GasOracle for LengthDelayedOracle {
        async fn quote(&self, params: &GasEstimateParams) -> Result<GasEstimate, Error> {
            sleep(Duration::from_millis(params.message.len() as u64 * 100)).await;
            Ok(fixed_estimate(&params.message.len().to_string()))
        }
    }

    fn no_debounce() -> GasConfig {
        GasConfig {
            debounce_ms: 0,
            ..GasConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_incomplete_selection() {
        let estimator = GasEstimator::simulated(&GasConfig::default());

        let mut missing = params("hi");
        missing.destination_chain = String::new();
        assert_eq!(estimator.estimate_gas(missing).await.unwrap(), EstimateOutcome::Skipped);

        let mut same = params("hi");
        same.destination_chain = same.source_chain.clone();
        assert_eq!(estimator.estimate_gas(same).await.unwrap(), EstimateOutcome::Skipped);
        assert!(estimator.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_quote_format() {
        let estimator = GasEstimator::simulated(&GasConfig::default());
        let estimate = match estimator.estimate_gas(params(&"x".repeat(100))).await.unwrap() {
            EstimateOutcome::Ready(estimate) => estimate,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let source: f64 = estimate.source_gas.parse().unwrap();
        let destination: f64 = estimate.destination_gas.parse().unwrap();
        let total: f64 = estimate.total_gas.parse().unwrap();
        assert_eq!(estimate.source_gas.split('.').nth(1).unwrap().len(), 6);
        assert_eq!(estimate.total_usd.split('.').nth(1).unwrap().len(), 2);
        // 100 个字符带来 0.001 的额外费用
        assert!(source >= 0.002 && source <= 0.004);
        assert!(destination >= 0.0015 && destination <= 0.0025);
        assert!((total - (source + destination)).abs() < 1e-6);
        assert_eq!(estimate.estimated_time, "2-5 minutes");
        assert_eq!(estimator.latest(), Some(estimate));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_does_not_overwrite_newer() {
        let estimator = GasEstimator::new(Arc::new(LengthDelayedOracle), &no_debounce());

        // 第一个请求 2 秒后返回，第二个请求 0.1 秒后返回
        let (slow, fast) = tokio::join!(
            estimator.estimate_gas(params(&"a".repeat(20))),
            async {
                sleep(Duration::from_millis(10)).await;
                estimator.estimate_gas(params("b")).await
            }
        );

        assert_eq!(slow.unwrap(), EstimateOutcome::Superseded);
        assert_eq!(fast.unwrap(), EstimateOutcome::Ready(fixed_estimate("1")));
        assert_eq!(estimator.latest().unwrap().total_usd, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_both_complete() {
        let estimator = GasEstimator::new(Arc::new(LengthDelayedOracle), &no_debounce());
        assert!(matches!(
            estimator.estimate_gas(params("ab")).await.unwrap(),
            EstimateOutcome::Ready(_)
        ));
        assert!(matches!(
            estimator.estimate_gas(params("abc")).await.unwrap(),
            EstimateOutcome::Ready(_)
        ));
        assert_eq!(estimator.latest().unwrap().total_usd, "3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_calls_oracle_once() {
        let mut oracle = MockGasOracle::new();
        oracle
            .expect_quote()
            .times(1)
            .returning(|p| Ok(fixed_estimate(&p.message)));
        let config = GasConfig {
            debounce_ms: 300,
            ..GasConfig::default()
        };
        let estimator = GasEstimator::new(Arc::new(oracle), &config);

        let (first, second, third) = tokio::join!(
            estimator.estimate_gas(params("h")),
            async {
                sleep(Duration::from_millis(50)).await;
                estimator.estimate_gas(params("he")).await
            },
            async {
                sleep(Duration::from_millis(100)).await;
                estimator.estimate_gas(params("hel")).await
            }
        );

        assert_eq!(first.unwrap(), EstimateOutcome::Superseded);
        assert_eq!(second.unwrap(), EstimateOutcome::Superseded);
        assert_eq!(third.unwrap(), EstimateOutcome::Ready(fixed_estimate("hel")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_respects_ttl() {
        let mut oracle = MockGasOracle::new();
        oracle
            .expect_quote()
            .times(2)
            .returning(|_| Ok(fixed_estimate("6.00")));
        let estimator = GasEstimator::new(Arc::new(oracle), &no_debounce());

        estimator.estimate_gas(params("hello")).await.unwrap();
        estimator.estimate_gas(params("hello")).await.unwrap();

        sleep(Duration::from_secs(31)).await;
        let outcome = estimator.estimate_gas(params("hello")).await.unwrap();
        assert_eq!(outcome, EstimateOutcome::Ready(fixed_estimate("6.00")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_pruned() {
        let mut oracle = MockGasOracle::new();
        oracle
            .expect_quote()
            .returning(|p| Ok(fixed_estimate(&p.message.len().to_string())));
        let estimator = GasEstimator::new(Arc::new(oracle), &no_debounce());

        // 模拟逐字输入，每个前缀都是不同的缓存键
        let typed = "hello from sepolia to base sepolia, ".repeat(10);
        for len in 1..=typed.len() {
            estimator.estimate_gas(params(&typed[..len])).await.unwrap();
        }
        assert_eq!(estimator.cache.lock().unwrap().len(), typed.len());

        sleep(Duration::from_secs(600)).await;
        estimator.estimate_gas(params("final")).await.unwrap();

        let cache = estimator.cache.lock().unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&params("final")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_clears_latest() {
        let mut oracle = MockGasOracle::new();
        let mut calls = 0;
        oracle.expect_quote().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(fixed_estimate("6.00"))
            } else {
                Err(Error::Runtime("rpc unavailable".to_string()))
            }
        });
        let estimator = GasEstimator::new(Arc::new(oracle), &no_debounce());

        estimator.estimate_gas(params("hello")).await.unwrap();
        assert!(estimator.latest().is_some());

        let err = estimator.estimate_gas(params("other")).await.unwrap_err();
        assert!(matches!(err, Error::Estimation(_)));
        assert!(estimator.latest().is_none());
    }
}
