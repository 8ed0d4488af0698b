pub mod config;
pub mod types;
pub mod validation;
pub mod store;
pub mod scheduler;
pub mod events;
pub mod engine;
pub mod gas;

pub use config::Config;
pub use engine::MessageEngine;
pub use events::{EventBus, Notification, NotificationKind};
pub use gas::{EstimateOutcome, GasEstimator};
pub use types::{CrossChainTransaction, GasEstimate, SendMessageParams, TxStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Estimation error: {0}")]
    Estimation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
