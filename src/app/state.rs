//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::game::MatchConfig;
use crate::rewards::{JsonRpcRewardContract, RewardService};
use crate::sync::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub match_config: MatchConfig,
    /// Present only when a reward contract is configured
    pub rewards: Option<RewardService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let rewards = config.contract_address.map(|contract| {
            info!(contract = %contract, rpc_url = %config.rpc_url, "Reward contract configured");
            let client =
                JsonRpcRewardContract::new(config.rpc_url.clone(), contract, config.receipt_timeout);
            RewardService::new(Arc::new(client), config.explorer_url.clone())
        });

        Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            match_config: MatchConfig::default(),
            rewards,
        }
    }
}
