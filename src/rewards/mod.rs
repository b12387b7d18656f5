//! On-chain victory rewards

pub mod abi;
pub mod contract;
pub mod panel;
pub mod service;

pub use abi::Address;
pub use contract::JsonRpcRewardContract;
pub use panel::ClaimPanelView;
pub use service::RewardService;
