//! Per-player reward claim state

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::abi::{self, Address};
use super::contract::{ClaimEligibility, ContractStats};

const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;
/// Wei per displayed unit at four decimals
const WEI_PER_TEN_THOUSANDTH: u128 = WEI_PER_TOKEN / 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ClaimStatus {
    Idle,
    /// Submitted to the node, no hash yet
    Pending,
    /// Hash known, waiting to be mined
    Confirming,
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimRefusal {
    #[error("Not eligible to claim yet")]
    NotEligible,

    #[error("Contract doesn't have enough funds.")]
    InsufficientBalance,

    #[error("A claim is already in progress")]
    InFlight,
}

impl ClaimRefusal {
    pub fn code(&self) -> &'static str {
        match self {
            ClaimRefusal::NotEligible => "not_eligible",
            ClaimRefusal::InsufficientBalance => "insufficient_balance",
            ClaimRefusal::InFlight => "claim_in_flight",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimPanelView {
    pub player: Address,
    /// Eligible and the contract is funded
    pub can_claim: bool,
    pub seconds_until_next: u64,
    pub time_until_next: String,
    pub balance: String,
    pub insufficient_balance: bool,
    pub status: ClaimStatus,
    pub tx_hash: Option<String>,
    pub explorer_link: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ClaimPanel {
    player: Address,
    explorer_url: String,
    eligible: bool,
    seconds_until_next: u64,
    balance_wei: u128,
    status: ClaimStatus,
    tx_hash: Option<String>,
    refreshed_at: Option<DateTime<Utc>>,
    /// Last time a player asked for this panel
    last_seen: Instant,
}

impl ClaimPanel {
    pub fn new(player: Address, explorer_url: impl Into<String>) -> Self {
        Self {
            player,
            explorer_url: explorer_url.into(),
            eligible: false,
            seconds_until_next: 0,
            balance_wei: 0,
            status: ClaimStatus::Idle,
            tx_hash: None,
            refreshed_at: None,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn apply_eligibility(&mut self, eligibility: ClaimEligibility) {
        self.eligible = eligibility.can_claim;
        self.seconds_until_next = eligibility.seconds_until_next;
        self.refreshed_at = Some(Utc::now());
    }

    pub fn apply_stats(&mut self, stats: &ContractStats) {
        self.balance_wei = stats.balance_wei;
        self.refreshed_at = Some(Utc::now());
    }

    pub fn has_insufficient_balance(&self) -> bool {
        self.balance_wei == 0
    }

    pub fn claim_in_flight(&self) -> bool {
        matches!(self.status, ClaimStatus::Pending | ClaimStatus::Confirming)
    }

    /// Whether the second-by-second countdown should keep running
    pub fn countdown_running(&self) -> bool {
        !self.eligible && self.seconds_until_next > 0
    }

    pub fn check_claim(&self) -> Result<(), ClaimRefusal> {
        if self.claim_in_flight() {
            return Err(ClaimRefusal::InFlight);
        }
        if !self.eligible {
            return Err(ClaimRefusal::NotEligible);
        }
        if self.has_insufficient_balance() {
            return Err(ClaimRefusal::InsufficientBalance);
        }
        Ok(())
    }

    pub fn begin_claim(&mut self) -> Result<(), ClaimRefusal> {
        self.check_claim()?;
        self.status = ClaimStatus::Pending;
        self.tx_hash = None;
        Ok(())
    }

    pub fn submitted(&mut self, tx_hash: String) {
        self.status = ClaimStatus::Confirming;
        self.tx_hash = Some(tx_hash);
    }

    pub fn confirmed(&mut self) {
        self.status = ClaimStatus::Confirmed;
    }

    pub fn failed(&mut self, raw_message: &str) {
        self.status = ClaimStatus::Failed(describe_failure(raw_message));
    }

    /// Advance the countdown by one second; true when a refetch is due
    pub fn tick_countdown(&mut self) -> bool {
        if !self.countdown_running() {
            return false;
        }
        if self.seconds_until_next <= 1 {
            self.seconds_until_next = 0;
            true
        } else {
            self.seconds_until_next -= 1;
            false
        }
    }

    pub fn view(&self) -> ClaimPanelView {
        ClaimPanelView {
            player: self.player,
            can_claim: self.eligible && !self.has_insufficient_balance(),
            seconds_until_next: self.seconds_until_next,
            time_until_next: format_time_until_next(self.seconds_until_next as i64),
            balance: format_balance(self.balance_wei),
            insufficient_balance: self.has_insufficient_balance(),
            status: self.status.clone(),
            tx_hash: self.tx_hash.clone(),
            explorer_link: self
                .tx_hash
                .as_deref()
                .map(|hash| explorer_tx_url(&self.explorer_url, hash)),
            refreshed_at: self.refreshed_at,
        }
    }
}

/// `"{h}h {m}m {s}s"`, or `"Now"` when nothing is left
pub fn format_time_until_next(seconds: i64) -> String {
    if seconds <= 0 {
        return "Now".to_string();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours}h {minutes}m {secs}s")
}

/// Wei as a token amount with four decimals, rounded half up
pub fn format_balance(wei: u128) -> String {
    let units = wei.saturating_add(WEI_PER_TEN_THOUSANDTH / 2) / WEI_PER_TEN_THOUSANDTH;
    format!("{}.{:04}", units / 10_000, units % 10_000)
}

/// User-facing text for a failed claim
pub fn describe_failure(raw_message: &str) -> String {
    let reverted_with = |name: &str, selector: [u8; 4]| {
        raw_message.contains(name) || revert_selectors(raw_message).any(|s| s == selector)
    };

    if reverted_with("ClaimTooEarly", abi::CLAIM_TOO_EARLY) {
        "Please wait for the cooldown period to end.".to_string()
    } else if reverted_with("InsufficientContractBalance", abi::INSUFFICIENT_CONTRACT_BALANCE) {
        "Contract doesn't have enough funds.".to_string()
    } else {
        raw_message.to_string()
    }
}

/// Custom error selectors of any 0x-prefixed hex blobs in an error message
fn revert_selectors(raw_message: &str) -> impl Iterator<Item = [u8; 4]> + '_ {
    raw_message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| word.starts_with("0x"))
        .filter_map(abi::revert_selector)
}

pub fn explorer_tx_url(explorer_url: &str, tx_hash: &str) -> String {
    format!("{}/tx/{}", explorer_url.trim_end_matches('/'), tx_hash)
}
