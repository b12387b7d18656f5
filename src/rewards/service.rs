//! Reward claim orchestration
//!
//! Keeps one [`ClaimPanel`] per player address, runs the cooldown countdown
//! while a player is not yet eligible, and follows submitted claims until
//! they are mined. Panels nobody asked about for [`PANEL_IDLE_TTL`] stop
//! their countdown and are evicted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::abi::Address;
use super::contract::{PlayerStats, RewardContract, RewardError};
use super::panel::{ClaimPanel, ClaimPanelView, ClaimRefusal};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);
const PANEL_IDLE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct RewardService {
    contract: Arc<dyn RewardContract>,
    panels: Arc<DashMap<Address, Arc<Mutex<ClaimPanel>>>>,
    watchers: Arc<DashMap<Address, JoinHandle<()>>>,
    explorer_url: String,
    resync_interval: Duration,
}

impl RewardService {
    pub fn new(contract: Arc<dyn RewardContract>, explorer_url: impl Into<String>) -> Self {
        Self {
            contract,
            panels: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
            explorer_url: explorer_url.into(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }

    pub fn with_resync_interval(mut self, resync_interval: Duration) -> Self {
        self.resync_interval = resync_interval;
        self
    }

    fn panel(&self, player: Address) -> Arc<Mutex<ClaimPanel>> {
        if let Some(panel) = self.panels.get(&player) {
            return panel.value().clone();
        }

        self.evict_idle();
        self.panels
            .entry(player)
            .or_insert_with(|| Arc::new(Mutex::new(ClaimPanel::new(player, &self.explorer_url))))
            .clone()
    }

    /// Drop panels nobody looked at recently, unless a claim or countdown still uses them
    fn evict_idle(&self) {
        let before = self.panels.len();
        self.panels.retain(|player, panel| {
            !is_evictable(&panel.lock()) || self.watchers.contains_key(player)
        });
        let evicted = before.saturating_sub(self.panels.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.panels.len(), "Evicted idle claim panels");
        }
    }

    pub fn view(&self, player: Address) -> Option<ClaimPanelView> {
        self.panels.get(&player).map(|p| {
            let mut panel = p.lock();
            panel.touch();
            panel.view()
        })
    }

    /// Refetch eligibility and stats, and start the countdown if needed
    pub async fn refresh(&self, player: Address) -> Result<ClaimPanelView, RewardError> {
        self.panel(player).lock().touch();
        let view = self.fetch_into_panel(player).await?;
        self.ensure_watcher(player);
        Ok(view)
    }

    async fn fetch_into_panel(&self, player: Address) -> Result<ClaimPanelView, RewardError> {
        let (eligibility, stats) = tokio::try_join!(
            self.contract.can_claim(player),
            self.contract.contract_stats()
        )?;

        let panel = self.panel(player);
        let mut panel = panel.lock();
        panel.apply_eligibility(eligibility);
        panel.apply_stats(&stats);
        Ok(panel.view())
    }

    /// Refetch, logging instead of failing; returns whether it succeeded
    async fn refetch_quietly(&self, player: Address) -> bool {
        match self.fetch_into_panel(player).await {
            Ok(_) => true,
            Err(e) => {
                warn!(player = %player, error = %e, "Reward status refetch failed");
                false
            }
        }
    }

    pub async fn player_stats(&self, player: Address) -> Result<PlayerStats, RewardError> {
        self.contract.player_stats(player).await
    }

    /// Submit a claim; the returned view shows it in flight or failed
    pub async fn claim(&self, player: Address) -> Result<ClaimPanelView, ClaimRefusal> {
        let panel = self.panel(player);
        {
            let mut panel = panel.lock();
            panel.touch();
            panel.begin_claim()?;
        }

        match self.contract.claim_reward(player).await {
            Ok(tx_hash) => {
                panel.lock().submitted(tx_hash.clone());
                self.follow_claim(player, tx_hash);
            }
            Err(e) => {
                let raw = e.raw_message();
                warn!(player = %player, error = %raw, "Claim submission failed");
                panel.lock().failed(&raw);
            }
        }

        let view = panel.lock().view();
        Ok(view)
    }

    fn follow_claim(&self, player: Address, tx_hash: String) {
        let service = self.clone();
        tokio::spawn(async move {
            let panel = service.panel(player);
            match service.contract.wait_for_receipt(&tx_hash).await {
                Ok(receipt) => {
                    panel.lock().confirmed();
                    info!(
                        player = %player,
                        tx_hash = %tx_hash,
                        block = receipt.block_number,
                        "Claim confirmed"
                    );
                    service.refetch_quietly(player).await;
                    service.ensure_watcher(player);
                }
                Err(e) => {
                    let raw = e.raw_message();
                    warn!(player = %player, tx_hash = %tx_hash, error = %raw, "Claim failed");
                    panel.lock().failed(&raw);
                }
            }
        });
    }

    fn ensure_watcher(&self, player: Address) {
        self.watchers.retain(|_, handle| !handle.is_finished());
        if !self.panel(player).lock().countdown_running() {
            return;
        }
        if self.watchers.contains_key(&player) {
            return;
        }

        let service = self.clone();
        let handle = tokio::spawn(async move { service.watch_countdown(player).await });
        self.watchers.insert(player, handle);
    }

    async fn watch_countdown(&self, player: Address) {
        let panel = self.panel(player);
        let start = Instant::now();

        let mut second = interval_at(start + COUNTDOWN_TICK, COUNTDOWN_TICK);
        second.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resync = interval_at(start + self.resync_interval, self.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Set when the refetch at zero failed; retried on every resync
        let mut stale = false;

        debug!(player = %player, "Claim countdown started");
        loop {
            tokio::select! {
                _ = second.tick() => {
                    let due = panel.lock().tick_countdown();
                    if due {
                        stale = !self.refetch_quietly(player).await;
                    }
                }
                _ = resync.tick() => {
                    let refreshed = self.refetch_quietly(player).await;
                    stale = stale && !refreshed;
                }
            }

            let state = panel.lock();
            if !state.countdown_running() && !stale {
                debug!(player = %player, "Claim countdown finished");
                break;
            }
            if state.idle_for() >= PANEL_IDLE_TTL {
                debug!(player = %player, "Claim countdown stopped, nobody watching");
                break;
            }
        }

        self.watchers.remove(&player);
        self.panels
            .remove_if(&player, |_, panel| is_evictable(&panel.lock()));
    }

    pub fn shutdown(&self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
        self.watchers.clear();
    }
}

fn is_evictable(panel: &ClaimPanel) -> bool {
    !panel.claim_in_flight() && panel.idle_for() >= PANEL_IDLE_TTL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::contract::{ClaimEligibility, ContractStats, TxReceipt};
    use crate::rewards::panel::ClaimStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const PLAYER: &str = "0x00000000000000000000000000000000000000bb";

    /// Scripted contract; eligibility answers are consumed in order, the last repeats
    struct MockContract {
        eligibility: Mutex<Vec<ClaimEligibility>>,
        balance_wei: u128,
        claim_error: Option<String>,
        /// Eligibility calls after the first that fail before answers resume
        refetch_failures: AtomicUsize,
        eligibility_calls: AtomicUsize,
        claims: AtomicUsize,
    }

    impl MockContract {
        fn new(eligibility: Vec<(bool, u64)>, balance_wei: u128) -> Self {
            Self {
                eligibility: Mutex::new(
                    eligibility
                        .into_iter()
                        .map(|(can_claim, seconds_until_next)| ClaimEligibility {
                            can_claim,
                            seconds_until_next,
                        })
                        .collect(),
                ),
                balance_wei,
                claim_error: None,
                refetch_failures: AtomicUsize::new(0),
                eligibility_calls: AtomicUsize::new(0),
                claims: AtomicUsize::new(0),
            }
        }

        fn failing_claims(mut self, message: &str) -> Self {
            self.claim_error = Some(message.to_string());
            self
        }

        fn failing_refetches(self, count: usize) -> Self {
            self.refetch_failures.store(count, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl RewardContract for MockContract {
        async fn can_claim(&self, _player: Address) -> Result<ClaimEligibility, RewardError> {
            let call = self.eligibility_calls.fetch_add(1, Ordering::SeqCst);
            if call > 0
                && self
                    .refetch_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(RewardError::Malformed("node unavailable".to_string()));
            }
            let mut answers = self.eligibility.lock();
            if answers.len() > 1 {
                Ok(answers.remove(0))
            } else {
                answers
                    .first()
                    .copied()
                    .ok_or_else(|| RewardError::Malformed("no answer".to_string()))
            }
        }

        async fn contract_stats(&self) -> Result<ContractStats, RewardError> {
            Ok(ContractStats {
                balance_wei: self.balance_wei,
                total_rewards_wei: 0,
                player_count: 3,
                reward_amount_wei: 100_000_000_000_000_000,
            })
        }

        async fn player_stats(&self, _player: Address) -> Result<PlayerStats, RewardError> {
            Err(RewardError::Malformed("unused".to_string()))
        }

        async fn claim_reward(&self, _from: Address) -> Result<String, RewardError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            match &self.claim_error {
                Some(message) => Err(RewardError::Rpc {
                    code: 3,
                    message: message.clone(),
                    data: None,
                }),
                None => Ok("0xfeed".to_string()),
            }
        }

        async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, RewardError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(TxReceipt {
                tx_hash: tx_hash.to_string(),
                block_number: 7,
            })
        }
    }

    fn service(mock: MockContract) -> (RewardService, Arc<MockContract>) {
        let mock = Arc::new(mock);
        let service = RewardService::new(mock.clone(), "https://explorer.test");
        (service, mock)
    }

    fn player() -> Address {
        PLAYER.parse().unwrap()
    }

    #[tokio::test]
    async fn test_refresh_fills_panel() {
        let (service, _mock) = service(MockContract::new(vec![(false, 3_725)], 2_500_000_000_000_000_000));
        assert!(service.view(player()).is_none());

        let view = service.refresh(player()).await.unwrap();
        assert!(!view.can_claim);
        assert_eq!(view.time_until_next, "1h 2m 5s");
        assert_eq!(view.balance, "2.5000");
        assert_eq!(view.status, ClaimStatus::Idle);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_claim_refused_before_cooldown() {
        let (service, mock) = service(MockContract::new(vec![(false, 60)], 1));
        service.refresh(player()).await.unwrap();

        assert_eq!(
            service.claim(player()).await.unwrap_err(),
            ClaimRefusal::NotEligible
        );
        assert_eq!(mock.claims.load(Ordering::SeqCst), 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_claim_refused_on_empty_contract() {
        let (service, mock) = service(MockContract::new(vec![(true, 0)], 0));
        service.refresh(player()).await.unwrap();

        assert_err!(service.claim(player()).await);
        assert_eq!(mock.claims.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_confirms_and_refetches() {
        let (service, mock) = service(MockContract::new(vec![(true, 0), (false, 86_400)], 1));
        service.refresh(player()).await.unwrap();

        let view = assert_ok!(service.claim(player()).await);
        assert_eq!(view.status, ClaimStatus::Confirming);
        assert_eq!(view.tx_hash.as_deref(), Some("0xfeed"));
        assert_eq!(
            view.explorer_link.as_deref(),
            Some("https://explorer.test/tx/0xfeed")
        );

        // A second claim while confirming is refused without a new transaction
        assert_eq!(
            service.claim(player()).await.unwrap_err(),
            ClaimRefusal::InFlight
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let view = service.view(player()).unwrap();
        assert_eq!(view.status, ClaimStatus::Confirmed);
        assert!(!view.can_claim);
        assert_eq!(view.seconds_until_next, 86_400);
        assert_eq!(mock.claims.load(Ordering::SeqCst), 1);
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), 2);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_claim_failure_is_mapped_and_not_retried() {
        let mock = MockContract::new(vec![(true, 0)], 1)
            .failing_claims("execution reverted: ClaimTooEarly()");
        let (service, mock) = service(mock);
        service.refresh(player()).await.unwrap();

        let view = service.claim(player()).await.unwrap();
        assert_eq!(
            view.status,
            ClaimStatus::Failed("Please wait for the cooldown period to end.".to_string())
        );
        assert_eq!(mock.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_refetches_when_it_reaches_zero() {
        let (service, mock) = service(MockContract::new(vec![(false, 3), (true, 0)], 1));
        service.refresh(player()).await.unwrap();
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(service.view(player()).unwrap().seconds_until_next, 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let view = service.view(player()).unwrap();
        assert!(view.can_claim);
        assert_eq!(view.time_until_next, "Now");
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_cooldown_resyncs_periodically() {
        let (service, mock) = service(MockContract::new(vec![(false, 3_600)], 1));
        let service = service.with_resync_interval(Duration::from_secs(60));
        service.refresh(player()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), 3);
        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refetch_at_zero_is_retried_on_resync() {
        let mock = MockContract::new(vec![(false, 2), (true, 0)], 1).failing_refetches(1);
        let (service, mock) = service(mock);
        let service = service.with_resync_interval(Duration::from_secs(10));
        service.refresh(player()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let view = service.view(player()).unwrap();
        assert!(!view.can_claim);
        assert_eq!(view.seconds_until_next, 0);
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.watchers.len(), 1);

        tokio::time::sleep(Duration::from_secs(8)).await;
        let view = service.view(player()).unwrap();
        assert!(view.can_claim);
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), 3);
        assert!(service.watchers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_watchers_and_idle_panels_are_dropped() {
        let (service, _mock) = service(MockContract::new(vec![(false, 2), (true, 0)], 1));
        service.refresh(player()).await.unwrap();
        assert_eq!(service.watchers.len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(service.watchers.is_empty());
        assert_eq!(service.panels.len(), 1);

        tokio::time::sleep(PANEL_IDLE_TTL).await;
        let other: Address = "0x00000000000000000000000000000000000000cc".parse().unwrap();
        service.refresh(other).await.unwrap();
        assert!(service.view(player()).is_none());
        assert_eq!(service.panels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwatched_countdown_stops_and_is_evicted() {
        let (service, mock) = service(MockContract::new(vec![(false, 86_400)], 1));
        service.refresh(player()).await.unwrap();

        tokio::time::sleep(PANEL_IDLE_TTL + Duration::from_secs(2)).await;
        assert!(service.watchers.is_empty());
        assert!(service.panels.is_empty());

        // No more resyncs once the watcher is gone
        let calls = mock.eligibility_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(mock.eligibility_calls.load(Ordering::SeqCst), calls);
    }
}
