//! Confirmation waiter
//!
//! Polls the chain until a transaction is visible or a budget runs out.
//! Two budgets apply at once: wall-clock time spent polling, and blocks
//! mined since the transaction was sent. Running out of either is a
//! normal `false` result, not an error.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::chain::ChainQuery;
use crate::config::{ConfirmationConfig, WaitBudget};
use crate::signing::SigningCapability;
use crate::tx::Txid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Idle,
    Polling { elapsed: Duration },
    Confirmed,
    TimedOut,
}

pub struct ConfirmationWaiter {
    query: Arc<dyn ChainQuery>,
    initial_delay: Duration,
    poll_interval: Duration,
    budget: WaitBudget,
}

impl ConfirmationWaiter {
    /// Waiter with the budget that fits `capability`
    pub fn new(
        query: Arc<dyn ChainQuery>,
        config: &ConfirmationConfig,
        capability: &SigningCapability,
    ) -> Self {
        Self {
            query,
            initial_delay: config.initial_delay(),
            poll_interval: config.poll_interval(),
            budget: config.budget_for(capability),
        }
    }

    pub fn budget(&self) -> WaitBudget {
        self.budget
    }

    /// Wait until `txid` is known to the chain
    ///
    /// `start_block` is the height the transaction was sent at; the current
    /// height is used when it is not given.
    pub async fn wait_for_inclusion(&self, txid: &Txid, start_block: Option<u64>) -> bool {
        let start_block = match start_block {
            Some(height) => Some(height),
            None => match self.query.get_block_height().await {
                Ok(height) => Some(height),
                Err(e) => {
                    warn!("Could not read start height, block budget disabled: {}", e);
                    None
                }
            },
        };

        info!(
            "Waiting for {} (budget {:?} / {} blocks)",
            txid, self.budget.time, self.budget.blocks
        );

        let mut state = WaitState::Idle;
        loop {
            state = match state {
                WaitState::Idle => {
                    sleep(self.initial_delay).await;
                    WaitState::Polling {
                        elapsed: self.initial_delay,
                    }
                }
                WaitState::Polling { elapsed } => {
                    if self.is_visible(txid).await {
                        WaitState::Confirmed
                    } else if self.blocks_exhausted(start_block).await
                        || elapsed >= self.budget.time
                    {
                        WaitState::TimedOut
                    } else {
                        sleep(self.poll_interval).await;
                        WaitState::Polling {
                            elapsed: elapsed + self.poll_interval,
                        }
                    }
                }
                WaitState::Confirmed => {
                    info!("Transaction {} found", txid);
                    return true;
                }
                WaitState::TimedOut => {
                    warn!("Gave up waiting for {}", txid);
                    return false;
                }
            };
        }
    }

    async fn is_visible(&self, txid: &Txid) -> bool {
        match self.query.get_transaction(txid).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!("Lookup of {} failed: {}", txid, e);
                false
            }
        }
    }

    async fn blocks_exhausted(&self, start_block: Option<u64>) -> bool {
        let Some(start) = start_block else {
            return false;
        };
        match self.query.get_block_height().await {
            Ok(height) => {
                let exhausted = height > start + self.budget.blocks;
                if exhausted {
                    debug!("Height {} is past {} + {}", height, start, self.budget.blocks);
                }
                exhausted
            }
            Err(e) => {
                debug!("Height query failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::tx::Script;
    use tokio::time::Instant;

    fn owner() -> SigningCapability {
        SigningCapability::WithOwnership {
            script: Script::new(vec![0x00, 0x14]),
        }
    }

    fn watch_only() -> SigningCapability {
        SigningCapability::WithoutOwnership {
            script: Script::new(vec![0x00, 0x14]),
        }
    }

    fn waiter(chain: Arc<MockChain>, capability: &SigningCapability) -> ConfirmationWaiter {
        ConfirmationWaiter::new(chain, &ConfirmationConfig::default(), capability)
    }

    fn txid() -> Txid {
        Txid::from_internal_bytes([0xab; 32])
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_on_first_poll() {
        let chain = Arc::new(MockChain::new().with_height(100, 0));
        chain.mark_known(txid());
        let start = Instant::now();

        assert!(waiter(chain, &owner()).wait_for_inclusion(&txid(), Some(100)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_included_at_last_block_of_budget() {
        // One block per poll; visible once 20 blocks are mined
        let chain = Arc::new(MockChain::new().with_height(100, 1).confirm_at_height(120));
        assert!(waiter(chain, &owner()).wait_for_inclusion(&txid(), Some(100)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_budget_exhausted() {
        let chain = Arc::new(MockChain::new().with_height(100, 1).confirm_at_height(121));
        let start = Instant::now();

        assert!(!waiter(chain, &owner()).wait_for_inclusion(&txid(), Some(100)).await);
        // Well before the 10 minute budget
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_exhausted() {
        let chain = Arc::new(MockChain::new().with_height(100, 0));
        let start = Instant::now();

        assert!(!waiter(chain, &owner()).wait_for_inclusion(&txid(), Some(100)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_signing_gets_longer_budget() {
        let chain = Arc::new(MockChain::new().with_height(100, 0));
        let waiter = waiter(chain, &watch_only());
        assert_eq!(waiter.budget().blocks, 30);
        let start = Instant::now();

        assert!(!waiter.wait_for_inclusion(&txid(), Some(100)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_height_read_from_chain() {
        let chain = Arc::new(MockChain::new().with_height(500, 1));
        let start = Instant::now();

        // Nothing is ever found; the block budget ends the wait
        assert!(!waiter(chain, &owner()).wait_for_inclusion(&txid(), None).await);
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_are_not_fatal() {
        let chain = Arc::new(MockChain::new().unreachable());
        let start = Instant::now();

        assert!(!waiter(chain, &owner()).wait_for_inclusion(&txid(), None).await);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }
}
