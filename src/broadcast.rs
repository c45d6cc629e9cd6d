//! Transaction broadcaster
//!
//! Submits an encoded transaction with a bounded fixed-interval retry.
//! Only transient submission failures are retried; a rejection by the node
//! ends the attempt immediately.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::ChainSubmit;
use crate::config::BroadcastConfig;
use crate::error::{Error, Result};
use crate::tx::{Transaction, Txid};

/// Where a single `send` call currently is
#[derive(Debug)]
enum SendState {
    Idle,
    Sending { attempt: u32 },
    Retrying { attempt: u32, last: Error },
    Success(Txid),
    Failed(Error),
}

/// Submits transactions and remembers the last one accepted
pub struct Broadcaster {
    submit: Arc<dyn ChainSubmit>,
    config: BroadcastConfig,
    pending_tx: RwLock<Option<Txid>>,
}

impl Broadcaster {
    pub fn new(submit: Arc<dyn ChainSubmit>, config: BroadcastConfig) -> Self {
        Self {
            submit,
            config,
            pending_tx: RwLock::new(None),
        }
    }

    /// Last transaction accepted by the node
    pub async fn pending_tx(&self) -> Option<Txid> {
        *self.pending_tx.read().await
    }

    /// Initial delay to use for a transaction spending `chained` input
    pub fn initial_delay(&self, chained: bool) -> Duration {
        if chained {
            self.config.chained_initial_delay()
        } else {
            Duration::ZERO
        }
    }

    /// Submit `tx`, waiting `initial_delay` before the first attempt
    pub async fn send(&self, tx: &Transaction, initial_delay: Duration) -> Result<Txid> {
        let hex = tx.to_hex()?;
        let interval = self.config.retry_interval();
        let budget = self.config.retry_budget();

        let mut state = SendState::Idle;
        loop {
            state = match state {
                SendState::Idle => {
                    if !initial_delay.is_zero() {
                        debug!("Waiting {:?} before sending", initial_delay);
                        sleep(initial_delay).await;
                    }
                    SendState::Sending { attempt: 1 }
                }
                SendState::Sending { attempt } => match self.submit.send_raw(&hex).await {
                    Ok(txid) => SendState::Success(txid),
                    Err(e) if e.is_retryable() => SendState::Retrying { attempt, last: e },
                    Err(e) => {
                        error!("Transaction rejected: {}", e);
                        SendState::Failed(Error::Broadcast {
                            attempts: attempt,
                            last: Box::new(e),
                        })
                    }
                },
                SendState::Retrying { attempt, last } => {
                    if interval * attempt < budget {
                        warn!(
                            "Send attempt {} failed: {} - retrying in {:?}",
                            attempt, last, interval
                        );
                        sleep(interval).await;
                        SendState::Sending {
                            attempt: attempt + 1,
                        }
                    } else {
                        error!("Giving up after {} send attempts: {}", attempt, last);
                        SendState::Failed(Error::Broadcast {
                            attempts: attempt,
                            last: Box::new(last),
                        })
                    }
                }
                SendState::Success(txid) => {
                    info!("Transaction sent: {}", txid);
                    *self.pending_tx.write().await = Some(txid);
                    return Ok(txid);
                }
                SendState::Failed(e) => return Err(e),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{utxo, MockChain};
    use crate::tx::{Script, TxIn, TxOut, TRANSACTION_VERSION};
    use rust_decimal::Decimal;
    use tokio::time::Instant;

    fn sample_tx() -> Transaction {
        let script = Script::new(vec![0x00, 0x14, 0x55]);
        Transaction {
            version: TRANSACTION_VERSION,
            inputs: vec![TxIn::spending(&utxo(7, Decimal::ONE, &script))],
            outputs: vec![
                TxOut {
                    value: Decimal::ZERO,
                    script: Script::op_return(b"DfTx"),
                    token_id: 0,
                },
                TxOut {
                    value: Decimal::new(99_999, 5),
                    script,
                    token_id: 0,
                },
            ],
            lock_time: 0,
        }
    }

    fn broadcaster(chain: Arc<MockChain>) -> Broadcaster {
        Broadcaster::new(chain, BroadcastConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_first_try() {
        let chain = Arc::new(MockChain::new());
        let broadcaster = broadcaster(chain.clone());
        let tx = sample_tx();

        let txid = broadcaster.send(&tx, Duration::ZERO).await.unwrap();
        assert_eq!(txid, tx.txid().unwrap());
        assert_eq!(chain.submit_calls(), 1);
        assert_eq!(broadcaster.pending_tx().await, Some(txid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_within_budget() {
        // 4 failures: 4 x 10s < 50s, the fifth attempt goes through
        let chain = Arc::new(MockChain::new().failing_submits(4));
        let broadcaster = broadcaster(chain.clone());
        let start = Instant::now();

        let result = broadcaster.send(&sample_tx(), Duration::ZERO).await;
        assert!(result.is_ok());
        assert_eq!(chain.submit_calls(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_budget() {
        // 5 failures: 5 x 10s >= 50s
        let chain = Arc::new(MockChain::new().failing_submits(5));
        let broadcaster = broadcaster(chain.clone());

        let err = broadcaster
            .send(&sample_tx(), Duration::ZERO)
            .await
            .unwrap_err();
        match err {
            Error::Broadcast { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(matches!(*last, Error::SubmitTransient(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(chain.submit_calls(), 5);
        assert!(chain.submitted().is_empty());
        assert_eq!(broadcaster.pending_tx().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_not_retried() {
        let chain = Arc::new(MockChain::new().rejecting());
        let broadcaster = broadcaster(chain.clone());

        let err = broadcaster
            .send(&sample_tx(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Broadcast { attempts: 1, .. }));
        assert_eq!(chain.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chained_initial_delay() {
        let chain = Arc::new(MockChain::new());
        let broadcaster = broadcaster(chain.clone());
        let delay = broadcaster.initial_delay(true);
        assert_eq!(delay, Duration::from_millis(3000));
        assert_eq!(broadcaster.initial_delay(false), Duration::ZERO);

        let start = Instant::now();
        broadcaster.send(&sample_tx(), delay).await.unwrap();
        assert_eq!(start.elapsed(), delay);
    }
}
