//! Spendable output selection

use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::SpendableOutput;
use crate::chain::ChainQuery;
use crate::error::Result;

/// How many of the fetched outputs a build consumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Spend every fetched output (consolidates the wallet on each build)
    #[default]
    All,
    /// Spend the fewest outputs (largest first) that cover the target
    Covering,
}

/// Gathers spendable outputs from the chain
#[derive(Clone)]
pub struct UtxoSelector {
    query: Arc<dyn ChainQuery>,
    policy: SelectionPolicy,
}

impl UtxoSelector {
    pub fn new(query: Arc<dyn ChainQuery>, policy: SelectionPolicy) -> Self {
        Self { query, policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Fetch up to `limit` spendable outputs for `address`, in chain order
    pub async fn select_spendable(&self, address: &str, limit: usize) -> Result<Vec<SpendableOutput>> {
        let outputs = self.query.get_spendable_outputs(address, limit).await?;
        debug!("Fetched {} spendable outputs for {}", outputs.len(), address);
        Ok(outputs)
    }

    /// Fetch and apply the selection policy against `target`
    pub async fn select_for(
        &self,
        address: &str,
        limit: usize,
        target: Decimal,
    ) -> Result<Vec<SpendableOutput>> {
        let outputs = self.select_spendable(address, limit).await?;
        Ok(apply_policy(self.policy, outputs, target))
    }
}

/// Reduce `outputs` according to `policy`
///
/// `Covering` falls back to every output when even all of them fall
/// short of `target`; the builder then reports the shortfall.
pub fn apply_policy(
    policy: SelectionPolicy,
    mut outputs: Vec<SpendableOutput>,
    target: Decimal,
) -> Vec<SpendableOutput> {
    match policy {
        SelectionPolicy::All => outputs,
        SelectionPolicy::Covering => {
            outputs.sort_by(|a, b| b.value.cmp(&a.value));
            let mut total = Decimal::ZERO;
            let mut keep = outputs.len();
            for (i, output) in outputs.iter().enumerate() {
                total += output.value;
                if total >= target {
                    keep = i + 1;
                    break;
                }
            }
            outputs.truncate(keep);
            outputs
        }
    }
}
