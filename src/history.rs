//! Per-iteration record of samples, weights and convergence diagnostics.

use crate::importance::WeightedSampleSet;
use crate::mixture::MixtureProposal;

/// Everything one PMC iteration produced: the consumed batch, the refitted
/// proposal, and the diagnostics computed from the batch.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub samples: WeightedSampleSet,
    pub proposal: MixtureProposal,
    pub ess: f64,
    pub perplexity: f64,
}

/// Append-only log of PMC iterations, for inspection after (or between) runs.
///
/// The last record's batch is the final importance-sampling estimate.
#[derive(Debug, Clone, Default)]
pub struct History {
    records: Vec<IterationRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IterationRecord> {
        self.records.iter()
    }

    /// Effective sample size of each iteration, in order.
    pub fn ess_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ess).collect()
    }

    /// Perplexity of each iteration, in order.
    pub fn perplexities(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.perplexity).collect()
    }
}
