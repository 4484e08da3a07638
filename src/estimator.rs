//! Isoform abundance estimation by expectation-maximization
//!
//! Each read contributes a likelihood to every isoform group it is compatible
//! with: the number of its best placements inside that group's transcript,
//! divided by the group's effective length. Reads with the same likelihood
//! vector are pooled into an equivalence class.
//!
//! `alpha` is the fraction of reads generated by each group. One EM step
//! splits every class across its groups in proportion to
//! `alpha[g] * weight[g]` (E-step) and renormalizes the assigned counts
//! (M-step). The reported abundance is the molecule fraction
//! `alpha[g] / eff_len[g]`, renormalized to 1, or expected read counts when
//! raw counts are requested.

use crate::types::{IsoQuantError, QuantConfig, Result};
use std::collections::BTreeMap;

/// The evidence one read provides for one gene
#[derive(Debug, Clone, PartialEq)]
pub struct ReadEvidence {
    /// `(group, number of placements compatible with it)`, ascending by group
    pub compatible: Vec<(usize, u32)>,
    /// Share of the read assigned to this gene (1.0 unless it also maps elsewhere)
    pub count: f64,
}

/// Reads sharing one likelihood vector
#[derive(Debug, Clone, PartialEq)]
pub struct EquivalenceClass {
    pub groups: Vec<usize>,
    pub weights: Vec<f64>,
    pub count: f64,
}

/// Everything the EM needs for one gene
#[derive(Debug, Clone)]
pub struct EmModel {
    effective_lengths: Vec<f64>,
    classes: Vec<EquivalenceClass>,
    total_reads: f64,
}

impl EmModel {
    pub fn new(
        effective_lengths: Vec<f64>,
        evidence: impl IntoIterator<Item = ReadEvidence>,
    ) -> Self {
        let mut pooled: BTreeMap<Vec<(usize, u32)>, f64> = BTreeMap::new();
        for read in evidence {
            if read.compatible.is_empty() || read.count <= 0.0 {
                continue;
            }
            *pooled.entry(read.compatible).or_insert(0.0) += read.count;
        }

        let classes: Vec<EquivalenceClass> = pooled
            .into_iter()
            .map(|(compatible, count)| EquivalenceClass {
                groups: compatible.iter().map(|&(g, _)| g).collect(),
                weights: compatible
                    .iter()
                    .map(|&(g, placements)| placements as f64 / effective_lengths[g])
                    .collect(),
                count,
            })
            .collect();
        let total_reads = classes.iter().map(|c| c.count).sum();

        Self {
            effective_lengths,
            classes,
            total_reads,
        }
    }

    pub fn group_count(&self) -> usize {
        self.effective_lengths.len()
    }

    pub fn classes(&self) -> &[EquivalenceClass] {
        &self.classes
    }

    pub fn total_reads(&self) -> f64 {
        self.total_reads
    }

    pub fn effective_lengths(&self) -> &[f64] {
        &self.effective_lengths
    }

    pub fn initial_abundances(&self) -> Vec<f64> {
        let n = self.group_count();
        vec![1.0 / n as f64; n]
    }
}

/// Effective number of start positions for a read on a transcript
pub fn effective_length(transcript_len: usize, mean_read_len: f64) -> f64 {
    (transcript_len as f64 - mean_read_len + 1.0).max(1.0)
}

/// One EM iteration: `alpha -> alpha'`
pub fn em_step(model: &EmModel, alpha: &[f64]) -> Vec<f64> {
    let mut assigned = vec![0.0; alpha.len()];

    for class in &model.classes {
        let denominator: f64 = class
            .groups
            .iter()
            .zip(&class.weights)
            .map(|(&g, &w)| alpha[g] * w)
            .sum();
        if denominator <= 0.0 {
            continue;
        }
        for (&g, &w) in class.groups.iter().zip(&class.weights) {
            assigned[g] += class.count * alpha[g] * w / denominator;
        }
    }

    let total: f64 = assigned.iter().sum();
    if total <= 0.0 {
        return alpha.to_vec();
    }
    assigned.iter().map(|a| a / total).collect()
}

pub fn has_converged(previous: &[f64], next: &[f64], tolerance: f64) -> bool {
    previous
        .iter()
        .zip(next)
        .all(|(p, n)| (p - n).abs() < tolerance)
}

/// Per-gene estimation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmState {
    Init,
    Iterate,
    Converged,
    MaxIterationsReached,
}

impl std::fmt::Display for EmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmState::Init => write!(f, "init"),
            EmState::Iterate => write!(f, "iterate"),
            EmState::Converged => write!(f, "converged"),
            EmState::MaxIterationsReached => write!(f, "max_iterations_reached"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmOutcome {
    pub alpha: Vec<f64>,
    pub iterations: usize,
    pub state: EmState,
}

/// Iterate `em_step` from a uniform start until the largest change drops
/// below `tolerance` or `max_iterations` steps have run.
pub fn run_em(model: &EmModel, max_iterations: usize, tolerance: f64) -> EmOutcome {
    let mut state = EmState::Init;
    let mut alpha = model.initial_abundances();
    let mut iterations = 0;

    while iterations < max_iterations {
        state = EmState::Iterate;
        let next = em_step(model, &alpha);
        iterations += 1;
        let done = has_converged(&alpha, &next, tolerance);
        alpha = next;
        if done {
            state = EmState::Converged;
            break;
        }
    }

    if state != EmState::Converged {
        state = EmState::MaxIterationsReached;
    }

    EmOutcome {
        alpha,
        iterations,
        state,
    }
}

/// Abundances of one gene's isoform groups
#[derive(Debug, Clone)]
pub struct GeneEstimate {
    pub abundances: Vec<f64>,
    pub reads: f64,
    pub iterations: usize,
    pub state: EmState,
}

/// Estimate group abundances for one gene.
///
/// A gene without reads gets all zeros and counts as converged after zero
/// iterations. Negative or non-finite output is an error, never clamped.
pub fn estimate_gene(model: &EmModel, config: &QuantConfig) -> Result<GeneEstimate> {
    let groups = model.group_count();

    if model.total_reads() <= 0.0 {
        return Ok(GeneEstimate {
            abundances: vec![0.0; groups],
            reads: 0.0,
            iterations: 0,
            state: EmState::Converged,
        });
    }

    let outcome = run_em(model, config.max_iterations, config.convergence_tolerance);

    let abundances = if config.raw_counts {
        outcome
            .alpha
            .iter()
            .map(|a| a * model.total_reads())
            .collect()
    } else {
        let molecules: Vec<f64> = outcome
            .alpha
            .iter()
            .zip(model.effective_lengths())
            .map(|(a, len)| a / len)
            .collect();
        let total: f64 = molecules.iter().sum();
        molecules.iter().map(|m| m / total).collect::<Vec<f64>>()
    };

    if let Some((g, value)) = abundances
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(IsoQuantError::Estimation(format!(
            "isoform group {} received invalid abundance {} after {} iterations",
            g, value, outcome.iterations
        )));
    }

    Ok(GeneEstimate {
        abundances,
        reads: model.total_reads(),
        iterations: outcome.iterations,
        state: outcome.state,
    })
}
