//! isoquant: RNA isoform abundance quantification
//!
//! Given a genome, an exon/isoform annotation and a set of reads, this
//! library aligns the reads to every isoform transcript (junctions included)
//! and estimates per-gene isoform abundances with expectation-maximization.

pub mod alignment;
pub mod annotation;
pub mod compatibility;
pub mod estimator;
pub mod genome;
pub mod index;
pub mod logging;
pub mod output;
pub mod quantify;
pub mod reads;
pub mod types;

// Re-export main types for library usage
pub use types::*;
pub use quantify::{GeneReport, QuantEngine, QuantSummary, Quantification};
pub use compatibility::{CompatibilityIndex, IsoformGroup};
pub use estimator::EmState;
