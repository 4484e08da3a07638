//! Isoform quantification pipeline: index, align, estimate

use crate::alignment::{Aligner, ReadAlignment};
use crate::annotation::validate_annotation;
use crate::compatibility::CompatibilityIndex;
use crate::estimator::{
    effective_length, estimate_gene, EmModel, EmState, GeneEstimate, ReadEvidence,
};
use crate::index::{KmerIndex, Transcriptome};
use crate::logging::{
    log_gene_estimate, log_iteration_cap, log_merged_isoforms, log_read_accounting,
};
use crate::types::{
    AlignmentRecord, Gene, Genome, IsoQuantError, IsoformAbundance, QuantConfig, Read, Result,
};

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Shortest seed the index is shrunk to for short reads
pub const MIN_SEED_LEN: usize = 8;

/// Seed length that lets the shortest read hold `max_mismatches + 1`
/// disjoint seeds. Capped at the configured length and floored at
/// [`MIN_SEED_LEN`] or the configured length, whichever is smaller.
///
/// Reads that still cannot hold enough seeds are aligned by full scan.
pub fn fit_seed_len(config: &QuantConfig, reads: &[Read]) -> usize {
    let Some(shortest) = reads.iter().map(Read::len).filter(|&len| len > 0).min() else {
        return config.seed_len;
    };

    let per_seed = shortest / (config.max_mismatches as usize + 1);
    if per_seed >= config.seed_len {
        return config.seed_len;
    }

    let seed_len = per_seed.max(MIN_SEED_LEN).min(config.seed_len);
    if per_seed < seed_len {
        warn!(
            "Reads of {} bp cannot hold {} seeds of {} bp and will be aligned by full scan",
            shortest,
            config.max_mismatches + 1,
            seed_len
        );
    } else {
        info!(
            "Seed length lowered from {} to {} to fit {} bp reads",
            config.seed_len, seed_len, shortest
        );
    }
    seed_len
}

/// Main quantification engine
pub struct QuantEngine {
    config: QuantConfig,
}

impl QuantEngine {
    pub fn new(config: QuantConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QuantConfig {
        &self.config
    }

    /// Quantify isoform abundances of every gene.
    ///
    /// The annotation is validated against the genome before any read is
    /// touched. Genome, transcripts and index are shared read-only by the
    /// worker threads; alignment runs in parallel over reads and estimation in
    /// parallel over genes.
    pub fn quantify(
        &self,
        genes: &[Gene],
        genome: &Genome,
        reads: &[Read],
    ) -> Result<Quantification> {
        self.config.validate()?;
        validate_annotation(genes, genome)?;
        let positions = gene_positions(genes)?;

        info!("Step 1: Building transcript index");
        let transcriptome = Transcriptome::build(genes, genome)?;
        let seed_len = fit_seed_len(&self.config, reads);
        let index = KmerIndex::build(&transcriptome, seed_len);

        info!("Step 2: Aligning {} reads", reads.len());
        let aligner = Aligner::new(&transcriptome, &index, &self.config);
        let alignments: Vec<ReadAlignment> =
            reads.par_iter().map(|read| aligner.align(read)).collect();

        let mut summary = QuantSummary::new();
        summary.seed_len = seed_len;
        summary.record_alignments(&alignments);
        log_read_accounting(
            summary.total_reads,
            summary.aligned_reads,
            summary.unaligned_reads,
            summary.multi_mapped_reads,
        );
        if summary.scan_fallback_reads > 0 {
            debug!(
                "{} reads were shorter than {} seeds of {} bp and were aligned by full scan",
                summary.scan_fallback_reads,
                self.config.max_mismatches + 1,
                seed_len
            );
        }

        let aligned_lengths: Vec<usize> = alignments
            .iter()
            .zip(reads)
            .filter(|(alignment, _)| alignment.is_aligned())
            .map(|(_, read)| read.len())
            .collect();
        let mean_read_len = if aligned_lengths.is_empty() {
            0.0
        } else {
            aligned_lengths.iter().sum::<usize>() as f64 / aligned_lengths.len() as f64
        };

        info!("Step 3: Building compatibility indexes for {} genes", genes.len());
        let compatibility: Vec<CompatibilityIndex> =
            genes.par_iter().map(CompatibilityIndex::build).collect();
        let evidence = collect_evidence(&alignments, &positions, &compatibility);

        info!("Step 4: Estimating isoform abundances");
        let estimates: Vec<GeneEstimate> = genes
            .par_iter()
            .zip(compatibility.par_iter())
            .zip(evidence.into_par_iter())
            .map(|((gene, compat), gene_evidence)| {
                let effective_lengths = compat
                    .groups()
                    .iter()
                    .map(|group| {
                        let len = gene.transcript_length(group.representative());
                        effective_length(len, mean_read_len)
                    })
                    .collect();
                let model = EmModel::new(effective_lengths, gene_evidence);
                estimate_gene(&model, &self.config).map_err(|e| {
                    IsoQuantError::Estimation(format!("gene {}: {}", gene.id(), e))
                })
            })
            .collect::<Result<_>>()?;

        let mut isoforms = Vec::new();
        let mut gene_reports = Vec::with_capacity(genes.len());
        let mut first_entry = 0;

        for ((gene, compat), estimate) in genes.iter().zip(&compatibility).zip(estimates) {
            log_gene_estimate(
                gene.id(),
                &estimate.state.to_string(),
                estimate.iterations,
                estimate.reads,
            );
            if estimate.state == EmState::MaxIterationsReached {
                log_iteration_cap(gene.id(), estimate.iterations);
            }

            let mut merged_groups = Vec::new();
            for group in compat.merged_groups() {
                log_merged_isoforms(gene.id(), &group.members);
                merged_groups.push(group.members.clone());
            }

            for isoform in 0..gene.isoforms().len() {
                let group_index = compat.group_of(isoform);
                let group = &compat.groups()[group_index];
                let sequence = &transcriptome.get(first_entry + isoform).sequence;
                isoforms.push(IsoformAbundance {
                    gene: gene.id(),
                    isoform,
                    sequence: String::from_utf8_lossy(sequence).into_owned(),
                    abundance: estimate.abundances[group_index] / group.members.len() as f64,
                    merged_with: group.members.iter().copied().filter(|&m| m != isoform).collect(),
                });
            }
            first_entry += gene.isoforms().len();

            summary.record_gene(&estimate, merged_groups.len());
            gene_reports.push(GeneReport {
                gene: gene.id(),
                reads: estimate.reads,
                iterations: estimate.iterations,
                state: estimate.state,
                merged_groups,
            });
        }

        info!("Quantification complete: {}", summary);

        Ok(Quantification {
            isoforms,
            genes: gene_reports,
            summary,
        })
    }
}

/// Map gene ids to their position in the annotation, rejecting duplicates
fn gene_positions(genes: &[Gene]) -> Result<HashMap<usize, usize>> {
    let mut positions = HashMap::with_capacity(genes.len());
    for (pos, gene) in genes.iter().enumerate() {
        if positions.insert(gene.id(), pos).is_some() {
            return Err(IsoQuantError::InvalidAnnotation(format!(
                "Gene id {} appears more than once",
                gene.id()
            )));
        }
    }
    Ok(positions)
}

/// Turn read placements into per-gene EM evidence.
///
/// A read placed in several genes contributes to each in proportion to its
/// number of placements there.
fn collect_evidence(
    alignments: &[ReadAlignment],
    positions: &HashMap<usize, usize>,
    compatibility: &[CompatibilityIndex],
) -> Vec<Vec<ReadEvidence>> {
    let mut evidence: Vec<Vec<ReadEvidence>> = vec![Vec::new(); compatibility.len()];

    for alignment in alignments.iter().filter(|a| a.is_aligned()) {
        let total = alignment.records.len() as f64;

        let mut by_gene: BTreeMap<usize, Vec<&AlignmentRecord>> = BTreeMap::new();
        for record in &alignment.records {
            by_gene.entry(positions[&record.gene]).or_default().push(record);
        }

        for (pos, records) in by_gene {
            let compat = &compatibility[pos];
            let mut multiplicity: BTreeMap<usize, u32> = BTreeMap::new();
            for record in &records {
                for group in compat.compatible_groups(&record.components()) {
                    *multiplicity.entry(group).or_insert(0) += 1;
                }
            }
            if multiplicity.is_empty() {
                continue;
            }
            evidence[pos].push(ReadEvidence {
                compatible: multiplicity.into_iter().collect(),
                count: records.len() as f64 / total,
            });
        }
    }

    evidence
}

/// Per-gene estimation details
#[derive(Debug, Clone)]
pub struct GeneReport {
    pub gene: usize,
    pub reads: f64,
    pub iterations: usize,
    pub state: EmState,
    pub merged_groups: Vec<Vec<usize>>,
}

/// Result of a quantification run
#[derive(Debug, Clone)]
pub struct Quantification {
    /// One entry per isoform, in annotation order
    pub isoforms: Vec<IsoformAbundance>,
    pub genes: Vec<GeneReport>,
    pub summary: QuantSummary,
}

impl Quantification {
    /// `(transcript sequence, abundance)` pairs in annotation order
    pub fn transcript_abundances(&self) -> Vec<(String, f64)> {
        self.isoforms
            .iter()
            .map(|iso| (iso.sequence.clone(), iso.abundance))
            .collect()
    }

    pub fn gene_isoforms(&self, gene: usize) -> impl Iterator<Item = &IsoformAbundance> {
        self.isoforms.iter().filter(move |iso| iso.gene == gene)
    }
}

/// Summary of a quantification run
#[derive(Debug, Default, Clone)]
pub struct QuantSummary {
    /// Seed length the index was built with
    pub seed_len: usize,
    pub total_reads: usize,
    pub aligned_reads: usize,
    pub unaligned_reads: usize,
    pub multi_mapped_reads: usize,
    pub multi_gene_reads: usize,
    pub junction_reads: usize,
    pub scan_fallback_reads: usize,
    pub genes_estimated: usize,
    pub genes_without_reads: usize,
    pub genes_not_converged: usize,
    pub merged_isoform_groups: usize,
}

impl QuantSummary {
    fn new() -> Self {
        Self::default()
    }

    fn record_alignments(&mut self, alignments: &[ReadAlignment]) {
        for alignment in alignments {
            self.total_reads += 1;
            if alignment.used_scan {
                self.scan_fallback_reads += 1;
            }
            if !alignment.is_aligned() {
                self.unaligned_reads += 1;
                continue;
            }
            self.aligned_reads += 1;
            if alignment.is_multi_mapped() {
                self.multi_mapped_reads += 1;
            }
            if alignment.gene_count() > 1 {
                self.multi_gene_reads += 1;
            }
            if alignment.spans_junction() {
                self.junction_reads += 1;
            }
        }
    }

    fn record_gene(&mut self, estimate: &GeneEstimate, merged_groups: usize) {
        self.genes_estimated += 1;
        if estimate.reads <= 0.0 {
            self.genes_without_reads += 1;
        }
        if estimate.state == EmState::MaxIterationsReached {
            self.genes_not_converged += 1;
        }
        self.merged_isoform_groups += merged_groups;
    }
}

impl std::fmt::Display for QuantSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reads: {} (aligned: {}, unaligned: {}, multi-mapped: {}, junction: {}, scanned: {}), ",
            self.total_reads,
            self.aligned_reads,
            self.unaligned_reads,
            self.multi_mapped_reads,
            self.junction_reads,
            self.scan_fallback_reads
        )?;
        write!(
            f,
            "Genes: {} (without reads: {}, not converged: {}), Merged groups: {}, Seed length: {}",
            self.genes_estimated,
            self.genes_without_reads,
            self.genes_not_converged,
            self.merged_isoform_groups,
            self.seed_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exon;

    fn scenario_gene() -> Gene {
        Gene::new(
            0,
            vec![Exon::new(0, 4), Exon::new(4, 8)],
            vec![vec![0, 1], vec![0]],
        )
        .unwrap()
    }

    fn reads(sequences: &[&str]) -> Vec<Read> {
        sequences
            .iter()
            .enumerate()
            .map(|(id, s)| Read::new(id, *s))
            .collect()
    }

    fn repeat(sequence: &str, n: usize) -> Vec<&str> {
        vec![sequence; n]
    }

    #[test]
    fn test_junction_reads_favor_spliced_isoform() {
        let genome = Genome::new("ACGTACGTAC");
        let genes = vec![scenario_gene()];
        let engine = QuantEngine::new(QuantConfig::default());

        let exon_reads = reads(&repeat("ACGT", 10));
        let mut mixed = repeat("ACGT", 10);
        mixed.extend(repeat("GTAC", 10));
        let mixed_reads = reads(&mixed);

        let exon_only = engine.quantify(&genes, &genome, &exon_reads).unwrap();
        let with_junctions = engine.quantify(&genes, &genome, &mixed_reads).unwrap();

        assert!(with_junctions.isoforms[0].abundance > exon_only.isoforms[0].abundance);
        assert!((with_junctions.isoforms[0].abundance - 0.5).abs() < 1e-4);
        assert_eq!(with_junctions.summary.junction_reads, 10);
        // every exon-0 read also fits exon 1 of the long isoform
        assert_eq!(with_junctions.summary.multi_mapped_reads, 10);

        let pairs = with_junctions.transcript_abundances();
        assert_eq!(pairs[0].0, "ACGTACGT");
        assert_eq!(pairs[1].0, "ACGT");
        assert!((pairs[0].1 + pairs[1].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_reads_give_zero_abundances() {
        let genome = Genome::new("ACGTACGTAC");
        let engine = QuantEngine::new(QuantConfig::default());
        let result = engine.quantify(&[scenario_gene()], &genome, &[]).unwrap();

        assert!(result.isoforms.iter().all(|iso| iso.abundance == 0.0));
        assert_eq!(result.summary.total_reads, 0);
        assert_eq!(result.summary.genes_without_reads, 1);
    }

    #[test]
    fn test_unalignable_read_is_dropped_and_counted() {
        let genome = Genome::new("ACGTACGTAC");
        let engine = QuantEngine::new(QuantConfig::default());
        let result = engine
            .quantify(&[scenario_gene()], &genome, &reads(&["GTAC", "TTTTTTTT"]))
            .unwrap();

        assert_eq!(result.summary.total_reads, 2);
        assert_eq!(result.summary.aligned_reads, 1);
        assert_eq!(result.summary.unaligned_reads, 1);
        assert!((result.isoforms[0].abundance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_isoform_gene_gets_full_abundance() {
        let genome = Genome::new("AACCGGTTAACCGGTTACGA");
        let genes = vec![
            Gene::new(0, vec![Exon::new(0, 8), Exon::new(10, 20)], vec![vec![0, 1]]).unwrap(),
        ];
        let engine = QuantEngine::new(QuantConfig::default());
        let result = engine
            .quantify(&genes, &genome, &reads(&["CCGGTTCC", "GGTTACGA", "AACCGGTT"]))
            .unwrap();

        assert_eq!(result.isoforms.len(), 1);
        assert_eq!(result.isoforms[0].abundance, 1.0);
    }

    #[test]
    fn test_read_shared_between_genes_is_split() {
        let genome = Genome::new("ACGTTGCAGGACGTTGCA");
        let genes = vec![
            Gene::new(0, vec![Exon::new(0, 8)], vec![vec![0]]).unwrap(),
            Gene::new(1, vec![Exon::new(10, 18)], vec![vec![0]]).unwrap(),
        ];
        let config = QuantConfig {
            max_mismatches: 0,
            ..QuantConfig::default()
        };
        let result = QuantEngine::new(config)
            .quantify(&genes, &genome, &reads(&["CGTTGC"]))
            .unwrap();

        assert_eq!(result.summary.multi_gene_reads, 1);
        assert!((result.genes[0].reads - 0.5).abs() < 1e-12);
        assert!((result.genes[1].reads - 0.5).abs() < 1e-12);
        assert_eq!(result.isoforms[0].abundance, 1.0);
        assert_eq!(result.isoforms[1].abundance, 1.0);
    }

    #[test]
    fn test_identical_isoforms_are_reported_as_merged() {
        let genome = Genome::new("ACGTTGCAGG");
        let genes = vec![Gene::new(0, vec![Exon::new(0, 8)], vec![vec![0], vec![0]]).unwrap()];
        let result = QuantEngine::new(QuantConfig::default())
            .quantify(&genes, &genome, &reads(&["ACGTTG", "GTTGCA"]))
            .unwrap();

        assert_eq!(result.summary.merged_isoform_groups, 1);
        assert_eq!(result.genes[0].merged_groups, vec![vec![0, 1]]);
        assert_eq!(result.isoforms[0].merged_with, vec![1]);
        assert_eq!(result.isoforms[1].merged_with, vec![0]);
        assert!((result.isoforms[0].abundance - 0.5).abs() < 1e-12);
        assert!((result.isoforms[1].abundance - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_quantification_is_deterministic() {
        let genome = Genome::new("ACGTACGTAC");
        let engine = QuantEngine::new(QuantConfig::default());
        let input = reads(&["ACGT", "GTAC", "ACGT", "CGTA", "TACG"]);

        let first = engine.quantify(&[scenario_gene()], &genome, &input).unwrap();
        let second = engine.quantify(&[scenario_gene()], &genome, &input).unwrap();
        assert_eq!(first.transcript_abundances(), second.transcript_abundances());
    }

    #[test]
    fn test_annotation_outside_genome_fails_before_alignment() {
        let genome = Genome::new("ACGT");
        let err = QuantEngine::new(QuantConfig::default())
            .quantify(&[scenario_gene()], &genome, &reads(&["ACGT"]))
            .unwrap_err();
        assert!(matches!(err, IsoQuantError::InvalidAnnotation(_)));
    }

    #[test]
    fn test_duplicate_gene_ids_are_rejected() {
        let genome = Genome::new("ACGTACGTAC");
        let genes = vec![scenario_gene(), scenario_gene()];
        let err = QuantEngine::new(QuantConfig::default())
            .quantify(&genes, &genome, &[])
            .unwrap_err();
        assert!(matches!(err, IsoQuantError::InvalidAnnotation(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let genome = Genome::new("ACGTACGTAC");
        let config = QuantConfig {
            seed_len: 0,
            ..QuantConfig::default()
        };
        let err = QuantEngine::new(config)
            .quantify(&[scenario_gene()], &genome, &[])
            .unwrap_err();
        assert!(matches!(err, IsoQuantError::InvalidConfig(_)));
    }

    #[test]
    fn test_fit_seed_len() {
        let config = QuantConfig::default();
        let long = reads(&["ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT"]);
        assert_eq!(fit_seed_len(&config, &long), 12);

        let thirty = reads(&["ACGTACGTACGTACGTACGTACGTACGTAC"]);
        assert_eq!(fit_seed_len(&config, &thirty), 10);

        assert_eq!(fit_seed_len(&config, &reads(&["ACGTACGTAC"])), MIN_SEED_LEN);
        assert_eq!(fit_seed_len(&config, &[]), 12);

        let short_seeds = QuantConfig {
            seed_len: 4,
            ..QuantConfig::default()
        };
        assert_eq!(fit_seed_len(&short_seeds, &reads(&["ACGTAC"])), 4);
    }

    #[test]
    fn test_thirty_bp_reads_use_the_index() {
        let genome = Genome::new(
            "GCTAAAGACAATTACATAACATACACGTCAGCACGAAACTTGTTGGCCCAGTGTGAATCGCTTAAGGGTTAA",
        );
        let exons = vec![Exon::new(0, 40), Exon::new(40, 72)];
        let genes = vec![Gene::new(0, exons, vec![vec![0, 1]]).unwrap()];
        let input = reads(&[
            "GCTAAAGACAATTACATAACATACACGTCA",
            "TACATAACATACACGTCAGCACGAAACTTG",
            "GCACGAAACTTGTTGGCCCAGTGTGAATCG",
            "TTGGCCCAGTGTGAATCGCTTAAGGGTTAA",
        ]);

        let result = QuantEngine::new(QuantConfig::default())
            .quantify(&genes, &genome, &input)
            .unwrap();

        assert_eq!(result.summary.seed_len, 10);
        assert_eq!(result.summary.scan_fallback_reads, 0);
        assert_eq!(result.summary.aligned_reads, 4);
        assert_eq!(result.summary.junction_reads, 2);
        assert_eq!(result.isoforms[0].abundance, 1.0);
    }
}
