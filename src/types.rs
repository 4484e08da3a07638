//! Core data structures for isoform quantification

use std::fmt;
use thiserror::Error;

/// Errors that can occur during isoform quantification
#[derive(Error, Debug)]
pub enum IsoQuantError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Annotation parsing error: {0}")]
    AnnotationParse(String),

    #[error("Genome parsing error: {0}")]
    GenomeParse(String),

    #[error("Reads parsing error: {0}")]
    ReadsParse(String),

    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Estimation error: {0}")]
    Estimation(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, IsoQuantError>;

/// Half-open genome range `[start, end)`, 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Exon {
    pub start: usize,
    pub end: usize,
}

impl Exon {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Exon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One spliced product of a gene, stored as strictly increasing indices into
/// the parent gene's exon list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Isoform {
    exons: Vec<usize>,
}

impl Isoform {
    pub fn exons(&self) -> &[usize] {
        &self.exons
    }

    /// Adjacent exon pairs joined in this isoform's transcript
    pub fn junctions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.exons.windows(2).map(|pair| (pair[0], pair[1]))
    }
}

/// A gene: its exon ranges and the isoforms built from them.
///
/// Construction validates every structural invariant, so a `Gene` that exists
/// is always internally consistent. Whether its exons fit inside a particular
/// genome is checked separately by [`crate::annotation::validate_annotation`].
#[derive(Debug, Clone)]
pub struct Gene {
    id: usize,
    exons: Vec<Exon>,
    isoforms: Vec<Isoform>,
}

impl Gene {
    pub fn new(id: usize, exons: Vec<Exon>, isoforms: Vec<Vec<usize>>) -> Result<Self> {
        if exons.is_empty() {
            return Err(IsoQuantError::InvalidAnnotation(format!(
                "Gene {} has no exons",
                id
            )));
        }

        for (i, exon) in exons.iter().enumerate() {
            if exon.start >= exon.end {
                return Err(IsoQuantError::InvalidAnnotation(format!(
                    "Gene {} exon {} has invalid coordinates {}",
                    id, i, exon
                )));
            }
            if i > 0 && exon.start < exons[i - 1].end {
                return Err(IsoQuantError::InvalidAnnotation(format!(
                    "Gene {} exon {} {} overlaps or precedes exon {} {}",
                    id,
                    i,
                    exon,
                    i - 1,
                    exons[i - 1]
                )));
            }
        }

        if isoforms.is_empty() {
            return Err(IsoQuantError::InvalidAnnotation(format!(
                "Gene {} has no isoforms",
                id
            )));
        }

        let mut validated = Vec::with_capacity(isoforms.len());
        for (j, isoform) in isoforms.into_iter().enumerate() {
            if isoform.is_empty() {
                return Err(IsoQuantError::InvalidAnnotation(format!(
                    "Gene {} isoform {} has no exons",
                    id, j
                )));
            }
            if let Some(&bad) = isoform.iter().find(|&&e| e >= exons.len()) {
                return Err(IsoQuantError::InvalidAnnotation(format!(
                    "Gene {} isoform {} references exon {} but the gene has {} exons",
                    id,
                    j,
                    bad,
                    exons.len()
                )));
            }
            if isoform.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(IsoQuantError::InvalidAnnotation(format!(
                    "Gene {} isoform {} exon indices are not strictly increasing: {:?}",
                    id, j, isoform
                )));
            }
            validated.push(Isoform { exons: isoform });
        }

        Ok(Self {
            id,
            exons,
            isoforms: validated,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn exons(&self) -> &[Exon] {
        &self.exons
    }

    pub fn isoforms(&self) -> &[Isoform] {
        &self.isoforms
    }

    pub fn exon(&self, index: usize) -> &Exon {
        &self.exons[index]
    }

    pub fn isoform(&self, index: usize) -> &Isoform {
        &self.isoforms[index]
    }

    /// Genome span covered by the gene's exons
    pub fn span(&self) -> (usize, usize) {
        // exons are sorted and non-empty by construction
        (self.exons[0].start, self.exons[self.exons.len() - 1].end)
    }

    pub fn transcript_length(&self, isoform: usize) -> usize {
        self.isoforms[isoform]
            .exons
            .iter()
            .map(|&e| self.exons[e].len())
            .sum()
    }

    /// Concatenate the genome slices of an isoform's exons, in order
    pub fn transcript_sequence(&self, isoform: usize, genome: &Genome) -> Result<Vec<u8>> {
        let mut sequence = Vec::with_capacity(self.transcript_length(isoform));
        for &e in &self.isoforms[isoform].exons {
            sequence.extend_from_slice(genome.slice(&self.exons[e])?);
        }
        Ok(sequence)
    }
}

/// The reference genome: a single immutable, upper-cased sequence
#[derive(Debug, Clone)]
pub struct Genome {
    sequence: Vec<u8>,
}

impl Genome {
    pub fn new(sequence: impl Into<Vec<u8>>) -> Self {
        let mut sequence = sequence.into();
        sequence.make_ascii_uppercase();
        Self { sequence }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.sequence
    }

    pub fn slice(&self, exon: &Exon) -> Result<&[u8]> {
        self.sequence.get(exon.start..exon.end).ok_or_else(|| {
            IsoQuantError::InvalidAnnotation(format!(
                "Exon {} lies outside the genome (length {})",
                exon,
                self.sequence.len()
            ))
        })
    }
}

/// A sequencing read. `id` is its position in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    pub id: usize,
    pub sequence: Vec<u8>,
}

impl Read {
    pub fn new(id: usize, sequence: impl Into<Vec<u8>>) -> Self {
        let mut sequence = sequence.into();
        sequence.make_ascii_uppercase();
        Self { id, sequence }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// A piece of gene structure a read can be assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Exon(usize),
    Junction { upstream: usize, downstream: usize },
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Exon(e) => write!(f, "E{}", e),
            Component::Junction {
                upstream,
                downstream,
            } => write!(f, "J{}-{}", upstream, downstream),
        }
    }
}

/// Where part of a read landed.
///
/// For an exon, `offset` is the position inside the exon where the covered
/// segment begins and `mismatches` counts substitutions within that segment.
/// For a junction, `offset` is the read position where the downstream exon
/// begins and `mismatches` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHit {
    pub component: Component,
    pub offset: usize,
    pub mismatches: u32,
}

/// One best-scoring placement of a read inside one gene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub read_id: usize,
    pub gene: usize,
    /// Genome coordinate of the first aligned base
    pub genome_start: usize,
    pub hits: Vec<ComponentHit>,
    pub mismatches: u32,
    pub reverse_complement: bool,
}

impl AlignmentRecord {
    pub fn components(&self) -> Vec<Component> {
        self.hits.iter().map(|hit| hit.component).collect()
    }

    pub fn spans_junction(&self) -> bool {
        self.hits
            .iter()
            .any(|hit| matches!(hit.component, Component::Junction { .. }))
    }

    /// Exon indices traversed by the placement, in transcript order
    pub fn exon_path(&self) -> Vec<usize> {
        self.hits
            .iter()
            .filter_map(|hit| match hit.component {
                Component::Exon(e) => Some(e),
                Component::Junction { .. } => None,
            })
            .collect()
    }
}

/// Final abundance of one isoform
#[derive(Debug, Clone, PartialEq)]
pub struct IsoformAbundance {
    pub gene: usize,
    pub isoform: usize,
    pub sequence: String,
    pub abundance: f64,
    /// Other isoforms of the same gene with an identical exon list; their
    /// shared abundance was split evenly because reads cannot tell them apart.
    pub merged_with: Vec<usize>,
}

/// Configuration parameters for quantification
#[derive(Debug, Clone)]
pub struct QuantConfig {
    pub max_mismatches: u32,
    pub seed_len: usize,
    pub both_strands: bool,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    pub raw_counts: bool,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            max_mismatches: 2,
            seed_len: 12,
            both_strands: false,
            max_iterations: 1000,
            convergence_tolerance: 1e-8,
            raw_counts: false,
        }
    }
}

impl QuantConfig {
    pub fn validate(&self) -> Result<()> {
        if self.seed_len == 0 || self.seed_len > 32 {
            return Err(IsoQuantError::InvalidConfig(format!(
                "seed length must be between 1 and 32, got {}",
                self.seed_len
            )));
        }
        if self.max_iterations == 0 {
            return Err(IsoQuantError::InvalidConfig(
                "max iterations must be positive".to_string(),
            ));
        }
        if !self.convergence_tolerance.is_finite() || self.convergence_tolerance <= 0.0 {
            return Err(IsoQuantError::InvalidConfig(format!(
                "convergence tolerance must be a positive number, got {}",
                self.convergence_tolerance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_isoform_gene() -> Gene {
        Gene::new(
            0,
            vec![Exon::new(0, 4), Exon::new(4, 8)],
            vec![vec![0, 1], vec![0]],
        )
        .unwrap()
    }

    #[test]
    fn test_gene_rejects_out_of_range_exon_index() {
        let err = Gene::new(3, vec![Exon::new(0, 4)], vec![vec![0, 1]]).unwrap_err();
        assert!(matches!(err, IsoQuantError::InvalidAnnotation(_)));
        assert!(err.to_string().contains("references exon 1"));
    }

    #[test]
    fn test_gene_rejects_overlapping_exons() {
        let result = Gene::new(0, vec![Exon::new(0, 5), Exon::new(4, 8)], vec![vec![0]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_gene_rejects_unsorted_isoform() {
        let result = Gene::new(
            0,
            vec![Exon::new(0, 4), Exon::new(4, 8)],
            vec![vec![1, 0]],
        );
        assert!(result.is_err());

        let result = Gene::new(0, vec![Exon::new(0, 4)], vec![vec![0, 0]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_adjacent_exons_are_allowed() {
        let gene = two_isoform_gene();
        assert_eq!(gene.span(), (0, 8));
        assert_eq!(gene.transcript_length(0), 8);
        assert_eq!(gene.transcript_length(1), 4);
    }

    #[test]
    fn test_transcript_sequence_is_concatenation() {
        let genome = Genome::new("ACGTACGTAC");
        let gene = Gene::new(
            0,
            vec![Exon::new(0, 2), Exon::new(5, 8)],
            vec![vec![0, 1], vec![1]],
        )
        .unwrap();

        assert_eq!(gene.transcript_sequence(0, &genome).unwrap(), b"ACCGT");
        assert_eq!(gene.transcript_sequence(1, &genome).unwrap(), b"CGT");
        // reconstruction is stable
        assert_eq!(
            gene.transcript_sequence(0, &genome).unwrap(),
            gene.transcript_sequence(0, &genome).unwrap()
        );
    }

    #[test]
    fn test_transcript_sequence_outside_genome() {
        let genome = Genome::new("ACGT");
        let gene = Gene::new(0, vec![Exon::new(2, 6)], vec![vec![0]]).unwrap();
        assert!(gene.transcript_sequence(0, &genome).is_err());
    }

    #[test]
    fn test_isoform_junctions() {
        let gene = Gene::new(
            0,
            vec![Exon::new(0, 2), Exon::new(3, 5), Exon::new(6, 9)],
            vec![vec![0, 1, 2], vec![0, 2]],
        )
        .unwrap();
        let junctions: Vec<_> = gene.isoform(0).junctions().collect();
        assert_eq!(junctions, vec![(0, 1), (1, 2)]);
        let junctions: Vec<_> = gene.isoform(1).junctions().collect();
        assert_eq!(junctions, vec![(0, 2)]);
    }

    #[test]
    fn test_genome_and_reads_are_uppercased() {
        assert_eq!(Genome::new("acgtn").as_bytes(), b"ACGTN");
        assert_eq!(Read::new(7, "acg").sequence, b"ACG");
    }

    #[test]
    fn test_config_validation() {
        assert!(QuantConfig::default().validate().is_ok());

        let config = QuantConfig {
            seed_len: 33,
            ..QuantConfig::default()
        };
        assert!(config.validate().is_err());

        let config = QuantConfig {
            convergence_tolerance: f64::NAN,
            ..QuantConfig::default()
        };
        assert!(config.validate().is_err());

        let config = QuantConfig {
            max_iterations: 0,
            ..QuantConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_display() {
        assert_eq!(Component::Exon(3).to_string(), "E3");
        assert_eq!(
            Component::Junction {
                upstream: 0,
                downstream: 2
            }
            .to_string(),
            "J0-2"
        );
    }
}
