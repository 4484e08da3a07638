//! Transcript sequences and the k-mer seed index built over them
//!
//! Reads are aligned against isoform transcripts rather than the raw genome so
//! that a read crossing an exon-exon junction is a contiguous match. Each hit
//! is then projected back onto the gene's exons.

use crate::types::{Gene, Genome, Result};
use log::{debug, info};
use std::collections::HashMap;

/// One isoform's spliced sequence together with its exon layout
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub gene: usize,
    pub isoform: usize,
    pub sequence: Vec<u8>,
    exons: Vec<usize>,
    exon_starts: Vec<usize>,
    exon_coords: Vec<usize>,
}

/// A run of read bases that falls inside a single exon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExonSegment {
    pub exon: usize,
    /// Offset of the segment's first base inside the exon
    pub exon_offset: usize,
    /// Offset of the segment's first base inside the read
    pub read_offset: usize,
    pub len: usize,
}

impl TranscriptEntry {
    fn new(gene: &Gene, isoform: usize, genome: &Genome) -> Result<Self> {
        let sequence = gene.transcript_sequence(isoform, genome)?;
        let exons = gene.isoform(isoform).exons().to_vec();

        let mut exon_starts = Vec::with_capacity(exons.len());
        let mut exon_coords = Vec::with_capacity(exons.len());
        let mut offset = 0;
        for &e in &exons {
            exon_starts.push(offset);
            exon_coords.push(gene.exon(e).start);
            offset += gene.exon(e).len();
        }

        Ok(Self {
            gene: gene.id(),
            isoform,
            sequence,
            exons,
            exon_starts,
            exon_coords,
        })
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Split the transcript window `[start, start + len)` into exon segments
    pub fn segments(&self, start: usize, len: usize) -> Vec<ExonSegment> {
        let end = (start + len).min(self.sequence.len());
        let mut segments = Vec::new();
        let mut i = self.exon_starts.partition_point(|&s| s <= start) - 1;
        let mut pos = start;

        while pos < end && i < self.exons.len() {
            let exon_end = self
                .exon_starts
                .get(i + 1)
                .copied()
                .unwrap_or(self.sequence.len());
            let seg_end = exon_end.min(end);
            segments.push(ExonSegment {
                exon: self.exons[i],
                exon_offset: pos - self.exon_starts[i],
                read_offset: pos - start,
                len: seg_end - pos,
            });
            pos = seg_end;
            i += 1;
        }

        segments
    }

    /// Genome coordinate of a transcript position
    pub fn genome_coordinate(&self, position: usize) -> usize {
        let i = self.exon_starts.partition_point(|&s| s <= position) - 1;
        self.exon_coords[i] + (position - self.exon_starts[i])
    }
}

/// All isoform transcripts of an annotation
#[derive(Debug, Clone, Default)]
pub struct Transcriptome {
    entries: Vec<TranscriptEntry>,
}

impl Transcriptome {
    pub fn build(genes: &[Gene], genome: &Genome) -> Result<Self> {
        let mut entries = Vec::new();
        for gene in genes {
            for isoform in 0..gene.isoforms().len() {
                entries.push(TranscriptEntry::new(gene, isoform, genome)?);
            }
        }
        debug!("Built {} transcript sequences", entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> &TranscriptEntry {
        &self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_length(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }
}

/// Occurrence of a k-mer inside a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHit {
    pub transcript: u32,
    pub offset: u32,
}

/// Exact-match k-mer index over every transcript. K-mers containing bases
/// other than A, C, G, T are not indexed.
#[derive(Debug, Clone)]
pub struct KmerIndex {
    k: usize,
    table: HashMap<u64, Vec<SeedHit>>,
}

impl KmerIndex {
    pub fn build(transcriptome: &Transcriptome, k: usize) -> Self {
        info!(
            "Building {}-mer index over {} transcripts ({} bp)",
            k,
            transcriptome.len(),
            transcriptome.total_length()
        );

        let mut table: HashMap<u64, Vec<SeedHit>> = HashMap::new();
        let mask = kmer_mask(k);

        for (t, entry) in transcriptome.entries().iter().enumerate() {
            let mut code = 0u64;
            let mut valid = 0usize;
            for (pos, &base) in entry.sequence.iter().enumerate() {
                match encode_base(base) {
                    Some(bits) => {
                        code = ((code << 2) | bits) & mask;
                        valid += 1;
                    }
                    None => valid = 0,
                }
                if valid >= k {
                    table.entry(code).or_default().push(SeedHit {
                        transcript: t as u32,
                        offset: (pos + 1 - k) as u32,
                    });
                }
            }
        }

        info!("Index contains {} distinct {}-mers", table.len(), k);
        Self { k, table }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn distinct_kmers(&self) -> usize {
        self.table.len()
    }

    /// Transcript positions where `kmer` occurs exactly
    pub fn lookup(&self, kmer: &[u8]) -> &[SeedHit] {
        if kmer.len() != self.k {
            return &[];
        }
        encode_kmer(kmer)
            .and_then(|code| self.table.get(&code))
            .map(|hits| hits.as_slice())
            .unwrap_or(&[])
    }
}

fn kmer_mask(k: usize) -> u64 {
    if k >= 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

fn encode_base(base: u8) -> Option<u64> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Pack a k-mer (k <= 32) into two bits per base
pub fn encode_kmer(kmer: &[u8]) -> Option<u64> {
    kmer.iter()
        .try_fold(0u64, |code, &base| encode_base(base).map(|bits| (code << 2) | bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exon;

    fn spliced_gene() -> (Gene, Genome) {
        let genome = Genome::new("AAACCCGGGTTT");
        let gene = Gene::new(
            0,
            vec![Exon::new(0, 3), Exon::new(3, 6), Exon::new(9, 12)],
            vec![vec![0, 1, 2], vec![0, 2]],
        )
        .unwrap();
        (gene, genome)
    }

    #[test]
    fn test_encode_kmer() {
        assert_eq!(encode_kmer(b"A"), Some(0));
        assert_eq!(encode_kmer(b"ACGT"), Some(0b00_01_10_11));
        assert_eq!(encode_kmer(b"ACNT"), None);
    }

    #[test]
    fn test_transcriptome_sequences() {
        let (gene, genome) = spliced_gene();
        let transcriptome = Transcriptome::build(&[gene], &genome).unwrap();
        assert_eq!(transcriptome.len(), 2);
        assert_eq!(transcriptome.get(0).sequence, b"AAACCCTTT");
        assert_eq!(transcriptome.get(1).sequence, b"AAATTT");
        assert_eq!(transcriptome.total_length(), 15);
    }

    #[test]
    fn test_segments_across_junction() {
        let (gene, genome) = spliced_gene();
        let transcriptome = Transcriptome::build(&[gene], &genome).unwrap();
        let entry = transcriptome.get(1);

        let segments = entry.segments(1, 4);
        assert_eq!(
            segments,
            vec![
                ExonSegment {
                    exon: 0,
                    exon_offset: 1,
                    read_offset: 0,
                    len: 2,
                },
                ExonSegment {
                    exon: 2,
                    exon_offset: 0,
                    read_offset: 2,
                    len: 2,
                },
            ]
        );
        assert_eq!(entry.genome_coordinate(1), 1);
        assert_eq!(entry.genome_coordinate(3), 9);
    }

    #[test]
    fn test_segments_inside_one_exon() {
        let (gene, genome) = spliced_gene();
        let transcriptome = Transcriptome::build(&[gene], &genome).unwrap();
        let segments = transcriptome.get(0).segments(3, 3);
        assert_eq!(
            segments,
            vec![ExonSegment {
                exon: 1,
                exon_offset: 0,
                read_offset: 0,
                len: 3,
            }]
        );
    }

    #[test]
    fn test_index_lookup() {
        let (gene, genome) = spliced_gene();
        let transcriptome = Transcriptome::build(&[gene], &genome).unwrap();
        let index = KmerIndex::build(&transcriptome, 3);

        // the junction k-mer only exists in the exon-skipping isoform
        assert_eq!(
            index.lookup(b"AAT"),
            &[SeedHit {
                transcript: 1,
                offset: 1
            }]
        );
        assert_eq!(index.lookup(b"AAA").len(), 2);
        assert!(index.lookup(b"GGG").is_empty());
        assert!(index.lookup(b"AA").is_empty());
    }

    #[test]
    fn test_index_skips_ambiguous_bases() {
        let genome = Genome::new("ACGNACG");
        let gene = Gene::new(0, vec![Exon::new(0, 7)], vec![vec![0]]).unwrap();
        let transcriptome = Transcriptome::build(&[gene], &genome).unwrap();
        let index = KmerIndex::build(&transcriptome, 3);
        assert_eq!(index.distinct_kmers(), 1);
        assert_eq!(index.lookup(b"ACG").len(), 2);
    }
}
