//! Read alignment against the transcript index
//!
//! Candidate positions come from disjoint exact seeds: with at most `m`
//! mismatches, any `m + 1` disjoint k-mers of the read contain at least one
//! exact match, so looking up every disjoint seed never misses a placement.
//! Reads too short to hold `m + 1` seeds are compared against every
//! transcript window instead. [`crate::quantify::QuantEngine`] sizes the
//! seeds to the shortest read, so this only happens for reads below
//! [`crate::quantify::MIN_SEED_LEN`] per seed.

use crate::index::{KmerIndex, Transcriptome};
use crate::types::{AlignmentRecord, Component, ComponentHit, QuantConfig, Read};
use bio::alphabets::dna;
use std::collections::{BTreeMap, BTreeSet};

/// All best-scoring placements of one read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAlignment {
    pub read_id: usize,
    pub records: Vec<AlignmentRecord>,
    /// Candidates came from a full transcript scan instead of the seed index
    pub used_scan: bool,
}

impl ReadAlignment {
    pub fn is_aligned(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn is_multi_mapped(&self) -> bool {
        self.records.len() > 1
    }

    pub fn spans_junction(&self) -> bool {
        self.records.iter().any(|r| r.spans_junction())
    }

    /// Number of distinct genes among the placements
    pub fn gene_count(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.gene)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

type PlacementKey = (usize, usize, Vec<usize>, bool);

/// Aligns reads against a shared transcriptome and k-mer index.
///
/// Holds only shared references, so one `Aligner` can serve every worker
/// thread.
pub struct Aligner<'a> {
    transcriptome: &'a Transcriptome,
    index: &'a KmerIndex,
    max_mismatches: u32,
    both_strands: bool,
}

impl<'a> Aligner<'a> {
    pub fn new(
        transcriptome: &'a Transcriptome,
        index: &'a KmerIndex,
        config: &QuantConfig,
    ) -> Self {
        Self {
            transcriptome,
            index,
            max_mismatches: config.max_mismatches,
            both_strands: config.both_strands,
        }
    }

    /// Find every placement of `read` with the minimal mismatch count.
    ///
    /// The same genome placement reached through several isoforms is reported
    /// once. Ties between different placements are all kept.
    pub fn align(&self, read: &Read) -> ReadAlignment {
        let mut placements: BTreeMap<PlacementKey, AlignmentRecord> = BTreeMap::new();
        let mut used_scan = false;

        if !read.is_empty() {
            used_scan |= self.align_strand(read.id, &read.sequence, false, &mut placements);
            if self.both_strands {
                let reverse = dna::revcomp(&read.sequence);
                // a reverse-palindromic read would land on the same loci twice
                if reverse != read.sequence {
                    used_scan |= self.align_strand(read.id, &reverse, true, &mut placements);
                }
            }
        }

        let best = placements.values().map(|r| r.mismatches).min();
        let records = match best {
            Some(best) => placements
                .into_values()
                .filter(|r| r.mismatches == best)
                .collect(),
            None => Vec::new(),
        };

        ReadAlignment {
            read_id: read.id,
            records,
            used_scan,
        }
    }

    fn align_strand(
        &self,
        read_id: usize,
        sequence: &[u8],
        reverse: bool,
        placements: &mut BTreeMap<PlacementKey, AlignmentRecord>,
    ) -> bool {
        let len = sequence.len();

        match self.seed_candidates(sequence) {
            Some(candidates) => {
                for (t, start) in candidates {
                    self.verify(read_id, t, start, sequence, reverse, placements);
                }
                false
            }
            None => {
                for (t, entry) in self.transcriptome.entries().iter().enumerate() {
                    if entry.len() < len {
                        continue;
                    }
                    for start in 0..=entry.len() - len {
                        self.verify(read_id, t, start, sequence, reverse, placements);
                    }
                }
                true
            }
        }
    }

    /// Compare the read against one transcript window and keep it if it is
    /// within the mismatch budget
    fn verify(
        &self,
        read_id: usize,
        transcript: usize,
        start: usize,
        sequence: &[u8],
        reverse: bool,
        placements: &mut BTreeMap<PlacementKey, AlignmentRecord>,
    ) {
        let entry = self.transcriptome.get(transcript);
        let window = &entry.sequence[start..start + sequence.len()];
        let Some(mismatches) = count_mismatches(sequence, window, self.max_mismatches) else {
            return;
        };

        let record = self.build_record(read_id, transcript, start, sequence, mismatches, reverse);
        let key = (record.gene, record.genome_start, record.exon_path(), reverse);
        placements.entry(key).or_insert(record);
    }

    /// Candidate `(transcript, start)` windows from disjoint exact seeds, or
    /// `None` when the read holds too few seeds for the mismatch budget
    fn seed_candidates(&self, sequence: &[u8]) -> Option<BTreeSet<(usize, usize)>> {
        let k = self.index.k();
        let len = sequence.len();
        let seed_count = len / k;
        if seed_count <= self.max_mismatches as usize {
            return None;
        }

        let mut candidates = BTreeSet::new();
        for s in 0..seed_count {
            let read_pos = s * k;
            for hit in self.index.lookup(&sequence[read_pos..read_pos + k]) {
                let offset = hit.offset as usize;
                if offset < read_pos {
                    continue;
                }
                let start = offset - read_pos;
                let t = hit.transcript as usize;
                if start + len <= self.transcriptome.get(t).len() {
                    candidates.insert((t, start));
                }
            }
        }
        Some(candidates)
    }

    fn build_record(
        &self,
        read_id: usize,
        transcript: usize,
        start: usize,
        sequence: &[u8],
        mismatches: u32,
        reverse: bool,
    ) -> AlignmentRecord {
        let entry = self.transcriptome.get(transcript);
        let segments = entry.segments(start, sequence.len());

        let mut hits = Vec::with_capacity(segments.len() * 2);
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                hits.push(ComponentHit {
                    component: Component::Junction {
                        upstream: segments[i - 1].exon,
                        downstream: segment.exon,
                    },
                    offset: segment.read_offset,
                    mismatches: 0,
                });
            }
            let read_part = &sequence[segment.read_offset..segment.read_offset + segment.len];
            let transcript_start = start + segment.read_offset;
            let transcript_part = &entry.sequence[transcript_start..transcript_start + segment.len];
            hits.push(ComponentHit {
                component: Component::Exon(segment.exon),
                offset: segment.exon_offset,
                mismatches: count_mismatches(read_part, transcript_part, u32::MAX).unwrap_or(0),
            });
        }

        AlignmentRecord {
            read_id,
            gene: entry.gene,
            genome_start: entry.genome_coordinate(start),
            hits,
            mismatches,
            reverse_complement: reverse,
        }
    }
}

/// Hamming distance between equal-length slices, or `None` once it exceeds
/// `max`. An `N` in either sequence counts as a mismatch.
pub fn count_mismatches(read: &[u8], target: &[u8], max: u32) -> Option<u32> {
    if read.len() != target.len() {
        return None;
    }
    let mut mismatches = 0u32;
    for (&a, &b) in read.iter().zip(target) {
        if a != b || a == b'N' {
            mismatches += 1;
            if mismatches > max {
                return None;
            }
        }
    }
    Some(mismatches)
}
