//! Genome file parsing and sequence statistics

use crate::types::{Genome, IsoQuantError, Result};
use bio::io::fasta;
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Parse a genome file.
///
/// Accepts either a single line holding the whole sequence or a FASTA file,
/// in which case the first record is used.
pub fn parse_genome_file<P: AsRef<Path>>(path: P) -> Result<Genome> {
    let path = path.as_ref();
    info!("Parsing genome file: {}", path.display());

    let file = File::open(path).map_err(|e| {
        IsoQuantError::GenomeParse(format!(
            "Failed to open genome file {}: {}",
            path.display(),
            e
        ))
    })?;

    let genome = parse_genome(BufReader::new(file))?;
    info!("Loaded genome of {} bp", genome.len());
    Ok(genome)
}

pub fn parse_genome<R: BufRead>(mut reader: R) -> Result<Genome> {
    let is_fasta = reader.fill_buf()?.first() == Some(&b'>');

    let sequence = if is_fasta {
        let mut records = fasta::Reader::from_bufread(reader).records();
        let record = records
            .next()
            .ok_or_else(|| {
                IsoQuantError::GenomeParse("No sequences found in FASTA file".to_string())
            })?
            .map_err(|e| {
                IsoQuantError::GenomeParse(format!("Failed to parse FASTA record: {}", e))
            })?;
        debug!("Using FASTA record {} as the genome", record.id());
        if records.next().is_some() {
            debug!("Ignoring additional FASTA records after {}", record.id());
        }
        record.seq().to_vec()
    } else {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        line.trim().as_bytes().to_vec()
    };

    if sequence.is_empty() {
        return Err(IsoQuantError::GenomeParse("Genome sequence is empty".to_string()));
    }

    validate_dna_sequence(&sequence)?;
    Ok(Genome::new(sequence))
}

/// Validate that a sequence contains only valid DNA bases
pub fn validate_dna_sequence(sequence: &[u8]) -> Result<()> {
    for (i, &base) in sequence.iter().enumerate() {
        match base.to_ascii_uppercase() {
            b'A' | b'T' | b'G' | b'C' | b'N' => continue,
            _ => {
                return Err(IsoQuantError::GenomeParse(format!(
                    "Invalid DNA base '{}' at position {}",
                    base as char,
                    i + 1
                )));
            }
        }
    }
    Ok(())
}

pub fn get_genome_stats(genome: &Genome) -> GenomeStats {
    let mut gc_count = 0;
    let mut n_count = 0;

    for &base in genome.as_bytes() {
        match base {
            b'G' | b'C' => gc_count += 1,
            b'N' => n_count += 1,
            _ => {}
        }
    }

    let length = genome.len();
    let percent = |count: usize| {
        if length > 0 {
            (count as f64 / length as f64) * 100.0
        } else {
            0.0
        }
    };

    GenomeStats {
        length,
        gc_content: percent(gc_count),
        n_content: percent(n_count),
    }
}

/// Statistics about the genome sequence
#[derive(Debug)]
pub struct GenomeStats {
    pub length: usize,
    pub gc_content: f64,
    pub n_content: f64,
}

impl std::fmt::Display for GenomeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Length: {} bp, GC content: {:.2}%, N content: {:.2}%",
            self.length, self.gc_content, self.n_content
        )
    }
}
