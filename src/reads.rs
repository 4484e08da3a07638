//! Reads file parsing

use crate::types::{IsoQuantError, Read, Result};
use bio::io::{fasta, fastq};
use log::info;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Layout of a reads file, detected from its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadsFormat {
    /// One read per line
    Plain,
    Fasta,
    Fastq,
}

/// Parse a reads file. Read ids are assigned in file order starting at 0.
pub fn parse_reads_file<P: AsRef<Path>>(path: P) -> Result<Vec<Read>> {
    let path = path.as_ref();
    info!("Parsing reads file: {}", path.display());

    let file = File::open(path).map_err(|e| {
        IsoQuantError::ReadsParse(format!(
            "Failed to open reads file {}: {}",
            path.display(),
            e
        ))
    })?;

    let reads = parse_reads(BufReader::new(file))?;
    info!("Loaded {} reads", reads.len());
    Ok(reads)
}

pub fn parse_reads<R: BufRead>(mut reader: R) -> Result<Vec<Read>> {
    let format = match reader.fill_buf()?.first() {
        Some(b'>') => ReadsFormat::Fasta,
        Some(b'@') => ReadsFormat::Fastq,
        _ => ReadsFormat::Plain,
    };

    let sequences: Vec<Vec<u8>> = match format {
        ReadsFormat::Plain => {
            let mut sequences = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    sequences.push(trimmed.as_bytes().to_vec());
                }
            }
            sequences
        }
        ReadsFormat::Fasta => fasta::Reader::from_bufread(reader)
            .records()
            .map(|record| {
                record.map(|r| r.seq().to_vec()).map_err(|e| {
                    IsoQuantError::ReadsParse(format!("Failed to parse FASTA record: {}", e))
                })
            })
            .collect::<Result<_>>()?,
        ReadsFormat::Fastq => fastq::Reader::from_bufread(reader)
            .records()
            .map(|record| {
                record.map(|r| r.seq().to_vec()).map_err(|e| {
                    IsoQuantError::ReadsParse(format!("Failed to parse FASTQ record: {}", e))
                })
            })
            .collect::<Result<_>>()?,
    };

    Ok(sequences
        .into_iter()
        .enumerate()
        .map(|(id, sequence)| Read::new(id, sequence))
        .collect())
}

/// Mean read length, 0.0 for an empty slice
pub fn mean_read_length(reads: &[Read]) -> f64 {
    if reads.is_empty() {
        return 0.0;
    }
    reads.iter().map(|r| r.len()).sum::<usize>() as f64 / reads.len() as f64
}
