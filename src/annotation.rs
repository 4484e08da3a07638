//! Annotation file parsing and structural validation
//!
//! The annotation format is line oriented:
//!
//! ```text
//! <gene count N>
//! # then, per gene:
//! <exon count>
//! <space separated exon starts>
//! <space separated exon ends>
//! <isoform count>
//! <space separated exon indices>   # one line per isoform
//! ```

use crate::types::{Exon, Gene, Genome, IsoQuantError, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Parse an annotation file into validated genes
pub fn parse_annotation_file<P: AsRef<Path>>(path: P) -> Result<Vec<Gene>> {
    let path = path.as_ref();
    info!("Parsing annotation file: {}", path.display());

    let file = File::open(path).map_err(|e| {
        IsoQuantError::AnnotationParse(format!(
            "Failed to open annotation file {}: {}",
            path.display(),
            e
        ))
    })?;

    let genes = parse_annotation(BufReader::new(file))?;
    info!("Parsed {} genes from annotation file", genes.len());
    Ok(genes)
}

/// Parse annotation text from any buffered reader
pub fn parse_annotation<R: BufRead>(reader: R) -> Result<Vec<Gene>> {
    let mut lines = AnnotationLines::new(reader);

    let gene_count: usize = parse_count(&lines.next_line("gene count")?, "gene count")?;
    let mut genes = Vec::with_capacity(gene_count);

    for gene_id in 0..gene_count {
        let exon_count: usize = parse_count(
            &lines.next_line(&format!("exon count of gene {}", gene_id))?,
            "exon count",
        )?;
        if exon_count == 0 {
            return Err(IsoQuantError::InvalidAnnotation(format!(
                "Gene {} declares zero exons",
                gene_id
            )));
        }

        let starts =
            parse_integers(&lines.next_line(&format!("exon starts of gene {}", gene_id))?)?;
        let ends = parse_integers(&lines.next_line(&format!("exon ends of gene {}", gene_id))?)?;

        if starts.len() != exon_count || ends.len() != exon_count {
            return Err(IsoQuantError::InvalidAnnotation(format!(
                "Gene {} declares {} exons but lists {} starts and {} ends",
                gene_id,
                exon_count,
                starts.len(),
                ends.len()
            )));
        }

        let exons: Vec<Exon> = starts
            .into_iter()
            .zip(ends)
            .map(|(start, end)| Exon::new(start, end))
            .collect();

        let isoform_count: usize = parse_count(
            &lines.next_line(&format!("isoform count of gene {}", gene_id))?,
            "isoform count",
        )?;

        let mut isoforms = Vec::with_capacity(isoform_count);
        for j in 0..isoform_count {
            let line = lines.next_line(&format!("isoform {} of gene {}", j, gene_id))?;
            isoforms.push(parse_integers(&line)?);
        }

        let gene = Gene::new(gene_id, exons, isoforms)?;
        debug!(
            "Loaded gene {}: {} exons, {} isoforms, span {:?}",
            gene_id,
            gene.exons().len(),
            gene.isoforms().len(),
            gene.span()
        );
        genes.push(gene);
    }

    if let Some((number, line)) = lines.peek_remaining()? {
        debug!(
            "Ignoring trailing content after {} genes at line {}: {}",
            gene_count, number, line
        );
    }

    Ok(genes)
}

/// Check that every exon of every gene lies inside the genome
pub fn validate_annotation(genes: &[Gene], genome: &Genome) -> Result<()> {
    info!("Validating {} genes against the genome", genes.len());

    for gene in genes {
        let (_, end) = gene.span();
        if end > genome.len() {
            return Err(IsoQuantError::InvalidAnnotation(format!(
                "Gene {} ends at {} but the genome has length {}",
                gene.id(),
                end,
                genome.len()
            )));
        }
    }

    info!("All genes passed validation");
    Ok(())
}

/// Summary counts of a parsed annotation
#[derive(Debug, Default)]
pub struct AnnotationStats {
    pub gene_count: usize,
    pub exon_count: usize,
    pub isoform_count: usize,
    pub multi_isoform_genes: usize,
}

pub fn get_annotation_stats(genes: &[Gene]) -> AnnotationStats {
    AnnotationStats {
        gene_count: genes.len(),
        exon_count: genes.iter().map(|g| g.exons().len()).sum(),
        isoform_count: genes.iter().map(|g| g.isoforms().len()).sum(),
        multi_isoform_genes: genes.iter().filter(|g| g.isoforms().len() > 1).count(),
    }
}

impl std::fmt::Display for AnnotationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Genes: {}, Exons: {}, Isoforms: {}, Multi-isoform genes: {}",
            self.gene_count, self.exon_count, self.isoform_count, self.multi_isoform_genes
        )
    }
}

/// Non-blank line iterator that remembers line numbers for error messages
struct AnnotationLines<R> {
    lines: std::io::Lines<R>,
    line_number: usize,
}

impl<R: BufRead> AnnotationLines<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    fn next_line(&mut self, expected: &str) -> Result<String> {
        match self.advance()? {
            Some((_, line)) => Ok(line),
            None => Err(IsoQuantError::AnnotationParse(format!(
                "Unexpected end of file after line {}: expected {}",
                self.line_number, expected
            ))),
        }
    }

    fn peek_remaining(&mut self) -> Result<Option<(usize, String)>> {
        self.advance()
    }

    fn advance(&mut self) -> Result<Option<(usize, String)>> {
        for line in self.lines.by_ref() {
            self.line_number += 1;
            let line = line?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some((self.line_number, trimmed.to_string())));
            }
        }
        Ok(None)
    }
}

fn parse_count(line: &str, what: &str) -> Result<usize> {
    line.parse::<usize>().map_err(|_| {
        IsoQuantError::AnnotationParse(format!("Invalid {}: {}", what, line))
    })
}

fn parse_integers(line: &str) -> Result<Vec<usize>> {
    line.split_whitespace()
        .map(|field| {
            field.parse::<usize>().map_err(|_| {
                IsoQuantError::AnnotationParse(format!(
                    "Invalid integer '{}' in line: {}",
                    field, line
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const TWO_GENES: &str = "2\n\
        2\n\
        0 4\n\
        4 8\n\
        2\n\
        0 1\n\
        0\n\
        1\n\
        10\n\
        14\n\
        1\n\
        0\n";

    #[test]
    fn test_parse_two_genes() {
        let genes = parse_annotation(Cursor::new(TWO_GENES)).unwrap();
        assert_eq!(genes.len(), 2);

        assert_eq!(genes[0].exons(), &[Exon::new(0, 4), Exon::new(4, 8)]);
        assert_eq!(genes[0].isoform(0).exons(), &[0, 1]);
        assert_eq!(genes[0].isoform(1).exons(), &[0]);

        assert_eq!(genes[1].id(), 1);
        assert_eq!(genes[1].exons(), &[Exon::new(10, 14)]);
    }

    #[test]
    fn test_parse_annotation_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", TWO_GENES).unwrap();

        let genes = parse_annotation_file(temp_file.path()).unwrap();
        let stats = get_annotation_stats(&genes);
        assert_eq!(stats.gene_count, 2);
        assert_eq!(stats.exon_count, 3);
        assert_eq!(stats.isoform_count, 3);
        assert_eq!(stats.multi_isoform_genes, 1);
    }

    #[test]
    fn test_coordinate_count_mismatch_is_structural_error() {
        let text = "1\n2\n0 4\n4\n1\n0\n";
        let err = parse_annotation(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, IsoQuantError::InvalidAnnotation(_)));
    }

    #[test]
    fn test_out_of_range_isoform_is_structural_error() {
        let text = "1\n1\n0\n4\n1\n0 3\n";
        let err = parse_annotation(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, IsoQuantError::InvalidAnnotation(_)));
    }

    #[test]
    fn test_truncated_file() {
        let text = "2\n1\n0\n4\n1\n0\n";
        let err = parse_annotation(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, IsoQuantError::AnnotationParse(_)));
        assert!(err.to_string().contains("exon count of gene 1"));
    }

    #[test]
    fn test_non_integer_field() {
        let text = "1\n1\n0\nfour\n1\n0\n";
        let err = parse_annotation(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, IsoQuantError::AnnotationParse(_)));
    }

    #[test]
    fn test_validate_against_genome() {
        let genes = parse_annotation(Cursor::new(TWO_GENES)).unwrap();
        assert!(validate_annotation(&genes, &Genome::new("A".repeat(14))).is_ok());
        assert!(validate_annotation(&genes, &Genome::new("A".repeat(13))).is_err());
    }
}
