//! Abundance report writing and archiving

use crate::types::{IsoQuantError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Marker written on the second header line of every report
pub const RNA_MARKER: &str = "RNA";

/// Write a report: `>{header}`, `>RNA`, then one `<sequence> <abundance>`
/// line per isoform.
///
/// Abundances always carry a decimal point (`1.0`, `0.0`).
pub fn write_report<W: Write>(
    writer: &mut W,
    header: &str,
    abundances: &[(String, f64)],
) -> Result<()> {
    writeln!(writer, ">{}", header)?;
    writeln!(writer, ">{}", RNA_MARKER)?;
    for (sequence, abundance) in abundances {
        writeln!(writer, "{} {:?}", sequence, abundance)?;
    }
    Ok(())
}

/// File-backed report writer
pub struct ReportWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl ReportWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Creating report file: {}", path.display());

        let file = File::create(path).map_err(IsoQuantError::Io)?;
        Ok(ReportWriter {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn write_abundances(&mut self, header: &str, abundances: &[(String, f64)]) -> Result<()> {
        info!("Writing {} isoform abundances", abundances.len());
        write_report(&mut self.writer, header, abundances)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Container used to archive a finished report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    /// `<report>.zip` holding a single entry named after the report
    #[default]
    Zip,
    /// `<report>.gz`
    Gzip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Gzip => "gz",
        }
    }
}

/// Archive a finished report next to it and return the archive path
pub fn archive_report<P: AsRef<Path>>(path: P, format: ArchiveFormat) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut archive_name = path.as_os_str().to_os_string();
    archive_name.push(".");
    archive_name.push(format.extension());
    let archive_path = PathBuf::from(archive_name);

    debug!("Archiving {} to {}", path.display(), archive_path.display());

    let mut input = BufReader::new(File::open(path)?);
    let output = BufWriter::new(File::create(&archive_path)?);

    match format {
        ArchiveFormat::Zip => {
            let entry_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    IsoQuantError::Archive(format!(
                        "Report path {} has no file name",
                        path.display()
                    ))
                })?;

            let mut zip = ZipWriter::new(output);
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file(entry_name, options)?;
            std::io::copy(&mut input, &mut zip)?;
            zip.finish()?.flush()?;
        }
        ArchiveFormat::Gzip => {
            let mut encoder = GzEncoder::new(output, Compression::default());
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
    }

    info!("Report archived to {}", archive_path.display());
    Ok(archive_path)
}
