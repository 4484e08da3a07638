//! Custom logging setup for isoquant

use colored::*;
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Logger writing colored messages to the console and plain ones to an
/// optional log file
pub struct IsoQuantLogger {
    console_level: LevelFilter,
    file_writer: Option<Mutex<Box<dyn Write + Send>>>,
}

impl IsoQuantLogger {
    pub fn new(verbose: bool, log_file: Option<&Path>) -> Result<Self, std::io::Error> {
        let console_level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

        let file_writer = if let Some(log_path) = log_file {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(log_path)?;
            Some(Mutex::new(Box::new(file) as Box<dyn Write + Send>))
        } else {
            None
        };

        Ok(IsoQuantLogger {
            console_level,
            file_writer,
        })
    }
}

impl log::Log for IsoQuantLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // the file receives every level
        self.file_writer.is_some() || metadata.level() <= self.console_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let level = record.level();
        let target = record.target();
        let message = record.args();

        let colored_level = match level {
            Level::Error => "ERROR".red().bold(),
            Level::Warn => "WARN".yellow().bold(),
            Level::Info => "INFO".green().bold(),
            Level::Debug => "DEBUG".blue().bold(),
            Level::Trace => "TRACE".purple().bold(),
        };

        if level <= self.console_level {
            let colored_message = format!(
                "[{} {} {}] {}",
                timestamp.to_string().dimmed(),
                colored_level,
                target.cyan(),
                message
            );
            match level {
                Level::Error | Level::Warn => eprintln!("{}", colored_message),
                _ => println!("{}", colored_message),
            }
        }

        if let Some(ref file_writer) = self.file_writer {
            if let Ok(mut writer) = file_writer.lock() {
                let _ = writeln!(writer, "[{} {} {}] {}", timestamp, level, target, message);
                let _ = writer.flush();
            }
        }
    }

    fn flush(&self) {
        if let Some(ref file_writer) = self.file_writer {
            if let Ok(mut writer) = file_writer.lock() {
                let _ = writer.flush();
            }
        }
    }
}

/// Initialize the custom logger
pub fn init_logger(verbose: bool, log_file: Option<&Path>) -> Result<(), anyhow::Error> {
    let logger = IsoQuantLogger::new(verbose, log_file)
        .map_err(|e| anyhow::anyhow!("Failed to create logger: {}", e))?;

    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    log::set_max_level(LevelFilter::Debug);

    Ok(())
}

/// Log the outcome of one gene's EM run
pub fn log_gene_estimate(gene: usize, state: &str, iterations: usize, reads: f64) {
    log::debug!(
        target: "isoquant::estimate",
        "ESTIMATE: Gene={}, State={}, Iterations={}, Reads={:.2}",
        gene, state, iterations, reads
    );
}

/// Log a gene that stopped at the iteration cap
pub fn log_iteration_cap(gene: usize, iterations: usize) {
    log::warn!(
        target: "isoquant::estimate",
        "NOT_CONVERGED: Gene={}, Iterations={}, reporting the last estimate",
        gene, iterations
    );
}

/// Log isoforms that share an exon list and are reported as one group
pub fn log_merged_isoforms(gene: usize, members: &[usize]) {
    let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
    log::warn!(
        target: "isoquant::groups",
        "MERGED: Gene={}, Isoforms={}, identical exon structure, abundance split evenly",
        gene,
        members.join(",")
    );
}

/// Log read alignment accounting
pub fn log_read_accounting(total: usize, aligned: usize, unaligned: usize, multi_mapped: usize) {
    log::info!(
        target: "isoquant::reads",
        "READS: Total={}, Aligned={}, Unaligned={}, MultiMapped={}",
        total, aligned, unaligned, multi_mapped
    );
}
