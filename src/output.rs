use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

/// One line of `encode` output.
#[derive(Debug, Clone, Serialize)]
pub struct EncodeResult {
    pub variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hgvs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_encode(results: &[EncodeResult]) -> io::Result<()> {
        Self::print_json(&results)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_run(result: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "wrote {}", result.output_path)?;
        writeln!(
            stdout,
            "  nodes: {} ({} sequence variants)",
            result.written.nodes, result.written.variant_nodes
        )?;
        writeln!(stdout, "  edges: {}", result.written.edges)?;
        writeln!(
            stdout,
            "  skipped: {} malformed rows, {} unencodable variants, {} rows without canonical ids",
            result.harvest.malformed_rows + result.edges.malformed_rows,
            result.harvest.rejected_variants,
            result.edges.missing_remaps
        )?;
        let failed = result.node_failures.total() + result.variant_failures.total();
        if failed > 0 {
            writeln!(stdout, "  normalization failures: {failed}")?;
        }
        Ok(())
    }

    pub fn print_encode(results: &[EncodeResult]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for result in results {
            match (&result.hgvs, &result.error) {
                (Some(hgvs), _) => writeln!(stdout, "{}\t{hgvs}", result.variant)?,
                (None, Some(error)) => writeln!(stdout, "{}\terror: {error}", result.variant)?,
                (None, None) => writeln!(stdout, "{}", result.variant)?,
            }
        }
        Ok(())
    }
}
