//! Shared presentation layer for the commands: a table for humans, JSON
//! lines or CSV for scripts, to the terminal or a file.

use csv_core::WriteResult;
use std::io::Write as _;
use std::path::PathBuf;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write the output to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the output file at {1:?}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("could not write to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize the record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let sink = Sink::open(self.output)?;
        Ok(match self.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Output::Table { table, sink }
            }
            Format::Jsonl => Output::Jsonl { sink },
            Format::Csv => Output::Csv { sink },
        })
    }
}

/// Destination plus enough context to name it in errors.
pub struct Sink {
    io: Box<dyn std::io::Write>,
    path: Option<PathBuf>,
}

impl Sink {
    fn open(path: Option<PathBuf>) -> Result<Self, Error> {
        let io: Box<dyn std::io::Write> = match &path {
            None => Box::new(std::io::stdout().lock()),
            Some(p) => {
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(p)
                    .map_err(|e| Error::Open(e, p.clone()))?;
                Box::new(file)
            }
        };
        Ok(Self { io, path })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.io.write_all(bytes).map_err(|e| self.error(e))
    }

    fn error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }
}

pub enum Output {
    /// Rows are collected and rendered in one piece at [`Output::commit`].
    Table { table: comfy_table::Table, sink: Sink },
    /// Records stream out immediately, one JSON document per line.
    Jsonl { sink: Sink },
    /// Rows stream out immediately. The first row is expected to be the
    /// header row.
    Csv { sink: Sink },
}

impl Output {
    /// Column headers. A no-op for JSONL, whose records are self-describing.
    pub fn headers(&mut self, names: Vec<&'static str>) -> Result<(), Error> {
        match self {
            Output::Table { table, .. } => {
                table.set_header(names);
                Ok(())
            }
            Output::Jsonl { .. } => Ok(()),
            Output::Csv { sink } => sink.write_all(&csv_row(&names)),
        }
    }

    /// One record. The table and CSV formatters take the cell strings; the
    /// JSONL formatter serializes the structured record instead. Both
    /// closures are lazy so neither representation is built needlessly.
    pub fn record<R: serde::Serialize>(
        &mut self,
        cells: impl FnOnce() -> Vec<String>,
        structured: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match self {
            Output::Table { table, .. } => {
                table.add_row(cells());
                Ok(())
            }
            Output::Jsonl { sink } => {
                let mut line = serde_json::to_vec(&structured()).map_err(Error::SerializeJson)?;
                line.push(b'\n');
                sink.write_all(&line)
            }
            Output::Csv { sink } => sink.write_all(&csv_row(&cells())),
        }
    }

    /// Render anything held back (the table) and flush.
    pub fn commit(self) -> Result<(), Error> {
        let mut sink = match self {
            Output::Table { table, mut sink } => {
                sink.write_all(format!("{table}\n").as_bytes())?;
                sink
            }
            Output::Jsonl { sink } | Output::Csv { sink } => sink,
        };
        sink.io.flush().map_err(|e| sink.error(e))
    }
}

/// Serialize one CSV row with quoting handled by `csv_core`.
fn csv_row<V: std::ops::Deref<Target = str>>(values: &[V]) -> Vec<u8> {
    // Worst case every byte gets escaped, plus the surrounding quotes.
    let longest = values.iter().map(|v| v.len()).max().unwrap_or(0);
    let mut scratch = vec![0; 2 * longest + 2];
    let mut row = Vec::new();
    let mut writer = csv_core::Writer::new();
    for (position, value) in values.iter().enumerate() {
        if position > 0 {
            let (result, n) = writer.delimiter(&mut scratch);
            debug_assert!(matches!(result, WriteResult::InputEmpty));
            row.extend(&scratch[..n]);
        }
        let (result, consumed, produced) = writer.field(value.as_bytes(), &mut scratch);
        debug_assert!(matches!(result, WriteResult::InputEmpty));
        debug_assert_eq!(consumed, value.len());
        row.extend(&scratch[..produced]);
    }
    let (result, n) = writer.terminator(&mut scratch);
    debug_assert!(matches!(result, WriteResult::InputEmpty));
    row.extend(&scratch[..n]);
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_rows_quote_embedded_delimiters() {
        let row = csv_row(&["plain", "with, comma", "with \"quotes\""]);
        assert_eq!(
            String::from_utf8(row).unwrap(),
            "plain,\"with, comma\",\"with \"\"quotes\"\"\"\n"
        );
    }

    #[test]
    fn empty_row_is_just_a_terminator() {
        assert_eq!(csv_row::<&str>(&[]), b"\n");
    }
}
