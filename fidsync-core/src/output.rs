//! Row Output
//!
//! Sinks that receive completed event rows, and the fixed-width text format
//! used for row files.

use fidsync_ring::EventRow;
use fidsync_schema::ScalarValue;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Destination for emitted rows
pub trait RowSink: Send {
    /// Write the column header; called once before any row
    fn write_header(&mut self, names: &[&str]) -> Result<(), OutputError>;

    /// Write one completed row
    fn write_row(&mut self, row: &EventRow) -> Result<(), OutputError>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Header line: `#timestamp pulse NAME1 NAME2 ... `
pub fn format_header(names: &[&str]) -> String {
    let mut line = String::from("#timestamp pulse ");
    for name in names {
        line.push_str(name);
        line.push(' ');
    }
    line
}

/// Row line: `SECONDS.TICKS PULSE VALUE1 VALUE2 ... `
///
/// Integers are right-aligned in 9 columns, floats use 13-column scientific
/// notation with six fraction digits.
pub fn format_row(row: &EventRow) -> String {
    let mut line = String::with_capacity(24 + row.values.len() * 14);
    let _ = write!(
        line,
        "{:9}.{:09} {:5} ",
        row.timestamp.seconds,
        row.timestamp.ticks,
        row.pulse_id()
    );
    for value in &row.values {
        match value {
            ScalarValue::Int(v) => {
                let _ = write!(line, "{:9} ", v);
            }
            ScalarValue::Float(v) => {
                let _ = write!(line, "{:>13} ", format_scientific(*v, 6));
            }
        }
    }
    line
}

/// Scientific notation with a signed, at least two digit exponent (`1.500000e+02`)
pub fn format_scientific(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*e}", precision, value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => formatted.to_lowercase(),
    }
}

/// Text row writer
pub struct RowWriter<W: Write + Send> {
    writer: W,
    rows_written: u64,
}

impl<W: Write + Send> RowWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl RowWriter<BufWriter<File>> {
    /// Create (truncate) a row file
    pub fn create(path: impl AsRef<Path>) -> Result<Self, OutputError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| OutputError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!(path = %path.display(), "Opened row output");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> RowSink for RowWriter<W> {
    fn write_header(&mut self, names: &[&str]) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", format_header(names))?;
        self.writer.flush()?;
        Ok(())
    }

    fn write_row(&mut self, row: &EventRow) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", format_row(row))?;
        // rows are flushed one by one so the file can be followed live
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink, shareable across tasks
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    header: Arc<Mutex<Vec<String>>>,
    rows: Arc<Mutex<Vec<EventRow>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Vec<String> {
        self.header.lock().clone()
    }

    pub fn rows(&self) -> Vec<EventRow> {
        self.rows.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl RowSink for MemorySink {
    fn write_header(&mut self, names: &[&str]) -> Result<(), OutputError> {
        *self.header.lock() = names.iter().map(|n| n.to_string()).collect();
        Ok(())
    }

    fn write_row(&mut self, row: &EventRow) -> Result<(), OutputError> {
        self.rows.lock().push(row.clone());
        Ok(())
    }
}

/// Output errors
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Cannot open {path} for output: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidsync_schema::Timestamp;
    use smallvec::smallvec;

    fn row() -> EventRow {
        EventRow {
            timestamp: Timestamp::new(1_234_567, 0x0002_0042),
            slot: 0x42,
            values: smallvec![ScalarValue::Int(-17), ScalarValue::Float(150.0)],
        }
    }

    #[test]
    fn test_format_scientific() {
        assert_eq!(format_scientific(150.0, 6), "1.500000e+02");
        assert_eq!(format_scientific(-0.00125, 6), "-1.250000e-03");
        assert_eq!(format_scientific(0.0, 6), "0.000000e+00");
        assert_eq!(format_scientific(1e120, 2), "1.00e+120");
        assert_eq!(format_scientific(f64::NAN, 6), "nan");
    }

    #[test]
    fn test_format_header() {
        assert_eq!(format_header(&["A", "B:C"]), "#timestamp pulse A B:C ");
    }

    #[test]
    fn test_format_row() {
        let line = format_row(&row());
        assert_eq!(
            line,
            "  1234567.000131138    66       -17  1.500000e+02 "
        );
    }

    #[test]
    fn test_row_writer() {
        let mut writer = RowWriter::new(Vec::new());
        writer.write_header(&["A", "B"]).unwrap();
        writer.write_row(&row()).unwrap();
        assert_eq!(writer.rows_written(), 1);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "#timestamp pulse A B ");
        assert!(lines[1].ends_with("1.500000e+02 "));
    }

    #[test]
    fn test_memory_sink_shares_rows() {
        let sink = MemorySink::new();
        let mut writer_side = sink.clone();
        writer_side.write_header(&["X"]).unwrap();
        writer_side.write_row(&row()).unwrap();

        assert_eq!(sink.header(), vec!["X".to_string()]);
        assert_eq!(sink.len(), 1);
    }
}
