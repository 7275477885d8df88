//! Source List Loader
//!
//! Reads the ordered list of sources a run correlates. One source per line:
//!
//! ```text
//! # name          flags
//! BEAM:ENERGY     C
//! DET:CHARGE
//! DET:PEAK        T
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. The first space
//! separates the name from its flags; the order of lines is the column order
//! of the output.

use ahash::AHashSet;
use fidsync_schema::{SchemaError, SourceConfig};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Source list errors
#[derive(Debug, Error)]
pub enum SourceListError {
    #[error("Cannot read source list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: {error}")]
    Parse { line: usize, error: SchemaError },

    #[error("Line {line}: duplicate source {name}")]
    Duplicate { line: usize, name: String },

    #[error("Source list is empty")]
    Empty,
}

/// Parse a source list from text
pub fn parse_source_list(text: &str) -> Result<Vec<SourceConfig>, SourceListError> {
    let mut sources = Vec::new();
    let mut seen = AHashSet::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let (name, flags) = line.split_once(' ').unwrap_or((line, ""));
        let config = SourceConfig::from_flags(name, flags.trim()).map_err(|error| {
            SourceListError::Parse {
                line: line_no,
                error,
            }
        })?;

        if !seen.insert(config.name.clone()) {
            return Err(SourceListError::Duplicate {
                line: line_no,
                name: config.name,
            });
        }

        debug!(line = line_no, source = %config.name, mode = %config.mode, "Parsed source");
        sources.push(config);
    }

    if sources.is_empty() {
        return Err(SourceListError::Empty);
    }
    Ok(sources)
}

/// Load a source list file
pub fn load_source_list(path: impl AsRef<Path>) -> Result<Vec<SourceConfig>, SourceListError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| SourceListError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let sources = parse_source_list(&text)?;
    info!(path = %path.display(), count = sources.len(), "Loaded source list");
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidsync_schema::SourceMode;
    use std::io::Write;

    #[test]
    fn test_parse_source_list() {
        let text = "# comment\n\nBEAM:ENERGY C\r\nDET:CHARGE\nDET:PEAK  tc\n";
        let sources = parse_source_list(text).unwrap();

        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].name, "BEAM:ENERGY");
        assert_eq!(sources[0].mode, SourceMode::Continuous);
        assert!(!sources[0].trace);
        assert_eq!(sources[1].mode, SourceMode::NonContinuous);
        assert_eq!(sources[2].name, "DET:PEAK");
        assert_eq!(sources[2].mode, SourceMode::Continuous);
        assert!(sources[2].trace);
    }

    #[test]
    fn test_duplicate_source() {
        let err = parse_source_list("A\nB\nA C\n").unwrap_err();
        assert!(matches!(err, SourceListError::Duplicate { line: 3, ref name } if name == "A"));
    }

    #[test]
    fn test_empty_source_list() {
        assert!(matches!(
            parse_source_list("# nothing\n\n"),
            Err(SourceListError::Empty)
        ));
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let err = parse_source_list("A\n C\n").unwrap_err();
        assert!(matches!(err, SourceListError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_load_source_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "X C").unwrap();
        writeln!(file, "Y").unwrap();

        let sources = load_source_list(file.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].is_continuous());

        let err = load_source_list(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(err, SourceListError::Io { .. }));
    }
}
