// Whitespace-separated property table: a `%` header naming the columns, then
// one row of 13 numbers per event.

use crate::core_modules::property_vector::{COLUMN_NAMES, PropertyVector, PropertyVectorSet};
use crate::error::{EventError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

impl PropertyVectorSet {
    pub fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writeln!(writer, "% {}", COLUMN_NAMES.join(" "))?;
        for vector in &self.vectors {
            let values = vector.to_array();
            let row: Vec<String> = std::iter::once(vector.id.to_string())
                .chain(values[1..].iter().map(|v| format!("{v:.6}")))
                .collect();
            writeln!(writer, "{}", row.join(" "))?;
        }
        Ok(())
    }

    /// Reads a table written by `write_to`. Lines starting with `%` and blank
    /// lines are skipped.
    pub fn read_from(reader: impl BufRead) -> Result<Self> {
        let mut vectors = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| EventError::Parse {
                line: line_no,
                reason: e.to_string(),
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            let mut values = [0.0f64; 13];
            let mut count = 0;
            for token in trimmed.split_whitespace() {
                if count == values.len() {
                    count += 1;
                    break;
                }
                values[count] = token.parse().map_err(|_| EventError::Parse {
                    line: line_no,
                    reason: format!("'{token}' is not a number"),
                })?;
                count += 1;
            }
            if count != values.len() {
                return Err(EventError::Parse {
                    line: line_no,
                    reason: format!("expected {} columns", values.len()),
                });
            }
            vectors.push(PropertyVector::from_array(values));
        }
        Ok(Self { vectors })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| EventError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| EventError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EventError::io(path, e))?;
        Self::read_from(BufReader::new(file))
    }
}
