// Per-event descriptor files: one line per descriptor group, the group name
// followed by its values.

use crate::core_modules::features::{FeatureDescriptor, FeatureType};
use crate::error::{EventError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub fn write_features(path: &Path, descriptor: &FeatureDescriptor) -> Result<()> {
    let file = File::create(path).map_err(|e| EventError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let write_all = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
        for (feature, values) in &descriptor.groups {
            write!(writer, "{feature}")?;
            for v in values {
                write!(writer, " {v}")?;
            }
            writeln!(writer)?;
        }
        writer.flush()
    };
    write_all(&mut writer).map_err(|e| EventError::io(path, e))
}

pub fn read_features(path: &Path) -> Result<FeatureDescriptor> {
    let file = File::open(path).map_err(|e| EventError::io(path, e))?;
    let mut groups = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let parse_err = |reason: String| EventError::Parse { line: idx + 1, reason };
        let line = line.map_err(|e| parse_err(e.to_string()))?;
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        let feature: FeatureType = name.parse().map_err(|_| parse_err(format!("unknown group '{name}'")))?;
        let values = tokens
            .map(|t| t.parse::<f64>().map_err(|_| parse_err(format!("'{t}' is not a number"))))
            .collect::<Result<Vec<_>>>()?;
        groups.push((feature, values));
    }
    Ok(FeatureDescriptor { groups })
}
