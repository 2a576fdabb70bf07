//! The ITK text transform file format (`.tfm` / `.txt`).
//!
//! A file holds a magic comment line followed by one or more records,
//! each a `Transform:` type name plus `Parameters:` and
//! `FixedParameters:` number lists. This module only moves records in
//! and out of files; interpreting them is the bridge's job.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub const FILE_HEADER: &str = "#Insight Transform File V1.0";

/// One serialized transform: an ITK type name and its two parameter lists.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRecord {
    pub type_name: String,
    pub parameters: Vec<f64>,
    pub fixed_parameters: Vec<f64>,
}

impl TransformRecord {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            parameters: Vec::new(),
            fixed_parameters: Vec::new(),
        }
    }
}

pub fn read_transform_file(path: &Path) -> Result<Vec<TransformRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read transform file {}", path.display()))?;
    parse_transform_text(&text)
        .with_context(|| format!("failed to parse transform file {}", path.display()))
}

pub fn parse_transform_text(text: &str) -> Result<Vec<TransformRecord>> {
    let mut records = Vec::new();
    let mut current: Option<TransformRecord> = None;
    let mut saw_magic = false;

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if comment.contains("Insight Transform File") {
                saw_magic = true;
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("Transform:") {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(TransformRecord::new(rest.trim()));
        } else if let Some(rest) = line.strip_prefix("Parameters:") {
            let record = current
                .as_mut()
                .ok_or_else(|| parse_error(number, "Parameters before any Transform line"))?;
            record.parameters = parse_numbers(rest)
                .with_context(|| format!("line {}: invalid Parameters", number + 1))?;
        } else if let Some(rest) = line.strip_prefix("FixedParameters:") {
            let record = current
                .as_mut()
                .ok_or_else(|| parse_error(number, "FixedParameters before any Transform line"))?;
            record.fixed_parameters = parse_numbers(rest)
                .with_context(|| format!("line {}: invalid FixedParameters", number + 1))?;
        }
        // other keys (e.g. ComponentTransformFile) are ignored, as ITK does
    }
    if let Some(done) = current.take() {
        records.push(done);
    }

    if !saw_magic {
        bail!("not an ITK transform file (missing '{}' header)", FILE_HEADER);
    }
    if records.is_empty() {
        bail!("transform file contains no transforms");
    }
    Ok(records)
}

fn parse_error(line_number: usize, message: &str) -> anyhow::Error {
    anyhow::anyhow!("line {}: {}", line_number + 1, message)
}

fn parse_numbers(text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("invalid number {:?}", token))
        })
        .collect()
}

pub fn write_transform_file(path: &Path, records: &[TransformRecord]) -> Result<()> {
    let mut out = String::new();
    out.push_str(FILE_HEADER);
    out.push('\n');
    for (index, record) in records.iter().enumerate() {
        out.push_str(&format!("#Transform {}\n", index));
        out.push_str(&format!("Transform: {}\n", record.type_name));
        out.push_str(&format!("Parameters:{}\n", format_numbers(&record.parameters)));
        out.push_str(&format!(
            "FixedParameters:{}\n",
            format_numbers(&record.fixed_parameters)
        ));
    }
    fs::write(path, out)
        .with_context(|| format!("failed to write transform file {}", path.display()))
}

/// Format with Rust's shortest round-trip representation so parameters
/// survive a write/read cycle bit-exactly.
fn format_numbers(values: &[f64]) -> String {
    let mut out = String::new();
    for v in values {
        out.push(' ');
        out.push_str(&format!("{}", v));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_record() {
        let text = "#Insight Transform File V1.0\n\
                    #Transform 0\n\
                    Transform: AffineTransform_double_3_3\n\
                    Parameters: 1 0 0 0 1 0 0 0 1 5 -3 2.5\n\
                    FixedParameters: 0 0 0\n";
        let records = parse_transform_text(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].type_name, "AffineTransform_double_3_3");
        assert_eq!(records[0].parameters.len(), 12);
        assert_eq!(records[0].parameters[9], 5.0);
        assert_eq!(records[0].fixed_parameters, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_multiple_records() {
        let text = "#Insight Transform File V1.0\n\
                    Transform: CompositeTransform_double_3_3\n\
                    Transform: TranslationTransform_double_3\n\
                    Parameters: 1 2 3\n\
                    FixedParameters:\n\
                    Transform: IdentityTransform_double_3_3\n";
        let records = parse_transform_text(text).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].parameters.is_empty());
        assert_eq!(records[1].parameters, vec![1.0, 2.0, 3.0]);
        assert!(records[2].fixed_parameters.is_empty());
    }

    #[test]
    fn test_missing_magic_is_rejected() {
        let text = "Transform: AffineTransform_double_3_3\nParameters: 0\n";
        assert!(parse_transform_text(text).is_err());
    }

    #[test]
    fn test_parameters_without_transform_is_rejected() {
        let text = "#Insight Transform File V1.0\nParameters: 1 2 3\n";
        assert!(parse_transform_text(text).is_err());
    }

    #[test]
    fn test_bad_number_is_rejected() {
        let text = "#Insight Transform File V1.0\n\
                    Transform: TranslationTransform_double_3\n\
                    Parameters: 1 banana 3\n";
        assert!(parse_transform_text(text).is_err());
    }

    #[test]
    fn test_write_read_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tfm");
        let record = TransformRecord {
            type_name: "TranslationTransform_double_3".into(),
            parameters: vec![0.1, -2.0e-17, 3.333333333333333],
            fixed_parameters: vec![],
        };
        write_transform_file(&path, std::slice::from_ref(&record)).unwrap();
        let read_back = read_transform_file(&path).unwrap();
        assert_eq!(read_back, vec![record]);
    }
}
