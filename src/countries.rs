use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// One line of the country list: `id <TAB> lon <TAB> lat <TAB> label`.
///
/// Fields are mapped by position. The third column feeds the x axis and the
/// second column feeds z, matching the order of polygon vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
    pub label: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum CountryLineError {
    #[error("expected 4 tab-separated fields, found {0}")]
    FieldCount(usize),
    #[error("field '{0}' is not a number")]
    NotNumeric(String),
    #[error("empty id")]
    EmptyId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryList {
    pub records: Vec<PointRecord>,
    /// Non-blank lines that could not be parsed.
    pub skipped: usize,
}

pub fn parse_line(line: &str) -> Result<PointRecord, CountryLineError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() != 4 {
        return Err(CountryLineError::FieldCount(fields.len()));
    }
    let id = fields[0].trim();
    if id.is_empty() {
        return Err(CountryLineError::EmptyId);
    }
    let number = |field: &str| {
        field
            .trim()
            .parse::<f64>()
            .map_err(|_| CountryLineError::NotNumeric(field.to_string()))
    };
    Ok(PointRecord {
        id: id.to_string(),
        lon: number(fields[1])?,
        lat: number(fields[2])?,
        label: fields[3].trim().to_string(),
    })
}

pub fn parse_countries(text: &str) -> CountryList {
    let mut list = CountryList::default();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(record) => list.records.push(record),
            Err(err) => {
                warn!("Skipping country list line {}: {}", number + 1, err);
                list.skipped += 1;
            }
        }
    }
    list
}

pub fn read_countries(path: &Path) -> std::io::Result<CountryList> {
    Ok(parse_countries(&fs::read_to_string(path)?))
}
