//! Batch loader: turns the VM list CSV into migration units.
//!
//! The CSV needs a `VMName` column (case-insensitive, `Name` accepted as an
//! alias). Input order is preserved because it drives prompt order later.

use csv::ReaderBuilder;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::models::MigrationUnit;

const NAME_COLUMNS: [&str; 2] = ["vmname", "name"];

/// Load the batch from a CSV file.
pub fn load_batch(path: impl AsRef<Path>) -> Result<Vec<MigrationUnit>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| MigrationError::Validation {
        field: "vm_list".to_string(),
        message: format!("cannot read {}: {}", path.display(), e),
    })?;
    load_batch_from_reader(file)
}

/// Load the batch from any CSV source.
pub fn load_batch_from_reader<R: Read>(reader: R) -> Result<Vec<MigrationUnit>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| MigrationError::validation("vm_list", format!("unreadable header: {e}")))?
        .clone();

    let name_idx = NAME_COLUMNS
        .iter()
        .find_map(|wanted| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(wanted))
        })
        .ok_or_else(|| MigrationError::validation("VMName", "required column is missing"))?;

    let mut seen = HashSet::new();
    let mut units = Vec::new();

    for (idx, record) in reader.records().enumerate() {
        // Header is line 1
        let line = idx + 2;
        let record = record
            .map_err(|e| MigrationError::validation("vm_list", format!("line {line}: {e}")))?;

        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let name = record.get(name_idx).unwrap_or("");
        if name.is_empty() {
            return Err(MigrationError::validation(
                "VMName",
                format!("line {line} has no VM name"),
            ));
        }
        if !seen.insert(name.to_string()) {
            return Err(MigrationError::validation(
                "VMName",
                format!("line {line}: duplicate VM name '{name}'"),
            ));
        }

        units.push(MigrationUnit::new(name));
    }

    if units.is_empty() {
        return Err(MigrationError::validation("vm_list", "batch contains no VMs"));
    }

    debug!("Loaded {} units from batch", units.len());
    Ok(units)
}
