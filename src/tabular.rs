//! CSV in and out. Columns are `key,value,type,tier,kms`; only the first three are required.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use tracing::warn;

use crate::error::InputError;
use crate::ssm_parameters::{ParameterRecord, ParameterType, RemoteParameter, Tier};

pub const HEADER: [&str; 5] = ["key", "value", "type", "tier", "kms"];

struct Columns {
    key: usize,
    value: usize,
    kind: usize,
    tier: Option<usize>,
    kms: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, InputError> {
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let require = |name: &str| {
            find(name).ok_or_else(|| InputError::MalformedRow {
                row: 1,
                reason: format!("header is missing the '{}' column", name),
            })
        };
        Ok(Columns { key: require("key")?, value: require("value")?, kind: require("type")?, tier: find("tier"), kms: find("kms") })
    }
}

fn field(record: &StringRecord, index: usize) -> Option<&str> {
    record.get(index).filter(|v| !v.is_empty())
}

/// Reads parameter records in source order. Rows are 1-based with the header as row 1, so
/// the first data row is row 2. Duplicate keys are passed through untouched.
pub fn parse<R: Read>(source: R) -> Result<Vec<ParameterRecord>, InputError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).flexible(true).from_reader(source);
    let columns = Columns::locate(reader.headers()?)?;

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row_number = index + 2;
        let row = row?;
        let malformed = |reason: String| InputError::MalformedRow { row: row_number, reason };

        let key = field(&row, columns.key).ok_or_else(|| malformed("missing key".to_string()))?;
        let value = field(&row, columns.value).ok_or_else(|| malformed(format!("missing value for {}", key)))?;
        let kind: ParameterType = field(&row, columns.kind)
            .ok_or_else(|| malformed(format!("missing type for {}", key)))?
            .parse()
            .map_err(malformed)?;
        if !key.starts_with('/') {
            return Err(malformed(format!("key '{}' must start with '/'", key)));
        }

        let tier = match columns.tier.and_then(|i| field(&row, i)) {
            None => Tier::Standard,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(row = row_number, key, tier = raw, "invalid tier, defaulting to Standard");
                Tier::Standard
            }),
        };
        let mut record = ParameterRecord::new(key, value, kind).with_tier(tier);
        if let Some(kms) = columns.kms.and_then(|i| field(&row, i)) {
            record = record.with_kms_key(kms);
        }
        records.push(record);
    }
    Ok(records)
}

pub fn parse_path(path: &Path) -> Result<Vec<ParameterRecord>, InputError> {
    parse(File::open(path)?)
}

/// Writes `params` with the standard header, list values back in `;` form. Returns the row count.
pub fn export<'a, W, I>(params: I, sink: W) -> Result<usize, InputError>
where
    W: Write,
    I: IntoIterator<Item = &'a RemoteParameter>,
{
    let mut writer = WriterBuilder::new().from_writer(sink);
    writer.write_record(&HEADER)?;
    let mut rows = 0;
    for param in params {
        let tier = param.tier.unwrap_or_default();
        let kms = match param.kind {
            ParameterType::SecureString => param.kms_key_id.as_deref().unwrap_or(""),
            _ => "",
        };
        let value = param.tabular_value();
        writer.write_record(&[param.key.as_str(), value.as_str(), param.kind.as_str(), tier.as_str(), kms])?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

pub fn export_path<'a, I>(params: I, path: &Path) -> Result<usize, InputError>
where
    I: IntoIterator<Item = &'a RemoteParameter>,
{
    export(params, File::create(path)?)
}
