use crate::config::RowDefaults;
use crate::db::models::VehicleStatus;
use crate::error::{Error, Result};
use std::io::Read;

/// Column order written by the plate cameras. Files carry no header line.
pub const COLUMNS: [&str; 9] = [
    "date",
    "time",
    "plate_number",
    "country",
    "confidence",
    "angle",
    "image",
    "status",
    "vehicle_class",
];

/// date, time and plate are required; the rest falls back to [`RowDefaults`]
pub const MIN_FIELDS: usize = 3;

/// One decoded camera detection
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRow {
    /// 1-based line in the source file
    pub line: u64,
    pub date: String,
    pub time: String,
    pub plate_number: String,
    pub country: String,
    pub confidence: f64,
    pub angle: f64,
    pub image: String,
    pub status: VehicleStatus,
    pub vehicle_class: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordParser {
    delimiter: u8,
    defaults: RowDefaults,
}

impl RecordParser {
    pub fn new(delimiter: char, defaults: RowDefaults) -> Result<Self> {
        if !delimiter.is_ascii() {
            return Err(Error::Config(format!(
                "Delimiter must be a single ASCII character, got {:?}",
                delimiter
            )));
        }
        Ok(Self {
            delimiter: delimiter as u8,
            defaults,
        })
    }

    /// Lazily decode `reader`. Each call starts a fresh pass over the given stream.
    pub fn parse<R: Read>(&self, reader: R) -> Rows<R> {
        let records = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();

        Rows {
            records,
            defaults: self.defaults.clone(),
            done: false,
        }
    }
}

/// Iterator over the rows of one file. Malformed rows are yielded as
/// errors so the caller can log and skip them.
pub struct Rows<R> {
    records: csv::StringRecordsIntoIter<R>,
    defaults: RowDefaults,
    done: bool,
}

impl<R: Read> Iterator for Rows<R> {
    type Item = Result<CameraRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.records.next()? {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                Some(decode(&record, line, &self.defaults))
            }
            Err(e) => {
                if let csv::ErrorKind::Io(io) = e.kind() {
                    self.done = true;
                    return Some(Err(Error::Io(format!("Failed to read record stream: {}", io))));
                }
                Some(Err(Error::from(e)))
            }
        }
    }
}

fn decode(record: &csv::StringRecord, line: u64, defaults: &RowDefaults) -> Result<CameraRow> {
    if record.len() < MIN_FIELDS {
        return Err(Error::MalformedRow(format!(
            "line {}: expected at least {} fields ({}), found {}",
            line,
            MIN_FIELDS,
            COLUMNS[..MIN_FIELDS].join(", "),
            record.len()
        )));
    }

    let field = |i: usize| record.get(i).filter(|s| !s.is_empty());

    let plate_number = field(2)
        .ok_or_else(|| Error::MalformedRow(format!("line {}: plate number is missing", line)))?;

    Ok(CameraRow {
        line,
        date: record[0].to_string(),
        time: record[1].to_string(),
        plate_number: plate_number.to_string(),
        country: field(3).unwrap_or(defaults.country.as_str()).to_string(),
        confidence: field(4).and_then(|s| s.parse().ok()).unwrap_or(defaults.confidence),
        angle: field(5).and_then(|s| s.parse().ok()).unwrap_or(defaults.angle),
        image: field(6).unwrap_or(defaults.image.as_str()).to_string(),
        status: VehicleStatus::parse(field(7).unwrap_or_default()),
        vehicle_class: field(8).map(str::to_string),
    })
}
