//! CSV export and import of retained samples

use std::io;

use crate::types::Sample;
use crate::{AresplotError, Result};

/// First header cell.
pub const TIMESTAMP_HEADER: &str = "Timestamp (s)";

/// Column label when no name was given for channel `index`.
pub fn default_channel_name(index: usize) -> String {
    format!("通道 {}", index + 1)
}

/// Write `samples` as CSV with one column per channel.
///
/// Samples without values (unidentified segments) are skipped. Channels past
/// `channel_names` get default labels; missing and non-finite values are
/// written as empty cells.
pub fn write_csv<W: io::Write>(writer: W, samples: &[Sample], channel_names: &[String]) -> Result<()> {
    let channels = samples.iter().map(|s| s.values.len()).max().unwrap_or(0).max(channel_names.len());

    let mut csv = csv::WriterBuilder::new().terminator(csv::Terminator::CRLF).from_writer(writer);

    let mut header = Vec::with_capacity(channels + 1);
    header.push(TIMESTAMP_HEADER.to_string());
    header.extend((0..channels).map(|i| channel_names.get(i).cloned().unwrap_or_else(|| default_channel_name(i))));
    csv.write_record(&header)?;

    let mut row = Vec::with_capacity(channels + 1);
    for sample in samples.iter().filter(|s| s.has_values()) {
        row.clear();
        row.push(format!("{:.6}", sample.timestamp_ms / 1000.0));
        row.extend((0..channels).map(|i| match sample.values.get(i) {
            Some(v) if v.is_finite() => format!("{:.6}", v),
            _ => String::new(),
        }));
        csv.write_record(&row)?;
    }

    csv.flush().map_err(|e| AresplotError::stream("csv export", e))?;
    Ok(())
}

/// Read a file produced by [`write_csv`].
///
/// Returns the channel names and the samples. Empty cells read back as NaN.
pub fn read_csv<R: io::Read>(reader: R) -> Result<(Vec<String>, Vec<Sample>)> {
    let mut csv = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);

    let headers = csv.headers()?.clone();
    if headers.get(0).map(str::trim) != Some(TIMESTAMP_HEADER) {
        return Err(AresplotError::InvalidCsv { line: 1, reason: format!("expected `{}` header", TIMESTAMP_HEADER) });
    }
    let names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut samples = Vec::new();
    for record in csv.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());

        let seconds = parse_cell(record.get(0).unwrap_or(""), line)?;
        let values = (1..=names.len())
            .map(|i| parse_cell(record.get(i).unwrap_or(""), line))
            .collect::<Result<Vec<f64>>>()?;

        samples.push(Sample::new(seconds * 1000.0, values));
    }

    Ok((names, samples))
}

fn parse_cell(cell: &str, line: u64) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>()
        .map_err(|e| AresplotError::InvalidCsv { line, reason: format!("`{}`: {}", cell, e) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_rows_match_export_format() {
        let samples = vec![
            Sample::new(1500.0, vec![1.0, -2.25]),
            Sample::raw_only(1600.0, b"junk".to_vec()),
            Sample::new(2000.0, vec![f64::NAN]),
        ];
        let mut out = Vec::new();
        write_csv(&mut out, &samples, &["speed".to_string()]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Timestamp (s),speed,通道 2\r\n1.500000,1.000000,-2.250000\r\n2.000000,,\r\n"
        );
    }

    #[test]
    fn reads_back_what_was_written() {
        let samples = vec![Sample::new(10.0, vec![0.5, 1.5]), Sample::new(20.0, vec![2.5, 3.5])];
        let names = vec!["a".to_string(), "b".to_string()];
        let mut out = Vec::new();
        write_csv(&mut out, &samples, &names).unwrap();

        let (read_names, read) = read_csv(out.as_slice()).unwrap();
        assert_eq!(read_names, names);
        assert_eq!(read.len(), 2);
        assert!((read[1].timestamp_ms - 20.0).abs() < 1e-6);
        assert_eq!(read[1].values, vec![2.5, 3.5]);
    }

    #[test]
    fn tolerates_lf_and_empty_cells() {
        let input = "Timestamp (s),x,y\n0.001000,,4\n0.002000,5\n";
        let (_, samples) = read_csv(input.as_bytes()).unwrap();

        assert!(samples[0].values[0].is_nan());
        assert_eq!(samples[0].values[1], 4.0);
        assert_eq!(samples[1].values[0], 5.0);
        assert!(samples[1].values[1].is_nan());
    }

    #[test]
    fn rejects_foreign_files() {
        let err = read_csv("time,x\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AresplotError::InvalidCsv { line: 1, .. }));

        let err = read_csv("Timestamp (s),x\n1,abc\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AresplotError::InvalidCsv { line: 2, .. }));
    }

    #[test]
    fn empty_history_writes_header_only() {
        let mut out = Vec::new();
        write_csv(&mut out, &[], &[]).unwrap();
        assert_eq!(out, b"Timestamp (s)\r\n");
    }
}
