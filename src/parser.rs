// flat record CSV, one packet per row, no header:
// rownum, protocol, time, src, dst, src_port, dst_port, ttl, length, fragment, flags

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::str::FromStr;

use csv::{ByteRecord, ReaderBuilder, Trim, WriterBuilder};

use crate::error::Result;
use crate::models::domain::PacketRecord;

pub const COLUMNS: usize = 11;

const COL_PROTOCOL: usize = 1;
const COL_TIME: usize = 2;
const COL_SOURCE_IP: usize = 3;
const COL_DEST_IP: usize = 4;
const COL_SOURCE_PORT: usize = 5;
const COL_DEST_PORT: usize = 6;
const COL_TTL: usize = 7;
const COL_LENGTH: usize = 8;
const COL_FRAGMENT: usize = 9;
const COL_FLAGS: usize = 10;

const MISSING: &str = "?";

#[derive(Debug, Default)]
pub struct CsvImport {
    pub records: Vec<PacketRecord>,
    /// Rows dropped for a wrong column count, invalid UTF-8 or an unparsable value.
    pub skipped: usize,
}

pub fn read_records<R: Read>(reader: R, max_rows: Option<usize>) -> Result<CsvImport> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut import = CsvImport::default();
    for (index, row) in rdr.byte_records().enumerate() {
        if max_rows.is_some_and(|max| index >= max) {
            break;
        }
        let row = row?;
        match parse_row(&row) {
            Some(record) => import.records.push(record),
            None => {
                import.skipped += 1;
                tracing::warn!(row = index + 1, fields = row.len(), "skipping malformed record row");
            }
        }
    }

    tracing::debug!(records = import.records.len(), skipped = import.skipped, "csv import finished");
    Ok(import)
}

fn parse_row(row: &ByteRecord) -> Option<PacketRecord> {
    if row.len() != COLUMNS {
        return None;
    }

    Some(PacketRecord {
        protocol: field(row, COL_PROTOCOL)?,
        timestamp: field(row, COL_TIME)?,
        source_address: address(text(row, COL_SOURCE_IP)?)?,
        dest_address: address(text(row, COL_DEST_IP)?)?,
        source_port: field(row, COL_SOURCE_PORT)?,
        dest_port: field(row, COL_DEST_PORT)?,
        ttl: field(row, COL_TTL)?,
        byte_length: field(row, COL_LENGTH)?,
        fragment: field(row, COL_FRAGMENT)?,
        tcp_flags: field(row, COL_FLAGS)?,
    })
}

fn text(row: &ByteRecord, index: usize) -> Option<&str> {
    std::str::from_utf8(row.get(index)?).ok()
}

fn field<T>(row: &ByteRecord, index: usize) -> Option<T>
where
    T: FromStr + Default,
{
    let raw = text(row, index)?;
    if raw.is_empty() || raw == MISSING {
        return Some(T::default());
    }
    raw.parse().ok()
}

/// Decimal form first, dotted quad second.
fn address(raw: &str) -> Option<u32> {
    if raw.is_empty() || raw == MISSING {
        return Some(0);
    }
    raw.parse::<u32>()
        .ok()
        .or_else(|| raw.parse::<Ipv4Addr>().ok().map(u32::from))
}

pub struct RecordWriter<W: Write> {
    inner: csv::Writer<W>,
    row: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        RecordWriter {
            inner: WriterBuilder::new().has_headers(false).from_writer(writer),
            row: 0,
        }
    }

    pub fn write(&mut self, record: &PacketRecord) -> Result<()> {
        self.row += 1;
        self.inner.write_record(&[
            self.row.to_string(),
            record.protocol.to_string(),
            record.timestamp.to_string(),
            record.source_address.to_string(),
            record.dest_address.to_string(),
            record.source_port.to_string(),
            record.dest_port.to_string(),
            record.ttl.to_string(),
            record.byte_length.to_string(),
            record.fragment.to_string(),
            record.tcp_flags.to_string(),
        ])?;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.row
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

pub fn write_records<W: Write>(writer: W, records: &[PacketRecord]) -> Result<usize> {
    let mut out = RecordWriter::new(writer);
    for record in records {
        out.write(record)?;
    }
    out.flush()?;
    Ok(out.rows_written())
}
