use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::Result;
use crate::models::domain::{CaptureStats, PacketRecord};
use crate::parser;
use crate::sniff::{self, PacketSource};

/// Loads records from a record CSV (`.csv`, any case) or a capture file,
/// totalling them into `CaptureStats` on the way.
pub fn load_records(path: &Path, max_records: Option<usize>) -> Result<(Vec<PacketRecord>, CaptureStats)> {
    let mut stats = CaptureStats::new();
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let records = if is_csv {
        let import = parser::read_records(File::open(path)?, max_records)?;
        stats.skipped = import.skipped;
        import.records
    } else {
        let mut records = Vec::new();
        let summary = sniff::run_capture(
            PacketSource::File(path.to_path_buf()),
            max_records,
            Arc::new(AtomicBool::new(true)),
            |record| {
                records.push(record);
                Ok(())
            },
        )?;
        stats.skipped = summary.skipped;
        records
    };

    records.iter().for_each(|r| stats.update(r));
    Ok((records, stats))
}
