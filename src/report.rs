//! Output side of a profiling run: JSON reports, per-destination detail
//! records, and a plain text summary.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use crate::aggregate::ProfileMap;
use crate::detection::{dotted, SuspiciousActivity};
use crate::error::Result;
use crate::models::domain::{AddressProfile, CaptureStats};
use crate::models::dto::{CaptureStatsDTO, ProfileDTO};
use crate::parser;

pub const PROFILES_FILE: &str = "profiles.json";
pub const SUSPICIOUS_FILE: &str = "suspicious.json";
pub const DETAILS_DIR: &str = "dst_details";

/// RFC 3339 rendering of an epoch timestamp, `None` when out of range.
pub fn format_timestamp(timestamp: f64) -> Option<String> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

pub fn profile_dto(address: u32, profile: &AddressProfile) -> ProfileDTO {
    ProfileDTO {
        address: dotted(address),
        bytes_received: profile.received.total_bytes,
        received_connections: profile.received.connection_count,
        bytes_sent: profile.sent.total_bytes,
        sent_connections: profile.sent.connection_count,
        first_seen: profile.first_seen().and_then(format_timestamp),
        last_seen: profile.last_seen().and_then(format_timestamp),
        distinct_sources: profile.received.distinct_peers(|r| r.source_address).len(),
        distinct_destinations: profile.sent.distinct_peers(|r| r.dest_address).len(),
        distinct_dest_ports: profile.received.distinct_ports(|r| r.dest_port).len(),
    }
}

pub fn stats_dto(stats: &CaptureStats) -> CaptureStatsDTO {
    CaptureStatsDTO {
        total_packets: stats.total_packets,
        total_bytes: stats.total_bytes,
        skipped: stats.skipped,
        protocol_counts: stats.protocol_counts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
    }
}

#[derive(Debug, Serialize)]
struct ProfileReport {
    stats: CaptureStatsDTO,
    profiles: Vec<ProfileDTO>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    destinations_of_interest: BTreeMap<String, usize>,
}

/// Files produced by [`write_report`].
#[derive(Debug, Default)]
pub struct WrittenReport {
    pub profiles: PathBuf,
    pub suspicious: PathBuf,
    pub details: Vec<PathBuf>,
}

/// Writes `profiles.json`, `suspicious.json` and one detail CSV per
/// destination of interest under `out_dir`.
pub fn write_report(
    out_dir: &Path,
    stats: &CaptureStats,
    profiles: &ProfileMap,
    activities: &[SuspiciousActivity],
    interest: &[u32],
) -> Result<WrittenReport> {
    let report = ProfileReport {
        stats: stats_dto(stats),
        profiles: profiles.iter().map(|(address, p)| profile_dto(*address, p)).collect(),
        destinations_of_interest: interest
            .iter()
            .filter_map(|a| profiles.get(a).map(|p| (dotted(*a), p.received.connection_count)))
            .collect(),
    };

    let mut written = WrittenReport {
        profiles: out_dir.join(PROFILES_FILE),
        suspicious: out_dir.join(SUSPICIOUS_FILE),
        details: Vec::new(),
    };

    write_json(&written.profiles, &report)?;
    write_json(&written.suspicious, activities)?;

    if !interest.is_empty() {
        let details_dir = out_dir.join(DETAILS_DIR);
        fs::create_dir_all(&details_dir)?;

        for address in interest {
            let Some(profile) = profiles.get(address) else {
                continue;
            };
            let path = details_dir.join(format!("{}.csv", dotted(*address)));
            let rows = parser::write_records(BufWriter::new(File::create(&path)?), &profile.received.detail_records)?;
            tracing::debug!(address = %dotted(*address), rows, "wrote destination details");
            written.details.push(path);
        }
    }

    tracing::info!(
        dir = %out_dir.display(),
        profiles = profiles.len(),
        suspicious = activities.len(),
        details = written.details.len(),
        "report written"
    );
    Ok(written)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// One line per address: address, bytes received, bytes sent.
pub fn render_summary(profiles: &ProfileMap) -> String {
    let mut out = String::new();
    for (address, profile) in profiles {
        let _ = writeln!(
            out,
            "{:<15} {:>12} {:>12}",
            dotted(*address),
            profile.received.total_bytes,
            profile.sent.total_bytes
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_profiles;
    use crate::models::domain::{PacketRecord, PROTO_TCP};

    fn record(src: u32, dst: u32, dport: u16, len: u32, ts: f64) -> PacketRecord {
        PacketRecord {
            source_address: src,
            dest_address: dst,
            source_port: 33000,
            dest_port: dport,
            byte_length: len,
            protocol: PROTO_TCP,
            timestamp: ts,
            tcp_flags: 0,
            ttl: 64,
            fragment: 0,
        }
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(format_timestamp(0.0).as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(format_timestamp(1.5).as_deref(), Some("1970-01-01T00:00:01.500Z"));
    }

    #[test]
    fn dto_counts_peers_and_ports() {
        let records = vec![record(1, 2, 80, 10, 5.0), record(3, 2, 443, 20, 6.0), record(2, 1, 33000, 5, 7.0)];
        let profiles = build_profiles(&records);
        let dto = profile_dto(2, &profiles[&2]);

        assert_eq!(dto.address, "0.0.0.2");
        assert_eq!(dto.bytes_received, 30);
        assert_eq!(dto.received_connections, 2);
        assert_eq!(dto.bytes_sent, 5);
        assert_eq!(dto.distinct_sources, 2);
        assert_eq!(dto.distinct_destinations, 1);
        assert_eq!(dto.distinct_dest_ports, 2);
        assert_eq!(dto.first_seen.as_deref(), Some("1970-01-01T00:00:05Z"));
        assert_eq!(dto.last_seen.as_deref(), Some("1970-01-01T00:00:07Z"));
    }

    #[test]
    fn summary_lists_every_address() {
        let profiles = build_profiles(&[record(1, 2, 80, 10, 0.0)]);
        let summary = render_summary(&profiles);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0.0.0.1"));
        assert!(lines[0].trim_end().ends_with("10"));
    }

    #[test]
    fn report_files_are_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let records = vec![record(1, 2, 80, 10, 0.0), record(3, 2, 80, 10, 1.0)];
        let profiles = build_profiles(&records);
        let mut stats = CaptureStats::new();
        records.iter().for_each(|r| stats.update(r));

        let written = write_report(dir.path(), &stats, &profiles, &[], &[2]).unwrap();

        assert!(written.profiles.exists());
        assert_eq!(fs::read_to_string(&written.suspicious).unwrap().trim(), "[]");
        assert_eq!(written.details.len(), 1);
        assert!(written.details[0].ends_with("dst_details/0.0.0.2.csv"));

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&written.profiles).unwrap()).unwrap();
        assert_eq!(json["stats"]["total_packets"], 2);
        assert_eq!(json["profiles"].as_array().unwrap().len(), 3);
        assert_eq!(json["destinations_of_interest"]["0.0.0.2"], 2);
    }

    #[cfg(unix)]
    #[test]
    fn full_disk_fails_the_report() {
        let dir = tempfile::TempDir::new().unwrap();
        std::os::unix::fs::symlink("/dev/full", dir.path().join(PROFILES_FILE)).unwrap();
        let profiles = build_profiles(&[record(1, 2, 80, 10, 0.0)]);

        let result = write_report(dir.path(), &CaptureStats::new(), &profiles, &[], &[]);
        assert!(matches!(result, Err(crate::error::ProfileError::Io(_))));
    }
}
