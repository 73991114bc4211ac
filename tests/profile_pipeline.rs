use std::fs;
use std::io::Write;

use ipprofile::aggregate::{addresses_of_interest, build_profiles, group_by_destination};
use ipprofile::config::DetectionThresholds;
use ipprofile::detection::{ActivityType, TrafficAnalyzer};
use ipprofile::models::domain::CaptureStats;
use ipprofile::parser::read_records;
use ipprofile::report::write_report;

// 10.0.0.5 sweeps 60 ports on 10.0.0.9, 10.0.0.7 makes two web requests.
fn capture_csv() -> String {
    let scanner = u32::from_be_bytes([10, 0, 0, 5]);
    let target = u32::from_be_bytes([10, 0, 0, 9]);
    let mut rows = String::new();
    for i in 0..60u32 {
        rows.push_str(&format!(
            "{},6,{},{},{},41000,{},64,44,0,2\n",
            i + 1,
            1_000 + i,
            scanner,
            target,
            1_000 + i
        ));
    }
    rows.push_str("61,6,2000,10.0.0.7,10.0.0.9,52000,443,64,500,0,24\n");
    rows.push_str("62,6,2001,10.0.0.9,10.0.0.7,443,52000,64,1500,0,24\n");
    rows.push_str("63,6,broken\n");
    rows
}

#[test]
fn csv_to_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let input = dir.path().join("capture.csv");
    fs::File::create(&input).unwrap().write_all(capture_csv().as_bytes()).unwrap();

    let import = read_records(fs::File::open(&input).unwrap(), None).unwrap();
    assert_eq!(import.records.len(), 62);
    assert_eq!(import.skipped, 1);

    let mut stats = CaptureStats::new();
    import.records.iter().for_each(|r| stats.update(r));

    let received = group_by_destination(&import.records);
    let interest = addresses_of_interest(&received, 50);
    assert_eq!(interest, vec![u32::from_be_bytes([10, 0, 0, 9])]);

    let profiles = build_profiles(&import.records);
    assert_eq!(profiles.len(), 3);
    let total: usize = profiles.values().map(|p| p.received.connection_count).sum();
    assert_eq!(total, 62);

    let scanner = &profiles[&u32::from_be_bytes([10, 0, 0, 5])];
    assert_eq!(scanner.received.connection_count, 0);
    assert_eq!(scanner.sent.connection_count, 60);
    assert_eq!(scanner.sent.total_bytes, 60 * 44);

    let mut thresholds = DetectionThresholds::default();
    thresholds.rare_port_hits = 100;
    let suspicious = TrafficAnalyzer::new(thresholds).detect_suspicious_traffic(&profiles);
    assert_eq!(suspicious.len(), 1);
    assert_eq!(suspicious[0].activity_type, ActivityType::PortScanning);
    assert_eq!(suspicious[0].source, "10.0.0.5");

    let written = write_report(dir.path(), &stats, &profiles, &suspicious, &interest).unwrap();
    let details = fs::read_to_string(&written.details[0]).unwrap();
    assert_eq!(details.lines().count(), 61);

    let reloaded = read_records(details.as_bytes(), None).unwrap();
    let again = group_by_destination(&reloaded.records);
    assert_eq!(again[&u32::from_be_bytes([10, 0, 0, 9])], received[&u32::from_be_bytes([10, 0, 0, 9])]);

    let suspicious_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&written.suspicious).unwrap()).unwrap();
    assert_eq!(suspicious_json[0]["activity_type"], "Port Scanning");
}
