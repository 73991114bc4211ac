use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::aggregate::ProfileMap;
use crate::config::DetectionThresholds;
use crate::models::domain::{AddressProfile, AddressSummary, PROTO_UDP};

const DNS_PORT: u16 = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityType {
    #[serde(rename = "Port Scanning")]
    PortScanning,
    #[serde(rename = "Large Data Transfer")]
    LargeDataTransfer,
    #[serde(rename = "Suspicious DNS Activity")]
    SuspiciousDns,
    #[serde(rename = "Rare Port Activity")]
    RarePort,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivityType::PortScanning => "Port Scanning",
            ActivityType::LargeDataTransfer => "Large Data Transfer",
            ActivityType::SuspiciousDns => "Suspicious DNS Activity",
            ActivityType::RarePort => "Rare Port Activity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousActivity {
    pub activity_type: ActivityType,
    pub source: String,
    pub details: String,
    /// Time of the last record behind the finding.
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct TrafficAnalyzer {
    thresholds: DetectionThresholds,
}

impl TrafficAnalyzer {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn detect_suspicious_traffic(&self, profiles: &ProfileMap) -> Vec<SuspiciousActivity> {
        let mut suspicious_activities = Vec::new();

        // many distinct destination ports from one source
        self.detect_port_scanning(profiles, &mut suspicious_activities);

        self.detect_large_transfers(profiles, &mut suspicious_activities);

        // high query rate from a single source
        self.detect_dns_flood(profiles, &mut suspicious_activities);

        self.detect_rare_ports(profiles, &mut suspicious_activities);

        tracing::info!(count = suspicious_activities.len(), "detection complete");
        suspicious_activities
    }

    fn detect_port_scanning(&self, profiles: &ProfileMap, suspicious_activities: &mut Vec<SuspiciousActivity>) {
        for (address, profile) in sent_profiles(profiles) {
            let targets: BTreeSet<(u32, u16)> = profile
                .sent
                .detail_records
                .iter()
                .filter(|r| r.has_ports())
                .map(|r| (r.dest_address, r.dest_port))
                .collect();
            if targets.len() < self.thresholds.port_scan_ports {
                continue;
            }

            let syn_only = profile.sent.detail_records.iter().filter(|r| r.is_syn_only()).count();
            let hosts = profile.sent.distinct_peers(|r| r.dest_address).len();
            suspicious_activities.push(SuspiciousActivity {
                activity_type: ActivityType::PortScanning,
                source: dotted(*address),
                details: format!(
                    "{} distinct ports across {} hosts ({} SYN-only packets)",
                    targets.len(),
                    hosts,
                    syn_only
                ),
                timestamp: last_seen(&profile.sent),
            });
        }
    }

    fn detect_large_transfers(&self, profiles: &ProfileMap, suspicious_activities: &mut Vec<SuspiciousActivity>) {
        for (address, profile) in sent_profiles(profiles) {
            if profile.sent.total_bytes <= self.thresholds.large_transfer_bytes {
                continue;
            }
            suspicious_activities.push(SuspiciousActivity {
                activity_type: ActivityType::LargeDataTransfer,
                source: dotted(*address),
                details: format!("Transferred {} bytes", profile.sent.total_bytes),
                timestamp: last_seen(&profile.sent),
            });
        }
    }

    fn detect_dns_flood(&self, profiles: &ProfileMap, suspicious_activities: &mut Vec<SuspiciousActivity>) {
        for (address, profile) in sent_profiles(profiles) {
            let queries: Vec<f64> = profile
                .sent
                .detail_records
                .iter()
                .filter(|r| r.protocol == PROTO_UDP && r.dest_port == DNS_PORT)
                .map(|r| r.timestamp)
                .collect();
            if queries.len() <= self.thresholds.dns_query_count {
                continue;
            }
            suspicious_activities.push(SuspiciousActivity {
                activity_type: ActivityType::SuspiciousDns,
                source: dotted(*address),
                details: format!("High query rate: {} queries", queries.len()),
                timestamp: queries.last().copied().unwrap_or_default(),
            });
        }
    }

    fn detect_rare_ports(&self, profiles: &ProfileMap, suspicious_activities: &mut Vec<SuspiciousActivity>) {
        for (address, profile) in profiles {
            let mut hits: BTreeMap<u16, (usize, f64)> = BTreeMap::new();
            for record in profile.received.detail_records.iter().filter(|r| r.opens_connection()) {
                if self.thresholds.common_ports.contains(&record.dest_port) {
                    continue;
                }
                let entry = hits.entry(record.dest_port).or_insert((0, record.timestamp));
                entry.0 += 1;
                entry.1 = record.timestamp;
            }

            for (port, (count, timestamp)) in hits {
                if count <= self.thresholds.rare_port_hits {
                    continue;
                }
                suspicious_activities.push(SuspiciousActivity {
                    activity_type: ActivityType::RarePort,
                    source: dotted(*address),
                    details: format!("{} connections to rare port {}", count, port),
                    timestamp,
                });
            }
        }
    }
}

fn sent_profiles(profiles: &ProfileMap) -> impl Iterator<Item = (&u32, &AddressProfile)> {
    profiles.iter().filter(|(_, p)| !p.sent.is_empty())
}

fn last_seen(summary: &AddressSummary) -> f64 {
    summary.last_seen().unwrap_or_default()
}

pub fn dotted(address: u32) -> String {
    Ipv4Addr::from(address).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_profiles;
    use crate::models::domain::{PacketRecord, FLAG_ACK, FLAG_PSH, FLAG_SYN, PROTO_ICMP, PROTO_TCP};

    const SCANNER: u32 = 0x0a00_0001;
    const TARGET: u32 = 0x0a00_0002;

    fn tcp(src: u32, dst: u32, dport: u16, len: u32, ts: f64) -> PacketRecord {
        PacketRecord {
            source_address: src,
            dest_address: dst,
            source_port: 40000,
            dest_port: dport,
            byte_length: len,
            protocol: PROTO_TCP,
            timestamp: ts,
            tcp_flags: FLAG_SYN,
            ttl: 64,
            fragment: 0,
        }
    }

    fn thresholds() -> DetectionThresholds {
        DetectionThresholds {
            port_scan_ports: 10,
            large_transfer_bytes: 5_000,
            dns_query_count: 3,
            rare_port_hits: 2,
            common_ports: vec![22, 53, 80, 443],
        }
    }

    #[test]
    fn quiet_traffic_is_clean() {
        let records = vec![tcp(SCANNER, TARGET, 443, 100, 1.0), tcp(TARGET, SCANNER, 40000, 100, 2.0)];
        let mut t = thresholds();
        t.rare_port_hits = 5;
        let analyzer = TrafficAnalyzer::new(t);
        assert!(analyzer.detect_suspicious_traffic(&build_profiles(&records)).is_empty());
    }

    #[test]
    fn sweep_of_ports_is_a_scan() {
        let records: Vec<PacketRecord> = (1..=12)
            .map(|port| tcp(SCANNER, TARGET, 1000 + port, 40, f64::from(port)))
            .collect();
        let mut t = thresholds();
        t.rare_port_hits = 100;
        let found = TrafficAnalyzer::new(t).detect_suspicious_traffic(&build_profiles(&records));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].activity_type, ActivityType::PortScanning);
        assert_eq!(found[0].source, "10.0.0.1");
        assert_eq!(found[0].timestamp, 12.0);
        assert!(found[0].details.contains("12 SYN-only"));
    }

    #[test]
    fn large_sender_is_flagged() {
        let records = vec![tcp(SCANNER, TARGET, 443, 3_000, 1.0), tcp(SCANNER, TARGET, 443, 3_000, 2.0)];
        let found = TrafficAnalyzer::new(thresholds()).detect_suspicious_traffic(&build_profiles(&records));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].activity_type, ActivityType::LargeDataTransfer);
        assert_eq!(found[0].details, "Transferred 6000 bytes");
    }

    #[test]
    fn dns_burst_is_flagged() {
        let records: Vec<PacketRecord> = (0..4u32)
            .map(|i| {
                let mut r = tcp(SCANNER, TARGET, DNS_PORT, 60, f64::from(i));
                r.protocol = PROTO_UDP;
                r.tcp_flags = 0;
                r
            })
            .collect();
        let found = TrafficAnalyzer::new(thresholds()).detect_suspicious_traffic(&build_profiles(&records));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].activity_type, ActivityType::SuspiciousDns);
        assert_eq!(found[0].timestamp, 3.0);
    }

    #[test]
    fn rare_port_hits_are_reported_against_the_receiver() {
        let records: Vec<PacketRecord> = (0..3u32).map(|i| tcp(SCANNER, TARGET, 6667, 60, f64::from(i))).collect();
        let found = TrafficAnalyzer::new(thresholds()).detect_suspicious_traffic(&build_profiles(&records));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].activity_type, ActivityType::RarePort);
        assert_eq!(found[0].source, "10.0.0.2");
        assert_eq!(found[0].details, "3 connections to rare port 6667");
    }

    #[test]
    fn pings_are_not_rare_port_traffic() {
        let records: Vec<PacketRecord> = (0..6u32)
            .map(|i| {
                let mut r = tcp(SCANNER, TARGET, 0, 84, f64::from(i));
                r.protocol = PROTO_ICMP;
                r.source_port = 0;
                r.tcp_flags = 0;
                r
            })
            .collect();
        let found = TrafficAnalyzer::new(DetectionThresholds::default()).detect_suspicious_traffic(&build_profiles(&records));
        assert!(found.is_empty());
    }

    #[test]
    fn download_replies_to_ephemeral_port_are_not_rare() {
        let mut records = vec![tcp(SCANNER, TARGET, 443, 60, 0.0)];
        records.extend((1..=20u32).map(|i| {
            let mut r = tcp(TARGET, SCANNER, 40000, 1500, f64::from(i));
            r.source_port = 443;
            r.tcp_flags = FLAG_ACK | FLAG_PSH;
            r
        }));
        let found = TrafficAnalyzer::new(DetectionThresholds::default()).detect_suspicious_traffic(&build_profiles(&records));
        assert!(found.is_empty());
    }

    #[test]
    fn icmp_does_not_count_towards_a_scan() {
        let records: Vec<PacketRecord> = (0..12u32)
            .map(|i| {
                let mut r = tcp(SCANNER, TARGET + i, 0, 84, f64::from(i));
                r.protocol = PROTO_ICMP;
                r.tcp_flags = 0;
                r
            })
            .collect();
        let mut t = thresholds();
        t.port_scan_ports = 1;
        let found = TrafficAnalyzer::new(t).detect_suspicious_traffic(&build_profiles(&records));
        assert!(found.is_empty());
    }

    #[test]
    fn activity_type_serializes_with_display_name() {
        let json = serde_json::to_string(&ActivityType::PortScanning).unwrap();
        assert_eq!(json, "\"Port Scanning\"");
        assert_eq!(ActivityType::RarePort.to_string(), "Rare Port Activity");
    }
}
