pub mod domain {
    use std::collections::{BTreeSet, HashMap};

    pub const PROTO_ICMP: u8 = 1;
    pub const PROTO_TCP: u8 = 6;
    pub const PROTO_UDP: u8 = 17;

    pub const FLAG_FIN: u8 = 0x01;
    pub const FLAG_SYN: u8 = 0x02;
    pub const FLAG_RST: u8 = 0x04;
    pub const FLAG_PSH: u8 = 0x08;
    pub const FLAG_ACK: u8 = 0x10;
    pub const FLAG_URG: u8 = 0x20;
    pub const FLAG_ECE: u8 = 0x40;
    pub const FLAG_CWR: u8 = 0x80;

    /// One observed IPv4 packet, reduced to the fields the profiler works with.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PacketRecord {
        pub source_address: u32,
        pub dest_address: u32,
        pub source_port: u16,
        pub dest_port: u16,
        /// IPv4 total length.
        pub byte_length: u32,
        pub protocol: u8,
        /// Seconds since the epoch.
        pub timestamp: f64,
        /// TCP flag bits, 0 for anything that isn't TCP.
        pub tcp_flags: u8,
        pub ttl: u8,
        pub fragment: u16,
    }

    impl PacketRecord {
        pub fn is_syn_only(&self) -> bool {
            self.protocol == PROTO_TCP
                && self.tcp_flags & FLAG_SYN != 0
                && self.tcp_flags & FLAG_ACK == 0
        }

        /// TCP or UDP, the only protocols whose ports mean anything.
        pub fn has_ports(&self) -> bool {
            self.protocol == PROTO_TCP || self.protocol == PROTO_UDP
        }

        /// A UDP datagram or a TCP SYN without ACK. Replies and ICMP don't count.
        pub fn opens_connection(&self) -> bool {
            self.protocol == PROTO_UDP || self.is_syn_only()
        }
    }

    pub fn protocol_name(protocol: u8) -> &'static str {
        match protocol {
            PROTO_ICMP => "ICMP",
            PROTO_TCP => "TCP",
            PROTO_UDP => "UDP",
            _ => "OTHER",
        }
    }

    /// Traffic of one address in one direction.
    ///
    /// `connection_count` always equals `detail_records.len()` and `total_bytes`
    /// is the sum of their `byte_length`. The default value is the empty summary
    /// used for an address never seen in that direction.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct AddressSummary {
        pub total_bytes: u64,
        pub connection_count: usize,
        pub detail_records: Vec<PacketRecord>,
    }

    impl AddressSummary {
        /// Orders `records` by timestamp (stable, so ties keep their input order)
        /// and totals them.
        pub fn from_records(mut records: Vec<PacketRecord>) -> Self {
            records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            let total_bytes = records.iter().map(|r| u64::from(r.byte_length)).sum();

            AddressSummary {
                total_bytes,
                connection_count: records.len(),
                detail_records: records,
            }
        }

        pub fn is_empty(&self) -> bool {
            self.connection_count == 0
        }

        pub fn first_seen(&self) -> Option<f64> {
            self.detail_records.first().map(|r| r.timestamp)
        }

        pub fn last_seen(&self) -> Option<f64> {
            self.detail_records.last().map(|r| r.timestamp)
        }

        /// Distinct values of a port field across the detail records.
        pub fn distinct_ports<F>(&self, port: F) -> BTreeSet<u16>
        where
            F: Fn(&PacketRecord) -> u16,
        {
            self.detail_records.iter().map(port).collect()
        }

        /// Distinct values of an address field across the detail records.
        pub fn distinct_peers<F>(&self, peer: F) -> BTreeSet<u32>
        where
            F: Fn(&PacketRecord) -> u32,
        {
            self.detail_records.iter().map(peer).collect()
        }
    }

    /// Combined view of one address: what it received and what it sent.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct AddressProfile {
        pub received: AddressSummary,
        pub sent: AddressSummary,
    }

    impl AddressProfile {
        pub fn total_bytes(&self) -> u64 {
            self.received.total_bytes + self.sent.total_bytes
        }

        pub fn first_seen(&self) -> Option<f64> {
            match (self.received.first_seen(), self.sent.first_seen()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        }

        pub fn last_seen(&self) -> Option<f64> {
            match (self.received.last_seen(), self.sent.last_seen()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        }
    }

    #[derive(Debug, Default)]
    pub struct CaptureStats {
        pub total_packets: usize,
        pub total_bytes: u64,
        pub protocol_counts: HashMap<String, usize>,
        pub skipped: usize,
    }

    impl CaptureStats {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn update(&mut self, record: &PacketRecord) {
            self.total_packets += 1;
            self.total_bytes += u64::from(record.byte_length);
            *self
                .protocol_counts
                .entry(protocol_name(record.protocol).to_string())
                .or_insert(0) += 1;
        }
    }
}

pub mod dto {
    use serde::Serialize;

    #[derive(Debug, Serialize, Clone, PartialEq)]
    pub struct ProfileDTO {
        pub address: String,
        pub bytes_received: u64,
        pub received_connections: usize,
        pub bytes_sent: u64,
        pub sent_connections: usize,
        pub first_seen: Option<String>,
        pub last_seen: Option<String>,
        /// Addresses that sent to this one.
        pub distinct_sources: usize,
        /// Addresses this one sent to.
        pub distinct_destinations: usize,
        /// Local ports contacted on this address.
        pub distinct_dest_ports: usize,
    }

    #[derive(Debug, Serialize, Clone)]
    pub struct CaptureStatsDTO {
        pub total_packets: usize,
        pub total_bytes: u64,
        pub skipped: usize,
        pub protocol_counts: std::collections::BTreeMap<String, usize>,
    }
}
