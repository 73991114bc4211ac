// src/sniff.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use etherparse::{
    EtherType, Ethernet2HeaderSlice, IpNumber, Ipv4HeaderSlice, LinuxSllHeaderSlice, LinuxSllProtocolType,
    TcpHeaderSlice, UdpHeaderSlice,
};
use pcap::{Activated, Active, Capture, Device, Linktype};

use crate::error::{ProfileError, Result};
use crate::models::domain::{
    PacketRecord, FLAG_ACK, FLAG_CWR, FLAG_ECE, FLAG_FIN, FLAG_PSH, FLAG_RST, FLAG_SYN, FLAG_URG,
};

const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_IPV4: i32 = 228;
const DLT_RAW_BSD: i32 = 12;
const LINKTYPE_LINUX_SLL: i32 = 113;

#[derive(Debug, Clone)]
pub enum PacketSource {
    File(PathBuf),
    /// Live capture; `None` picks the default device.
    Interface(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ethernet,
    RawIp,
    /// Linux cooked capture v1, what `any` device captures produce.
    LinuxSll,
}

impl FrameKind {
    pub fn from_linktype(linktype: Linktype) -> Result<Self> {
        match linktype.0 {
            1 => Ok(FrameKind::Ethernet),
            LINKTYPE_RAW | LINKTYPE_IPV4 | DLT_RAW_BSD => Ok(FrameKind::RawIp),
            LINKTYPE_LINUX_SLL => Ok(FrameKind::LinuxSll),
            other => Err(ProfileError::UnsupportedLinktype(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: usize,
    pub records: usize,
    /// Frames that were not IPv4 ICMP/TCP/UDP or failed to parse.
    pub skipped: usize,
}

/// Spawns the capture on its own thread and hands every record to
/// `on_record` on the calling thread until the capture ends.
pub fn run_capture<F>(
    source: PacketSource,
    limit: Option<usize>,
    running: Arc<AtomicBool>,
    mut on_record: F,
) -> Result<CaptureSummary>
where
    F: FnMut(PacketRecord) -> Result<()>,
{
    let (tx, rx) = unbounded();
    let capture_thread = thread::spawn(move || start_capture(&source, tx, running, limit));

    for record in rx.iter() {
        on_record(record)?;
    }

    capture_thread.join().map_err(|_| ProfileError::CaptureThread)?
}

pub fn start_capture(
    source: &PacketSource,
    sender: Sender<PacketRecord>,
    running: Arc<AtomicBool>,
    limit: Option<usize>,
) -> Result<CaptureSummary> {
    match source {
        PacketSource::File(path) => {
            tracing::info!(file = %path.display(), "reading capture file");
            let mut cap = Capture::from_file(path)?;
            process_packets(&mut cap, sender, &running, limit)
        }
        PacketSource::Interface(name) => {
            let mut cap = create_capture(name.as_deref())?;
            configure_capture(&mut cap)?;
            process_packets(&mut cap, sender, &running, limit)
        }
    }
}

fn create_capture(interface: Option<&str>) -> Result<Capture<Active>> {
    let device = match interface {
        Some(name) => Device::from(name),
        None => Device::lookup()?.ok_or(pcap::Error::PcapError("no capture device found".into()))?,
    };
    tracing::info!(device = %device.name, "starting live capture");

    let cap = Capture::from_device(device)?
        .promisc(false)
        .snaplen(128)
        .timeout(500)
        .immediate_mode(true)
        .open()?;
    Ok(cap)
}

fn configure_capture(cap: &mut Capture<Active>) -> Result<()> {
    cap.filter("ip", true)?;
    Ok(())
}

fn process_packets<T: Activated + ?Sized>(
    cap: &mut Capture<T>,
    sender: Sender<PacketRecord>,
    running: &AtomicBool,
    limit: Option<usize>,
) -> Result<CaptureSummary> {
    let frame = FrameKind::from_linktype(cap.get_datalink())?;
    let mut summary = CaptureSummary::default();

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|max| summary.records >= max) {
            break;
        }

        let packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e.into()),
        };
        summary.frames += 1;

        let ts = &packet.header.ts;
        let timestamp = ts.tv_sec as f64 + ts.tv_usec as f64 / 1_000_000.0;

        match parse_frame(frame, packet.data, timestamp) {
            Some(record) => {
                if sender.send(record).is_err() {
                    tracing::debug!("record receiver closed, stopping capture");
                    break;
                }
                summary.records += 1;
            }
            None => summary.skipped += 1,
        }
    }

    tracing::info!(
        frames = summary.frames,
        records = summary.records,
        skipped = summary.skipped,
        "capture finished"
    );
    Ok(summary)
}

/// Reduces one frame to a record. Only IPv4 ICMP, TCP and UDP qualify.
pub fn parse_frame(frame: FrameKind, data: &[u8], timestamp: f64) -> Option<PacketRecord> {
    let ip_bytes = match frame {
        FrameKind::Ethernet => {
            let eth = Ethernet2HeaderSlice::from_slice(data).ok()?;
            if eth.ether_type() != EtherType::IPV4 {
                return None;
            }
            &data[eth.slice().len()..]
        }
        FrameKind::RawIp => data,
        FrameKind::LinuxSll => {
            let sll = LinuxSllHeaderSlice::from_slice(data).ok()?;
            if sll.protocol_type() != LinuxSllProtocolType::EtherType(EtherType::IPV4) {
                return None;
            }
            &data[sll.slice().len()..]
        }
    };

    let ip = Ipv4HeaderSlice::from_slice(ip_bytes).ok()?;
    let protocol = ip.protocol();
    if protocol != IpNumber::ICMP && protocol != IpNumber::TCP && protocol != IpNumber::UDP {
        return None;
    }

    let fragment = ip.fragments_offset().value();
    let mut record = PacketRecord {
        source_address: u32::from_be_bytes(ip.source()),
        dest_address: u32::from_be_bytes(ip.destination()),
        source_port: 0,
        dest_port: 0,
        byte_length: u32::from(ip.total_len()),
        protocol: protocol.0,
        timestamp,
        tcp_flags: 0,
        ttl: ip.ttl(),
        fragment,
    };

    // Later fragments carry no transport header.
    if fragment != 0 {
        return Some(record);
    }

    let transport = &ip_bytes[ip.slice().len()..];
    if protocol == IpNumber::TCP {
        let tcp = TcpHeaderSlice::from_slice(transport).ok()?;
        record.source_port = tcp.source_port();
        record.dest_port = tcp.destination_port();
        record.tcp_flags = tcp_flags(&tcp);
    } else if protocol == IpNumber::UDP {
        let udp = UdpHeaderSlice::from_slice(transport).ok()?;
        record.source_port = udp.source_port();
        record.dest_port = udp.destination_port();
    }

    Some(record)
}

fn tcp_flags(tcp: &TcpHeaderSlice) -> u8 {
    [
        (tcp.fin(), FLAG_FIN),
        (tcp.syn(), FLAG_SYN),
        (tcp.rst(), FLAG_RST),
        (tcp.psh(), FLAG_PSH),
        (tcp.ack(), FLAG_ACK),
        (tcp.urg(), FLAG_URG),
        (tcp.ece(), FLAG_ECE),
        (tcp.cwr(), FLAG_CWR),
    ]
    .into_iter()
    .filter(|(set, _)| *set)
    .fold(0, |flags, (_, bit)| flags | bit)
}

/// Writes a little-endian, microsecond pcap file holding `packets`
/// as `(ts_sec, ts_usec, frame)`.
#[cfg(test)]
pub(crate) fn write_capture_file(linktype: u32, packets: &[(u32, u32, Vec<u8>)]) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".pcap").tempfile().unwrap();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&0i32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&65535u32.to_le_bytes());
    bytes.extend_from_slice(&linktype.to_le_bytes());
    for (sec, usec, frame) in packets {
        bytes.extend_from_slice(&sec.to_le_bytes());
        bytes.extend_from_slice(&usec.to_le_bytes());
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(frame);
    }
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();
    file
}
