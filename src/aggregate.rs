//! Grouping of flat packet records into per-address traffic profiles.
//!
//! Records are grouped by destination and by source independently, each
//! group ordered by time, then the two groupings are merged so every address
//! gets one profile holding both what it received and what it sent.

use std::collections::BTreeMap;

use multimap::MultiMap;

use crate::models::domain::{AddressProfile, AddressSummary, PacketRecord};

pub type SummaryMap = BTreeMap<u32, AddressSummary>;
pub type ProfileMap = BTreeMap<u32, AddressProfile>;

pub const DEFAULT_LOWER_BOUNDS: usize = 200;

pub fn group_by_destination(records: &[PacketRecord]) -> SummaryMap {
    group_by(records, |r| r.dest_address)
}

pub fn group_by_source(records: &[PacketRecord]) -> SummaryMap {
    group_by(records, |r| r.source_address)
}

fn group_by<F>(records: &[PacketRecord], key: F) -> SummaryMap
where
    F: Fn(&PacketRecord) -> u32,
{
    // MultiMap keeps per-key insertion order, which the stable time sort relies on.
    let mut groups: MultiMap<u32, PacketRecord> = MultiMap::new();
    for record in records {
        groups.insert(key(record), *record);
    }

    groups
        .into_iter()
        .map(|(address, group)| (address, AddressSummary::from_records(group)))
        .collect()
}

/// Joins the destination and source groupings into one profile per address.
/// An address missing from one side gets the zero summary for that side.
pub fn merge_profiles(dest_summaries: SummaryMap, src_summaries: SummaryMap) -> ProfileMap {
    let mut profiles: ProfileMap = dest_summaries
        .into_iter()
        .map(|(address, received)| {
            (
                address,
                AddressProfile {
                    received,
                    sent: AddressSummary::default(),
                },
            )
        })
        .collect();

    for (address, sent) in src_summaries {
        profiles.entry(address).or_default().sent = sent;
    }

    profiles
}

pub fn build_profiles(records: &[PacketRecord]) -> ProfileMap {
    let received = group_by_destination(records);
    let sent = group_by_source(records);
    merge_profiles(received, sent)
}

/// Destinations that received at least `lower_bounds` records.
pub fn addresses_of_interest(dest_summaries: &SummaryMap, lower_bounds: usize) -> Vec<u32> {
    dest_summaries
        .iter()
        .filter(|(_, summary)| summary.connection_count >= lower_bounds)
        .map(|(address, _)| *address)
        .collect()
}

/// Spread of received connection counts across destinations.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationStats {
    pub destinations: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

impl DestinationStats {
    pub fn from_summaries(dest_summaries: &SummaryMap) -> Option<Self> {
        let counts: Vec<usize> = dest_summaries.values().map(|s| s.connection_count).collect();
        let min = *counts.iter().min()?;
        let max = *counts.iter().max()?;
        let total: usize = counts.iter().sum();

        Some(DestinationStats {
            destinations: counts.len(),
            min,
            max,
            mean: total as f64 / counts.len() as f64,
        })
    }
}
