pub mod aggregate;
pub mod config;
pub mod detection;
pub mod error;
pub mod input;
pub mod models;
pub mod parser;
pub mod report;
pub mod sniff;

pub use aggregate::{build_profiles, group_by_destination, group_by_source, merge_profiles, ProfileMap, SummaryMap};
pub use error::{ProfileError, Result};
pub use models::domain::{AddressProfile, AddressSummary, PacketRecord};
