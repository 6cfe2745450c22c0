use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;

use maxminddb::{MaxMindDBError, Reader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Country code stamped on events sent from private or reserved addresses.
pub const BOGON: &str = "bogon";

/// Country code stamped when the database has no entry for an address.
pub const NOT_AVAILABLE: &str = "not available";

#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("Failed to open GeoIP database: {0}")]
    DatabaseOpenError(#[source] MaxMindDBError),
    #[error("failed to parse IP address {0:?}")]
    InvalidIp(String),
    #[error("GeoIP lookup failed: {0}")]
    LookupError(#[source] MaxMindDBError),
}

/// Network origin of an ingest request, stamped on every event in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inet {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub country_code: String,
}

pub struct GeoIpClient {
    reader: Reader<Vec<u8>>,
}

impl GeoIpClient {
    /// Creates a new GeoIpClient instance.
    /// Returns an error if the database can't be loaded.
    pub fn new(db_path: PathBuf) -> Result<Self, GeoIpError> {
        debug!("Attempting to open GeoIP database at: {:?}", db_path);

        let reader = Reader::open_readfile(&db_path).map_err(GeoIpError::DatabaseOpenError)?;
        info!("Successfully opened GeoIP database");

        Ok(GeoIpClient { reader })
    }

    /// Resolves the client address of a request to an `Inet`. Reserved
    /// ranges never reach the database.
    pub fn resolve(&self, raw_ip: &str) -> Result<Inet, GeoIpError> {
        let ip = parse_ip(raw_ip)?;

        let country_code = if is_bogon(&ip) {
            BOGON.to_string()
        } else {
            self.lookup_country(ip)?
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };

        let (ipv4, ipv6) = match ip {
            IpAddr::V4(v4) => (Some(v4), None),
            IpAddr::V6(v6) => (None, Some(v6)),
        };

        Ok(Inet {
            ipv4,
            ipv6,
            country_code,
        })
    }

    fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>, GeoIpError> {
        match self.reader.lookup::<Value>(ip) {
            Ok(record) => Ok(extract_country_code(&record)),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(GeoIpError::LookupError(e)),
        }
    }
}

fn parse_ip(raw: &str) -> Result<IpAddr, GeoIpError> {
    let trimmed = raw.trim();
    IpAddr::from_str(trimmed).map_err(|_| GeoIpError::InvalidIp(trimmed.to_string()))
}

fn get_nested_value<'a>(data: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = data;
    for &key in path {
        current = current.get(key)?;
    }
    current.as_str()
}

fn extract_country_code(record: &Value) -> Option<String> {
    get_nested_value(record, &["country", "iso_code"])
        .filter(|code| !code.is_empty())
        .map(str::to_lowercase)
}

/// Addresses that cannot be attributed to a country: private, loopback,
/// link local, documentation, multicast and otherwise reserved ranges.
pub fn is_bogon(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_bogon_v4(v4),
        IpAddr::V6(v6) => is_bogon_v6(v6),
    }
}

fn is_bogon_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_unspecified()
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // shared address space 100.64.0.0/10
        || (a == 100 && (b & 0b1100_0000) == 64)
        // benchmarking 198.18.0.0/15
        || (a == 198 && (b & 0b1111_1110) == 18)
        // reserved 240.0.0.0/4
        || a >= 240
}

fn is_bogon_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_bogon_v4(&mapped);
    }

    let first = ip.segments()[0];
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
        // documentation 2001:db8::/32
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}
