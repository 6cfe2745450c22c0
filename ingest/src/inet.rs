use std::net::IpAddr;

use common_geoip::{GeoIpClient, GeoIpError, Inet, NOT_AVAILABLE};
use tracing::warn;

/// Maps a client address to the network origin stamped on events.
pub trait ResolveInet: Send + Sync {
    fn resolve(&self, raw_ip: &str) -> Result<Inet, GeoIpError>;
}

impl ResolveInet for GeoIpClient {
    fn resolve(&self, raw_ip: &str) -> Result<Inet, GeoIpError> {
        GeoIpClient::resolve(self, raw_ip)
    }
}

/// Requests without a known client address still get a country code, so
/// events never carry an empty one.
pub fn client_inet(resolver: &dyn ResolveInet, ip: Option<IpAddr>) -> Result<Inet, GeoIpError> {
    match ip {
        Some(ip) => resolver.resolve(&ip.to_string()),
        None => {
            warn!("no client address on request, country unavailable");
            Ok(Inet {
                country_code: NOT_AVAILABLE.to_string(),
                ..Default::default()
            })
        }
    }
}
