//! GeoIP resolution
//!
//! Enriches attacker IPs with country/city/ASN data from MaxMind databases.
//! Both databases are optional: a missing file degrades to lookup misses,
//! never to a startup failure. Private and loopback sources resolve to a
//! fixed "PRIVATE" sentinel without consulting any database.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use maxminddb::{geoip2, Reader};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::GeoInfo;

/// Errors that can occur during GeoIP operations
#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("Failed to open GeoIP database: {0}")]
    DatabaseOpen(#[from] maxminddb::MaxMindDBError),

    #[error("Database file not found: {0}")]
    NotFound(String),
}

/// GeoIP resolver backed by optional City and ASN databases
#[derive(Debug, Default)]
pub struct GeoResolver {
    city: Option<Arc<Reader<Vec<u8>>>>,
    asn: Option<Arc<Reader<Vec<u8>>>>,
}

impl GeoResolver {
    /// Resolver with no databases; private sentinel lookups still work
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open whichever of the two databases exist at the given paths.
    ///
    /// Missing or unreadable databases are reported and skipped; lookups
    /// degrade gracefully rather than failing the process.
    pub fn open<P: AsRef<Path>>(city_db: P, asn_db: P) -> Self {
        let mut resolver = Self::default();

        match Self::open_reader(city_db.as_ref()) {
            Ok(reader) => {
                info!("GeoIP City database loaded");
                resolver.city = Some(Arc::new(reader));
            }
            Err(err) => warn!("GeoIP City database unavailable: {}", err),
        }

        match Self::open_reader(asn_db.as_ref()) {
            Ok(reader) => {
                info!("GeoIP ASN database loaded");
                resolver.asn = Some(Arc::new(reader));
            }
            Err(err) => warn!("GeoIP ASN database unavailable: {}", err),
        }

        resolver
    }

    fn open_reader(path: &Path) -> Result<Reader<Vec<u8>>, GeoIpError> {
        if !path.exists() {
            return Err(GeoIpError::NotFound(path.display().to_string()));
        }
        Ok(Reader::open_readfile(path)?)
    }

    pub fn has_database(&self) -> bool {
        self.city.is_some() || self.asn.is_some()
    }

    /// Look up geo info for an IP.
    ///
    /// Private/loopback ranges return the PRIVATE sentinel; otherwise `None`
    /// when no database is loaded or neither database knows the IP.
    pub fn lookup(&self, ip: IpAddr) -> Option<GeoInfo> {
        if is_private(ip) {
            return Some(GeoInfo::private());
        }

        if !self.has_database() {
            return None;
        }

        let mut info = GeoInfo::default();

        if let Some(reader) = &self.city {
            if let Ok(city) = reader.lookup::<geoip2::City>(ip) {
                if let Some(country) = city.country {
                    info.country = country.iso_code.map(String::from);
                    info.country_name = country
                        .names
                        .and_then(|n| n.get("en").map(|s| s.to_string()));
                }
                info.city = city
                    .city
                    .and_then(|c| c.names)
                    .and_then(|n| n.get("en").map(|s| s.to_string()));
                if let Some(location) = city.location {
                    info.latitude = location.latitude;
                    info.longitude = location.longitude;
                }
            }
        }

        if let Some(reader) = &self.asn {
            if let Ok(asn) = reader.lookup::<geoip2::Asn>(ip) {
                info.asn = asn.autonomous_system_number;
                info.asn_org = asn.autonomous_system_organization.map(String::from);
            }
        }

        Some(info)
    }
}

/// Ranges that never reach a database: loopback, RFC 1918, IPv6 unique-local
fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_ranges_sentinel() {
        let resolver = GeoResolver::disabled();
        for addr in ["127.0.0.1", "10.1.2.3", "172.16.0.1", "192.168.1.50", "::1", "fd00::1"] {
            let info = resolver.lookup(ip(addr)).unwrap();
            assert!(info.is_private(), "{addr} should be private");
        }
    }

    #[test]
    fn test_public_ip_without_database() {
        let resolver = GeoResolver::disabled();
        assert!(resolver.lookup(ip("8.8.8.8")).is_none());
        assert!(!resolver.has_database());
    }

    #[test]
    fn test_missing_database_is_not_fatal() {
        let resolver = GeoResolver::open("/nonexistent/city.mmdb", "/nonexistent/asn.mmdb");
        assert!(!resolver.has_database());
        // sentinel still works
        assert!(resolver.lookup(ip("127.0.0.1")).unwrap().is_private());
    }

    #[test]
    fn test_boundary_of_172_range() {
        let resolver = GeoResolver::disabled();
        assert!(resolver.lookup(ip("172.31.255.255")).unwrap().is_private());
        // 172.32.0.0 is public space
        assert!(resolver.lookup(ip("172.32.0.1")).is_none());
    }
}
