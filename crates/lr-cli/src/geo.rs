//! IP geolocation backed by a static lookup table.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use lr_core::{GeoLocator, Locale, Location, ReportError};
use serde::Deserialize;

const RESERVED_IP: &str = "Internal/Reserved IP";
const INVALID_IP: &str = "Invalid IP";

/// One row of the location table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeoEntry {
    pub country: String,
    pub region: String,
    pub city: String,
}

/// Geolocator over a fixed `{ "<ip>": {country, region, city} }` table.
#[derive(Debug, Default, Clone)]
pub struct StaticGeoLocator {
    entries: HashMap<IpAddr, GeoEntry>,
}

impl StaticGeoLocator {
    pub fn new(entries: HashMap<IpAddr, GeoEntry>) -> Self {
        Self { entries }
    }

    /// Loads a table from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let table: HashMap<String, GeoEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid geolocation table in {}", path.display()))?;

        let mut entries = HashMap::with_capacity(table.len());
        for (ip, entry) in table {
            let addr: IpAddr = ip
                .parse()
                .with_context(|| format!("invalid IP address {ip:?} in {}", path.display()))?;
            entries.insert(addr, entry);
        }
        tracing::debug!(path = %path.display(), entries = entries.len(), "loaded geolocation table");
        Ok(Self { entries })
    }
}

/// Addresses that never resolve to a public location.
fn is_reserved(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
        }
    }
}

impl GeoLocator for StaticGeoLocator {
    fn lookup(&self, ip: &str, locale: &Locale) -> Result<Location, ReportError> {
        let Ok(addr) = ip.trim().parse::<IpAddr>() else {
            return Ok(Location::failure(INVALID_IP));
        };
        if is_reserved(addr) {
            return Ok(Location::failure(RESERVED_IP));
        }

        let location = self
            .entries
            .get(&addr)
            .map_or(Location::Failure { message: None }, |entry| {
                Location::Success {
                    country: entry.country.clone(),
                    region: entry.region.clone(),
                    city: entry.city.clone(),
                }
            });
        tracing::trace!(ip, %locale, found = matches!(location, Location::Success { .. }), "geolocated listener");
        Ok(location)
    }
}
