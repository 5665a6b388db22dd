//! Geolocation collaborator.
//!
//! Thin wrapper over a MaxMind country database. Lookup failures are not
//! errors at this layer — a reputation hit without a resolvable country is
//! still a hit, so callers get an `Option` and fall back to an empty string.

use maxminddb::geoip2;
use std::net::IpAddr;
use std::path::Path;

pub struct GeoDb {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl GeoDb {
    /// Opens a `.mmdb` file. Failure here is fatal to the daemon when the
    /// reputation pipeline is enabled, so the error is surfaced as-is.
    pub fn open(path: &Path) -> Result<Self, maxminddb::MaxMindDBError> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Self { reader })
    }

    /// English name of the registered country for a textual address.
    ///
    /// Returns `None` for unparseable addresses, addresses absent from the
    /// database, and records without an English name.
    pub fn country(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.parse().ok()?;
        let record: geoip2::Country = self.reader.lookup(addr).ok()?;
        record
            .registered_country
            .and_then(|c| c.names)
            .and_then(|names| names.get("en").map(|s| s.to_string()))
    }
}
