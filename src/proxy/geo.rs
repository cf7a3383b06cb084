//! Country enrichment for candidates using a MaxMind City database

use crate::error::RunError;
use crate::proxy::models::Candidate;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Shared, read-only handle on an MMDB file
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Open an MMDB file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| RunError::Geo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// ISO 3166-1 alpha-2 code for an address, if the database knows it
    pub fn country_code(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.reader.lookup(ip).ok()?;
        let city: Option<geoip2::City> = lookup.decode().ok()?;
        city?.country.iso_code.map(String::from)
    }

    /// Fill in an unknown country. Hostnames and failed lookups leave the
    /// candidate untouched.
    pub fn enrich(&self, candidate: Candidate) -> Candidate {
        if !candidate.has_unknown_country() {
            return candidate;
        }
        let Some(ip) = parse_ip(&candidate.address) else {
            return candidate;
        };
        match self.country_code(ip) {
            Some(code) => {
                trace!(address = %candidate.address, country = %code, "country resolved");
                candidate.with_country(code)
            }
            None => candidate,
        }
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// Parse a candidate address as an IP, accepting bracketed IPv6
pub fn parse_ip(address: &str) -> Option<IpAddr> {
    address
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}
