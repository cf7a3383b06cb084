//! Proxy data models

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder for country or organization when the input omits it
pub const UNKNOWN: &str = "Unknown";

/// A proxy endpoint to be probed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub address: String,
    pub port: u16,
    pub country: String,
    pub organization: String,
}

impl Candidate {
    /// Create a candidate with unknown country and organization
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            country: UNKNOWN.to_string(),
            organization: UNKNOWN.to_string(),
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    /// Identity of the endpoint, independent of metadata
    pub fn identity(&self) -> (&str, u16) {
        (&self.address, self.port)
    }

    /// Proxy URL used when tunnelling through this candidate
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Deduplication key and output line: `address,port,country,organization`
    pub fn canonical_key(&self) -> String {
        format!(
            "{},{},{},{}",
            self.address, self.port, self.country, self.organization
        )
    }

    pub fn has_unknown_country(&self) -> bool {
        self.country == UNKNOWN
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}

/// Verification stages the probe policy knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Request a well-known URL through the candidate
    Direct,
    /// Ask the external verification API about the candidate
    Verify,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Direct => write!(f, "direct"),
            StageKind::Verify => write!(f, "verify"),
        }
    }
}

/// What a single stage concluded about a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Active,
    /// The stage got an answer, and it was not the one we wanted
    Inactive(String),
    /// The stage could not get an answer at all
    Unreachable(String),
}

impl StageOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, StageOutcome::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Active,
    Dead,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Active => write!(f, "active"),
            Verdict::Dead => write!(f, "dead"),
        }
    }
}

/// Final result of probing one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub candidate: Candidate,
    pub verdict: Verdict,
    /// Stage that declared the candidate active
    pub method: Option<StageKind>,
    /// Reason reported by the last stage that did not succeed
    pub detail: Option<String>,
    /// Every attempted stage failed before getting an answer
    pub unreachable: bool,
}

impl ProbeResult {
    pub fn active(candidate: Candidate, method: StageKind) -> Self {
        Self {
            candidate,
            verdict: Verdict::Active,
            method: Some(method),
            detail: None,
            unreachable: false,
        }
    }

    pub fn dead(candidate: Candidate, detail: Option<String>, unreachable: bool) -> Self {
        Self {
            candidate,
            verdict: Verdict::Dead,
            method: None,
            detail,
            unreachable,
        }
    }

    pub fn is_active(&self) -> bool {
        self.verdict == Verdict::Active
    }

    /// Label shown in the per-candidate status line
    pub fn status_label(&self) -> &'static str {
        match (self.verdict, self.unreachable) {
            (Verdict::Active, _) => "active",
            (Verdict::Dead, true) => "unreachable",
            (Verdict::Dead, false) => "dead",
        }
    }
}
