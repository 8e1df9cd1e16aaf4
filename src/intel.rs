//! Threat intelligence enrichment for destination IPs
//!
//! Enrichment is best-effort: each source degrades independently, and a
//! destination with no data at all is scored against the zero-value
//! [`ThreatIntel`] rather than dropped from the pipeline.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::ThreatIntel;

/// Intelligence source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelConfig {
    /// Query remote sources at all; when false every lookup returns the
    /// zero-value intel and scorers run in degraded mode
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-request timeout. Lookups run on worker threads, so this bounds
    /// how long one observation can hold a worker.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// VirusTotal API key (source skipped when absent)
    #[serde(default)]
    pub virustotal_api_key: Option<String>,

    /// AbuseIPDB API key (source skipped when absent)
    #[serde(default)]
    pub abuseipdb_api_key: Option<String>,

    /// Query ip-api.com for the country code (free tier, no key)
    #[serde(default = "default_geoip_enabled")]
    pub geoip_enabled: bool,

    /// Destinations exempted from threat scoring penalties
    #[serde(default)]
    pub whitelist: Vec<IpAddr>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_geoip_enabled() -> bool {
    true
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_secs: default_timeout_secs(),
            virustotal_api_key: None,
            abuseipdb_api_key: None,
            geoip_enabled: default_geoip_enabled(),
            whitelist: Vec::new(),
        }
    }
}

/// Enrichment collaborator seam.
///
/// Implementations must be callable from multiple worker threads at once.
/// Errors mean the provider itself is broken; per-source failures inside a
/// provider degrade to partial intel instead of an error.
pub trait IntelProvider: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<ThreatIntel>;
}

/// Fixed in-memory intel, for tests and offline operation.
///
/// Unknown IPs resolve to the zero-value intel with only the whitelist flag
/// considered.
#[derive(Debug, Default)]
pub struct StaticIntelProvider {
    entries: HashMap<IpAddr, ThreatIntel>,
    whitelist: Vec<IpAddr>,
}

impl StaticIntelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: IpAddr, intel: ThreatIntel) -> Self {
        self.entries.insert(ip, intel);
        self
    }

    pub fn with_whitelisted(mut self, ip: IpAddr) -> Self {
        self.whitelist.push(ip);
        self
    }
}

impl IntelProvider for StaticIntelProvider {
    fn lookup(&self, ip: IpAddr) -> Result<ThreatIntel> {
        let mut intel = self.entries.get(&ip).cloned().unwrap_or_default();
        if self.whitelist.contains(&ip) {
            intel.is_whitelisted = true;
        }
        Ok(intel)
    }
}

/// Live enrichment against VirusTotal, AbuseIPDB and ip-api.com.
///
/// Each source fails independently: a timeout or malformed response is
/// logged and that source's fields stay at their zero values.
pub struct HttpIntelProvider {
    config: IntelConfig,
    client: Client,
}

impl HttpIntelProvider {
    pub fn new(config: IntelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("netverdict/0.1")
            .build()
            .context("Failed to build intel HTTP client")?;

        Ok(Self { config, client })
    }

    fn lookup_virustotal(&self, ip: IpAddr, api_key: &str) -> Result<(u32, u32)> {
        let url = format!("https://www.virustotal.com/api/v3/ip_addresses/{}", ip);

        let resp: VtApiResponse = self
            .client
            .get(&url)
            .header("x-apikey", api_key)
            .send()?
            .error_for_status()?
            .json()?;

        let stats = resp.data.attributes.last_analysis_stats;
        let flagged = stats.malicious + stats.suspicious;
        let total = flagged + stats.harmless + stats.undetected;
        Ok((flagged, total))
    }

    fn lookup_abuseipdb(&self, ip: IpAddr, api_key: &str) -> Result<(u8, u32)> {
        let url = format!(
            "https://api.abuseipdb.com/api/v2/check?ipAddress={}&maxAgeInDays=90",
            ip
        );

        let resp: AbuseIpDbApiResponse = self
            .client
            .get(&url)
            .header("Key", api_key)
            .header("Accept", "application/json")
            .send()?
            .error_for_status()?
            .json()?;

        Ok((
            resp.data.abuse_confidence_score.unwrap_or(0),
            resp.data.total_reports.unwrap_or(0),
        ))
    }

    /// Country code via ip-api.com (free, no API key needed)
    fn lookup_geoip(&self, ip: IpAddr) -> Result<String> {
        let url = format!("http://ip-api.com/json/{}?fields=status,message,countryCode", ip);

        let resp: IpApiResponse = self.client.get(&url).send()?.json()?;

        if resp.status != "success" {
            anyhow::bail!("GeoIP lookup failed: {}", resp.message.unwrap_or_default());
        }

        Ok(resp.country_code.unwrap_or_default())
    }
}

impl IntelProvider for HttpIntelProvider {
    fn lookup(&self, ip: IpAddr) -> Result<ThreatIntel> {
        let mut intel = ThreatIntel {
            is_whitelisted: self.config.whitelist.contains(&ip),
            ..Default::default()
        };

        if !self.config.enabled {
            return Ok(intel);
        }

        debug!("Gathering intelligence for IP: {}", ip);

        if let Some(ref api_key) = self.config.virustotal_api_key {
            match self.lookup_virustotal(ip, api_key) {
                Ok((flagged, total)) => {
                    intel.vt_flagged_vendors = flagged;
                    intel.vt_total_vendors = total;
                }
                Err(e) => warn!("VirusTotal lookup failed for {}: {}", ip, e),
            }
        }

        if let Some(ref api_key) = self.config.abuseipdb_api_key {
            match self.lookup_abuseipdb(ip, api_key) {
                Ok((confidence, reports)) => {
                    intel.abuse_confidence_pct = confidence;
                    intel.abuse_report_count = reports;
                }
                Err(e) => warn!("AbuseIPDB lookup failed for {}: {}", ip, e),
            }
        }

        if self.config.geoip_enabled {
            match self.lookup_geoip(ip) {
                Ok(cc) => intel.country_code = cc,
                Err(e) => debug!("GeoIP lookup failed for {}: {}", ip, e),
            }
        }

        Ok(intel)
    }
}

// Response types for the external APIs

#[derive(Debug, Deserialize)]
struct VtApiResponse {
    data: VtData,
}

#[derive(Debug, Deserialize)]
struct VtData {
    attributes: VtAttributes,
}

#[derive(Debug, Deserialize)]
struct VtAttributes {
    last_analysis_stats: VtAnalysisStats,
}

#[derive(Debug, Deserialize)]
struct VtAnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    harmless: u32,
    #[serde(default)]
    undetected: u32,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbApiResponse {
    data: AbuseIpDbData,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbData {
    #[serde(rename = "abuseConfidenceScore")]
    abuse_confidence_score: Option<u8>,
    #[serde(rename = "totalReports")]
    total_reports: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_lookup() {
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let provider = StaticIntelProvider::new().with_entry(
            ip,
            ThreatIntel {
                vt_flagged_vendors: 15,
                vt_total_vendors: 84,
                abuse_confidence_pct: 95,
                ..Default::default()
            },
        );

        let intel = provider.lookup(ip).unwrap();
        assert_eq!(intel.vt_flagged_vendors, 15);
        assert!(!intel.is_whitelisted);

        let unknown = provider.lookup("203.0.113.7".parse().unwrap()).unwrap();
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_static_provider_whitelist() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let provider = StaticIntelProvider::new().with_whitelisted(ip);
        assert!(provider.lookup(ip).unwrap().is_whitelisted);
    }

    #[test]
    fn test_disabled_provider_returns_zero_intel() {
        let config = IntelConfig {
            enabled: false,
            ..Default::default()
        };
        let provider = HttpIntelProvider::new(config).unwrap();
        let intel = provider.lookup("8.8.8.8".parse().unwrap()).unwrap();
        assert!(intel.is_empty());
    }

    #[test]
    fn test_vt_stats_parsing() {
        let json = r#"{
            "data": {
                "attributes": {
                    "last_analysis_stats": {
                        "malicious": 12,
                        "suspicious": 3,
                        "harmless": 60,
                        "undetected": 9
                    }
                }
            }
        }"#;
        let resp: VtApiResponse = serde_json::from_str(json).unwrap();
        let stats = resp.data.attributes.last_analysis_stats;
        assert_eq!(stats.malicious + stats.suspicious, 15);
        assert_eq!(stats.malicious + stats.suspicious + stats.harmless + stats.undetected, 84);
    }
}
