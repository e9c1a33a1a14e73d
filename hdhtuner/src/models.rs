//! Data structures of the HDHomeRun HTTP API.
//!
//! Field names follow the device JSON (`PascalCase`). Only the fields used
//! here are declared; everything else in the payloads is ignored.

use hdhrelay::Station;
use serde::{Deserialize, Serialize};

/// `GET /discover.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub model_number: String,
    #[serde(rename = "DeviceID", default)]
    pub device_id: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub tuner_count: u32,
    #[serde(rename = "BaseURL", default)]
    pub base_url: Option<String>,
    #[serde(rename = "LineupURL", default)]
    pub lineup_url: Option<String>,
}

/// One channel of `GET /lineup.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LineupEntry {
    pub guide_number: String,
    pub guide_name: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
}

impl LineupEntry {
    /// Audio-only channel
    pub fn is_radio(&self) -> bool {
        self.audio_codec.is_some() && self.video_codec.is_none()
    }

    pub fn to_station(&self) -> Station {
        Station::new(
            self.guide_number.trim(),
            self.guide_name.trim(),
            self.url.trim(),
        )
    }
}

/// Radio channels of a lineup, as relay stations.
///
/// With a non-empty `wanted` list only the listed guide numbers are kept.
/// The result is ordered by display name.
pub fn radio_stations(entries: &[LineupEntry], wanted: &[String]) -> Vec<Station> {
    let mut stations: Vec<Station> = entries
        .iter()
        .filter(|entry| entry.is_radio())
        .filter(|entry| {
            wanted.is_empty() || wanted.iter().any(|w| same_channel(w, &entry.guide_number))
        })
        .map(LineupEntry::to_station)
        .collect();

    stations.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    stations
}

/// Guide numbers compare as numbers when both parse ("7" == "7.0").
fn same_channel(wanted: &str, guide_number: &str) -> bool {
    let (wanted, guide_number) = (wanted.trim(), guide_number.trim());
    match (wanted.parse::<f64>(), guide_number.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => wanted == guide_number,
    }
}
