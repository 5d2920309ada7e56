//! Encoding profiles and the profile-to-bitrate table.

use std::collections::BTreeMap;

use crate::error::MalformedJobError;

/// Bitrate for profiles missing from the table.
pub const DEFAULT_VIDEO_BITRATE: &str = "1M";

/// Resolved encoding parameters for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingProfile {
    /// Profile name as requested, used in the output object name.
    pub name: String,
    /// Target frame height in pixels.
    pub height: u32,
    /// Video bitrate in encoder notation, e.g. `2M`.
    pub video_bitrate: String,
}

impl EncodingProfile {
    /// Scale filter keeping aspect ratio with an even width.
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.height)
    }
}

/// Maps frame heights to video bitrates. `720` and `720p` share an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    rates: BTreeMap<u32, String>,
    default_rate: String,
}

impl Default for ProfileTable {
    fn default() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(720, "2M".to_string());
        Self {
            rates,
            default_rate: DEFAULT_VIDEO_BITRATE.to_string(),
        }
    }
}

impl ProfileTable {
    pub fn new(rates: BTreeMap<u32, String>, default_rate: impl Into<String>) -> Self {
        Self {
            rates,
            default_rate: default_rate.into(),
        }
    }

    /// Parses a `profile=rate` list such as `720=2M,1080=4M`.
    pub fn parse(spec: &str, default_rate: impl Into<String>) -> Result<Self, String> {
        let mut rates = BTreeMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (profile, rate) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected profile=rate, got {:?}", entry))?;
            let (profile, rate) = (profile.trim(), rate.trim());
            let height = parse_height(profile)
                .ok_or_else(|| format!("profile {:?} is not a frame height", profile))?;
            if rate.is_empty() {
                return Err(format!("empty bitrate for profile {:?}", profile));
            }
            rates.insert(height, rate.to_string());
        }
        Ok(Self::new(rates, default_rate))
    }

    pub fn bitrate_for(&self, profile: &str) -> &str {
        parse_height(profile)
            .map(|height| self.rate_for_height(height))
            .unwrap_or(&self.default_rate)
    }

    fn rate_for_height(&self, height: u32) -> &str {
        self.rates
            .get(&height)
            .map(String::as_str)
            .unwrap_or(&self.default_rate)
    }

    pub fn resolve(&self, profile: &str) -> Result<EncodingProfile, MalformedJobError> {
        let height =
            parse_height(profile).ok_or_else(|| MalformedJobError::InvalidProfile(profile.to_string()))?;
        Ok(EncodingProfile {
            name: profile.to_string(),
            height,
            video_bitrate: self.rate_for_height(height).to_string(),
        })
    }
}

/// Accepts `720` and `720p`.
fn parse_height(profile: &str) -> Option<u32> {
    let digits = profile.strip_suffix('p').unwrap_or(profile);
    match digits.parse::<u32>() {
        Ok(h) if h > 0 => Some(h),
        _ => None,
    }
}
