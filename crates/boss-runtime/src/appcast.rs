//! Sparkle-style appcast feed parsing.
//!
//! The release feed is RSS 2.0 with the Sparkle namespace; each `<item>`
//! carries a `<sparkle:version>` and one `<enclosure>` per platform. Items
//! whose version does not parse as strict semver are dropped: a
//! whitespace-padded version string is a publishing error, not something to
//! repair here.

use chrono::{DateTime, FixedOffset};
use semver::Version;
use serde::Deserialize;

/// Per-platform release artifact entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppcastEnclosure {
    pub url: String,
    pub os: String,
    pub arch: String,
    /// Base64 Ed25519 signature of the package bytes. May be empty.
    pub signature: String,
    /// Advertised package size in bytes. `0` when the feed omits it.
    pub length: u64,
}

impl AppcastEnclosure {
    /// True iff `os` and `arch` equal the build-time platform tuple.
    #[must_use]
    pub fn matches_current_platform(&self) -> bool {
        self.os == current_os() && self.arch == current_arch()
    }
}

/// One release in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppcastItem {
    pub version: Version,
    pub pub_date: Option<DateTime<FixedOffset>>,
    pub enclosures: Vec<AppcastEnclosure>,
}

impl AppcastItem {
    /// First enclosure matching the build-time platform, if any.
    #[must_use]
    pub fn enclosure_for_current_platform(&self) -> Option<&AppcastEnclosure> {
        self.enclosures
            .iter()
            .find(|e| e.matches_current_platform())
    }
}

fn current_os() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        ""
    }
}

fn current_arch() -> &'static str {
    #[cfg(target_arch = "aarch64")]
    {
        "arm64"
    }
    #[cfg(target_arch = "x86_64")]
    {
        "x86_64"
    }
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    {
        ""
    }
}

// Raw serde mapping of the feed. Prefixed names (`sparkle:version`,
// `sparkle:os`, ...) arrive with their local name only.

#[derive(Debug, Deserialize)]
struct RssDoc {
    channel: ChannelDoc,
}

#[derive(Debug, Deserialize)]
struct ChannelDoc {
    #[serde(default, rename = "item")]
    items: Vec<ItemDoc>,
}

#[derive(Debug, Deserialize)]
struct ItemDoc {
    #[serde(default)]
    version: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(default, rename = "enclosure")]
    enclosures: Vec<EnclosureDoc>,
}

#[derive(Debug, Deserialize)]
struct EnclosureDoc {
    #[serde(default)]
    url: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    arch: String,
    #[serde(default, rename = "edSignature")]
    signature: String,
    #[serde(default)]
    length: u64,
}

impl ItemDoc {
    /// `None` when the version is missing or not strict semver.
    fn into_item(self) -> Option<AppcastItem> {
        let version = Version::parse(self.version.as_deref()?).ok()?;
        let pub_date = self
            .pub_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc2822(s.trim()).ok());
        let enclosures = self
            .enclosures
            .into_iter()
            .map(|e| AppcastEnclosure {
                url: e.url,
                os: e.os,
                arch: e.arch,
                signature: e.signature,
                length: e.length,
            })
            .collect();
        Some(AppcastItem {
            version,
            pub_date,
            enclosures,
        })
    }
}

/// Parse every item in document order, dropping items with unparseable
/// versions. Empty on malformed XML.
#[must_use]
pub fn parse_all(xml: &str) -> Vec<AppcastItem> {
    let Ok(doc) = serde_xml_rs::from_str::<RssDoc>(xml) else {
        return Vec::new();
    };
    doc.channel
        .items
        .into_iter()
        .filter_map(ItemDoc::into_item)
        .collect()
}

/// First item with a valid version, or `None` on malformed XML, an empty
/// channel, or no valid-version item.
#[must_use]
pub fn parse_latest(xml: &str) -> Option<AppcastItem> {
    parse_all(xml).into_iter().next()
}
