use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Appends `value` unless an equal element is already present.
/// Returns true when the vector changed.
pub fn push_if_missing<T: PartialEq>(values: &mut Vec<T>, value: T) -> bool {
    if values.contains(&value) {
        return false;
    }
    values.push(value);
    true
}

/// A single 88x31 image, keyed in the store by the SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Button {
    pub srcs: Vec<String>,
    pub alts: Vec<String>,
    pub hrefs: Vec<String>,
    pub found_at: Vec<String>,
    /// Unix milliseconds at creation. Never touched by a merge.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// One observation of a badge on a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sighting {
    pub src: String,
    pub page_url: String,
    pub href: Option<String>,
    pub alt: Option<String>,
    pub title: Option<String>,
}

impl Button {
    pub fn new(kind: Option<String>, timestamp: i64) -> Self {
        Self {
            srcs: Vec::new(),
            alts: Vec::new(),
            hrefs: Vec::new(),
            found_at: Vec::new(),
            timestamp,
            kind,
        }
    }

    /// Builds a fresh record from its first sighting.
    pub fn from_sighting(sighting: &Sighting, kind: Option<String>, timestamp: i64) -> Self {
        let mut button = Self::new(kind, timestamp);
        button.merge(sighting);
        button
    }

    /// Folds a sighting into the record. Returns true if any field grew.
    pub fn merge(&mut self, sighting: &Sighting) -> bool {
        let mut changed = push_if_missing(&mut self.found_at, sighting.page_url.clone());
        changed |= push_if_missing(&mut self.srcs, sighting.src.clone());
        if let Some(href) = &sighting.href {
            changed |= push_if_missing(&mut self.hrefs, href.clone());
        }
        // title text shares the alts list
        for text in [&sighting.alt, &sighting.title].into_iter().flatten() {
            if !text.is_empty() {
                changed |= push_if_missing(&mut self.alts, text.clone());
            }
        }
        changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SiteMetadata {
    /// Metadata entries are considered the same when title and description match.
    pub fn same_page_as(&self, other: &SiteMetadata) -> bool {
        self.title == other.title && self.description == other.description
    }
}

/// Everything known about a hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub host: String,
    pub metadata: Vec<SiteMetadata>,
    pub buttons: Vec<String>,
    pub urls: Vec<String>,
    pub paths: Vec<Vec<String>>,
}

impl Host {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            metadata: Vec::new(),
            buttons: Vec::new(),
            urls: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn add_button(&mut self, hash: &str) -> bool {
        push_if_missing(&mut self.buttons, hash.to_string())
    }

    /// Records a crawled page on this host: its URL, the breadcrumb that led
    /// to it and the page metadata.
    pub fn record_page(&mut self, url: &str, path: &[String], metadata: SiteMetadata) -> bool {
        let mut changed = push_if_missing(&mut self.urls, url.to_string());
        changed |= push_if_missing(&mut self.paths, path.to_vec());
        if !self.metadata.iter().any(|m| m.same_page_as(&metadata)) {
            self.metadata.push(metadata);
            changed = true;
        }
        changed
    }
}

/// Full snapshot of both record spaces, as consumed by the browse front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonDB {
    pub hosts: BTreeMap<String, Host>,
    pub buttons: BTreeMap<String, Button>,
}
