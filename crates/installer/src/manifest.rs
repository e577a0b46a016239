//! Pack manifests and item descriptors
//!
//! A pack document lists its mods as a JSON object keyed by mod id. Key
//! order is kept, since download slots claim jobs in manifest order.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::downloader::core::error::{DownloadError, Result};

/// Which installs an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Client,
    Server,
    Both,
}

impl Target {
    /// Whether an item with this target is part of an `install` run
    pub fn includes(self, install: InstallTarget) -> bool {
        matches!(
            (self, install),
            (Target::Both, _)
                | (Target::Client, InstallTarget::Client)
                | (Target::Server, InstallTarget::Server)
        )
    }
}

/// The kind of install being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallTarget {
    Client,
    Server,
}

impl fmt::Display for InstallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallTarget::Client => write!(f, "client"),
            InstallTarget::Server => write!(f, "server"),
        }
    }
}

impl FromStr for InstallTarget {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(InstallTarget::Client),
            "server" => Ok(InstallTarget::Server),
            other => Err(DownloadError::Configuration {
                message: format!("unknown install target '{}' (expected client or server)", other),
                field: Some("target".to_string()),
            }),
        }
    }
}

/// One installable item of a pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Stable key, unique within a manifest; filled from the map key when absent
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    pub target: Target,
    /// Cannot be fetched directly; the user downloads it through a browser
    #[serde(default)]
    pub manual: bool,
}

impl ItemDescriptor {
    pub fn new<I, N, U>(id: I, name: N, url: U, target: Target) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            target,
            manual: false,
        }
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

/// Game and loader versions of a pack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackVersion {
    #[serde(default)]
    pub minecraft: String,
    #[serde(default)]
    pub forge: String,
}

/// A pack document from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackData {
    /// Catalog id; set by the catalog after download
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: PackVersion,
    #[serde(deserialize_with = "deserialize_mods")]
    pub mods: Vec<ItemDescriptor>,
}

impl PackData {
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::new(self.mods.clone())
    }
}

/// Ordered, id-unique list of items
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    items: Vec<ItemDescriptor>,
}

/// Items of one install run split by how they are obtained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub automatic: Vec<ItemDescriptor>,
    pub manual: Vec<ItemDescriptor>,
}

impl Manifest {
    /// Build a manifest, rejecting empty or repeated ids
    pub fn new(items: Vec<ItemDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for item in &items {
            if item.id.is_empty() {
                return Err(DownloadError::Configuration {
                    message: format!("item '{}' has no id", item.name),
                    field: Some("id".to_string()),
                });
            }
            if !seen.insert(item.id.as_str()) {
                return Err(DownloadError::Configuration {
                    message: format!("duplicate item id '{}' in manifest", item.id),
                    field: Some("id".to_string()),
                });
            }
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[ItemDescriptor] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items for `target`, split into automatic and manual, in manifest order
    pub fn partition(&self, target: InstallTarget) -> Partition {
        let (manual, automatic): (Vec<ItemDescriptor>, Vec<ItemDescriptor>) = self
            .items
            .iter()
            .filter(|item| item.target.includes(target))
            .cloned()
            .partition(|item| item.manual);
        Partition { automatic, manual }
    }
}

/// Split a pack's mods for `target` into automatic and manual lists
pub fn filter_mods(target: InstallTarget, pack: &PackData) -> Result<Partition> {
    Ok(pack.manifest()?.partition(target))
}

fn deserialize_mods<'de, D>(deserializer: D) -> std::result::Result<Vec<ItemDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ModsVisitor;

    impl<'de> Visitor<'de> for ModsVisitor {
        type Value = Vec<ItemDescriptor>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of mod id to mod description")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut mods = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((id, mut item)) = map.next_entry::<String, ItemDescriptor>()? {
                item.id = id;
                mods.push(item);
            }
            Ok(mods)
        }
    }

    deserializer.deserialize_map(ModsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACK: &str = r#"{
        "name": "Red Pack",
        "description": "A pack",
        "version": { "minecraft": "1.12.2", "forge": "1.12.2-14.23.5.2847" },
        "ram": { "minimum": 4, "preferred": 6, "maximum": 8 },
        "mods": {
            "jei": { "name": "JEI", "url": "https://example.com/jei.jar", "target": "both" },
            "optifine": { "name": "OptiFine", "url": "https://optifine.net/", "target": "client", "manual": true },
            "dynmap": { "name": "Dynmap", "url": "https://example.com/dynmap.jar", "target": "server" },
            "journeymap": { "name": "JourneyMap", "url": "https://example.com/jm.jar", "target": "client" }
        }
    }"#;

    #[test]
    fn pack_mods_keep_document_order_and_ids() {
        let pack: PackData = serde_json::from_str(PACK).unwrap();
        let ids: Vec<_> = pack.mods.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["jei", "optifine", "dynmap", "journeymap"]);
        assert_eq!(pack.version.minecraft, "1.12.2");
        assert!(pack.mods[1].manual);
        assert!(!pack.mods[0].manual);
    }

    #[test]
    fn partition_filters_by_target_and_splits_manual_items() {
        let pack: PackData = serde_json::from_str(PACK).unwrap();
        let manifest = pack.manifest().unwrap();

        let client = manifest.partition(InstallTarget::Client);
        let automatic: Vec<_> = client.automatic.iter().map(|m| m.id.as_str()).collect();
        let manual: Vec<_> = client.manual.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(automatic, vec!["jei", "journeymap"]);
        assert_eq!(manual, vec!["optifine"]);

        let server = manifest.partition(InstallTarget::Server);
        let automatic: Vec<_> = server.automatic.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(automatic, vec!["jei", "dynmap"]);
        assert!(server.manual.is_empty());
    }

    #[test]
    fn filter_mods_matches_manifest_partition() {
        let pack: PackData = serde_json::from_str(PACK).unwrap();
        let partition = filter_mods(InstallTarget::Client, &pack).unwrap();
        assert_eq!(partition, pack.manifest().unwrap().partition(InstallTarget::Client));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let a = ItemDescriptor::new("a", "A", "https://example.com/a.jar", Target::Both);
        let result = Manifest::new(vec![a.clone(), a]);
        assert!(matches!(result, Err(DownloadError::Configuration { .. })));
    }

    #[test]
    fn install_target_parses_case_insensitively() {
        assert_eq!("Client".parse::<InstallTarget>().unwrap(), InstallTarget::Client);
        assert_eq!("server".parse::<InstallTarget>().unwrap(), InstallTarget::Server);
        assert!("both".parse::<InstallTarget>().is_err());
    }
}
