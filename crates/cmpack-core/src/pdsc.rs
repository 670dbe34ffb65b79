use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::reference::PackIdent;
use crate::VersionModifier;

/// A parsed PDSC descriptor. Only the elements the engine reads are
/// mapped; everything else in the document is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Pdsc {
    pub vendor: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    releases: Releases,
    #[serde(default)]
    requirements: Option<Requirements>,
    #[serde(skip)]
    pub file_name: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Releases {
    #[serde(rename = "release", default)]
    entries: Vec<Release>,
}

/// One `<release>` tag. Releases are ordered newest-first in the
/// document, an ordering the resolver relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub version: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "$value", default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Requirements {
    #[serde(default)]
    packages: RequiredPackages,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RequiredPackages {
    #[serde(rename = "package", default)]
    entries: Vec<RequiredPack>,
}

/// One `<requirements>/<packages>/<package>` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RequiredPack {
    pub vendor: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl RequiredPack {
    pub fn ident(&self) -> PackIdent {
        PackIdent {
            vendor: self.vendor.clone(),
            name: self.name.clone(),
        }
    }

    /// Maps the requirement's version spec onto the reference grammar:
    /// `latest` selects the newest release, `x.y.z` an exact one,
    /// `x.y.z:_` anything at or above, and `x.y.z:a.b.c` a closed range.
    pub fn version_spec(&self) -> (VersionModifier, Option<String>) {
        let raw = self.version.as_deref().unwrap_or("").trim();
        if raw.is_empty() {
            return (VersionModifier::Any, None);
        }
        if raw == "latest" {
            return (VersionModifier::Latest, None);
        }
        match raw.split_once(':') {
            Some((min, "_")) => (VersionModifier::Greater, Some(min.to_string())),
            Some(_) => (VersionModifier::Range, Some(raw.to_string())),
            None => (VersionModifier::Exact, Some(raw.to_string())),
        }
    }
}

impl Pdsc {
    pub fn from_xml(contents: &str) -> Result<Pdsc> {
        serde_xml_rs::from_str(contents).context("failed to parse PDSC document")
    }

    pub fn from_reader(reader: impl Read) -> Result<Pdsc> {
        serde_xml_rs::from_reader(reader).context("failed to parse PDSC document")
    }

    pub fn from_file(path: &Path) -> Result<Pdsc> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut pdsc = Pdsc::from_xml(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        pdsc.file_name = Some(path.to_path_buf());
        Ok(pdsc)
    }

    pub fn ident(&self) -> PackIdent {
        PackIdent {
            vendor: self.vendor.clone(),
            name: self.name.clone(),
        }
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases.entries
    }

    /// The newest release version, i.e. the first `<release>` entry.
    pub fn latest_version(&self) -> Option<&str> {
        self.releases
            .entries
            .first()
            .map(|release| release.version.as_str())
    }

    pub fn release(&self, version: &str) -> Option<&Release> {
        self.releases
            .entries
            .iter()
            .find(|release| release.version == version)
    }

    pub fn dependencies(&self) -> &[RequiredPack] {
        self.requirements
            .as_ref()
            .map(|requirements| requirements.packages.entries.as_slice())
            .unwrap_or_default()
    }
}
