use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use cmpack_core::PackIdent;

/// The cached public index (`index.pidx`): one `<pdsc>` entry per
/// published pack, naming the directory its vendor PDSC is served from.
#[derive(Debug, Clone, Deserialize)]
pub struct Pidx {
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pindex: Pindex,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Pindex {
    #[serde(rename = "pdsc", default)]
    entries: Vec<PidxEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PidxEntry {
    pub url: String,
    pub vendor: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl PidxEntry {
    /// The URL the vendor PDSC for this entry can be fetched from. The
    /// entry's `url` names the directory, not the file.
    pub fn pdsc_url(&self) -> String {
        let mut base = self.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        format!("{base}{}.{}.pdsc", self.vendor, self.name)
    }
}

impl Pidx {
    pub fn from_xml(contents: &str) -> Result<Pidx> {
        serde_xml_rs::from_str(contents).context("failed to parse public index")
    }

    pub fn from_file(path: &Path) -> Result<Pidx> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Pidx::from_xml(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn entries(&self) -> &[PidxEntry] {
        &self.pindex.entries
    }

    pub fn find(&self, ident: &PackIdent) -> Option<&PidxEntry> {
        self.pindex
            .entries
            .iter()
            .find(|entry| entry.vendor == ident.vendor && entry.name == ident.name)
    }
}
