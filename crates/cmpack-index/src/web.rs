use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use url::Url;

use cmpack_core::{Error, PackIdent, Pdsc};

use crate::Pidx;

/// Read-only view of the `.Web/` directory: the per-vendor PDSCs that
/// define which packs are public, plus the cached `index.pidx`.
#[derive(Debug, Clone)]
pub struct WebIndex {
    web_dir: PathBuf,
}

/// Outcome of a public-index lookup for a bare pack-id.
#[derive(Debug, Clone)]
pub struct PublicLookup {
    /// The parsed `.Web/Vendor.Pack.pdsc`, when it exists.
    pub pdsc: Option<Pdsc>,
    /// When only the pidx lists the pack: the URL its vendor PDSC can
    /// be fetched from so the caller can seed `.Web/`.
    pub pending_pdsc_url: Option<String>,
}

impl PublicLookup {
    pub fn is_public(&self) -> bool {
        self.pdsc.is_some() || self.pending_pdsc_url.is_some()
    }
}

impl WebIndex {
    pub fn new(web_dir: impl Into<PathBuf>) -> Self {
        Self {
            web_dir: web_dir.into(),
        }
    }

    pub fn web_dir(&self) -> &Path {
        &self.web_dir
    }

    pub fn pdsc_path(&self, ident: &PackIdent) -> PathBuf {
        self.web_dir.join(ident.pdsc_file_name())
    }

    pub fn pidx_path(&self) -> PathBuf {
        self.web_dir.join("index.pidx")
    }

    /// Parses `.Web/Vendor.Pack.pdsc` if it exists.
    pub fn find_pdsc(&self, ident: &PackIdent) -> Result<Option<Pdsc>> {
        let path = self.pdsc_path(ident);
        if !path.is_file() {
            return Ok(None);
        }
        Pdsc::from_file(&path).map(Some)
    }

    /// Looks the pack up in the cached `index.pidx`, when one exists.
    pub fn pidx_entry(&self, ident: &PackIdent) -> Result<Option<crate::PidxEntry>> {
        let path = self.pidx_path();
        if !path.is_file() {
            return Ok(None);
        }
        let pidx = Pidx::from_file(&path)?;
        Ok(pidx.find(ident).cloned())
    }

    /// Every vendor PDSC cached under `.Web/`, sorted by file name.
    pub fn list_pdsc_files(&self) -> Result<Vec<PathBuf>> {
        if !self.web_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.web_dir)
            .with_context(|| format!("failed to read {}", self.web_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("pdsc") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Decides whether a bare pack-id names a public pack. `.Web/` presence
/// is authoritative; a pidx entry without a cached PDSC means "public,
/// descriptor still to be fetched".
pub fn lookup_public(web: &WebIndex, ident: &PackIdent) -> Result<PublicLookup> {
    if let Some(pdsc) = web.find_pdsc(ident)? {
        debug!("{ident} is public: found {}", web.pdsc_path(ident).display());
        return Ok(PublicLookup {
            pdsc: Some(pdsc),
            pending_pdsc_url: None,
        });
    }

    if let Some(entry) = web.pidx_entry(ident)? {
        debug!("{ident} is listed in the public index, pdsc not cached yet");
        return Ok(PublicLookup {
            pdsc: None,
            pending_pdsc_url: Some(entry.pdsc_url()),
        });
    }

    Ok(PublicLookup {
        pdsc: None,
        pending_pdsc_url: None,
    })
}

/// Determines the archive URL for one release of a public pack: the
/// release's own `url` resolved against the descriptor base, or the
/// base URL plus the conventional pack file name.
pub fn pack_download_url(pdsc: &Pdsc, ident: &PackIdent, version: &str) -> Result<String> {
    let release_url = pdsc
        .release(version)
        .and_then(|release| release.url.as_deref());

    if let Some(raw) = release_url {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(raw.to_string());
        }
        if let Some(base) = pdsc.url.as_deref() {
            return join_base(base, raw);
        }
        return Err(Error::PackUrlCannotBeFound.into());
    }

    match pdsc.url.as_deref() {
        Some(base) => join_base(base, &ident.pack_file_name(version)),
        None => Err(Error::PackUrlCannotBeFound.into()),
    }
}

fn join_base(base: &str, relative: &str) -> Result<String> {
    let mut base = base.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base).map_err(|_| Error::PackUrlCannotBeFound)?;
    let joined = base
        .join(relative)
        .map_err(|_| Error::PackUrlCannotBeFound)?;
    Ok(joined.to_string())
}
