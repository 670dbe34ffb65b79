use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use cmpack_core::{Error, PackIdent};

/// Environment variable naming the pack-root when no `-R` flag is given.
pub const PACK_ROOT_ENV: &str = "CMSIS_PACK_ROOT";

/// The on-disk layout of a pack-root. All path derivations live here so
/// the rest of the workspace never assembles pack-root paths by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRootLayout {
    pack_root: PathBuf,
}

/// One installed pack version found by scanning the pack-root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPack {
    pub ident: PackIdent,
    pub version: String,
}

impl PackRootLayout {
    pub fn new(pack_root: impl Into<PathBuf>) -> Self {
        Self {
            pack_root: pack_root.into(),
        }
    }

    pub fn pack_root(&self) -> &Path {
        &self.pack_root
    }

    pub fn web_dir(&self) -> PathBuf {
        self.pack_root.join(".Web")
    }

    pub fn local_dir(&self) -> PathBuf {
        self.pack_root.join(".Local")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.pack_root.join(".Download")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.pack_root.join(".cache")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.pack_root.join(".lock")
    }

    pub fn vendor_dir(&self, vendor: &str) -> PathBuf {
        self.pack_root.join(vendor)
    }

    pub fn pack_family_dir(&self, ident: &PackIdent) -> PathBuf {
        self.vendor_dir(&ident.vendor).join(&ident.name)
    }

    pub fn pack_home_dir(&self, ident: &PackIdent, version: &str) -> PathBuf {
        self.pack_family_dir(ident).join(version)
    }

    pub fn web_pdsc_path(&self, ident: &PackIdent) -> PathBuf {
        self.web_dir().join(ident.pdsc_file_name())
    }

    pub fn local_pdsc_path(&self, ident: &PackIdent) -> PathBuf {
        self.local_dir().join(ident.pdsc_file_name())
    }

    pub fn downloaded_pack_path(&self, ident: &PackIdent, version: &str) -> PathBuf {
        self.download_dir().join(ident.pack_file_name(version))
    }

    pub fn downloaded_pdsc_path(&self, ident: &PackIdent, version: &str) -> PathBuf {
        self.download_dir()
            .join(ident.pdsc_file_name_with_version(version))
    }

    /// Fails with `PackRootDoesNotExist` unless the pack-root is an
    /// existing directory. Commands other than `init` call this first.
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.pack_root.is_dir() {
            return Err(Error::PackRootDoesNotExist)
                .with_context(|| format!("pack root: {}", self.pack_root.display()));
        }
        Ok(())
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.pack_root.clone(),
            self.web_dir(),
            self.local_dir(),
            self.download_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Scans `Vendor/Pack/X.Y.Z` directories for installed packs.
    /// Dot-directories (the descriptor and cache trees) are skipped.
    pub fn installed_packs(&self) -> Result<Vec<InstalledPack>> {
        let mut found = Vec::new();
        if !self.pack_root.is_dir() {
            return Ok(found);
        }

        for vendor_entry in fs::read_dir(&self.pack_root)
            .with_context(|| format!("failed to read {}", self.pack_root.display()))?
        {
            let vendor_entry = vendor_entry?;
            let vendor_name = vendor_entry.file_name().to_string_lossy().to_string();
            if vendor_name.starts_with('.') || !vendor_entry.file_type()?.is_dir() {
                continue;
            }

            for pack_entry in fs::read_dir(vendor_entry.path())? {
                let pack_entry = pack_entry?;
                if !pack_entry.file_type()?.is_dir() {
                    continue;
                }
                let pack_name = pack_entry.file_name().to_string_lossy().to_string();

                for version_entry in fs::read_dir(pack_entry.path())? {
                    let version_entry = version_entry?;
                    if !version_entry.file_type()?.is_dir() {
                        continue;
                    }
                    found.push(InstalledPack {
                        ident: PackIdent {
                            vendor: vendor_name.clone(),
                            name: pack_name.clone(),
                        },
                        version: version_entry.file_name().to_string_lossy().to_string(),
                    });
                }
            }
        }

        found.sort_by(|a, b| {
            (&a.ident.vendor, &a.ident.name, &a.version)
                .cmp(&(&b.ident.vendor, &b.ident.name, &b.version))
        });
        Ok(found)
    }

    /// Installed version directories of one pack, unordered.
    pub fn installed_versions(&self, ident: &PackIdent) -> Vec<String> {
        let family = self.pack_family_dir(ident);
        let Ok(entries) = fs::read_dir(&family) else {
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect()
    }
}

/// Resolves the pack-root from the `-R` flag or `CMSIS_PACK_ROOT`.
pub fn resolve_pack_root(flag: Option<&Path>) -> Result<PackRootLayout> {
    if let Some(path) = flag {
        debug!("using pack root from command line: {}", path.display());
        return Ok(PackRootLayout::new(path));
    }

    match env::var_os(PACK_ROOT_ENV) {
        Some(value) if !value.is_empty() => {
            let path = PathBuf::from(value);
            debug!("using pack root from {PACK_ROOT_ENV}: {}", path.display());
            Ok(PackRootLayout::new(path))
        }
        _ => Err(Error::PackRootNotFound.into()),
    }
}
