use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use cmpack_core::{Error, PackIdent, Pdsc};

use crate::PackRootLayout;

/// Registers a local development PDSC under `.Local/`, making the pack
/// it describes resolvable without the public index.
pub fn add_local_pdsc(layout: &PackRootLayout, path: &Path) -> Result<PackIdent> {
    let pdsc = Pdsc::from_file(path)?;
    let ident = pdsc.ident();
    let target = layout.local_pdsc_path(&ident);
    if target.exists() {
        return Err(Error::PdscEntryExists)
            .with_context(|| format!("{} is already registered", ident.pdsc_file_name()));
    }

    fs::create_dir_all(layout.local_dir())
        .with_context(|| format!("failed to create {}", layout.local_dir().display()))?;
    fs::copy(path, &target).with_context(|| {
        format!(
            "failed to copy {} to {}",
            path.display(),
            target.display()
        )
    })?;

    info!("registered local pdsc {}", target.display());
    Ok(ident)
}

/// Removes a previously registered local PDSC.
pub fn remove_local_pdsc(layout: &PackRootLayout, ident: &PackIdent) -> Result<()> {
    let target = layout.local_pdsc_path(ident);
    if !target.is_file() {
        return Err(Error::PdscEntryNotFound)
            .with_context(|| format!("{} is not registered", ident.pdsc_file_name()));
    }

    fs::remove_file(&target)
        .with_context(|| format!("failed to remove {}", target.display()))?;
    info!("removed local pdsc {}", target.display());
    Ok(())
}
