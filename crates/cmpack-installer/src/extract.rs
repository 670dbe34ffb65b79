use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use zip::read::ZipFile;
use zip::ZipArchive;

use cmpack_core::Error;

use crate::{CancellationFlag, ProgressSink};

/// Upper bound on a single uncompressed archive entry.
pub const MAX_ENTRY_SIZE: u64 = 20 * 1024 * 1024 * 1024;

pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|err| {
        anyhow::Error::from(Error::FileNotFound)
            .context(format!("failed to open {}: {err}", path.display()))
    })?;
    ZipArchive::new(file).map_err(|err| {
        anyhow::Error::from(Error::FailedDecompressingFile)
            .context(format!("failed to read {} as a zip archive: {err}", path.display()))
    })
}

/// Extracts every entry of the archive into `destination`, stripping the
/// leading `subfolder` (when given) from entry names. Entry names are
/// sanitized before any path is formed; oversized entries are refused;
/// the cancellation flag is checked between entries.
pub fn extract_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    destination: &Path,
    subfolder: Option<&str>,
    cancel: &CancellationFlag,
    progress: &dyn ProgressSink,
) -> Result<()> {
    progress.begin("extract", archive.len() as u64);
    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            progress.finish();
            return Err(Error::TerminatedByUser.into());
        }

        let mut entry = archive.by_index(index).map_err(|err| {
            anyhow::Error::from(Error::FailedInflatingFile)
                .context(format!("failed to read archive entry {index}: {err}"))
        })?;
        inflate_entry(&mut entry, destination, subfolder)?;
        progress.advance(index as u64 + 1);
    }
    progress.finish();
    Ok(())
}

/// Extracts the single entry named `entry_name` into `destination`,
/// flattened to its base name. Used to read the descriptor out of an
/// archive before committing to a full extraction.
pub fn extract_single_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    entry_name: &str,
    destination: &Path,
) -> Result<PathBuf> {
    let mut entry = archive.by_name(entry_name).map_err(|err| {
        anyhow::Error::from(Error::FileNotFound)
            .context(format!("archive has no entry \"{entry_name}\": {err}"))
    })?;
    if entry.size() > MAX_ENTRY_SIZE {
        return Err(Error::FileTooBig.into());
    }

    let relative = sanitize_entry_name(entry.name(), None)?;
    let base_name = relative
        .file_name()
        .ok_or(Error::InsecureZipFileName)?
        .to_os_string();

    fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let target = destination.join(base_name);
    let mut out = File::create(&target).map_err(|err| {
        anyhow::Error::from(Error::FailedCreatingFile)
            .context(format!("failed to create {}: {err}", target.display()))
    })?;
    io::copy(&mut entry, &mut out).map_err(|err| {
        anyhow::Error::from(Error::FailedInflatingFile)
            .context(format!("failed to inflate {entry_name}: {err}"))
    })?;
    Ok(target)
}

fn inflate_entry(entry: &mut ZipFile<'_>, destination: &Path, subfolder: Option<&str>) -> Result<()> {
    let raw_name = entry.name().to_string();
    debug!("inflating \"{raw_name}\"");

    if entry.size() > MAX_ENTRY_SIZE {
        return Err(Error::FileTooBig)
            .with_context(|| format!("entry \"{raw_name}\" is {} bytes", entry.size()));
    }

    let relative = sanitize_entry_name(&raw_name, subfolder)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    let target = destination.join(&relative);

    if raw_name.ends_with('/') || raw_name.ends_with('\\') {
        return fs::create_dir_all(&target)
            .with_context(|| format!("failed to create {}", target.display()));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut out = File::create(&target).map_err(|err| {
        anyhow::Error::from(Error::FailedCreatingFile)
            .context(format!("failed to create {}: {err}", target.display()))
    })?;
    io::copy(entry, &mut out).map_err(|err| {
        anyhow::Error::from(Error::FailedInflatingFile)
            .context(format!("failed to inflate \"{raw_name}\": {err}"))
    })?;
    Ok(())
}

/// Normalizes an archive entry name into a relative path that cannot
/// escape the destination: backslashes become separators, the leading
/// `subfolder` component is stripped, and any parent/root/prefix
/// component rejects the entry outright. Entries that do not start with
/// the subfolder keep their own (sanitized) name.
pub fn sanitize_entry_name(name: &str, subfolder: Option<&str>) -> Result<PathBuf> {
    let normalized = name.replace('\\', "/");

    let stripped = match subfolder {
        Some(prefix) if !prefix.is_empty() => normalized
            .strip_prefix(&format!("{prefix}/"))
            .unwrap_or(&normalized),
        _ => normalized.as_str(),
    };

    let mut out = PathBuf::new();
    for component in Path::new(stripped).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InsecureZipFileName)
                    .with_context(|| format!("entry name \"{name}\""));
            }
        }
    }
    Ok(out)
}
