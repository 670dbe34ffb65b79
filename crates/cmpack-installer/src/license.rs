use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use zip::ZipArchive;

use cmpack_core::Error;

use crate::extract::MAX_ENTRY_SIZE;

/// The user's answer to a license prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseChoice {
    Agree,
    Decline,
    Extract,
}

/// The UI collaborator the engine delegates license confirmation to.
/// Implementations are expected to auto-decline on non-interactive
/// terminals after echoing the prompt.
pub trait LicensePrompt {
    fn display(&self, title: &str, body: &str) -> Result<LicenseChoice>;
}

/// Reads the embedded license named by the descriptor out of the
/// archive. Backslashes in both the descriptor path and entry names are
/// normalized before matching.
pub fn read_license_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    license_path: &str,
) -> Result<Vec<u8>> {
    let wanted = license_path.replace('\\', "/");
    debug!("reading embedded license \"{wanted}\"");

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| {
            anyhow::Error::from(Error::FailedInflatingFile)
                .context(format!("failed to read archive entry {index}: {err}"))
        })?;
        if entry.name().replace('\\', "/") != wanted {
            continue;
        }

        if entry.size() > MAX_ENTRY_SIZE {
            return Err(Error::FileTooBig.into());
        }
        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer).map_err(|err| {
            anyhow::Error::from(Error::FailedInflatingFile)
                .context(format!("failed to inflate \"{wanted}\": {err}"))
        })?;
        return Ok(buffer);
    }

    Err(Error::LicenseNotFound.into())
}

/// Best-effort plain-text decoding of license bytes. Binary document
/// formats are recognized by their magic bytes and reduced to their
/// printable content; everything else is treated as text.
pub fn decode_license_text(bytes: &[u8]) -> String {
    if bytes.starts_with(b"%PDF") || bytes.starts_with(&[0xd0, 0xcf, 0x11, 0xe0]) {
        return extract_printable_runs(bytes);
    }
    if bytes.starts_with(b"{\\rtf") {
        return strip_rtf(bytes);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Writes the decoded license next to the archive as
/// `<archive>.<license base name>`, read-only. A previous copy is
/// removed first.
pub fn write_extracted_license(
    archive_path: &Path,
    license_path: &str,
    text: &str,
) -> Result<PathBuf> {
    let base_name = Path::new(&license_path.replace('\\', "/"))
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or(Error::LicenseNotFound)?;
    let target = PathBuf::from(format!("{}.{base_name}", archive_path.display()));

    if target.exists() {
        let mut permissions = fs::metadata(&target)
            .with_context(|| format!("failed to stat {}", target.display()))?
            .permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            permissions.set_mode(permissions.mode() | 0o200);
        }
        #[cfg(not(unix))]
        permissions.set_readonly(false);
        let _ = fs::set_permissions(&target, permissions);
        fs::remove_file(&target).map_err(|err| {
            anyhow::Error::from(Error::FailedCreatingFile).context(format!(
                "cannot remove previous license copy {}: {err}",
                target.display()
            ))
        })?;
    }

    info!("extracting embedded license to {}", target.display());
    fs::write(&target, text).map_err(|err| {
        anyhow::Error::from(Error::FailedCreatingFile)
            .context(format!("failed to write {}: {err}", target.display()))
    })?;

    let mut permissions = fs::metadata(&target)
        .with_context(|| format!("failed to stat {}", target.display()))?
        .permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(0o444);
    }
    #[cfg(not(unix))]
    permissions.set_readonly(true);
    fs::set_permissions(&target, permissions)
        .with_context(|| format!("failed to mark {} read-only", target.display()))?;

    Ok(target)
}

fn extract_printable_runs(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut run = String::new();
    for &byte in bytes {
        if byte == b'\n' || byte == b'\t' || (0x20..0x7f).contains(&byte) {
            run.push(byte as char);
        } else {
            flush_run(&mut out, &mut run);
        }
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    // Short runs inside binary formats are structure, not prose.
    if run.trim().len() >= 4 {
        out.push_str(run.trim());
        out.push('\n');
    }
    run.clear();
}

fn strip_rtf(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(current) = chars.next() {
        match current {
            '{' | '}' => {}
            '\\' => {
                match chars.peek() {
                    Some('\\') | Some('{') | Some('}') => {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    }
                    _ => {
                        let mut word = String::new();
                        while let Some(&next) = chars.peek() {
                            if next.is_ascii_alphanumeric() || next == '-' {
                                word.push(next);
                                chars.next();
                            } else {
                                if next == ' ' {
                                    chars.next();
                                }
                                break;
                            }
                        }
                        if word == "par" || word == "line" {
                            out.push('\n');
                        }
                    }
                }
            }
            _ => out.push(current),
        }
    }
    out.trim().to_string()
}
