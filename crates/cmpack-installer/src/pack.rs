use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use regex::Regex;
use zip::ZipArchive;

use cmpack_core::{
    parse_version, resolve_version, Error, Location, PackIdent, PackRef, Pdsc, VersionModifier,
};
use cmpack_index::{lookup_public, pack_download_url, WebIndex};

use crate::extract::{extract_archive, extract_single_entry, open_archive};
use crate::license::{
    decode_license_text, read_license_bytes, write_extracted_license, LicenseChoice, LicensePrompt,
};
use crate::{CancellationFlag, Fetcher, NullProgress, PackRootLayout, ProgressSink};

/// One required package recorded from the PDSC `requirements` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub ident: PackIdent,
    pub version_spec: Option<String>,
    pub installed: bool,
}

/// The record of one pack moving through the install pipeline: created
/// by `prepare`, enriched by `fetch`, committed by `install`.
#[derive(Debug, Clone)]
pub struct Pack {
    pub reference: PackRef,
    pub target_version: Option<String>,
    pub is_public: bool,
    pub is_installed: bool,
    pub is_downloaded: bool,
    pub archive_path: Option<PathBuf>,
    pub subfolder: Option<String>,
    pub pdsc: Option<Pdsc>,
    pub requirements: Vec<Requirement>,
    pub requirements_satisfied: bool,
    pub(crate) download_url: Option<String>,
}

impl Pack {
    fn new(reference: PackRef) -> Pack {
        Pack {
            reference,
            target_version: None,
            is_public: false,
            is_installed: false,
            is_downloaded: false,
            archive_path: None,
            subfolder: None,
            pdsc: None,
            requirements: Vec::new(),
            requirements_satisfied: false,
            download_url: None,
        }
    }

    pub fn ident(&self) -> &PackIdent {
        &self.reference.ident
    }

    /// The concrete version this pack resolves to: the reference's own
    /// version for exact references, the resolver's pick otherwise.
    pub fn version(&self) -> Option<&str> {
        match self.reference.modifier {
            VersionModifier::Exact => self.reference.version.as_deref(),
            _ => self.target_version.as_deref(),
        }
    }

    fn resolved_version(&self) -> Result<&str> {
        self.version()
            .ok_or_else(|| anyhow!("no resolved version for {}", self.reference))
    }
}

/// Install-time knobs threaded in from the command layer. There is no
/// process-wide license or progress state; every decision input arrives
/// here.
pub struct InstallOptions<'a> {
    /// Ask the user to confirm any embedded license. When false the
    /// license is considered pre-agreed.
    pub check_eula: bool,
    /// Extract the embedded license next to the archive instead of
    /// installing.
    pub extract_eula: bool,
    pub prompt: &'a dyn LicensePrompt,
    pub progress: &'a dyn ProgressSink,
}

/// All pack-root mutation happens through this value. Other components
/// (the index, the reference parser) stay read-only on disk.
#[derive(Debug)]
pub struct Installation {
    layout: PackRootLayout,
    fetcher: Fetcher,
    cancel: CancellationFlag,
}

impl Installation {
    pub fn new(
        layout: PackRootLayout,
        timeout: Duration,
        cancel: CancellationFlag,
    ) -> Result<Installation> {
        let fetcher = Fetcher::new(timeout)?;
        Ok(Installation {
            layout,
            fetcher,
            cancel,
        })
    }

    pub fn layout(&self) -> &PackRootLayout {
        &self.layout
    }

    pub fn cancel_flag(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Parses a pack reference and reconciles it against the public
    /// index: decides whether the pack is public, resolves the target
    /// version when a descriptor is available, and records whether the
    /// pack is already installed.
    pub fn prepare(&self, input: &str) -> Result<Pack> {
        let reference = PackRef::parse(input)?;
        debug!("preparing {reference}");
        let mut pack = Pack::new(reference);
        let web = WebIndex::new(self.layout.web_dir());
        let ident = pack.reference.ident.clone();

        if pack.reference.is_pack_id {
            let mut lookup = lookup_public(&web, &ident)?;
            if lookup.pdsc.is_none() {
                if let Some(pdsc_url) = lookup.pending_pdsc_url.clone() {
                    info!("fetching public descriptor for {ident}");
                    self.fetcher.download(
                        &pdsc_url,
                        &self.layout.web_dir(),
                        &self.cancel,
                        &NullProgress,
                    )?;
                    lookup.pdsc = Some(Pdsc::from_file(&self.layout.web_pdsc_path(&ident))?);
                }
            }

            if let Some(pdsc) = lookup.pdsc {
                pack.is_public = true;
                let version = resolve_version(&pack.reference, &pdsc)?;
                pack.download_url =
                    self.determine_download_url(&pdsc, &ident, &version)?;
                pack.target_version = Some(version);
            } else {
                // Not public: a locally registered PDSC can still
                // resolve the reference; otherwise only explicit
                // file/URL references can proceed to a fetch.
                let local_pdsc_path = self.layout.local_pdsc_path(&ident);
                if local_pdsc_path.is_file() {
                    let pdsc = Pdsc::from_file(&local_pdsc_path)?;
                    let version = resolve_version(&pack.reference, &pdsc)?;
                    pack.download_url = pack_download_url(&pdsc, &ident, &version).ok();
                    pack.target_version = Some(version);
                }
            }
        } else {
            pack.is_public = web.find_pdsc(&ident)?.is_some();
            pack.target_version = pack.reference.version.clone();
        }

        pack.is_installed = self.reference_is_installed(&pack.reference);
        Ok(pack)
    }

    fn determine_download_url(
        &self,
        pdsc: &Pdsc,
        ident: &PackIdent,
        version: &str,
    ) -> Result<Option<String>> {
        match pack_download_url(pdsc, ident, version) {
            Ok(url) => Ok(Some(url)),
            Err(err) => {
                // A cached archive lets the install proceed offline.
                if self.layout.downloaded_pack_path(ident, version).is_file() {
                    warn!("{err:#}; falling back to the cached archive");
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Makes the pack archive available as a local file: downloads it,
    /// reuses the `.Download/` cache, or verifies an explicit local
    /// path.
    pub fn fetch(&self, pack: &mut Pack, progress: &dyn ProgressSink) -> Result<()> {
        match pack.reference.location.clone() {
            Location::HttpUrl(url) => {
                let path =
                    self.fetcher
                        .download(&url, &self.layout.cache_dir(), &self.cancel, progress)?;
                pack.archive_path = Some(path);
                pack.is_downloaded = true;
                Ok(())
            }
            Location::LocalFile(path) => {
                if !path.is_file() {
                    return Err(Error::FileNotFound)
                        .with_context(|| format!("file {} does not exist", path.display()));
                }
                pack.archive_path = Some(path);
                pack.is_downloaded = false;
                Ok(())
            }
            Location::PackId => {
                let ident = pack.reference.ident.clone();
                let version = pack.resolved_version().map_err(|_| {
                    anyhow::Error::from(Error::PdscEntryNotFound).context(format!(
                        "no descriptor known for {}, pass a URL or file instead",
                        pack.reference
                    ))
                })?;

                let cached = self.layout.downloaded_pack_path(&ident, version);
                if cached.is_file() {
                    info!("using cached archive {}", cached.display());
                    pack.archive_path = Some(cached);
                    pack.is_downloaded = false;
                    return Ok(());
                }

                let Some(url) = pack.download_url.clone() else {
                    let kind = if pack.is_public {
                        Error::PackUrlCannotBeFound
                    } else {
                        Error::PdscEntryNotFound
                    };
                    return Err(kind)
                        .with_context(|| format!("cannot fetch {}", pack.reference));
                };
                let path =
                    self.fetcher
                        .download(&url, &self.layout.cache_dir(), &self.cancel, progress)?;
                pack.archive_path = Some(path);
                pack.is_downloaded = true;
                Ok(())
            }
        }
    }

    /// Commits a fetched pack into the pack-root: validates the
    /// descriptor, gates on the embedded license, inflates the tree,
    /// reconciles descriptor copies, and disposes of the archive.
    /// Failure leaves no partial pack home behind.
    pub fn install(&self, pack: &mut Pack, options: &InstallOptions<'_>) -> Result<()> {
        let archive_path = pack
            .archive_path
            .clone()
            .ok_or_else(|| anyhow!("pack has not been fetched: {}", pack.reference))?;
        debug!("installing \"{}\"", archive_path.display());

        let mut archive = open_archive(&archive_path)?;
        self.validate(pack, &mut archive)?;

        let ident = pack.reference.ident.clone();
        let version = pack.resolved_version()?.to_string();
        let home_dir = self.layout.pack_home_dir(&ident, &version);
        let backup_path = self.layout.downloaded_pack_path(&ident, &version);

        let license = pack
            .pdsc
            .as_ref()
            .and_then(|pdsc| pdsc.license.clone())
            .filter(|license| !license.trim().is_empty());
        match license {
            Some(license_path) => {
                if options.extract_eula {
                    let bytes = read_license_bytes(&mut archive, &license_path)?;
                    write_extracted_license(
                        &archive_path,
                        &license_path,
                        &decode_license_text(&bytes),
                    )?;
                    return Err(Error::ExtractEula.into());
                }

                if options.check_eula {
                    let bytes = read_license_bytes(&mut archive, &license_path)?;
                    let text = decode_license_text(&bytes);
                    match options.prompt.display(&license_path, &text)? {
                        LicenseChoice::Agree => {}
                        LicenseChoice::Decline => {
                            info!("user does not agree with the pack's license, not installing it");
                            return Err(Error::Eula.into());
                        }
                        LicenseChoice::Extract => {
                            write_extracted_license(&archive_path, &license_path, &text)?;
                            return Err(Error::ExtractEula.into());
                        }
                    }
                } else {
                    info!(
                        "agreed to embedded license: {}",
                        home_dir.join(license_path.replace('\\', "/")).display()
                    );
                }
            }
            None if options.extract_eula => {
                return Err(Error::LicenseNotFound)
                    .with_context(|| format!("{} embeds no license", pack.reference));
            }
            None => {}
        }

        fs::create_dir_all(&home_dir)
            .with_context(|| format!("failed to create {}", home_dir.display()))?;
        info!("extracting files to {}", home_dir.display());
        if let Err(err) = extract_archive(
            &mut archive,
            &home_dir,
            pack.subfolder.as_deref(),
            &self.cancel,
            options.progress,
        ) {
            if err.downcast_ref::<Error>() == Some(&Error::TerminatedByUser) {
                info!("aborting pack extraction, removing {}", home_dir.display());
            }
            if let Err(cleanup_err) = fs::remove_dir_all(&home_dir) {
                warn!(
                    "failed to clean up partial {}: {cleanup_err}",
                    home_dir.display()
                );
            }
            self.prune_empty_family_dirs(&ident);
            return Err(err);
        }

        // Windows cannot rename the archive while it is open.
        drop(archive);

        let pdsc_file = home_dir.join(ident.pdsc_file_name());
        fs::create_dir_all(self.layout.download_dir())
            .with_context(|| format!("failed to create {}", self.layout.download_dir().display()))?;
        copy_file(&pdsc_file, &self.layout.downloaded_pdsc_path(&ident, &version))?;

        if !pack.is_public {
            fs::create_dir_all(self.layout.local_dir())
                .with_context(|| format!("failed to create {}", self.layout.local_dir().display()))?;
            copy_file(&pdsc_file, &self.layout.local_pdsc_path(&ident))?;
        }

        if archive_path != backup_path {
            if pack.is_downloaded {
                move_file(&archive_path, &backup_path)?;
                pack.archive_path = Some(backup_path);
            } else {
                copy_file(&archive_path, &backup_path)?;
            }
        }

        self.load_requirements(pack)?;
        pack.is_installed = true;
        Ok(())
    }

    /// Downloads a public index file into `.Web/index.pidx` so bare
    /// pack-ids can be reconciled against it.
    pub fn seed_public_index(&self, url: &str, progress: &dyn ProgressSink) -> Result<PathBuf> {
        let fetched = self
            .fetcher
            .download(url, &self.layout.cache_dir(), &self.cancel, progress)?;
        fs::create_dir_all(self.layout.web_dir())
            .with_context(|| format!("failed to create {}", self.layout.web_dir().display()))?;
        let target = self.layout.web_dir().join("index.pidx");
        move_file(&fetched, &target)?;
        info!("public index saved to {}", target.display());
        Ok(target)
    }

    /// Runs the descriptor checks on a fetched archive without
    /// installing anything.
    pub fn validate_archive(&self, pack: &mut Pack) -> Result<()> {
        let archive_path = pack
            .archive_path
            .clone()
            .ok_or_else(|| anyhow!("pack has not been fetched: {}", pack.reference))?;
        let mut archive = open_archive(&archive_path)?;
        self.validate(pack, &mut archive)
    }

    /// Locates and parses the embedded PDSC, recording the archive
    /// subfolder and enforcing the version-consistency rules.
    fn validate(&self, pack: &mut Pack, archive: &mut ZipArchive<File>) -> Result<()> {
        debug!("validating pack");
        let pdsc_file_name = pack.reference.ident.pdsc_file_name();

        let entry_name = archive
            .file_names()
            .find(|name| {
                let normalized = name.replace('\\', "/");
                normalized
                    .rsplit('/')
                    .next()
                    .map(|base| base == pdsc_file_name)
                    .unwrap_or(false)
            })
            .map(str::to_string);
        let Some(entry_name) = entry_name else {
            return Err(Error::PdscFileNotFound)
                .with_context(|| format!("\"{pdsc_file_name}\" not found in the archive"));
        };

        let normalized = entry_name.replace('\\', "/");
        let separators = normalized.matches('/').count();
        if separators > 1 {
            return Err(Error::PdscFileTooDeepInPack)
                .with_context(|| format!("\"{entry_name}\" is nested too deeply"));
        }
        if separators == 1 {
            pack.subfolder = normalized.split('/').next().map(str::to_string);
        }

        let scratch = self.layout.cache_dir().join(format!(
            "pdsc-{}-{}",
            std::process::id(),
            unix_timestamp_nanos()
        ));
        let parsed = (|| -> Result<Pdsc> {
            let extracted = extract_single_entry(archive, &entry_name, &scratch)?;
            Pdsc::from_file(&extracted)
        })();
        let _ = fs::remove_dir_all(&scratch);
        let pdsc = parsed?;

        let version = pack.resolved_version()?.to_string();
        let latest = pdsc
            .latest_version()
            .map(str::to_string)
            .ok_or(Error::PackVersionNotFoundInPdsc)?;
        debug!("making sure {version} is the latest release in {pdsc_file_name}");
        if latest != version {
            if pdsc.release(&version).is_none() {
                return Err(Error::PackVersionNotFoundInPdsc).with_context(|| {
                    format!("{pdsc_file_name} has no release tag matching \"{version}\"")
                });
            }
            return Err(Error::PackVersionNotLatestReleasePdsc).with_context(|| {
                format!("latest release ({latest}) does not match pack version \"{version}\"")
            });
        }

        pack.pdsc = Some(pdsc);
        Ok(())
    }

    /// Removes an installed pack tree, pruning empty parents and the
    /// `.Local` descriptor of a non-public pack whose last version is
    /// gone. `.Download` copies survive; see `purge`.
    pub fn uninstall(&self, pack: &Pack) -> Result<()> {
        let ident = &pack.reference.ident;
        // An exact reference removes that version; a bare one removes
        // every installed version of the pack.
        let target = match (pack.reference.modifier, pack.reference.version.as_deref()) {
            (VersionModifier::Exact, Some(version)) => self.layout.pack_home_dir(ident, version),
            _ => self.layout.pack_family_dir(ident),
        };
        if !target.is_dir() {
            return Err(Error::PackNotInstalled)
                .with_context(|| format!("{} is not installed", pack.reference));
        }

        info!("removing {}", target.display());
        set_tree_readonly(&target, false);
        fs::remove_dir_all(&target)
            .with_context(|| format!("failed to remove {}", target.display()))?;

        let family = self.layout.pack_family_dir(ident);
        if is_empty_dir(&family) {
            fs::remove_dir(&family)
                .with_context(|| format!("failed to remove {}", family.display()))?;
        }
        if !family.exists() && !pack.is_public {
            match fs::remove_file(self.layout.local_pdsc_path(ident)) {
                Ok(()) => debug!("removed {}", self.layout.local_pdsc_path(ident).display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!(
                            "failed to remove {}",
                            self.layout.local_pdsc_path(ident).display()
                        )
                    });
                }
            }
        }

        let vendor = self.layout.vendor_dir(&ident.vendor);
        if is_empty_dir(&vendor) {
            fs::remove_dir(&vendor)
                .with_context(|| format!("failed to remove {}", vendor.display()))?;
        }
        Ok(())
    }

    /// Removes `.Download/` cache entries for the pack: the archive and
    /// descriptor files of the referenced version, or of every version
    /// when the reference names none.
    pub fn purge(&self, pack: &Pack) -> Result<()> {
        let ident = &pack.reference.ident;
        let version_pattern = match (pack.reference.modifier, pack.reference.version.as_deref()) {
            (VersionModifier::Exact, Some(version)) => regex::escape(version),
            _ => String::from(".*?"),
        };
        let pattern = format!(
            "^{}\\.{}\\.{}\\.(?:pack|zip|pdsc)$",
            regex::escape(&ident.vendor),
            regex::escape(&ident.name),
            version_pattern
        );
        let matcher = Regex::new(&pattern).context("failed to build purge pattern")?;
        debug!("purging \"{}\" with pattern {pattern}", pack.reference);

        let download_dir = self.layout.download_dir();
        let mut matches = Vec::new();
        if download_dir.is_dir() {
            for entry in fs::read_dir(&download_dir)
                .with_context(|| format!("failed to read {}", download_dir.display()))?
            {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.path().is_file() && matcher.is_match(&name) {
                    matches.push(entry.path());
                }
            }
        }

        if matches.is_empty() {
            return Err(Error::PackNotPurgeable)
                .with_context(|| format!("nothing cached for {}", pack.reference));
        }
        for path in matches {
            set_file_readonly(&path, false);
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Sets the read-only bit across the installed tree and the pack's
    /// descriptor and cache files. Best-effort: filesystems that ignore
    /// the bit degrade to a no-op.
    pub fn lock(&self, pack: &Pack) -> Result<()> {
        self.toggle_read_only(pack, true)
    }

    pub fn unlock(&self, pack: &Pack) -> Result<()> {
        self.toggle_read_only(pack, false)
    }

    fn toggle_read_only(&self, pack: &Pack, read_only: bool) -> Result<()> {
        let ident = &pack.reference.ident;
        let version = pack.resolved_version()?;

        set_tree_readonly(&self.layout.pack_home_dir(ident, version), read_only);
        set_file_readonly(&self.layout.downloaded_pack_path(ident, version), read_only);
        set_file_readonly(&self.layout.downloaded_pdsc_path(ident, version), read_only);
        let pdsc_path = if pack.is_public {
            self.layout.web_pdsc_path(ident)
        } else {
            self.layout.local_pdsc_path(ident)
        };
        set_file_readonly(&pdsc_path, read_only);
        Ok(())
    }

    /// The dependency recorder: notes each required package and whether
    /// some installed version satisfies it. Never installs anything.
    pub fn load_requirements(&self, pack: &mut Pack) -> Result<()> {
        let Some(pdsc) = pack.pdsc.clone() else {
            return Ok(());
        };

        let mut requirements = Vec::new();
        let mut installed_count = 0usize;
        for dependency in pdsc.dependencies() {
            let (modifier, version) = dependency.version_spec();
            let reference = PackRef::from_ident(dependency.ident(), version.clone(), modifier);
            let installed = self.reference_is_installed(&reference);
            if installed {
                installed_count += 1;
            }
            requirements.push(Requirement {
                ident: dependency.ident(),
                version_spec: dependency.version.clone(),
                installed,
            });
        }

        pack.requirements_satisfied = installed_count == requirements.len();
        pack.requirements = requirements;
        Ok(())
    }

    /// Whether some installed version satisfies the reference's version
    /// modifier.
    pub fn reference_is_installed(&self, reference: &PackRef) -> bool {
        let versions = self.layout.installed_versions(&reference.ident);
        if versions.is_empty() {
            return false;
        }

        match reference.modifier {
            VersionModifier::Any | VersionModifier::Latest => true,
            VersionModifier::Exact => reference
                .version
                .as_deref()
                .map(|wanted| versions.iter().any(|have| have == wanted))
                .unwrap_or(false),
            VersionModifier::Greater => {
                match_installed(&versions, reference.version.as_deref(), |have, wanted| {
                    have >= wanted
                })
            }
            VersionModifier::GreatestCompatible => {
                match_installed(&versions, reference.version.as_deref(), |have, wanted| {
                    have.major == wanted.major && have >= wanted
                })
            }
            VersionModifier::Range => {
                let Some((min, max)) = reference.range_bounds() else {
                    return false;
                };
                let Ok(min_version) = parse_version(min) else {
                    return false;
                };
                let max_version = max.and_then(|raw| parse_version(raw).ok());
                versions.iter().any(|have| {
                    parse_version(have)
                        .map(|have| {
                            have >= min_version
                                && max_version
                                    .as_ref()
                                    .map(|max| have <= *max)
                                    .unwrap_or(true)
                        })
                        .unwrap_or(false)
                })
            }
        }
    }

    fn prune_empty_family_dirs(&self, ident: &PackIdent) {
        for dir in [
            self.layout.pack_family_dir(ident),
            self.layout.vendor_dir(&ident.vendor),
        ] {
            if is_empty_dir(&dir) && fs::remove_dir(&dir).is_err() {
                debug!("could not prune {}", dir.display());
            }
        }
    }
}

fn match_installed(
    versions: &[String],
    wanted: Option<&str>,
    accept: impl Fn(&semver::Version, &semver::Version) -> bool,
) -> bool {
    let Some(wanted) = wanted.and_then(|raw| parse_version(raw).ok()) else {
        return false;
    };
    versions
        .iter()
        .filter_map(|have| parse_version(have).ok())
        .any(|have| accept(&have, &wanted))
}

fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    debug!(
        "copying {} to {}",
        source.display(),
        destination.display()
    );
    fs::copy(source, destination).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    Ok(())
}

fn move_file(source: &Path, destination: &Path) -> Result<()> {
    debug!(
        "moving {} to {}",
        source.display(),
        destination.display()
    );
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Rename fails across filesystems; fall back to copy.
            copy_file(source, destination)?;
            fs::remove_file(source)
                .with_context(|| format!("failed to remove {}", source.display()))
        }
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn set_file_readonly(path: &Path, read_only: bool) {
    let Ok(metadata) = fs::metadata(path) else {
        return;
    };
    let mut permissions = metadata.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = permissions.mode();
        permissions.set_mode(if read_only {
            mode & !0o222
        } else {
            mode | 0o200
        });
    }
    #[cfg(not(unix))]
    permissions.set_readonly(read_only);
    if fs::set_permissions(path, permissions).is_err() {
        debug!("could not toggle read-only on {}", path.display());
    }
}

fn set_tree_readonly(path: &Path, read_only: bool) {
    if path.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                set_tree_readonly(&entry.path(), read_only);
            }
        }
    }
    set_file_readonly(path, read_only);
}

fn unix_timestamp_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}
