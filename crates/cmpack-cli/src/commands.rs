use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use cmpack_core::{Error, PackIdent, PackRef, Pdsc, VersionModifier};
use cmpack_index::WebIndex;
use cmpack_installer::{
    add_local_pdsc, remove_local_pdsc, resolve_pack_root, CancellationFlag, InstallOptions,
    Installation, LicensePrompt, Pack, PackRootLayout, PackRootLock, ProgressSink,
};

use crate::render::select_progress;
use crate::ui::ConsolePrompt;
use crate::{Cli, Commands, PdscCommands};

/// Top-level error sink. The same message is never printed twice in a
/// row, and the extract-license sentinel stays quiet because its side
/// effect has already been reported.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    last_message: Option<String>,
}

impl ErrorReporter {
    pub fn report(&mut self, err: &anyhow::Error) -> bool {
        if err.downcast_ref::<Error>() == Some(&Error::ExtractEula) {
            return false;
        }
        let message = format!("{err:#}");
        if self.last_message.as_deref() == Some(message.as_str()) {
            return false;
        }
        error!("{message}");
        self.last_message = Some(message);
        true
    }
}

pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<Error>()
        .map(|kind| kind.exit_code() as u8)
        .unwrap_or(1)
}

pub fn run(cli: Cli, reporter: &mut ErrorReporter) -> Result<()> {
    let timeout = Duration::from_secs(cli.timeout);
    let progress = select_progress(cli.encoded_progress, cli.quiet);
    let pack_root = cli.pack_root.as_deref();

    match cli.command {
        Commands::Init { index_url } => {
            run_init(pack_root, timeout, index_url.as_deref(), progress.as_ref())
        }
        Commands::Add {
            packs,
            agree_embedded_license,
            extract_embedded_license,
        } => run_add(
            pack_root,
            timeout,
            &packs,
            agree_embedded_license,
            extract_embedded_license,
            progress.as_ref(),
            reporter,
        ),
        Commands::Rm { packs, purge } => run_rm(pack_root, timeout, &packs, purge, reporter),
        Commands::List { cached, public } => run_list(pack_root, cached, public),
        Commands::Update { packs } => {
            run_update(pack_root, timeout, &packs, progress.as_ref(), reporter)
        }
        Commands::Validate { pack } => run_validate(pack_root, timeout, &pack, progress.as_ref()),
        Commands::Pdsc { command } => run_pdsc(pack_root, command),
    }
}

fn open_installation(
    pack_root: Option<&Path>,
    timeout: Duration,
) -> Result<(Installation, PackRootLock)> {
    let layout = resolve_pack_root(pack_root)?;
    layout.ensure_exists()?;
    let lock = PackRootLock::acquire(&layout)?;
    let installation = Installation::new(layout, timeout, CancellationFlag::new())?;
    Ok((installation, lock))
}

fn run_init(
    pack_root: Option<&Path>,
    timeout: Duration,
    index_url: Option<&str>,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let layout = resolve_pack_root(pack_root)?;
    layout.ensure_base_dirs()?;
    let _lock = PackRootLock::acquire(&layout)?;
    info!("pack root initialized at {}", layout.pack_root().display());

    if let Some(url) = index_url {
        let installation = Installation::new(layout, timeout, CancellationFlag::new())?;
        installation.seed_public_index(url, progress)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_add(
    pack_root: Option<&Path>,
    timeout: Duration,
    packs: &[String],
    agree_embedded_license: bool,
    extract_embedded_license: bool,
    progress: &dyn ProgressSink,
    reporter: &mut ErrorReporter,
) -> Result<()> {
    let (installation, _lock) = open_installation(pack_root, timeout)?;
    let prompt = ConsolePrompt;

    let mut last_error = None;
    for input in packs {
        if let Err(err) = install_one(
            &installation,
            input,
            agree_embedded_license,
            extract_embedded_license,
            &prompt,
            progress,
        ) {
            reporter.report(&err);
            last_error = Some(err);
        }
    }
    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn install_one(
    installation: &Installation,
    input: &str,
    agree_embedded_license: bool,
    extract_embedded_license: bool,
    prompt: &dyn LicensePrompt,
    progress: &dyn ProgressSink,
) -> Result<()> {
    info!("adding {input}");
    let mut pack = installation.prepare(input)?;
    if pack.is_installed && !extract_embedded_license {
        info!("{} is already installed", pack.reference);
        return Ok(());
    }

    installation.fetch(&mut pack, progress)?;
    let options = InstallOptions {
        check_eula: !agree_embedded_license,
        extract_eula: extract_embedded_license,
        prompt,
        progress,
    };
    installation.install(&mut pack, &options)?;

    info!(
        "{}.{} installed",
        pack.ident().pack_id(),
        pack.version().unwrap_or("unknown")
    );
    let missing: Vec<String> = pack
        .requirements
        .iter()
        .filter(|requirement| !requirement.installed)
        .map(|requirement| requirement.ident.pack_id())
        .collect();
    if !missing.is_empty() {
        warn!("required packs not installed: {}", missing.join(", "));
    }
    Ok(())
}

fn run_rm(
    pack_root: Option<&Path>,
    timeout: Duration,
    packs: &[String],
    purge: bool,
    reporter: &mut ErrorReporter,
) -> Result<()> {
    let (installation, _lock) = open_installation(pack_root, timeout)?;

    let mut last_error = None;
    for input in packs {
        if let Err(err) = remove_one(&installation, input, purge) {
            reporter.report(&err);
            last_error = Some(err);
        }
    }
    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn remove_one(installation: &Installation, input: &str, purge: bool) -> Result<()> {
    let pack = installation.prepare(input)?;
    if pack.is_installed {
        installation.uninstall(&pack)?;
        info!("{} removed", pack.reference);
        if purge {
            installation.purge(&pack)?;
            info!("{} purged", pack.reference);
        }
        return Ok(());
    }

    if purge {
        installation.purge(&pack)?;
        info!("{} purged", pack.reference);
        return Ok(());
    }
    Err(Error::PackNotInstalled).with_context(|| format!("{} is not installed", pack.reference))
}

fn run_list(pack_root: Option<&Path>, cached: bool, public: bool) -> Result<()> {
    let layout = resolve_pack_root(pack_root)?;
    layout.ensure_exists()?;

    let lines = if cached {
        format_cached_lines(&layout)?
    } else if public {
        format_public_lines(&layout)?
    } else {
        format_installed_lines(&layout)?
    };

    if lines.is_empty() {
        info!("nothing to list");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn format_installed_lines(layout: &PackRootLayout) -> Result<Vec<String>> {
    Ok(layout
        .installed_packs()?
        .into_iter()
        .map(|pack| format!("{}.{}", pack.ident.pack_id(), pack.version))
        .collect())
}

pub(crate) fn format_cached_lines(layout: &PackRootLayout) -> Result<Vec<String>> {
    let download_dir = layout.download_dir();
    let mut lines = Vec::new();
    if download_dir.is_dir() {
        for entry in fs::read_dir(&download_dir)
            .with_context(|| format!("failed to read {}", download_dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".pack") || name.ends_with(".zip") {
                lines.push(name);
            }
        }
    }
    lines.sort();
    Ok(lines)
}

pub(crate) fn format_public_lines(layout: &PackRootLayout) -> Result<Vec<String>> {
    let web = WebIndex::new(layout.web_dir());
    let mut lines = Vec::new();
    for path in web.list_pdsc_files()? {
        match Pdsc::from_file(&path) {
            Ok(pdsc) => {
                let latest = pdsc.latest_version().unwrap_or("unknown");
                lines.push(format!("{} (latest {latest})", pdsc.ident().pack_id()));
            }
            Err(err) => warn!("skipping {}: {err:#}", path.display()),
        }
    }
    Ok(lines)
}

fn run_update(
    pack_root: Option<&Path>,
    timeout: Duration,
    packs: &[String],
    progress: &dyn ProgressSink,
    reporter: &mut ErrorReporter,
) -> Result<()> {
    let (installation, _lock) = open_installation(pack_root, timeout)?;

    let targets: Vec<PackIdent> = if packs.is_empty() {
        let mut seen = BTreeSet::new();
        installation
            .layout()
            .installed_packs()?
            .into_iter()
            .filter(|pack| seen.insert(pack.ident.pack_id()))
            .map(|pack| pack.ident)
            .collect()
    } else {
        let mut idents = Vec::new();
        for input in packs {
            idents.push(PackRef::parse(input)?.ident);
        }
        idents
    };
    if targets.is_empty() {
        info!("no packs installed");
        return Ok(());
    }

    let prompt = ConsolePrompt;
    let mut last_error = None;
    for ident in targets {
        if let Err(err) = update_one(&installation, &ident, &prompt, progress) {
            reporter.report(&err);
            last_error = Some(err);
        }
    }
    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn update_one(
    installation: &Installation,
    ident: &PackIdent,
    prompt: &dyn LicensePrompt,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let mut pack = installation.prepare(&format!("{}@latest", ident.pack_id()))?;
    let Some(version) = pack.version().map(str::to_string) else {
        info!("{}: no descriptor available, skipping", ident.pack_id());
        return Ok(());
    };

    let exact = PackRef::from_ident(ident.clone(), Some(version.clone()), VersionModifier::Exact);
    if installation.reference_is_installed(&exact) {
        info!("{} is up to date ({version})", ident.pack_id());
        return Ok(());
    }

    installation.fetch(&mut pack, progress)?;
    let options = InstallOptions {
        check_eula: true,
        extract_eula: false,
        prompt,
        progress,
    };
    installation.install(&mut pack, &options)?;
    info!("{} updated to {version}", ident.pack_id());
    Ok(())
}

fn run_validate(
    pack_root: Option<&Path>,
    timeout: Duration,
    input: &str,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let (installation, _lock) = open_installation(pack_root, timeout)?;

    let mut pack = installation.prepare(input)?;
    if pack.reference.is_pack_id {
        return Err(Error::BadPackName).context("validate expects a pack file or URL");
    }
    installation.fetch(&mut pack, progress)?;
    installation.validate_archive(&mut pack)?;

    for line in format_validation_lines(&pack) {
        println!("{line}");
    }
    Ok(())
}

fn format_validation_lines(pack: &Pack) -> Vec<String> {
    let mut lines = vec![format!("pack: {}", pack.ident().pack_id())];
    if let Some(version) = pack.version() {
        lines.push(format!("version: {version}"));
    }
    if let Some(subfolder) = &pack.subfolder {
        lines.push(format!("subfolder: {subfolder}"));
    }
    if let Some(pdsc) = &pack.pdsc {
        lines.push(format!("releases: {}", pdsc.releases().len()));
        lines.push(format!(
            "license: {}",
            pdsc.license.as_deref().unwrap_or("none")
        ));
    }
    lines.push("ok".to_string());
    lines
}

fn run_pdsc(pack_root: Option<&Path>, command: PdscCommands) -> Result<()> {
    let layout = resolve_pack_root(pack_root)?;
    layout.ensure_exists()?;
    let _lock = PackRootLock::acquire(&layout)?;

    match command {
        PdscCommands::Add { file } => {
            let ident = add_local_pdsc(&layout, &file)?;
            info!("{} registered", ident.pack_id());
            Ok(())
        }
        PdscCommands::Rm { pack_id } => {
            let reference = PackRef::parse(&pack_id)?;
            if !reference.is_pack_id {
                return Err(Error::BadPackName).context("expected a Vendor.Pack id");
            }
            remove_local_pdsc(&layout, &reference.ident)
        }
    }
}
