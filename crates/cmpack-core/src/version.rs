use anyhow::{anyhow, Result};
use log::debug;
use semver::Version;

use crate::{Error, PackRef, Pdsc, VersionModifier};

/// Parses a release version, padding out the `x` and `x.y` shorthands a
/// few descriptors in the wild carry.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim().trim_start_matches('v');
    Version::parse(trimmed)
        .or_else(|_| Version::parse(&format!("{trimmed}.0")))
        .or_else(|_| Version::parse(&format!("{trimmed}.0.0")))
        .map_err(|_| anyhow!("invalid semantic version \"{input}\""))
}

/// Picks the concrete release the reference's version modifier selects
/// from the descriptor's (newest-first) release history.
///
/// `Greater` deliberately resolves to the newest release whenever that
/// release satisfies the minimum, even if closer matches exist: the
/// modifier means "the latest, as long as it is at least this".
pub fn resolve_version(reference: &PackRef, pdsc: &Pdsc) -> Result<String> {
    match reference.modifier {
        VersionModifier::Exact => reference
            .version
            .clone()
            .ok_or_else(|| anyhow!("exact reference carries no version: {reference}")),

        VersionModifier::Latest | VersionModifier::Any => {
            let latest = latest_of(pdsc)?;
            debug!("resolved {reference} to latest release {latest}");
            Ok(latest.to_string())
        }

        VersionModifier::Greater => {
            let wanted = required_version(reference)?;
            let latest = latest_of(pdsc)?;
            if wanted > parse_version(latest)? {
                return Err(Error::PackVersionNotAvailable.into());
            }
            debug!("resolved {reference} to {latest}");
            Ok(latest.to_string())
        }

        VersionModifier::GreatestCompatible => {
            let wanted = required_version(reference)?;
            for release in pdsc.releases() {
                let Ok(candidate) = parse_version(&release.version) else {
                    debug!("skipping malformed release version {}", release.version);
                    continue;
                };
                if candidate.major == wanted.major && candidate >= wanted {
                    debug!("resolved {reference} to {}", release.version);
                    return Ok(release.version.clone());
                }
            }
            Err(Error::PackVersionNotAvailable.into())
        }

        VersionModifier::Range => {
            let (min, max) = reference
                .range_bounds()
                .ok_or_else(|| anyhow!("range reference carries no bounds: {reference}"))?;
            let latest = latest_of(pdsc)?.to_string();
            let max = max.unwrap_or(&latest);
            if parse_version(&latest)? == parse_version(max)? {
                return Ok(latest);
            }

            let min_version = parse_version(min)?;
            let max_version = parse_version(max)?;
            let mut best: Option<(Version, String)> = None;
            for release in pdsc.releases() {
                let Ok(candidate) = parse_version(&release.version) else {
                    continue;
                };
                if candidate < min_version || candidate > max_version {
                    continue;
                }
                if best
                    .as_ref()
                    .map(|(best_version, _)| candidate > *best_version)
                    .unwrap_or(true)
                {
                    best = Some((candidate, release.version.clone()));
                }
            }

            match best {
                Some((_, version)) => {
                    debug!("resolved {reference} to {version}");
                    Ok(version)
                }
                None => Err(Error::PackVersionNotAvailable.into()),
            }
        }
    }
}

fn latest_of(pdsc: &Pdsc) -> Result<&str> {
    pdsc.latest_version()
        .ok_or_else(|| Error::PackVersionNotAvailable.into())
}

fn required_version(reference: &PackRef) -> Result<Version> {
    let raw = reference
        .version
        .as_deref()
        .ok_or_else(|| anyhow!("reference carries no version: {reference}"))?;
    parse_version(raw)
}
