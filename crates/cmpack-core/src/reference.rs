use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::Error;

lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"^[0-9A-Za-z_-]+$").expect("ident regex");
    static ref VERSION_RE: Regex =
        Regex::new(r"^\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.+-]+)?$").expect("version regex");
    static ref ARCHIVE_RE: Regex = Regex::new(
        r"^(?P<vendor>[0-9A-Za-z_-]+)\.(?P<name>[0-9A-Za-z_-]+)(?:\.(?P<version>\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.+-]+)?))?\.(?P<ext>pack|zip|pdsc)$"
    )
    .expect("archive file name regex");
}

/// How the version part of a reference selects a concrete release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionModifier {
    Exact,
    Latest,
    Any,
    Greater,
    GreatestCompatible,
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    HttpUrl(String),
    LocalFile(PathBuf),
    PackId,
}

/// The `Vendor.Pack` pair and the file names derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackIdent {
    pub vendor: String,
    pub name: String,
}

impl PackIdent {
    pub fn pack_id(&self) -> String {
        format!("{}.{}", self.vendor, self.name)
    }

    pub fn pdsc_file_name(&self) -> String {
        format!("{}.pdsc", self.pack_id())
    }

    pub fn pdsc_file_name_with_version(&self, version: &str) -> String {
        format!("{}.{version}.pdsc", self.pack_id())
    }

    pub fn pack_file_name(&self, version: &str) -> String {
        format!("{}.{version}.pack", self.pack_id())
    }
}

impl fmt::Display for PackIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.vendor, self.name)
    }
}

/// A parsed pack reference. Immutable once built; the canonical textual
/// form is produced by `Display` and `parse(format(r)) == r` holds for
/// every well-formed pack-id reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRef {
    pub ident: PackIdent,
    pub version: Option<String>,
    pub modifier: VersionModifier,
    pub location: Location,
    pub is_pack_id: bool,
}

impl PackRef {
    pub fn parse(input: &str) -> Result<PackRef> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::BadPackName.into());
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            return Self::parse_http_url(input);
        }
        if input.starts_with("file://") {
            let url = Url::parse(input).map_err(|_| Error::BadPackUrl)?;
            let path = url.to_file_path().map_err(|_| Error::BadPackUrl)?;
            return Self::parse_local_file(path);
        }
        if has_archive_extension(input) || input.contains('/') || input.contains('\\') {
            return Self::parse_local_file(PathBuf::from(input));
        }

        Self::parse_pack_id(input)
    }

    /// Builds a pack-id reference directly, bypassing the textual
    /// grammar. Used for the synthetic references the dependency
    /// recorder constructs from PDSC requirement entries.
    pub fn from_ident(
        ident: PackIdent,
        version: Option<String>,
        modifier: VersionModifier,
    ) -> PackRef {
        PackRef {
            ident,
            version,
            modifier,
            location: Location::PackId,
            is_pack_id: true,
        }
    }

    fn parse_http_url(input: &str) -> Result<PackRef> {
        let mut url = Url::parse(input).map_err(|_| Error::BadPackUrl)?;

        // User credentials, query strings and fragments never take part
        // in deciding what the reference points at.
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_query(None);
        url.set_fragment(None);

        let base_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or(Error::BadPackUrl)?
            .to_string();
        let (ident, version) = parse_archive_file_name(&base_name)?;
        let modifier = match version {
            Some(_) => VersionModifier::Exact,
            None => VersionModifier::Any,
        };

        Ok(PackRef {
            ident,
            version,
            modifier,
            location: Location::HttpUrl(url.to_string()),
            is_pack_id: false,
        })
    }

    fn parse_local_file(path: PathBuf) -> Result<PackRef> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(Error::BadPackName)?;
        let (ident, version) = parse_archive_file_name(file_name)?;
        let modifier = match version {
            Some(_) => VersionModifier::Exact,
            None => VersionModifier::Any,
        };

        Ok(PackRef {
            ident,
            version,
            modifier,
            location: Location::LocalFile(path),
            is_pack_id: false,
        })
    }

    fn parse_pack_id(input: &str) -> Result<PackRef> {
        let (id_part, version, modifier) = if let Some((left, right)) = input.split_once(">=") {
            (
                left,
                Some(validate_plain_version(right)?),
                VersionModifier::Greater,
            )
        } else if let Some((left, right)) = input.split_once('@') {
            if right == "latest" {
                (left, None, VersionModifier::Latest)
            } else if let Some(rest) = right.strip_prefix('~') {
                (
                    left,
                    Some(validate_plain_version(rest)?),
                    VersionModifier::GreatestCompatible,
                )
            } else if right.contains(':') {
                (left, Some(validate_range(right)?), VersionModifier::Range)
            } else {
                (
                    left,
                    Some(validate_plain_version(right)?),
                    VersionModifier::Exact,
                )
            }
        } else {
            return Self::parse_dotted_pack_id(input);
        };

        let (vendor, name) = id_part.split_once('.').ok_or(Error::BadPackName)?;
        let ident = parse_ident_parts(vendor, name)?;
        Ok(PackRef::from_ident(ident, version, modifier))
    }

    fn parse_dotted_pack_id(input: &str) -> Result<PackRef> {
        let mut parts = input.splitn(3, '.');
        let vendor = parts.next().unwrap_or_default();
        let name = parts.next().ok_or(Error::BadPackName)?;
        let ident = parse_ident_parts(vendor, name)?;

        match parts.next() {
            None => Ok(PackRef::from_ident(ident, None, VersionModifier::Any)),
            Some(rest) if rest.contains(':') => Ok(PackRef::from_ident(
                ident,
                Some(validate_range(rest)?),
                VersionModifier::Range,
            )),
            Some(rest) => Ok(PackRef::from_ident(
                ident,
                Some(validate_plain_version(rest)?),
                VersionModifier::Exact,
            )),
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self.location, Location::HttpUrl(_))
    }

    /// The `min`/`max` bounds of a range reference; `None` max means an
    /// open upper bound (`min:_`).
    pub fn range_bounds(&self) -> Option<(&str, Option<&str>)> {
        if self.modifier != VersionModifier::Range {
            return None;
        }
        let raw = self.version.as_deref()?;
        let (min, max) = raw.split_once(':')?;
        Some((min, (max != "_").then_some(max)))
    }
}

impl fmt::Display for PackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Location::HttpUrl(url) => write!(f, "{url}"),
            Location::LocalFile(path) => write!(f, "{}", path.display()),
            Location::PackId => {
                let id = self.ident.pack_id();
                match (self.modifier, self.version.as_deref()) {
                    (VersionModifier::Latest, _) => write!(f, "{id}@latest"),
                    (VersionModifier::Exact, Some(version)) => write!(f, "{id}.{version}"),
                    (VersionModifier::Range, Some(version)) => write!(f, "{id}.{version}"),
                    (VersionModifier::GreatestCompatible, Some(version)) => {
                        write!(f, "{id}@~{version}")
                    }
                    (VersionModifier::Greater, Some(version)) => write!(f, "{id}>={version}"),
                    _ => write!(f, "{id}"),
                }
            }
        }
    }
}

fn has_archive_extension(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.ends_with(".pack") || lower.ends_with(".zip") || lower.ends_with(".pdsc")
}

fn parse_ident_parts(vendor: &str, name: &str) -> Result<PackIdent> {
    if !IDENT_RE.is_match(vendor) || !IDENT_RE.is_match(name) {
        return Err(Error::BadPackName.into());
    }
    Ok(PackIdent {
        vendor: vendor.to_string(),
        name: name.to_string(),
    })
}

fn validate_plain_version(version: &str) -> Result<String> {
    if !VERSION_RE.is_match(version) {
        return Err(Error::BadPackName.into());
    }
    Ok(version.to_string())
}

fn validate_range(raw: &str) -> Result<String> {
    let (min, max) = raw.split_once(':').ok_or(Error::BadPackName)?;
    if !VERSION_RE.is_match(min) {
        return Err(Error::BadPackName.into());
    }
    if max != "_" && !VERSION_RE.is_match(max) {
        return Err(Error::BadPackName.into());
    }
    Ok(format!("{min}:{max}"))
}

fn parse_archive_file_name(file_name: &str) -> Result<(PackIdent, Option<String>)> {
    let captures = ARCHIVE_RE.captures(file_name).ok_or(Error::BadPackName)?;
    let version = captures.name("version").map(|m| m.as_str().to_string());

    // Pack archives always carry their version in the file name; only
    // descriptor files may leave it off.
    if version.is_none() && &captures["ext"] != "pdsc" {
        return Err(Error::BadPackName.into());
    }

    Ok((
        PackIdent {
            vendor: captures["vendor"].to_string(),
            name: captures["name"].to_string(),
        },
        version,
    ))
}
