mod error;
mod pdsc;
mod reference;
mod version;

pub use error::Error;
pub use pdsc::{Pdsc, Release, RequiredPack};
pub use reference::{Location, PackIdent, PackRef, VersionModifier};
pub use version::{parse_version, resolve_version};

#[cfg(test)]
mod tests;
