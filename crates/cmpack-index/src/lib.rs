mod pidx;
mod web;

pub use pidx::{Pidx, PidxEntry};
pub use web::{lookup_public, pack_download_url, PublicLookup, WebIndex};

#[cfg(test)]
mod tests;
