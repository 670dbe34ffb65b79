mod cancel;
mod extract;
mod fetch;
mod layout;
mod license;
mod lock;
mod pack;
mod pdsc_entries;
mod progress;

pub use cancel::CancellationFlag;
pub use extract::{
    extract_archive, extract_single_entry, open_archive, sanitize_entry_name, MAX_ENTRY_SIZE,
};
pub use fetch::Fetcher;
pub use layout::{resolve_pack_root, InstalledPack, PackRootLayout};
pub use license::{decode_license_text, LicenseChoice, LicensePrompt};
pub use lock::PackRootLock;
pub use pack::{Installation, InstallOptions, Pack, Requirement};
pub use pdsc_entries::{add_local_pdsc, remove_local_pdsc};
pub use progress::{NullProgress, ProgressSink};
