use thiserror::Error;

/// Error kinds shared across the workspace. Most call sites wrap one of
/// these in an `anyhow::Error` with extra context; the CLI downcasts to
/// recover the kind for exit codes and for the few locally-handled
/// sentinels (`ExtractEula`, `TerminatedByUser`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("bad pack name: expected Vendor.Pack, Vendor.Pack.x.y.z, a .pack/.pdsc file, or a URL to one")]
    BadPackName,
    #[error("bad pack url: the url provided for this pack is malformed")]
    BadPackUrl,

    #[error("pdsc not found inside the pack archive")]
    PdscFileNotFound,
    #[error("pdsc file is too deep in the pack archive")]
    PdscFileTooDeepInPack,
    #[error("pack version not found in the pdsc file")]
    PackVersionNotFoundInPdsc,
    #[error("pack version is not the latest release in the pdsc file")]
    PackVersionNotLatestReleasePdsc,
    #[error("target pack version is not available")]
    PackVersionNotAvailable,
    #[error("embedded license not found")]
    LicenseNotFound,

    #[error("bad request")]
    BadRequest,
    #[error("failed to download file")]
    FailedDownloadingFile,

    #[error("failed to create a local file")]
    FailedCreatingFile,
    #[error("failed writing HTTP stream to local file")]
    FailedWritingToLocalFile,
    #[error("failed to decompress file")]
    FailedDecompressingFile,
    #[error("failed to inflate file")]
    FailedInflatingFile,
    #[error("file not found")]
    FileNotFound,
    #[error("directory not found")]
    DirectoryNotFound,

    #[error("archive entry name escapes the destination directory")]
    InsecureZipFileName,
    #[error("archive entries cannot be over 20G")]
    FileTooBig,

    #[error("user does not agree with the pack's license")]
    Eula,
    #[error("user wants to extract the embedded license only")]
    ExtractEula,

    #[error("pack not installed")]
    PackNotInstalled,
    #[error("pack not purgeable")]
    PackNotPurgeable,
    #[error("pdsc already in index")]
    PdscEntryExists,
    #[error("pdsc not found in index")]
    PdscEntryNotFound,
    #[error("URL for the pack cannot be determined; consider updating the public index")]
    PackUrlCannotBeFound,
    #[error("no pack root directory specified; set CMSIS_PACK_ROOT or pass -R/--pack-root")]
    PackRootNotFound,
    #[error("the pack root directory does not exist; create it with `cmpack init`")]
    PackRootDoesNotExist,

    #[error("terminated by user request")]
    TerminatedByUser,

    #[error("unknown behavior")]
    Unknown,
}

impl Error {
    /// Process exit code the CLI maps this kind to. Interrupts get the
    /// conventional SIGINT code so wrappers can tell them apart.
    pub fn exit_code(self) -> i32 {
        match self {
            Error::TerminatedByUser => 130,
            _ => 1,
        }
    }
}
