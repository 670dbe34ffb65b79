use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::blocking::Client;
use url::Url;

use cmpack_core::Error;

use crate::{CancellationFlag, ProgressSink};

const CHUNK_SIZE: usize = 64 * 1024;

/// Blocking HTTP fetcher. Streams responses to disk in fixed chunks,
/// reporting progress and honoring the cancellation flag between
/// chunks. Partial files never survive a failed or cancelled download.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Fetcher> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Fetcher { client })
    }

    /// Downloads `url` into `dest_dir/<basename of url>` and returns
    /// the written path.
    pub fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        cancel: &CancellationFlag,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        let file_name = url_base_name(url)?;
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let dest = dest_dir.join(&file_name);
        debug!("downloading {url} to {}", dest.display());

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| {
                anyhow::Error::from(Error::FailedDownloadingFile)
                    .context(format!("GET {url} failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::BadRequest)
                .with_context(|| format!("GET {url} returned status {status}"));
        }

        let total = response.content_length().unwrap_or(0);
        let mut out = File::create(&dest).map_err(|err| {
            anyhow::Error::from(Error::FailedCreatingFile)
                .context(format!("failed to create {}: {err}", dest.display()))
        })?;

        progress.begin(&file_name, total);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                drop(out);
                discard_partial(&dest);
                progress.finish();
                info!("aborting download, removing {}", dest.display());
                return Err(Error::TerminatedByUser.into());
            }

            let read = match response.read(&mut buffer) {
                Ok(read) => read,
                Err(err) => {
                    drop(out);
                    discard_partial(&dest);
                    progress.finish();
                    return Err(Error::FailedDownloadingFile)
                        .with_context(|| format!("stream from {url} failed: {err}"));
                }
            };
            if read == 0 {
                break;
            }

            if let Err(err) = out.write_all(&buffer[..read]) {
                drop(out);
                discard_partial(&dest);
                progress.finish();
                return Err(Error::FailedWritingToLocalFile)
                    .with_context(|| format!("failed writing {}: {err}", dest.display()));
            }

            written += read as u64;
            progress.advance(written);
        }
        progress.finish();

        debug!("downloaded {written} bytes");
        Ok(dest)
    }
}

fn url_base_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|_| Error::BadPackUrl)?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::BadPackUrl.into())
}

fn discard_partial(dest: &Path) {
    if fs::remove_file(dest).is_err() {
        debug!("could not remove partial download {}", dest.display());
    }
}
