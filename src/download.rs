// ============================================
// Talon - download.rs
// ============================================
// Fetches a file over HTTP(S) and streams it to disk.
//
// Used for the WinUtil script. The server behind the short URL
// redirects a few times, so redirects are followed.
// ============================================

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

const USER_AGENT: &str = "Talon/1.0";

/// Download `url` to `dest`. Returns false (and logs why) on any failure.
/// A partial file is removed so nobody runs half a script.
pub fn download(url: &str, dest: &Path) -> bool {
    match download_to(url, dest) {
        Ok(bytes) => {
            info!("Downloaded {} ({} bytes) to {}", url, bytes, dest.display());
            true
        }
        Err(e) => {
            error!("Download of {} failed: {:#}", url, e);
            let _ = fs::remove_file(dest);
            false
        }
    }
}

fn download_to(url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    info!("Fetching {}", url);
    let mut response = client
        .get(url)
        .send()
        .context("Failed to connect to download server")?;

    debug!("Response status: {}, final URL: {}", response.status(), response.url());
    if !response.status().is_success() {
        anyhow::bail!("Download failed with status: {}", response.status());
    }

    let mut file = File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut buffer = [0u8; 8192];
    let mut downloaded: u64 = 0;

    loop {
        let bytes_read = response.read(&mut buffer).context("Error reading download data")?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])
            .context("Error writing downloaded file")?;
        downloaded += bytes_read as u64;
    }

    file.flush().context("Error flushing downloaded file")?;

    if downloaded == 0 {
        anyhow::bail!("Server returned an empty file");
    }
    Ok(downloaded)
}
