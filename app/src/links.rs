// Opening URLs in the operator's browser.
use crate::error::{HostError, Result};
use std::process::{Command, Stdio};

const MAX_URL_LEN: usize = 2048;

pub fn is_safe_http_url(url: &str) -> bool {
    if url.is_empty() || url.len() > MAX_URL_LEN {
        return false;
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    !url.chars().any(|c| c.is_ascii_control() || c.is_whitespace())
}

fn opener_command(url: &str) -> Command {
    #[cfg(windows)]
    let cmd = {
        let mut cmd = Command::new("explorer");
        cmd.arg(url);
        cmd
    };
    #[cfg(target_os = "macos")]
    let cmd = {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    };
    #[cfg(all(unix, not(target_os = "macos")))]
    let cmd = {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    };
    cmd
}

/// Hands `url` to the platform opener. Only plain http(s) URLs are accepted.
pub fn open_external_link(url: &str) -> Result<()> {
    let url = url.trim();
    if !is_safe_http_url(url) {
        return Err(HostError::InvalidLink(
            "only http and https URLs without whitespace are allowed".to_string(),
        ));
    }
    opener_command(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| HostError::InvalidLink(format!("failed to launch opener: {e}")))?;
    tracing::info!("Opened external link");
    Ok(())
}
