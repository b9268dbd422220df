//! Shared security helpers for the tubedrop binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The backend handles untrusted
/// titles and shells out to external tools, so it is expected to run under a
/// dedicated unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; use the dedicated tubedrop service account");
    }
    Ok(())
}
