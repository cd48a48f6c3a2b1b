//! TLS material written where `ovsdb-server` and `ovn-northd` read it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ovn_central_core::{CertRole, CertificateBundle, TlsInstallError, TlsMaterialSink};

use crate::config::AppctlConfig;

/// File names used for one certificate role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsLayout {
    pub key: &'static str,
    pub cert: &'static str,
    pub ca: &'static str,
    /// Link to the directory holding the active material.
    pub current: &'static str,
}

impl TlsLayout {
    pub fn for_role(role: CertRole) -> Self {
        match role {
            CertRole::Server => TlsLayout {
                key: "key_host",
                cert: "cert_host",
                ca: "ovn-central.crt",
                current: ".server",
            },
            CertRole::Peer => TlsLayout {
                key: "key_peer",
                cert: "cert_peer",
                ca: "ovn-central-peer.crt",
                current: ".peer",
            },
        }
    }

    fn files(&self) -> [&'static str; 3] {
        [self.key, self.cert, self.ca]
    }

    /// Directory name for one version of the material.
    fn versioned(&self, version: u64) -> String {
        format!("{}-v{}", self.current, version)
    }
}

/// [`TlsMaterialSink`] writing PEM files into a directory.
///
/// Each version is written to its own directory. The well-known file names
/// link through a single `current` link, which is swapped with one rename, so
/// readers see either the old triple or the new one.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    dir: PathBuf,
}

impl TlsFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &AppctlConfig) -> Self {
        Self::new(config.tls_dir())
    }

    /// Path of a file in the TLS directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write the complete bundle into its versioned directory.
    fn stage(&self, layout: &TlsLayout, bundle: &CertificateBundle) -> io::Result<String> {
        let name = layout.versioned(bundle.version());
        let staging = self.path(&name);
        fs::create_dir_all(&staging)?;
        write_file(&staging.join(layout.key), bundle.private_key().as_bytes(), true)?;
        write_file(&staging.join(layout.cert), bundle.certificate().as_bytes(), false)?;
        write_file(&staging.join(layout.ca), bundle.ca_file_contents().as_bytes(), false)?;
        Ok(name)
    }

    #[cfg(unix)]
    fn activate(&self, layout: &TlsLayout, staged: &str) -> io::Result<()> {
        replace_link(Path::new(staged), &self.path(layout.current))?;
        for name in layout.files() {
            replace_link(&Path::new(layout.current).join(name), &self.path(name))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn activate(&self, layout: &TlsLayout, staged: &str) -> io::Result<()> {
        for name in layout.files() {
            fs::copy(self.path(staged).join(name), self.path(name))?;
        }
        Ok(())
    }

    /// Remove versions other than `keep`.
    fn prune(&self, layout: &TlsLayout, keep: &str) {
        let prefix = format!("{}-v", layout.current);
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) || name == keep {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove old TLS material");
            }
        }
    }
}

fn write_file(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    if private {
        restrict_to_owner(&file)?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

/// Point `link` at `target`, replacing whatever is there with one rename.
#[cfg(unix)]
fn replace_link(target: &Path, link: &Path) -> io::Result<()> {
    if fs::read_link(link).is_ok_and(|current| current == target) {
        return Ok(());
    }
    let file_name = link
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::other(format!("invalid path {}", link.display())))?;
    let tmp = link.with_file_name(format!(".{}.tmp", file_name));
    match fs::remove_file(&tmp) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    std::os::unix::fs::symlink(target, &tmp)?;
    fs::rename(&tmp, link)
}

#[cfg(unix)]
fn restrict_to_owner(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_: &fs::File) -> io::Result<()> {
    Ok(())
}

impl TlsMaterialSink for TlsFiles {
    fn install(&mut self, role: CertRole, bundle: &CertificateBundle) -> Result<(), TlsInstallError> {
        let layout = TlsLayout::for_role(role);
        let fail = |e: io::Error| TlsInstallError(format!("{}: {}", self.dir.display(), e));

        fs::create_dir_all(&self.dir).map_err(fail)?;
        let staged = self.stage(&layout, bundle).map_err(fail)?;
        self.activate(&layout, &staged).map_err(fail)?;
        self.prune(&layout, &staged);

        tracing::info!(
            role = ?role,
            version = bundle.version(),
            fingerprint = %bundle.fingerprint(),
            "installed TLS material"
        );
        Ok(())
    }
}
