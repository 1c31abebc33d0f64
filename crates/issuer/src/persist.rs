//! Certificate bundle handling and file persistence
//!
//! Files for a certificate live in `<ssl_directory>/<primary domain>/`,
//! with any `*.` wildcard prefix removed from the directory name:
//!
//! - `privkey.pem`: the certificate's private key
//! - `cert.pem`: the leaf certificate
//! - `chain.pem`: every certificate after the leaf
//!
//! Writes go to a staging directory inside `ssl_directory` first. The
//! staged directory replaces the live one with a rename only after all
//! three files are written, so readers never see a partial set. A staging
//! directory that is never committed is removed when dropped.
//!
//! A commit parks the previous set instead of deleting it. The caller then
//! either finishes the commit or rolls it back to the previous set.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::acme::challenge::normalize_domain;

pub const PRIVATE_KEY_FILE: &str = "privkey.pem";
pub const CERTIFICATE_FILE: &str = "cert.pem";
pub const CHAIN_FILE: &str = "chain.pem";

const PEM_CERTIFICATE_MARKER: &str = "-----BEGIN CERTIFICATE-----";

// ============================================================================
// Bundle parsing
// ============================================================================

/// A downloaded PEM bundle split into leaf and chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub leaf: String,
    pub chain: String,
}

/// Split a PEM bundle at each certificate marker
///
/// Returns the number of certificates found when there are fewer than two.
pub fn split_bundle(pem: &str) -> Result<CertificateBundle, usize> {
    let starts: Vec<usize> = pem
        .match_indices(PEM_CERTIFICATE_MARKER)
        .map(|(i, _)| i)
        .collect();

    if starts.len() < 2 {
        return Err(starts.len());
    }

    let leaf = &pem[starts[0]..starts[1]];
    let chain = &pem[starts[1]..];

    Ok(CertificateBundle {
        leaf: leaf.to_string(),
        chain: chain.to_string(),
    })
}

/// Read the `notAfter` time of the first certificate in `pem`
pub fn parse_certificate_expiry(pem: &str) -> Result<DateTime<Utc>, String> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| format!("Failed to parse PEM: {}", e))?;

    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| format!("Failed to parse certificate: {}", e))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| "Invalid expiry timestamp".to_string())
}

// ============================================================================
// Writer
// ============================================================================

/// Writes certificate files below a root directory
#[derive(Debug, Clone)]
pub struct CertificateWriter {
    root: PathBuf,
}

impl CertificateWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of the certificate whose primary domain
    /// is `primary_domain`
    pub fn directory_for(&self, primary_domain: &str) -> PathBuf {
        self.root.join(normalize_domain(primary_domain))
    }

    /// Write all three files into a fresh staging directory
    pub async fn stage(
        &self,
        primary_domain: &str,
        private_key_pem: String,
        bundle: CertificateBundle,
    ) -> io::Result<StagedCertificate> {
        let root = self.root.clone();
        let target = self.directory_for(primary_domain);

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            let staging = tempfile::Builder::new()
                .prefix(".staging-")
                .tempdir_in(&root)?;

            write_private(&staging.path().join(PRIVATE_KEY_FILE), &private_key_pem)?;
            std::fs::write(staging.path().join(CERTIFICATE_FILE), &bundle.leaf)?;
            std::fs::write(staging.path().join(CHAIN_FILE), &bundle.chain)?;

            debug!(staging = %staging.path().display(), "Staged certificate files");
            Ok(StagedCertificate {
                root,
                staging,
                target,
            })
        })
        .await
        .map_err(join_error)?
    }
}

/// Files written to a staging directory, not yet visible at the target
#[derive(Debug)]
pub struct StagedCertificate {
    root: PathBuf,
    staging: TempDir,
    target: PathBuf,
}

impl StagedCertificate {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the staged files into place
    ///
    /// Any previous set is parked rather than deleted until the returned
    /// [`CommittedCertificate`] is finished or rolled back.
    pub async fn commit(self) -> io::Result<CommittedCertificate> {
        tokio::task::spawn_blocking(move || self.commit_blocking())
            .await
            .map_err(join_error)?
    }

    fn commit_blocking(self) -> io::Result<CommittedCertificate> {
        let Self {
            root,
            staging,
            target,
        } = self;

        let backup = tempfile::Builder::new()
            .prefix(".previous-")
            .tempdir_in(&root)?;
        let parked = backup.path().join("certificate");

        let had_previous = target.exists();
        if had_previous {
            std::fs::rename(&target, &parked)?;
        }

        let staged_path = staging.path().to_path_buf();
        if let Err(e) = std::fs::rename(&staged_path, &target) {
            error!(target = %target.display(), error = %e, "Failed to move certificate files into place");
            if had_previous {
                if let Err(restore) = std::fs::rename(&parked, &target) {
                    error!(error = %restore, "Failed to restore previous certificate files");
                }
            }
            // `staging` still owns the staged files and removes them on drop
            return Err(e);
        }

        // Already moved; nothing left for the guard to delete
        let _ = staging.keep();

        debug!(directory = %target.display(), "Certificate files moved into place");
        Ok(CommittedCertificate {
            target,
            backup,
            had_previous,
        })
    }
}

/// Files in place at the target, with the previous set still parked
///
/// Dropping this without calling [`finish`](Self::finish) or
/// [`rollback`](Self::rollback) keeps the new files and deletes the
/// parked set.
#[derive(Debug)]
pub struct CommittedCertificate {
    target: PathBuf,
    backup: TempDir,
    had_previous: bool,
}

impl CommittedCertificate {
    pub fn directory(&self) -> &Path {
        &self.target
    }

    /// Keep the new files and delete the parked previous set
    pub async fn finish(self) -> PathBuf {
        let Self { target, backup, .. } = self;

        let removed = tokio::task::spawn_blocking(move || backup.close())
            .await
            .map_err(join_error)
            .and_then(|closed| closed);
        if let Err(e) = removed {
            warn!(error = %e, "Failed to remove previous certificate files");
        }

        info!(directory = %target.display(), "Certificate files written");
        target
    }

    /// Remove the new files and put the previous set back
    pub async fn rollback(self) -> io::Result<()> {
        tokio::task::spawn_blocking(move || self.rollback_blocking())
            .await
            .map_err(join_error)?
    }

    fn rollback_blocking(self) -> io::Result<()> {
        let Self {
            target,
            backup,
            had_previous,
        } = self;

        std::fs::remove_dir_all(&target)?;
        if had_previous {
            std::fs::rename(backup.path().join("certificate"), &target)?;
        }

        info!(
            directory = %target.display(),
            restored = had_previous,
            "Certificate files rolled back"
        );
        Ok(())
    }
}

fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents.as_bytes())
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, contents)
    }
}

fn join_error(e: tokio::task::JoinError) -> io::Error {
    io::Error::other(format!("spawn_blocking join error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(domain: &str) -> String {
        rcgen::generate_simple_self_signed(vec![domain.to_string()])
            .unwrap()
            .cert
            .pem()
    }

    #[test]
    fn test_split_two_certificates() {
        let leaf = self_signed("a.example.com");
        let issuer = self_signed("ca.example.com");
        let bundle = split_bundle(&format!("{}{}", leaf, issuer)).unwrap();

        assert_eq!(bundle.leaf, leaf);
        assert_eq!(bundle.chain, issuer);
        assert!(x509_parser::pem::parse_x509_pem(bundle.leaf.as_bytes()).is_ok());
        assert!(x509_parser::pem::parse_x509_pem(bundle.chain.as_bytes()).is_ok());
    }

    #[test]
    fn test_chain_keeps_every_intermediate() {
        let parts: Vec<String> = ["a.example.com", "int1.example.com", "int2.example.com"]
            .iter()
            .map(|d| self_signed(d))
            .collect();
        let bundle = split_bundle(&parts.concat()).unwrap();

        assert_eq!(bundle.leaf, parts[0]);
        assert_eq!(bundle.chain, format!("{}{}", parts[1], parts[2]));
    }

    #[test]
    fn test_single_certificate_is_malformed() {
        assert_eq!(split_bundle(&self_signed("a.example.com")), Err(1));
        assert_eq!(split_bundle(""), Err(0));
    }

    #[test]
    fn test_parse_expiry() {
        let expiry = parse_certificate_expiry(&self_signed("a.example.com")).unwrap();
        assert!(expiry > Utc::now());
        assert!(parse_certificate_expiry("not a certificate").is_err());
    }

    #[test]
    fn test_directory_strips_wildcard() {
        let writer = CertificateWriter::new("/srv/ssl");
        assert_eq!(
            writer.directory_for("*.example.com"),
            PathBuf::from("/srv/ssl/example.com")
        );
        assert_eq!(
            writer.directory_for("a.example.com"),
            PathBuf::from("/srv/ssl/a.example.com")
        );
    }

    #[tokio::test]
    async fn test_stage_and_commit_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CertificateWriter::new(dir.path().join("ssl"));
        let bundle = CertificateBundle {
            leaf: "LEAF-1".to_string(),
            chain: "CHAIN-1".to_string(),
        };

        let target = writer
            .stage("a.example.com", "KEY-1".to_string(), bundle)
            .await
            .unwrap()
            .commit()
            .await
            .unwrap()
            .finish()
            .await;
        assert_eq!(std::fs::read_to_string(target.join(CERTIFICATE_FILE)).unwrap(), "LEAF-1");

        let bundle = CertificateBundle {
            leaf: "LEAF-2".to_string(),
            chain: "CHAIN-2".to_string(),
        };
        writer
            .stage("a.example.com", "KEY-2".to_string(), bundle)
            .await
            .unwrap()
            .commit()
            .await
            .unwrap()
            .finish()
            .await;

        assert_eq!(std::fs::read_to_string(target.join(PRIVATE_KEY_FILE)).unwrap(), "KEY-2");
        assert_eq!(std::fs::read_to_string(target.join(CHAIN_FILE)).unwrap(), "CHAIN-2");

        // Only the live directory remains; staging and backups are gone
        let entries: Vec<_> = std::fs::read_dir(writer.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CertificateWriter::new(dir.path());
        let staged = writer
            .stage(
                "a.example.com",
                "KEY".to_string(),
                CertificateBundle {
                    leaf: "LEAF".to_string(),
                    chain: "CHAIN".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(!staged.target().exists());

        drop(staged);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = CertificateWriter::new(dir.path())
            .stage(
                "a.example.com",
                "KEY".to_string(),
                CertificateBundle {
                    leaf: "LEAF".to_string(),
                    chain: "CHAIN".to_string(),
                },
            )
            .await
            .unwrap()
            .commit()
            .await
            .unwrap()
            .finish()
            .await;

        let mode = std::fs::metadata(target.join(PRIVATE_KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    fn bundle(n: u32) -> CertificateBundle {
        CertificateBundle {
            leaf: format!("LEAF-{}", n),
            chain: format!("CHAIN-{}", n),
        }
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CertificateWriter::new(dir.path());
        let target = writer
            .stage("a.example.com", "KEY-1".to_string(), bundle(1))
            .await
            .unwrap()
            .commit()
            .await
            .unwrap()
            .finish()
            .await;

        let committed = writer
            .stage("a.example.com", "KEY-2".to_string(), bundle(2))
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(committed.directory().join(CERTIFICATE_FILE)).unwrap(),
            "LEAF-2"
        );

        committed.rollback().await.unwrap();

        assert_eq!(std::fs::read_to_string(target.join(CERTIFICATE_FILE)).unwrap(), "LEAF-1");
        assert_eq!(std::fs::read_to_string(target.join(PRIVATE_KEY_FILE)).unwrap(), "KEY-1");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_without_previous_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CertificateWriter::new(dir.path());
        let committed = writer
            .stage("a.example.com", "KEY".to_string(), bundle(1))
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();
        let target = committed.directory().to_path_buf();

        committed.rollback().await.unwrap();

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CertificateWriter::new(dir.path());
        let target = writer
            .stage("a.example.com", "KEY-1".to_string(), bundle(1))
            .await
            .unwrap()
            .commit()
            .await
            .unwrap()
            .finish()
            .await;

        let staged = writer
            .stage("a.example.com", "KEY-2".to_string(), bundle(2))
            .await
            .unwrap();
        std::fs::remove_dir_all(staged.staging.path()).unwrap();

        assert!(staged.commit().await.is_err());
        assert_eq!(std::fs::read_to_string(target.join(CERTIFICATE_FILE)).unwrap(), "LEAF-1");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
