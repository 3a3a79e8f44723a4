//! `pxelab certs` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use pxelab_core::driver::CertificateIssuer;
use pxelab_core::error::PxelabError;
use pxelab_core::types::CertificateBundle;
use pxelab_drivers::RcgenIssuer;

use crate::cli::CertsArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `certs` command.
pub async fn execute(args: CertsArgs, writer: &OutputWriter) -> Result<(), CliError> {
    let bundle = RcgenIssuer::default()
        .issue(&args.sans)
        .map_err(PxelabError::from)?;
    let files = write_bundle(&bundle, &args.out_dir).await?;
    info!(dir = %args.out_dir.display(), files = files.len(), "certificates written");

    writer.render(&CertsReport {
        out_dir: args.out_dir.display().to_string(),
        sans: args.sans,
        files,
    })
}

/// Writes the bundle as PEM files; private keys are owner-readable only.
pub async fn write_bundle(bundle: &CertificateBundle, dir: &Path) -> Result<Vec<String>, CliError> {
    tokio::fs::create_dir_all(dir).await?;

    let entries = [
        ("ca.pem", &bundle.ca_cert, false),
        ("ca-key.pem", &bundle.ca_key, true),
        ("server.pem", &bundle.server_cert, false),
        ("server-key.pem", &bundle.server_key, true),
        ("client.pem", &bundle.client_cert, false),
        ("client-key.pem", &bundle.client_key, true),
    ];

    let mut files = Vec::with_capacity(entries.len());
    for (name, pem, private) in entries {
        let path = dir.join(name);
        tokio::fs::write(&path, pem).await?;
        if private {
            restrict(&path).await?;
        }
        files.push(path.display().to_string());
    }
    Ok(files)
}

#[cfg(unix)]
async fn restrict(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Serialize)]
pub struct CertsReport {
    pub out_dir: String,
    pub sans: Vec<String>,
    pub files: Vec<String>,
}

impl Render for CertsReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Issued CA, server and client certificates")?;
        writeln!(w, "  Server names: {}", self.sans.join(", "))?;
        for file in &self.files {
            writeln!(w, "  {file}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_bundle_creates_all_files() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("tls");
        let bundle = RcgenIssuer::default()
            .issue(&["10.42.0.1".to_owned()])
            .expect("issue");

        // When
        let files = write_bundle(&bundle, &out).await.expect("write");

        // Then
        assert_eq!(files.len(), 6);
        let server = std::fs::read_to_string(out.join("server.pem")).expect("read");
        assert!(server.starts_with("-----BEGIN CERTIFICATE-----"));
        let key = std::fs::read_to_string(out.join("client-key.pem")).expect("read");
        assert!(key.contains("PRIVATE KEY"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_keys_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = RcgenIssuer::default()
            .issue(&["pxe.lab".to_owned()])
            .expect("issue");
        write_bundle(&bundle, dir.path()).await.expect("write");

        let mode = std::fs::metadata(dir.path().join("server-key.pem"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
