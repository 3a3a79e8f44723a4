//! Throwaway TLS material for lab environments.
//!
//! [`RcgenIssuer`] mints a fresh CA plus one server and one client certificate,
//! all signed by that CA. Keys are never reused across calls.

use std::net::IpAddr;

use pxelab_core::driver::CertificateIssuer;
use pxelab_core::error::DriverError;
use pxelab_core::types::{CertificateBundle, ResourceKind};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};

/// Certificate issuer backed by `rcgen`.
#[derive(Debug, Clone)]
pub struct RcgenIssuer {
    organization: String,
}

impl Default for RcgenIssuer {
    fn default() -> Self {
        Self::new("pxelab")
    }
}

impl RcgenIssuer {
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
        }
    }

    fn params(&self, common_name: &str) -> CertificateParams {
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::OrganizationName, self.organization.as_str());
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
    }

    fn leaf(
        &self,
        common_name: &str,
        sans: Vec<SanType>,
        usage: ExtendedKeyUsagePurpose,
        ca: &Certificate,
        ca_key: &KeyPair,
    ) -> Result<(String, String), DriverError> {
        let mut params = self.params(common_name);
        params.subject_alt_names = sans;
        params.extended_key_usages = vec![usage];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        let key = KeyPair::generate().map_err(|e| failed(common_name, e))?;
        let cert = params
            .signed_by(&key, ca, ca_key)
            .map_err(|e| failed(common_name, e))?;
        Ok((cert.pem(), key.serialize_pem()))
    }
}

fn failed(name: &str, e: rcgen::Error) -> DriverError {
    DriverError::Failed {
        kind: ResourceKind::Certificate,
        name: name.to_owned(),
        reason: e.to_string(),
    }
}

/// Maps a subject name to an IP or DNS SAN.
fn san_for(name: &str) -> Result<SanType, DriverError> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    let dns = name.try_into().map_err(|e| failed(name, e))?;
    Ok(SanType::DnsName(dns))
}

impl CertificateIssuer for RcgenIssuer {
    fn issue(&self, server_names: &[String]) -> Result<CertificateBundle, DriverError> {
        let primary = server_names.first().ok_or_else(|| DriverError::Failed {
            kind: ResourceKind::Certificate,
            name: "server".to_owned(),
            reason: "at least one server name is required".to_owned(),
        })?;

        let mut ca_params = self.params(&format!("{} lab CA", self.organization));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca_key = KeyPair::generate().map_err(|e| failed("ca", e))?;
        let ca = ca_params
            .self_signed(&ca_key)
            .map_err(|e| failed("ca", e))?;

        let sans = server_names
            .iter()
            .map(|n| san_for(n))
            .collect::<Result<Vec<_>, _>>()?;
        let (server_cert, server_key) =
            self.leaf(primary, sans, ExtendedKeyUsagePurpose::ServerAuth, &ca, &ca_key)?;
        let (client_cert, client_key) = self.leaf(
            "pxelab-client",
            Vec::new(),
            ExtendedKeyUsagePurpose::ClientAuth,
            &ca,
            &ca_key,
        )?;

        Ok(CertificateBundle {
            ca_cert: ca.pem(),
            ca_key: ca_key.serialize_pem(),
            server_cert,
            server_key,
            client_cert,
            client_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_pem_bundle() {
        let bundle = RcgenIssuer::default()
            .issue(&["pxe.lab.local".to_owned(), "10.42.0.1".to_owned()])
            .unwrap();
        for pem in [&bundle.ca_cert, &bundle.server_cert, &bundle.client_cert] {
            assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"), "{pem}");
        }
        for pem in [&bundle.ca_key, &bundle.server_key, &bundle.client_key] {
            assert!(pem.contains("PRIVATE KEY-----"));
        }
    }

    #[test]
    fn each_issue_uses_fresh_keys() {
        let issuer = RcgenIssuer::default();
        let a = issuer.issue(&["pxe.lab.local".to_owned()]).unwrap();
        let b = issuer.issue(&["pxe.lab.local".to_owned()]).unwrap();
        assert_ne!(a.ca_key, b.ca_key);
        assert_ne!(a.server_key, b.server_key);
    }

    #[test]
    fn empty_server_names_rejected() {
        let err = RcgenIssuer::default().issue(&[]).unwrap_err();
        assert!(err.to_string().contains("at least one server name"));
    }

    #[test]
    fn ip_names_become_ip_sans() {
        assert!(matches!(san_for("10.42.0.1"), Ok(SanType::IpAddress(_))));
        assert!(matches!(san_for("pxe.lab.local"), Ok(SanType::DnsName(_))));
    }
}
