//! Credentials, TLS policy and per-operation transport callbacks

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use git2::{CertificateCheckStatus, Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks};
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::RootCertStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::descriptor::TlsPolicy;
use crate::secrets::Credential;
use crate::{Error, Result};

/// Name and email recorded on commits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Everything needed to talk to one remote, fixed for the lifetime of a facade
#[derive(Clone, Default)]
pub struct AuthContext {
    /// Username presented to the remote (caller identity when the credential has none)
    pub username: String,
    secret: Option<String>,
    /// Accept any server certificate
    pub insecure_skip_tls: bool,
    /// DER certificates from the CA bundle; an exact match is accepted outright
    pinned_certs: Vec<Vec<u8>>,
    /// Verifies server certificates against the CA bundle as trust anchors
    ca_verifier: Option<Arc<WebPkiServerVerifier>>,
    /// Author derived from the credential, if it carries an email
    pub commit_author: Option<CommitAuthor>,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("username", &self.username)
            .field("has_secret", &self.secret.is_some())
            .field("insecure_skip_tls", &self.insecure_skip_tls)
            .field("pinned_certs", &self.pinned_certs.len())
            .field("commit_author", &self.commit_author)
            .finish()
    }
}

impl AuthContext {
    /// Context for a public remote
    pub fn anonymous(caller: impl Into<String>) -> Self {
        Self {
            username: caller.into(),
            ..Default::default()
        }
    }

    /// Assemble the context from the caller, an optional stored credential and the TLS policy
    pub fn from_parts(caller: &str, credential: Option<&Credential>, tls: &TlsPolicy) -> Result<Self> {
        let pinned_certs = match &tls.ca_bundle {
            Some(pem) => parse_pem_bundle(pem)?,
            None => Vec::new(),
        };
        let ca_verifier = if pinned_certs.is_empty() {
            None
        } else {
            Some(build_ca_verifier(&pinned_certs)?)
        };

        let (username, secret, commit_author) = match credential {
            Some(credential) => {
                let username = credential.username_or(caller).to_string();
                let author = credential.email().map(|email| CommitAuthor {
                    name: username.clone(),
                    email: email.to_string(),
                });
                (username, Some(credential.secret().to_string()), author)
            }
            None => (caller.to_string(), None, None),
        };

        Ok(Self {
            username,
            secret,
            insecure_skip_tls: tls.insecure_skip_verify,
            pinned_certs,
            ca_verifier,
            commit_author,
        })
    }

    /// Whether a password or token is available
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Whether the CA bundle vouches for `der` presented by `host`
    ///
    /// Accepts a leaf that chains to a bundle certificate and is valid for
    /// `host`, or a leaf that is itself in the bundle.
    fn trusts(&self, der: &[u8], host: &str) -> bool {
        if self.pinned_certs.iter().any(|pinned| pinned.as_slice() == der) {
            return true;
        }
        let Some(verifier) = &self.ca_verifier else {
            return false;
        };
        let server_name = match ServerName::try_from(host) {
            Ok(name) => name,
            Err(e) => {
                debug!(host, error = %e, "Host is not a valid TLS server name");
                return false;
            }
        };
        match verifier.verify_server_cert(&CertificateDer::from(der), &[], &server_name, &[], UnixTime::now()) {
            Ok(_) => true,
            Err(e) => {
                debug!(host, error = %e, "Server certificate not trusted by CA bundle");
                false
            }
        }
    }
}

fn build_ca_verifier(certs: &[Vec<u8>]) -> Result<Arc<WebPkiServerVerifier>> {
    let mut roots = RootCertStore::empty();
    for der in certs {
        roots
            .add(CertificateDer::from(der.clone()))
            .map_err(|e| Error::InvalidSpec(format!("invalid CA certificate: {}", e)))?;
    }
    WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::new(rustls::crypto::ring::default_provider()))
        .build()
        .map_err(|e| Error::InvalidSpec(format!("invalid CA bundle: {}", e)))
}

fn parse_pem_bundle(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::InvalidSpec(format!("invalid CA bundle: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::InvalidSpec("CA bundle contains no certificates".to_string()));
    }
    Ok(certs)
}

#[derive(Debug, Default)]
struct TransportFlags {
    credential_requests: Cell<u32>,
    deadline_hit: Cell<bool>,
    rejected: RefCell<Vec<(String, String)>>,
}

/// Callback state for a single clone, fetch, listing or push
pub(crate) struct Transport<'a> {
    auth: &'a AuthContext,
    deadline: Option<Instant>,
    operation: &'static str,
    flags: Rc<TransportFlags>,
}

impl<'a> Transport<'a> {
    pub(crate) fn new(auth: &'a AuthContext, deadline: Option<Instant>, operation: &'static str) -> Self {
        Self {
            auth,
            deadline,
            operation,
            flags: Rc::new(TransportFlags::default()),
        }
    }

    /// Fail fast when the deadline has already passed
    pub(crate) fn check_deadline(&self) -> Result<()> {
        if expired(self.deadline) {
            return Err(Error::DeadlineExceeded(self.operation.to_string()));
        }
        Ok(())
    }

    pub(crate) fn callbacks(&self) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();
        let auth = self.auth;
        let deadline = self.deadline;
        let operation = self.operation;

        let flags = Rc::clone(&self.flags);
        callbacks.credentials(move |_url, username_from_url, allowed| {
            let attempt = flags.credential_requests.get() + 1;
            flags.credential_requests.set(attempt);
            if expired(deadline) {
                flags.deadline_hit.set(true);
                return Err(git2::Error::from_str("deadline exceeded"));
            }
            // A second request means the first answer was refused
            if attempt > 1 {
                return Err(git2::Error::from_str("credentials rejected by remote"));
            }

            match &auth.secret {
                Some(secret) if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                    Cred::userpass_plaintext(&auth.username, secret)
                }
                _ if allowed.contains(CredentialType::USERNAME) => {
                    Cred::username(username_from_url.unwrap_or(&auth.username))
                }
                _ => Err(git2::Error::from_str("remote requires credentials but none are configured")),
            }
        });

        callbacks.certificate_check(move |cert, host| {
            if auth.insecure_skip_tls {
                trace!(host, "Skipping TLS verification");
                return Ok(CertificateCheckStatus::CertificateOk);
            }
            if let Some(x509) = cert.as_x509() {
                if auth.trusts(x509.data(), host) {
                    debug!(host, "Server certificate trusted by CA bundle");
                    return Ok(CertificateCheckStatus::CertificateOk);
                }
            }
            Ok(CertificateCheckStatus::CertificatePassthrough)
        });

        let flags = Rc::clone(&self.flags);
        callbacks.transfer_progress(move |progress| {
            if expired(deadline) {
                flags.deadline_hit.set(true);
                return false;
            }
            if progress.total_objects() > 0 && progress.indexed_objects() == progress.total_objects() {
                debug!(
                    operation,
                    objects = progress.total_objects(),
                    bytes = progress.received_bytes(),
                    "Transfer complete"
                );
            } else {
                trace!(
                    operation,
                    received = progress.received_objects(),
                    total = progress.total_objects(),
                    "Transfer progress"
                );
            }
            true
        });

        let flags = Rc::clone(&self.flags);
        callbacks.sideband_progress(move |line| {
            if expired(deadline) {
                flags.deadline_hit.set(true);
                return false;
            }
            debug!(operation, remote = %String::from_utf8_lossy(line).trim_end(), "Remote progress");
            true
        });

        let flags = Rc::clone(&self.flags);
        callbacks.push_negotiation(move |_updates| {
            if expired(deadline) {
                flags.deadline_hit.set(true);
                return Err(git2::Error::from_str("deadline exceeded"));
            }
            Ok(())
        });

        callbacks.push_transfer_progress(move |current, total, bytes| {
            trace!(operation, current, total, bytes, "Push progress");
        });

        let flags = Rc::clone(&self.flags);
        callbacks.push_update_reference(move |refname, status| {
            if let Some(status) = status {
                warn!(refname, status, "Remote rejected reference update");
                flags
                    .rejected
                    .borrow_mut()
                    .push((refname.to_string(), status.to_string()));
            }
            Ok(())
        });

        callbacks
    }

    pub(crate) fn fetch_options(&self) -> FetchOptions<'a> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        options
    }

    pub(crate) fn push_options(&self) -> PushOptions<'a> {
        let mut options = PushOptions::new();
        options.remote_callbacks(self.callbacks());
        options
    }

    /// References the remote refused during the last push
    pub(crate) fn rejected(&self) -> Vec<(String, String)> {
        self.flags.rejected.borrow().clone()
    }

    /// Translate a libgit2 failure using what the callbacks observed
    pub(crate) fn map_error(&self, err: git2::Error) -> Error {
        if self.flags.deadline_hit.get() || expired(self.deadline) {
            return Error::DeadlineExceeded(self.operation.to_string());
        }
        if self.flags.credential_requests.get() > 1 {
            return Error::TransportAuth(err.message().to_string());
        }
        if self.flags.credential_requests.get() == 1 && !self.auth.has_secret() {
            return Error::TransportAuth(format!("remote requires credentials: {}", err.message()));
        }
        Error::from(err)
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_parts_uses_caller_for_tokens() {
        let credential = Credential::BearerToken {
            token: "tok".into(),
            username: None,
            email: Some("bot@example.com".into()),
        };
        let auth = AuthContext::from_parts("alice", Some(&credential), &TlsPolicy::default()).unwrap();
        assert_eq!(auth.username, "alice");
        assert!(auth.has_secret());
        assert_eq!(
            auth.commit_author,
            Some(CommitAuthor {
                name: "alice".into(),
                email: "bot@example.com".into()
            })
        );
    }

    #[test]
    fn test_anonymous_has_no_author() {
        let auth = AuthContext::from_parts("bob", None, &TlsPolicy::default()).unwrap();
        assert_eq!(auth.username, "bob");
        assert!(!auth.has_secret());
        assert!(auth.commit_author.is_none());
    }

    #[test]
    fn test_invalid_ca_bundle_rejected() {
        let tls = TlsPolicy {
            insecure_skip_verify: false,
            ca_bundle: Some(b"not a certificate".to_vec()),
        };
        let err = AuthContext::from_parts("bob", None, &tls).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    fn bundle_policy(pem: &[u8]) -> TlsPolicy {
        TlsPolicy {
            insecure_skip_verify: false,
            ca_bundle: Some(pem.to_vec()),
        }
    }

    fn first_der(pem: &[u8]) -> Vec<u8> {
        parse_pem_bundle(pem).unwrap().remove(0)
    }

    const CA_PEM: &[u8] = include_bytes!("../../testdata/tls/ca.pem");
    const OTHER_CA_PEM: &[u8] = include_bytes!("../../testdata/tls/other-ca.pem");
    const SERVER_PEM: &[u8] = include_bytes!("../../testdata/tls/server.pem");

    #[test]
    fn test_ca_bundle_trusts_signed_server() {
        let auth = AuthContext::from_parts("bob", None, &bundle_policy(CA_PEM)).unwrap();
        let leaf = first_der(SERVER_PEM);
        assert!(auth.trusts(&leaf, "git.internal.test"));
        assert!(!auth.trusts(&leaf, "git.elsewhere.test"));
    }

    #[test]
    fn test_unrelated_ca_does_not_trust_server() {
        let auth = AuthContext::from_parts("bob", None, &bundle_policy(OTHER_CA_PEM)).unwrap();
        assert!(!auth.trusts(&first_der(SERVER_PEM), "git.internal.test"));

        let none = AuthContext::anonymous("bob");
        assert!(!none.trusts(&first_der(SERVER_PEM), "git.internal.test"));
    }

    #[test]
    fn test_bundle_containing_leaf_is_pinned() {
        let auth = AuthContext::from_parts("bob", None, &bundle_policy(SERVER_PEM)).unwrap();
        // Pinned certificates match regardless of the host name
        assert!(auth.trusts(&first_der(SERVER_PEM), "10.0.0.7"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let credential = Credential::SecretText {
            token: "very-secret".into(),
            email: None,
        };
        let auth = AuthContext::from_parts("c", Some(&credential), &TlsPolicy::default()).unwrap();
        assert!(!format!("{:?}", auth).contains("very-secret"));
    }

    #[test]
    fn test_expired_deadline() {
        let auth = AuthContext::anonymous("x");
        let past = Instant::now() - Duration::from_secs(1);
        let transport = Transport::new(&auth, Some(past), "fetch");
        assert!(matches!(transport.check_deadline(), Err(Error::DeadlineExceeded(_))));

        let transport = Transport::new(&auth, None, "fetch");
        assert!(transport.check_deadline().is_ok());
    }
}
