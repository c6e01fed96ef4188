//! Identity material handed to the transport on connect
//!
//! The core never verifies identities itself; it only assembles the provider
//! and verifier pair the transport expects.

use core::fmt;
use std::path::PathBuf;

/// Public key used to verify JWT identities
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: String,
    pub pem: String,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("algorithm", &self.algorithm)
            .field("pem", &format_args!("<{} bytes>", self.pem.len()))
            .finish()
    }
}

/// How the local endpoint proves its identity
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityProvider {
    SharedSecret {
        identity: String,
        shared_secret: String,
    },
    StaticJwt {
        path: PathBuf,
    },
}

/// How the local endpoint verifies remote identities
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityVerifier {
    SharedSecret {
        identity: String,
        shared_secret: String,
    },
    Jwt {
        public_key: PublicKey,
        issuer: String,
        audience: Vec<String>,
        subject: String,
    },
}

impl fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityProvider::SharedSecret { identity, .. } => f
                .debug_struct("SharedSecret")
                .field("identity", identity)
                .field("shared_secret", &"<redacted>")
                .finish(),
            IdentityProvider::StaticJwt { path } => {
                f.debug_struct("StaticJwt").field("path", path).finish()
            }
        }
    }
}

impl fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityVerifier::SharedSecret { identity, .. } => f
                .debug_struct("SharedSecret")
                .field("identity", identity)
                .field("shared_secret", &"<redacted>")
                .finish(),
            IdentityVerifier::Jwt {
                public_key,
                issuer,
                audience,
                subject,
            } => f
                .debug_struct("Jwt")
                .field("public_key", public_key)
                .field("issuer", issuer)
                .field("audience", audience)
                .field("subject", subject)
                .finish(),
        }
    }
}

/// Provider and verifier sharing one secret
pub fn create_shared_secret_auth(
    identity: impl Into<String>,
    secret: impl Into<String>,
) -> (IdentityProvider, IdentityVerifier) {
    let identity = identity.into();
    let shared_secret = secret.into();
    (
        IdentityProvider::SharedSecret {
            identity: identity.clone(),
            shared_secret: shared_secret.clone(),
        },
        IdentityVerifier::SharedSecret {
            identity,
            shared_secret,
        },
    )
}

/// Provider reading a static JWT, verifier checking issuer, subject and audience
pub fn create_jwt_auth(
    jwt_path: impl Into<PathBuf>,
    issuer: impl Into<String>,
    subject: impl Into<String>,
    audience: impl Into<String>,
    public_key: PublicKey,
) -> (IdentityProvider, IdentityVerifier) {
    (
        IdentityProvider::StaticJwt {
            path: jwt_path.into(),
        },
        IdentityVerifier::Jwt {
            public_key,
            issuer: issuer.into(),
            audience: vec![audience.into()],
            subject: subject.into(),
        },
    )
}
