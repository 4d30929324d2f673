//! Identity bootstrap
//!
//! On startup a stable user identifier is obtained without any user
//! interaction:
//!
//! - with a bootstrap token, the token is exchanged for the identity it names
//! - otherwise an anonymous identity is created, or resumed from disk
//!
//! Failure never aborts the program. It is logged and surfaces as
//! `ready = true, user_id = None`, which the rest of the system reads as
//! "do not read or write".
//!
//! A token is `base64url(JSON {"sub": "<user id>", "iat": <millis>})`.
//! `pagelog identity token` prints one so a second device can adopt the
//! same identity.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::models::{now_millis, UserId};

/// Errors establishing an identity
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Malformed bootstrap token: {0}")]
    MalformedToken(String),

    #[error("Failed to access identity file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Something that can sign a user in
pub trait IdentityProvider: Send + Sync + 'static {
    /// Create or resume an anonymous identity
    fn sign_in_anonymously(&self) -> impl Future<Output = Result<UserId, IdentityError>> + Send;

    /// Exchange a bootstrap token for the identity it names
    fn sign_in_with_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<UserId, IdentityError>> + Send;

    /// Watch the signed-in identity
    fn on_identity_change(&self) -> watch::Receiver<Option<UserId>>;
}

/// Claims carried by a bootstrap token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The user id the token signs in as
    pub sub: String,
    /// Issue time in milliseconds since the Unix epoch
    pub iat: i64,
}

/// Produce a bootstrap token for `user_id`
pub fn issue_token(user_id: &UserId) -> String {
    let claims = TokenClaims {
        sub: user_id.as_str().to_string(),
        iat: now_millis(),
    };
    // Serializing two plain fields cannot fail
    let json = serde_json::to_vec(&claims).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode and validate a bootstrap token
pub fn decode_token(token: &str) -> Result<TokenClaims, IdentityError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| IdentityError::MalformedToken(e.to_string()))?;
    let claims: TokenClaims =
        serde_json::from_slice(&bytes).map_err(|e| IdentityError::MalformedToken(e.to_string()))?;

    if claims.sub.trim().is_empty() {
        return Err(IdentityError::MalformedToken("empty subject".to_string()));
    }
    Ok(claims)
}

/// Identity provider backed by a file in the data directory
///
/// The anonymous identity is created once and resumed on every later run.
/// Signing in with a token replaces the saved identity, so the adopted
/// identity is also resumed later.
pub struct LocalIdentityProvider {
    path: PathBuf,
    current: watch::Sender<Option<UserId>>,
}

impl LocalIdentityProvider {
    /// Provider saving the identity at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            path: path.into(),
            current,
        }
    }

    /// Provider using the configured data directory
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.identity_path())
    }

    /// Location of the identity file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The signed-in identity, if any
    pub fn current(&self) -> Option<UserId> {
        self.current.borrow().clone()
    }

    /// Read the saved identity without signing in
    pub fn saved(&self) -> Result<Option<UserId>, IdentityError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(UserId::new(id)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IdentityError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, user_id: &UserId) -> Result<(), IdentityError> {
        atomic_write(&self.path, user_id.as_str().as_bytes()).map_err(|source| {
            IdentityError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn set_current(&self, user_id: &UserId) {
        self.current.send_if_modified(|current| {
            if current.as_ref() == Some(user_id) {
                false
            } else {
                *current = Some(user_id.clone());
                true
            }
        });
    }
}

impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in_anonymously(&self) -> Result<UserId, IdentityError> {
        let user_id = match self.saved()? {
            Some(user_id) => {
                debug!("Resuming identity {}", user_id);
                user_id
            }
            None => {
                let user_id = UserId::generate();
                self.save(&user_id)?;
                info!("Created anonymous identity {}", user_id);
                user_id
            }
        };

        self.set_current(&user_id);
        Ok(user_id)
    }

    async fn sign_in_with_token(&self, token: &str) -> Result<UserId, IdentityError> {
        let claims = decode_token(token)?;
        let user_id = UserId::new(claims.sub);

        if self.saved()?.as_ref() != Some(&user_id) {
            self.save(&user_id)?;
            info!("Adopted identity {} from bootstrap token", user_id);
        }

        self.set_current(&user_id);
        Ok(user_id)
    }

    fn on_identity_change(&self) -> watch::Receiver<Option<UserId>> {
        self.current.subscribe()
    }
}

/// Outcome of identity bootstrap as seen by the rest of the system
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityState {
    /// The signed-in user, absent until established or after failure
    pub user_id: Option<UserId>,
    /// True once an identity is established or establishment has failed
    pub ready: bool,
}

impl IdentityState {
    /// Bootstrap has not finished yet
    pub fn pending() -> Self {
        Self::default()
    }

    /// Bootstrap finished with `user_id`
    pub fn established(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ready: true,
        }
    }

    /// Bootstrap failed; reads and writes stay disabled
    pub fn failed() -> Self {
        Self {
            user_id: None,
            ready: true,
        }
    }

    /// Whether bootstrap has irrecoverably failed
    pub fn is_failed(&self) -> bool {
        self.ready && self.user_id.is_none()
    }
}

/// Establish an identity once
///
/// Uses the token when present, otherwise signs in anonymously. Errors are
/// logged and reported as a failed state.
pub async fn bootstrap<P: IdentityProvider>(provider: &P, token: Option<&str>) -> IdentityState {
    let result = match token {
        Some(token) => provider.sign_in_with_token(token).await,
        None => provider.sign_in_anonymously().await,
    };

    match result {
        Ok(user_id) => IdentityState::established(user_id),
        Err(e) => {
            error!("Identity bootstrap failed: {}", e);
            IdentityState::failed()
        }
    }
}

/// Run [`bootstrap`] in the background and keep following the provider
///
/// The returned receiver starts out pending, becomes ready exactly once,
/// and afterwards tracks identity changes reported by the provider.
pub fn spawn_bootstrap<P: IdentityProvider>(
    provider: Arc<P>,
    token: Option<String>,
) -> watch::Receiver<IdentityState> {
    let (tx, rx) = watch::channel(IdentityState::pending());

    tokio::spawn(async move {
        let mut changes = provider.on_identity_change();
        let state = bootstrap(provider.as_ref(), token.as_deref()).await;
        changes.borrow_and_update();
        tx.send_replace(state);

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let user_id = changes.borrow_and_update().clone();
                    tx.send_if_modified(|state| {
                        if state.user_id == user_id {
                            false
                        } else {
                            debug!("Identity changed to {:?}", user_id);
                            state.user_id = user_id;
                            state.ready = true;
                            true
                        }
                    });
                }
                _ = tx.closed() => break,
            }
        }
    });

    rx
}

/// Write data to a file atomically
///
/// Writes to a temp file in the same directory, syncs, then renames.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)
}
