//! Authorization challenge/response around challenged calls.

use std::fmt;

use sane_wire::rpc::AuthorizationReq;
use sane_wire::{AuthChallenge, Decode, Encode, Procedure};
use tracing::{debug, info, warn};

use crate::link::ControlLink;
use crate::NetError;

/// Upper bound on challenges answered for a single call.
pub const MAX_AUTH_ROUNDS: usize = 8;

/// Username/password pair supplied for a challenged resource.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of credentials. Called with `"host:device:resource"`; returning
/// `None` or an empty username declines.
pub trait AuthCallback: Send + Sync {
    fn authorize(&self, resource: &str) -> Option<Credentials>;
}

impl<F> AuthCallback for F
where
    F: Fn(&str) -> Option<Credentials> + Send + Sync,
{
    fn authorize(&self, resource: &str) -> Option<Credentials> {
        self(resource)
    }
}

/// Progress of the authorization exchange of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Idle,
    /// A challenge is being answered.
    Challenged,
    /// The last challenged call completed with credentials.
    Resolved,
    /// Credentials were declined; the call reported `Cancelled`.
    Abandoned,
}

impl AuthState {
    /// Whether credentials are currently being supplied.
    pub fn is_active(self) -> bool {
        matches!(self, AuthState::Challenged | AuthState::Resolved)
    }
}

/// Issue a call whose reply may carry an authorization challenge, answering
/// challenges until the peer sends the real reply.
///
/// After each `AUTHORIZE` acknowledgement the peer re-sends the reply of the
/// original call, which is read again and re-examined.
pub async fn call_authorized<Req, Rep>(
    link: &mut ControlLink,
    procedure: Procedure,
    request: &Req,
    device: &str,
    callback: Option<&dyn AuthCallback>,
    state: &mut AuthState,
) -> Result<Rep, NetError>
where
    Req: Encode + ?Sized,
    Rep: Decode + AuthChallenge,
{
    let mut reply: Rep = link.call(procedure, request).await?;
    let mut rounds = 0usize;
    while let Some(resource) = reply.resource_to_authorize().map(str::to_string) {
        if *state == AuthState::Abandoned {
            // The peer is now blocked waiting for credentials we will not send.
            warn!(host = link.host(), %resource, "challenged again after declining");
            link.mark_broken();
            return Err(NetError::Cancelled);
        }
        rounds += 1;
        if rounds > MAX_AUTH_ROUNDS {
            warn!(host = link.host(), %resource, rounds, "too many authorization rounds");
            link.mark_broken();
            *state = AuthState::Idle;
            return Err(NetError::AccessDenied {
                host: link.host().to_string(),
            });
        }
        *state = AuthState::Challenged;
        let resource_id = format!("{}:{}:{}", link.host(), device, resource);
        info!(resource = %resource_id, round = rounds, "authorization requested");
        let credentials = callback
            .and_then(|cb| cb.authorize(&resource_id))
            .filter(|c| !c.username.is_empty());
        let credentials = match credentials {
            Some(credentials) => credentials,
            None => {
                debug!(resource = %resource_id, "credentials declined");
                *state = AuthState::Abandoned;
                Credentials::default()
            }
        };
        let req = AuthorizationReq {
            resource,
            username: credentials.username,
            password: credentials.password,
        };
        let _ack: i32 = link.call(Procedure::Authorize, &req).await?;
        reply = link.read_reply().await?;
    }
    match *state {
        AuthState::Abandoned => {
            *state = AuthState::Idle;
            Err(NetError::Cancelled)
        }
        AuthState::Challenged => {
            *state = AuthState::Resolved;
            Ok(reply)
        }
        _ => Ok(reply),
    }
}
