use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::Actor;

/// Parse the startup `user` parameter: `client:<ulid>`, `provider:<ulid>`
/// or `system`.
pub fn parse_actor(user: &str) -> Option<Actor> {
    let user = user.trim();
    if user.eq_ignore_ascii_case("system") {
        return Some(Actor::system());
    }
    let (role, id) = user.split_once(':')?;
    let id = Ulid::from_string(id.trim()).ok()?;
    match role.to_lowercase().as_str() {
        "client" => Some(Actor::client(id)),
        "provider" => Some(Actor::provider(id)),
        _ => None,
    }
}

pub(crate) fn bad_actor(user: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".into(),
        "28000".into(),
        format!("invalid actor {user:?}: expected client:<ulid>, provider:<ulid> or system"),
    )))
}

/// One shared password authenticates the calling gateway; the user name
/// says who it is acting for.
#[derive(Debug)]
pub struct GatewayAuthSource {
    password: String,
}

impl GatewayAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for GatewayAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if parse_actor(user).is_none() {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("rejected login for {user:?}");
            return Err(bad_actor(user));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
