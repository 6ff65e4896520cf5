use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::model::UserId;
use crate::observability;

/// Shared-password auth where the login user name doubles as the caller's
/// identity. A user name that is not a well-formed user id never gets as far
/// as the password check.
#[derive(Debug)]
pub struct ItemShareAuthSource {
    password: String,
}

impl ItemShareAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

pub(crate) fn identity_error(message: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".into(),
        "28000".into(),
        message.to_string(),
    )))
}

/// Parse a login user name as the acting identity.
pub fn login_identity(user: Option<&str>) -> PgWireResult<UserId> {
    let Some(user) = user else {
        return Err(identity_error("login requires a user name"));
    };
    user.parse()
        .map_err(|e| identity_error(&format!("login user '{user}' is not a valid user id: {e}")))
}

#[async_trait]
impl AuthSource for ItemShareAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if let Err(e) = login_identity(login.user()) {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("rejected login: {e}");
            return Err(e);
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
