use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Single shared password for every user name. Identity of the caller is not
/// tracked beyond the startup handshake.
#[derive(Debug)]
pub struct TabulaAuthSource {
    password: String,
}

impl TabulaAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for TabulaAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("password lookup for user {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
