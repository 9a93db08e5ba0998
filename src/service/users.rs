use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::{failure, KeeperService};
use crate::errors::{KeeperError, Result};
use crate::rpc::messages::{AuthorizeResponse, EchoMessage, Empty, UserRequest};

const BAD_LOGIN: &str = "invalid login or password";

impl KeeperService {
    /// Create an account.  The password is stored encrypted under the
    /// envelope key, not hashed, since `authorize` compares plaintexts.
    pub(crate) async fn register(&self, req: UserRequest) -> Result<Empty> {
        if req.login.trim().is_empty() {
            return Err(KeeperError::invalid("invalid user login"));
        }
        if req.password.trim().is_empty() {
            return Err(KeeperError::invalid("invalid user password"));
        }

        let existing = self
            .storage
            .get_user(&req.login)
            .await
            .map_err(failure("error create user"))?;
        if existing.is_some() {
            return Err(KeeperError::AlreadyExists("user already exists".into()));
        }

        let sealed = self
            .cipher
            .seal_password(&req.password)
            .map_err(failure("error create user"))?;

        let user_id = match self.storage.add_user(&req.login, &sealed).await {
            Ok(id) => id,
            // Lost a race with a concurrent registration.
            Err(e @ KeeperError::AlreadyExists(_)) => return Err(e),
            Err(e) => return Err(failure("error create user")(e)),
        };

        info!(user_id, login = %req.login, "user registered");
        Ok(Empty {})
    }

    pub(crate) async fn authorize(&self, req: UserRequest) -> Result<AuthorizeResponse> {
        if req.login.is_empty() || req.password.is_empty() {
            return Err(KeeperError::denied(BAD_LOGIN));
        }

        let user = self
            .storage
            .get_user(&req.login)
            .await
            .map_err(failure("error get user"))?
            .ok_or_else(|| {
                warn!(login = %req.login, "authorize: unknown login");
                KeeperError::denied(BAD_LOGIN)
            })?;

        let stored = self.cipher.open_password(&user.password).map_err(|e| {
            warn!(user_id = user.id, error = %e, "authorize: stored password unreadable");
            KeeperError::denied(BAD_LOGIN)
        })?;

        if !bool::from(stored.as_bytes().ct_eq(req.password.as_bytes())) {
            warn!(user_id = user.id, "authorize: wrong password");
            return Err(KeeperError::denied(BAD_LOGIN));
        }

        let token = self
            .tokens
            .issue(user.id)
            .map_err(failure("error build token"))?;
        Ok(AuthorizeResponse { token })
    }

    pub(crate) fn echo(&self, req: EchoMessage) -> EchoMessage {
        req
    }
}
