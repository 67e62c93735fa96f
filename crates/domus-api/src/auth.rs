// Portal authentication
//
// Cookie-based session login/logout. Portals fronted by an OAuth token
// service derive their login parameters from a prior token exchange; the
// portal login itself is the same form POST either way, and the session
// cookie lands in the client's jar.

use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::client::{PortalClient, classify_error};
use crate::error::Error;
use crate::portal::LoginMethod;

/// Response of the OAuth token service.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

impl PortalClient {
    /// Authenticate with the portal.
    ///
    /// Direct credentials POST `userId`/`userPassword` to `login`; the
    /// token-exchange method first obtains a bearer token from the vendor's
    /// token service and logs in with `userId`/`accessToken` instead. Both
    /// paths store the session cookie in the jar on success; the exchanged
    /// bearer token is additionally applied to every subsequent request.
    pub async fn login(&self, method: &LoginMethod) -> Result<(), Error> {
        let params: Vec<(&str, String)> = match method {
            LoginMethod::Credentials { user_id, password } => vec![
                ("userId", user_id.clone()),
                ("userPassword", password.expose_secret().to_owned()),
            ],
            LoginMethod::TokenExchange {
                client_id,
                client_secret,
                user_id,
                password,
            } => {
                let token = self
                    .exchange_token(
                        client_id,
                        client_secret.expose_secret(),
                        user_id,
                        password.expose_secret(),
                    )
                    .await?;
                self.set_bearer(token.clone());
                vec![("userId", user_id.clone()), ("accessToken", token)]
            }
        };

        let url = self.url("login")?;
        debug!("logging in at {}", url);

        let resp = self
            .apply_bearer(self.http().post(url).form(&params))
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }

        debug!("login successful");
        Ok(())
    }

    /// End the current session. `POST logout`
    pub async fn logout(&self) -> Result<(), Error> {
        let url = self.url("logout")?;
        debug!("logging out at {}", url);
        self.post_no_content(url).await
    }

    /// OAuth password-grant exchange against the portal's token service.
    async fn exchange_token(
        &self,
        client_id: &str,
        client_secret: &str,
        user_id: &str,
        password: &str,
    ) -> Result<String, Error> {
        let token_url = self
            .portal()
            .token_endpoint()
            .ok_or_else(|| Error::Authentication {
                message: "portal has no token service for token-exchange login".into(),
                code: None,
            })?;

        debug!("exchanging credentials for token at {}", token_url);

        let resp = self
            .http()
            .post(token_url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("username", user_id),
                ("password", password),
            ])
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: format!("token response: {e}"),
                body,
            })?;
        Ok(token.access_token)
    }
}
