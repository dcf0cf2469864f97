//! HTTP client for the identity service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::application::profiles::{IdentityError, IdentityProvider};
use crate::domain::entities::CachedProfile;
use crate::infra::error::InfraError;

const CURRENT_USER_PATH: &str = "users/@me";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    details: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HttpIdentityClient {
    client: Client,
    base: Url,
}

impl HttpIdentityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let mut base = Url::parse(base_url)
            .map_err(|err| InfraError::configuration(format!("identity base url: {err}")))?;
        // `join` replaces the last segment unless the path ends in a slash.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("identity client: {err}")))?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("postline/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, path: &str) -> Result<Url, IdentityError> {
        self.base
            .join(path)
            .map_err(|err| IdentityError::Transport(err.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityClient {
    async fn fetch_current_user(&self, credential: &str) -> Result<CachedProfile, IdentityError> {
        let resp = self
            .client
            .get(self.url(CURRENT_USER_PATH)?)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|err| IdentityError::Transport(err.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|err| IdentityError::Transport(err.to_string()))?;

        if status != StatusCode::OK {
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|body| body.details);
            warn!(status = status.as_u16(), detail = ?detail, "identity service rejected request");
            return Err(IdentityError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        serde_json::from_slice(&body).map_err(|err| IdentityError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_preserved_when_joining() {
        let client =
            HttpIdentityClient::new("http://identity.local/api", Duration::from_secs(1)).expect("client");
        let url = client.url(CURRENT_USER_PATH).expect("url");
        assert_eq!(url.as_str(), "http://identity.local/api/users/@me");
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        let err = HttpIdentityClient::new("not a url", Duration::from_secs(1)).expect_err("invalid");
        assert!(matches!(err, InfraError::Configuration { .. }));
    }
}
