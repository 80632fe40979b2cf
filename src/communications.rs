/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Communication with the registration server.
//!
//! The sync engine only needs the [`Registrar`] capability; [`HttpRegistrar`]
//! is the shipped implementation, speaking the device registration endpoint
//! with a per-user bearer token.

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{DeviceInfo, RegistrationConfig};
use crate::error::{Error, Result};

/// An authenticated channel to the registration server, scoped to one
/// signed-in user.
///
/// [`SubscriptionManager`](crate::SubscriptionManager) takes one of these per
/// call rather than owning one: a multi-account application holds several
/// authenticated sessions at once, and each trigger names the user it fires
/// for.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registrar: Send + Sync {
    /// The identity of the authenticated user, or `None` when no user is
    /// resolvable on this channel (e.g. the session has been signed out).
    fn user_id(&self) -> Option<i64>;

    /// Submit `token` and `topics` as the registered subscription for
    /// `user_id`.
    ///
    /// `Ok(false)` means the server refused the registration without raising
    /// a transport or auth error; both kinds of failure tell the caller not
    /// to consider the subscription registered.
    async fn register(&self, user_id: i64, token: &str, topics: &[String]) -> Result<bool>;
}

/// The bearer token and identity of one signed-in user.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_token: String,
    pub user_id: i64,
}

/// [`Registrar`] implementation over the HTTP registration endpoint.
pub struct HttpRegistrar {
    endpoint: Url,
    credentials: Option<Credentials>,
    device: DeviceInfo,
    client: reqwest::Client,
}

impl HttpRegistrar {
    /// Builds a registrar for the server named in `config`, acting for the
    /// user in `credentials`. Pass `None` to model "nobody signed in": the
    /// result is a channel whose operations are all no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured host does not form a valid URL.
    pub fn new(config: &RegistrationConfig, credentials: Option<Credentials>) -> Result<Self> {
        let endpoint = Url::parse(&format!(
            "{}://{}/1/devices/register",
            config.http_protocol, config.server_host
        ))?;
        Ok(HttpRegistrar {
            endpoint,
            credentials,
            device: config.device.clone(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Registrar for HttpRegistrar {
    fn user_id(&self) -> Option<i64> {
        self.credentials.as_ref().map(|c| c.user_id)
    }

    async fn register(&self, user_id: i64, token: &str, topics: &[String]) -> Result<bool> {
        let credentials = match &self.credentials {
            Some(credentials) => credentials,
            None => {
                return Err(Error::AuthenticationError {
                    reason: "no signed-in user on this channel".to_string(),
                })
            }
        };
        debug!("Submitting push registration for user {}", user_id);
        let infos = RegistrationInfos {
            os: &self.device.os,
            token,
            model: &self.device.model,
            name: &self.device.name,
            is_sandboxed: self.device.sandboxed,
            topics,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&credentials.access_token)
            .json(&infos)
            .send()
            .await?;
        let response = check_response_error(response).await?;
        let body: RegisterResponse = response.json().await?;
        debug!(
            "Registration for user {} returned result {:?}",
            user_id, body.result
        );
        Ok(body.data.unwrap_or(false))
    }
}

/// Wire form of one registration submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationInfos<'a> {
    os: &'a str,
    token: &'a str,
    model: &'a str,
    name: &'a str,
    is_sandboxed: bool,
    topics: &'a [String],
}

/// Response envelope returned by the registration endpoint. `data` carries
/// the success indicator; a missing or null `data` counts as a refusal.
#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    result: String,
    #[serde(default)]
    data: Option<bool>,
}

/// Maps non-2xx responses onto the error taxonomy before the body is
/// interpreted.
async fn check_response_error(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_server_error() {
        return Err(Error::CommunicationServerError {
            status: status.as_u16(),
            reason: response.text().await.unwrap_or_default(),
        });
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::AuthenticationError {
            reason: format!("server answered {}", status),
        });
    }
    if status.is_client_error() {
        return Err(Error::CommunicationError {
            reason: format!("unhandled client error {}", status),
        });
    }
    Ok(response)
}
