/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while persisting subscriptions or talking to the
/// registration server.
///
/// None of these are fatal, and none of them reach the callers of the
/// [`SubscriptionManager`](crate::SubscriptionManager) update operations:
/// those swallow failures by contract and retry on the next trigger. The
/// variants exist so [`Registrar`](crate::Registrar) implementations can
/// report a network failure, an auth failure and a refused registration
/// distinguishably, and so the logs say what actually went wrong.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a usable response.
    #[error("Communication error: {reason}")]
    CommunicationError { reason: String },

    /// The registration server answered with a server-side error.
    #[error("Communication server error {status}: {reason}")]
    CommunicationServerError { status: u16, reason: String },

    /// The server rejected our credentials.
    #[error("Authentication error: {reason}")]
    AuthenticationError { reason: String },

    /// A failure to read or write the subscription file.
    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),

    /// A failure to encode or decode subscription data.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A failure to parse the configured server URL.
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::CommunicationError {
            reason: e.to_string(),
        }
    }
}
