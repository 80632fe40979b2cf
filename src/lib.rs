/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]

//! # Push Subscriptions Component
//!
//! This component keeps each signed-in user's push *subscription* (the
//! device token handed out by the platform's push infrastructure plus the
//! list of topics the user wants delivered) registered with the
//! application's registration server, while remembering what the server last
//! accepted so redundant registrations are skipped.
//!
//! ## Background Concepts
//!
//! A device obtains one push token from the OS, but an application can have
//! several users signed in at once, each of whom must be registered with the
//! server separately (the server delivers a user's notifications to every
//! device that registered for them). Tokens rotate whenever the OS feels
//! like it, topic choices change with application settings, and either can
//! change while the other stays put. This component reconciles those partial
//! updates: it stores one [`Subscription`] per user, diffs every incoming
//! change against it, and only talks to the server when something actually
//! differs.
//!
//! Registration is *best effort*. A failed or refused registration is
//! logged and dropped, and because local state is only updated once the
//! server accepts, the same divergence is simply detected again on the next
//! trigger (the next token callback or topic change) and retried then. No
//! failures are surfaced to callers and no retry scheduling exists.
//!
//! ## API
//!
//! Construct one [`SubscriptionManager`] per process over the storage
//! directory of your choice. Each operation that talks to the server takes
//! a [`Registrar`], the authenticated channel for the user the trigger
//! fired for. [`HttpRegistrar`] implements it over the device registration
//! endpoint; tests and embedders with their own transport can substitute
//! anything else.
//!
//! There are three triggers to wire up:
//!
//! * the OS push-registration callback hands you raw token bytes: call
//!   [`SubscriptionManager::update_token`];
//! * application logic changes the desired topic list: call
//!   [`SubscriptionManager::update_topics`];
//! * the user signs out: call
//!   [`SubscriptionManager::remove_stored_subscription`].
//!
//! ```no_run
//! use push_subscriptions::{
//!     Credentials, DeviceInfo, HttpRegistrar, Protocol, RegistrationConfig,
//!     SubscriptionManager, UpdatePolicy,
//! };
//!
//! # async fn example(token_bytes: &[u8]) -> push_subscriptions::Result<()> {
//! let config = RegistrationConfig {
//!     server_host: "registration.example.com".to_string(),
//!     http_protocol: Protocol::Https,
//!     device: DeviceInfo {
//!         os: "ios".to_string(),
//!         model: "iPhone".to_string(),
//!         name: "My iPhone".to_string(),
//!         sandboxed: false,
//!     },
//! };
//!
//! // One manager for the whole app, over the storage directory.
//! let manager = SubscriptionManager::new("/path/to/storage").await;
//!
//! // One registrar per signed-in account.
//! let registrar = HttpRegistrar::new(
//!     &config,
//!     Some(Credentials {
//!         access_token: "the-user-access-token".to_string(),
//!         user_id: 42,
//!     }),
//! )?;
//!
//! // From the OS push-registration callback:
//! manager
//!     .update_token(&registrar, token_bytes, UpdatePolicy::IfModified)
//!     .await;
//!
//! // When the user's topic choices change:
//! manager
//!     .update_topics(&registrar, vec!["new-mail".to_string()])
//!     .await;
//!
//! // On logout:
//! manager.remove_stored_subscription(42).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage
//!
//! Subscriptions are persisted as one JSON map in
//! `registered_subscriptions.json` inside the storage directory. A
//! notification service extension can share the map by constructing its own
//! manager over the same directory (on iOS, an app-group container). There
//! is deliberately no cross-process locking: whichever process persists
//! last wins, each process sees the other's writes only when it constructs
//! a fresh manager, and any divergence this leaves behind is caught by the
//! normal diff-and-retry cycle.

mod communications;
mod config;
mod error;
mod manager;
mod storage;

pub use communications::{Credentials, HttpRegistrar, Registrar};
pub use config::{DeviceInfo, Protocol, RegistrationConfig};
pub use error::{Error, Result};
pub use manager::{SubscriptionManager, UpdatePolicy};
pub use storage::Subscription;
