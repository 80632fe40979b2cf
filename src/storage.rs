/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Persistence for registered push subscriptions.
//!
//! One JSON file holds the whole user-to-subscription map. The file lives in
//! the storage directory the application chooses at construction time, which
//! is how an app shares its registrations with, say, a notification service
//! extension: both processes point at the same directory. There is no
//! cross-process locking, so whichever process persists last wins, and a
//! process only observes foreign writes when it constructs a fresh store.
//! Within one store instance every operation is serialized behind a mutex,
//! so concurrent callers always see a whole map, never a torn one.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// Name of the file the subscription map is persisted to, inside the
/// storage directory handed to [`SubscriptionStore::load`].
const SUBSCRIPTIONS_FILENAME: &str = "registered_subscriptions.json";

/// One user's desired push state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Lowercase hex encoding of the device push token. Empty until the OS
    /// has handed one out.
    #[serde(default)]
    pub token: String,

    /// Topic names the user wants delivered, in the order the application
    /// supplied them. Order is part of equality, so reordering topics counts
    /// as a change worth registering.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// The durable user-to-[`Subscription`] map.
///
/// All access goes through `get`/`put`/`remove`; the backing file is never
/// handed out. `put` and `remove` persist the entire map before returning.
pub(crate) struct SubscriptionStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionStore {
    /// Opens the store over `storage_dir`, reading the persisted map once.
    /// Never fails: an unreadable or malformed file just yields an empty
    /// map, and individually malformed records are dropped.
    pub(crate) async fn load(storage_dir: PathBuf) -> Self {
        let path = storage_dir.join(SUBSCRIPTIONS_FILENAME);
        let subscriptions = match tokio::fs::read(&path).await {
            Ok(bytes) => decode_subscription_map(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Ignoring unreadable subscription file {:?}: {}", path, e);
                HashMap::new()
            }
        };
        SubscriptionStore {
            inner: Mutex::new(StoreInner {
                path,
                subscriptions,
            }),
        }
    }

    pub(crate) async fn get(&self, user_id: i64) -> Option<Subscription> {
        let inner = self.inner.lock().await;
        inner.subscriptions.get(&user_id.to_string()).cloned()
    }

    pub(crate) async fn put(&self, user_id: i64, subscription: Subscription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .subscriptions
            .insert(user_id.to_string(), subscription);
        inner.persist().await
    }

    pub(crate) async fn remove(&self, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.subscriptions.remove(&user_id.to_string());
        inner.persist().await
    }
}

impl StoreInner {
    async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(&self.subscriptions)?;
        // Write a sibling file and rename it over the real one, so another
        // process loading concurrently never reads a half-written map.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Decodes the persisted map one record at a time, keeping whatever still
/// makes sense. A record another (possibly newer) build wrote in a shape we
/// can't read shouldn't take the rest of the map down with it.
fn decode_subscription_map(bytes: &[u8]) -> HashMap<String, Subscription> {
    let raw: HashMap<String, serde_json::Value> = match serde_json::from_slice(bytes) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Ignoring malformed subscription file: {}", e);
            return HashMap::new();
        }
    };
    raw.into_iter()
        .filter_map(|(user_id, value)| match serde_json::from_value(value) {
            Ok(subscription) => Some((user_id, subscription)),
            Err(e) => {
                warn!(
                    "Dropping malformed subscription record for user {}: {}",
                    user_id, e
                );
                None
            }
        })
        .collect()
}
