/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The subscription sync engine.
//!
//! Exposes [`SubscriptionManager`], which decides whether a user's locally
//! stored subscription already reflects what the application wants, calls
//! the registration server when it does not, and persists whatever the
//! server accepted so the next trigger can skip the call.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::communications::Registrar;
use crate::error::Result;
use crate::storage::{Subscription, SubscriptionStore};

/// Controls when [`SubscriptionManager::update_token`] may skip the remote
/// registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Register only when the token differs from the stored one.
    IfModified,
    /// Register whether or not the token changed.
    Forced,
}

/// Keeps each signed-in user's push subscription registered with the server.
///
/// The manager owns the local [`Subscription`] store and is shared by all
/// accounts; the authenticated channel for the user a trigger fires for is
/// passed into each call. Update operations never report failure: a failed
/// registration leaves local state untouched, so the divergence is detected
/// and retried the next time any trigger fires for that user.
///
/// Concurrent updates for the same user are not locked against each other.
/// Both may read the same "before" state, both may call the server, and the
/// later persist wins. Registration is idempotent server-side, so the state
/// converges on the next trigger.
pub struct SubscriptionManager {
    store: SubscriptionStore,
}

impl SubscriptionManager {
    /// Opens a manager over `storage_dir`, reading previously registered
    /// subscriptions once.
    ///
    /// Point two processes (say, an app and its notification service
    /// extension) at the same directory to share subscriptions between
    /// them. There is no cross-process locking: the last process to persist
    /// wins, and a process only sees foreign writes when it constructs a
    /// fresh manager.
    pub async fn new(storage_dir: impl Into<PathBuf>) -> Self {
        SubscriptionManager {
            store: SubscriptionStore::load(storage_dir.into()).await,
        }
    }

    /// Registers a new device push token for the user `registrar` is signed
    /// in as, keeping whatever topics are already stored for them.
    ///
    /// Call this from the OS push-registration callback with the raw token
    /// bytes; they are stored and submitted as lowercase hex.
    ///
    /// # Arguments
    /// - `registrar`: the authenticated channel of the user the token
    ///   belongs to. If nobody is signed in on it, this is a no-op.
    /// - `token_data`: the raw token bytes from the OS.
    /// - `policy`: [`UpdatePolicy::IfModified`] skips the server when the
    ///   token matches the stored one; [`UpdatePolicy::Forced`] always
    ///   re-registers.
    pub async fn update_token(
        &self,
        registrar: &impl Registrar,
        token_data: &[u8],
        policy: UpdatePolicy,
    ) {
        let user_id = match registrar.user_id() {
            Some(user_id) => user_id,
            None => {
                debug!("No signed-in user to register a push token for");
                return;
            }
        };
        let token = hex::encode(token_data);
        let existing = self.store.get(user_id).await.unwrap_or_default();
        if policy == UpdatePolicy::IfModified && existing.token == token {
            // Already up to date, no need to bother the server.
            debug!("Push token for user {} is unchanged", user_id);
            return;
        }
        let candidate = Subscription {
            token,
            topics: existing.topics,
        };
        if let Err(e) = self.merge_and_register(registrar, user_id, candidate).await {
            // Fail silently; the next trigger for this user retries.
            warn!("Failed to register push token for user {}: {}", user_id, e);
        }
    }

    /// Replaces the topic list for the user `registrar` is signed in as,
    /// keeping their stored token.
    ///
    /// Topic order is significant: handing the same names in a different
    /// order counts as a change and is pushed to the server. If no token is
    /// stored yet the topics are only remembered locally; they ride along
    /// once [`update_token`](Self::update_token) delivers one.
    pub async fn update_topics(&self, registrar: &impl Registrar, topics: Vec<String>) {
        let user_id = match registrar.user_id() {
            Some(user_id) => user_id,
            None => {
                debug!("No signed-in user to update push topics for");
                return;
            }
        };
        let existing = self.store.get(user_id).await.unwrap_or_default();
        if existing.topics == topics {
            debug!("Push topics for user {} are unchanged", user_id);
            return;
        }
        let candidate = Subscription {
            token: existing.token,
            topics,
        };
        if let Err(e) = self.merge_and_register(registrar, user_id, candidate).await {
            warn!("Failed to register push topics for user {}: {}", user_id, e);
        }
    }

    /// Forgets the stored subscription for `user_id`, e.g. after they sign
    /// out. Local-only: the server keeps whatever registration it last
    /// accepted, and no authenticated channel is needed.
    pub async fn remove_stored_subscription(&self, user_id: i64) {
        if let Err(e) = self.store.remove(user_id).await {
            warn!(
                "Failed to remove the stored subscription for user {}: {}",
                user_id, e
            );
        }
    }

    /// The locally stored subscription for `user_id`, if any. Never calls
    /// the server.
    pub async fn subscription_for(&self, user_id: i64) -> Option<Subscription> {
        self.store.get(user_id).await
    }

    /// Reconciles `candidate` against the server and the local store.
    ///
    /// Without a device token there is nothing the server could deliver to,
    /// so an empty-token candidate is persisted locally and the call is
    /// skipped. Otherwise the server goes first, and the candidate is
    /// persisted only once it accepts; a refusal or failure leaves the
    /// previous state in place for the next trigger to retry from.
    async fn merge_and_register(
        &self,
        registrar: &impl Registrar,
        user_id: i64,
        candidate: Subscription,
    ) -> Result<()> {
        if candidate.token.is_empty() {
            return self.store.put(user_id, candidate).await;
        }
        if registrar
            .register(user_id, &candidate.token, &candidate.topics)
            .await?
        {
            self.store.put(user_id, candidate).await?;
        } else {
            info!("Server refused the registration for user {}", user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::communications::MockRegistrar;
    use crate::error::Error;
    use tempfile::TempDir;

    const TEST_USER_ID: i64 = 8231;
    const OTHER_USER_ID: i64 = 617;
    const TEST_TOKEN_DATA: &[u8] = &[0xaa, 0xbb, 0xcc];

    fn test_dir() -> TempDir {
        let _ = env_logger::builder().is_test(true).try_init();
        tempfile::tempdir().unwrap()
    }

    async fn test_manager(dir: &TempDir) -> SubscriptionManager {
        SubscriptionManager::new(dir.path()).await
    }

    fn registrar_for(user_id: i64) -> MockRegistrar {
        let mut registrar = MockRegistrar::new();
        registrar.expect_user_id().return_const(Some(user_id));
        registrar
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    /// Registers "aabbcc" with no topics for `TEST_USER_ID`, expecting one
    /// accepted remote call.
    async fn seed_registered_token(manager: &SubscriptionManager) {
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .times(1)
            .returning(|_, _, _| Ok(true));
        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::IfModified)
            .await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: vec![],
            })
        );
    }

    /// Delivers the token once topics are already stored locally, without
    /// asserting on the submitted values.
    async fn deliver_token(manager: &SubscriptionManager) {
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .times(1)
            .returning(|_, _, _| Ok(true));
        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::IfModified)
            .await;
    }

    #[tokio::test]
    async fn test_update_token_registers_and_persists() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .withf(|&user_id, token, topics| {
                user_id == TEST_USER_ID && token == "aabbcc" && topics.is_empty()
            })
            .times(1)
            .returning(|_, _, _| Ok(true));

        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::IfModified)
            .await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_unchanged_token_is_not_reregistered() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        seed_registered_token(&manager).await;

        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().never();
        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::IfModified)
            .await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_forced_update_reregisters_unchanged_token() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        seed_registered_token(&manager).await;

        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .withf(|_, token, _| token == "aabbcc")
            .times(1)
            .returning(|_, _, _| Ok(true));
        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::Forced)
            .await;
    }

    #[tokio::test]
    async fn test_topics_without_token_skip_the_server() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().never();

        manager.update_topics(&registrar, topics(&["a", "b"])).await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: String::new(),
                topics: topics(&["a", "b"]),
            })
        );
    }

    #[tokio::test]
    async fn test_token_arrival_registers_remembered_topics() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().never();
        manager.update_topics(&registrar, topics(&["a", "b"])).await;

        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .withf(|&user_id, token, topics| {
                user_id == TEST_USER_ID && token == "aabbcc" && topics == ["a", "b"]
            })
            .times(1)
            .returning(|_, _, _| Ok(true));
        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::IfModified)
            .await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: topics(&["a", "b"]),
            })
        );
    }

    #[tokio::test]
    async fn test_refused_registration_is_not_persisted() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .times(1)
            .returning(|_, _, _| Ok(false));

        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::IfModified)
            .await;
        assert_eq!(manager.subscription_for(TEST_USER_ID).await, None);
    }

    #[tokio::test]
    async fn test_failed_registration_keeps_previous_subscription() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        seed_registered_token(&manager).await;

        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().times(1).returning(|_, _, _| {
            Err(Error::CommunicationError {
                reason: "talking to the server failed".to_string(),
            })
        });
        manager.update_topics(&registrar, topics(&["news"])).await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_remove_stored_subscription() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        seed_registered_token(&manager).await;

        manager.remove_stored_subscription(TEST_USER_ID).await;
        assert_eq!(manager.subscription_for(TEST_USER_ID).await, None);

        // Removal is durable too.
        let reloaded = test_manager(&dir).await;
        assert_eq!(reloaded.subscription_for(TEST_USER_ID).await, None);
    }

    #[tokio::test]
    async fn test_reordered_topics_trigger_registration() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().never();
        manager.update_topics(&registrar, topics(&["a", "b"])).await;
        deliver_token(&manager).await;

        let mut registrar = registrar_for(TEST_USER_ID);
        registrar
            .expect_register()
            .withf(|_, _, topics| topics == ["b", "a"])
            .times(1)
            .returning(|_, _, _| Ok(true));
        manager.update_topics(&registrar, topics(&["b", "a"])).await;
        assert_eq!(
            manager.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: topics(&["b", "a"]),
            })
        );
    }

    #[tokio::test]
    async fn test_same_topics_are_not_reregistered() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().never();
        manager.update_topics(&registrar, topics(&["a", "b"])).await;
        deliver_token(&manager).await;

        let mut registrar = registrar_for(TEST_USER_ID);
        registrar.expect_register().never();
        manager.update_topics(&registrar, topics(&["a", "b"])).await;
    }

    #[tokio::test]
    async fn test_no_identity_is_a_noop() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        let mut registrar = MockRegistrar::new();
        registrar.expect_user_id().return_const(None::<i64>);
        registrar.expect_register().never();

        manager
            .update_token(&registrar, TEST_TOKEN_DATA, UpdatePolicy::Forced)
            .await;
        manager.update_topics(&registrar, topics(&["a"])).await;
        assert_eq!(manager.subscription_for(TEST_USER_ID).await, None);
    }

    #[tokio::test]
    async fn test_subscriptions_survive_reload() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        seed_registered_token(&manager).await;
        drop(manager);

        let reloaded = test_manager(&dir).await;
        assert_eq!(
            reloaded.subscription_for(TEST_USER_ID).await,
            Some(Subscription {
                token: "aabbcc".to_string(),
                topics: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let dir = test_dir();
        let manager = test_manager(&dir).await;
        seed_registered_token(&manager).await;

        let mut registrar = registrar_for(OTHER_USER_ID);
        registrar
            .expect_register()
            .withf(|&user_id, token, _| user_id == OTHER_USER_ID && token == "0102")
            .times(1)
            .returning(|_, _, _| Ok(true));
        manager
            .update_token(&registrar, &[0x01, 0x02], UpdatePolicy::IfModified)
            .await;

        manager.remove_stored_subscription(TEST_USER_ID).await;
        assert_eq!(manager.subscription_for(TEST_USER_ID).await, None);
        assert_eq!(
            manager.subscription_for(OTHER_USER_ID).await,
            Some(Subscription {
                token: "0102".to_string(),
                topics: vec![],
            })
        );
    }
}
