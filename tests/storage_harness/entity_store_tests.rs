//! Macro-generated isolation suite for any identity + entity store.
//!
//! The `entity_store_tests!` macro generates a test module that runs the
//! tenant-isolation guarantees against a backend: user isolation, workspace
//! boundaries, lazy workspace creation under concurrency, ownership
//! round-trips and relationship queries over both stored shapes.
//!
//! # Usage
//!
//! ```rust,ignore
//! #[macro_use]
//! mod storage_harness;
//!
//! use storage_harness::*;
//! use evergreen::storage::InMemoryStore;
//!
//! entity_store_tests!(Arc::new(InMemoryStore::new()));
//! ```

/// Generate the isolation suite.
///
/// `$factory` must evaluate to an `Arc<S>` where `S` implements both
/// `EntityStore` and `IdentityStore`. It is re-evaluated for each test.
#[macro_export]
macro_rules! entity_store_tests {
    ($factory:expr) => {
        mod entity_store_contract_tests {
            use super::*;
            use evergreen::core::entity::{Edge, EntityRecord, Relationships};
            use evergreen::core::identity::WorkspaceId;
            use evergreen::core::query::{Condition, Direction, Field, SortKey};
            use evergreen::core::secure_query::{SecureQuery, SecurityContext};
            use evergreen::core::service::{
                CreateContext, EntityUpdate, FindOptions, MatchCriteria, UpdateContext,
            };
            use evergreen::core::store::{EntityStore, IdentityStore, UPSERT_KEY_CONSTRAINT};
            use serde_json::json;
            use std::sync::Arc;

            // ==================================================================
            // User isolation
            // ==================================================================

            #[tokio::test]
            async fn test_owner_sees_own_email() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("acme-corp")).await;

                h.entities
                    .create(t.workspace, "email", json!({ "subject": "Hi" }), None, CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();

                let found = h
                    .entities
                    .find(FindOptions::new(t.workspace, "email").for_user(t.alice))
                    .await
                    .unwrap();
                assert_count(&found, 1);
                assert_eq!(found[0].data["subject"], "Hi");
            }

            #[tokio::test]
            async fn test_other_user_cannot_see_email() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("acme-corp")).await;

                h.entities
                    .create(t.workspace, "email", json!({ "subject": "Hi" }), None, CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();

                let found = h
                    .entities
                    .find(FindOptions::new(t.workspace, "email").for_user(t.bob))
                    .await
                    .unwrap();
                assert_count(&found, 0);

                let searched = h
                    .entities
                    .search_entities(t.workspace, "email", MatchCriteria::new().field("subject", "hi"), Some(t.bob))
                    .await
                    .unwrap();
                assert_count(&searched, 0);
            }

            #[tokio::test]
            async fn test_isolation_holds_for_every_user_scoped_type() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("many-types")).await;

                let user_types: Vec<String> = h
                    .entities
                    .registry()
                    .names()
                    .filter(|name| h.entities.registry().is_user_scoped(name).unwrap_or(false))
                    .map(str::to_string)
                    .collect();
                assert!(!user_types.is_empty());

                for entity_type in &user_types {
                    h.entities
                        .create(
                            t.workspace,
                            entity_type,
                            json!({ "email": "alice@example.com" }),
                            None,
                            CreateContext::owned_by(t.alice),
                        )
                        .await
                        .unwrap();

                    let seen_by_bob = h
                        .entities
                        .find(FindOptions::new(t.workspace, entity_type.as_str()).for_user(t.bob))
                        .await
                        .unwrap();
                    assert!(seen_by_bob.is_empty(), "{} leaked across users", entity_type);
                }
            }

            #[tokio::test]
            async fn test_create_without_owner_is_rejected() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("no-owner")).await;

                let err = h
                    .entities
                    .create(t.workspace, "email", json!({ "subject": "Orphan" }), None, CreateContext::shared())
                    .await
                    .unwrap_err();
                assert!(err.is_validation());

                for user in [t.alice, t.bob] {
                    let found = h
                        .entities
                        .find(FindOptions::new(t.workspace, "email").for_user(user))
                        .await
                        .unwrap();
                    assert_count(&found, 0);
                }
            }

            // ==================================================================
            // Workspace boundary
            // ==================================================================

            #[tokio::test]
            async fn test_workspace_boundary_for_shared_types() {
                let h = Harness::new($factory);
                let w1 = h.tenant(&unique_org("ws-one")).await;
                let w2 = h.tenant(&unique_org("ws-two")).await;

                let deal = h
                    .entities
                    .create(w1.workspace, "deal", json!({ "title": "Big" }), None, CreateContext::shared())
                    .await
                    .unwrap();

                let in_w2 = h
                    .entities
                    .find(FindOptions::new(w2.workspace, "deal"))
                    .await
                    .unwrap();
                assert_count(&in_w2, 0);

                let err = h.entities.find_by_id(w2.workspace, deal.id).await.unwrap_err();
                assert!(err.is_not_found());

                let in_w1 = h
                    .entities
                    .find(FindOptions::new(w1.workspace, "deal"))
                    .await
                    .unwrap();
                assert_count(&in_w1, 1);
            }

            #[tokio::test]
            async fn test_workspace_boundary_ignores_matching_user() {
                let h = Harness::new($factory);
                let w1 = h.tenant(&unique_org("boundary-a")).await;
                let w2 = h.tenant(&unique_org("boundary-b")).await;

                // Same owner id, different workspace
                h.entities
                    .create(w1.workspace, "email", json!({ "subject": "W1" }), None, CreateContext::owned_by(w1.alice))
                    .await
                    .unwrap();

                let found = h
                    .entities
                    .find(FindOptions::new(w2.workspace, "email").for_user(w1.alice))
                    .await
                    .unwrap();
                assert_count(&found, 0);
            }

            // ==================================================================
            // Workspace resolution
            // ==================================================================

            #[tokio::test]
            async fn test_resolve_workspace_reuses_existing() {
                let h = Harness::new($factory);
                let before = h.store.count_workspaces().await.unwrap();

                let org_one = unique_org("org-one");
                let org_two = unique_org("org-two");
                let w1 = h.resolver.resolve_workspace(&org_one, "One").await.unwrap();
                let w2 = h.resolver.resolve_workspace(&org_two, "Two").await.unwrap();
                assert_ne!(w1, w2);

                let again = h.resolver.resolve_workspace(&org_one, "One again").await.unwrap();
                assert_eq!(again, w1);
                assert_eq!(h.store.count_workspaces().await.unwrap(), before + 2);
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_concurrent_resolve_creates_one_workspace() {
                let h = Harness::new($factory);
                let org = unique_org("race");

                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        let resolver = h.resolver.clone();
                        let org = org.clone();
                        tokio::spawn(async move { resolver.resolve_workspace(&org, "Race").await })
                    })
                    .collect();

                let results = tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    futures::future::join_all(handles),
                )
                .await
                .expect("Concurrent resolves timed out after 30s");

                let ids: Vec<WorkspaceId> = results
                    .into_iter()
                    .map(|joined| joined.unwrap().unwrap())
                    .collect();
                assert!(ids.iter().all(|id| *id == ids[0]), "All calls must return the same id");

                let stored = h.store.find_workspace_by_external(&org).await.unwrap().unwrap();
                assert_eq!(stored.id, ids[0]);
            }

            // ==================================================================
            // Ownership round-trip and verification
            // ==================================================================

            #[tokio::test]
            async fn test_create_then_find_round_trip() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("round-trip")).await;
                let payload = json!({ "title": "Standup", "attendees": ["a@x.test"], "allDay": false });

                let created = h
                    .entities
                    .create(t.workspace, "calendar_event", payload.clone(), None, CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();

                let found = h
                    .entities
                    .find(FindOptions::new(t.workspace, "calendar_event").for_user(t.alice))
                    .await
                    .unwrap();
                assert_count(&found, 1);
                assert_eq!(found[0].id, created.id);
                assert_eq!(found[0].data, payload);
                assert_eq!(found[0].user_id, Some(t.alice));
            }

            #[tokio::test]
            async fn test_find_by_id_then_verify_with_wrong_user() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("verify")).await;

                let email = h
                    .entities
                    .create(t.workspace, "email", json!({ "subject": "Private" }), None, CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();

                let fetched = h.entities.find_by_id(t.workspace, email.id).await.unwrap();
                let as_bob = SecureQuery::new(SecurityContext::new(t.workspace, t.bob, "email"));
                let err = fetched.clone().verify(&as_bob).unwrap_err();
                assert!(err.is_isolation_violation());

                let as_alice = SecureQuery::new(SecurityContext::new(t.workspace, t.alice, "email"));
                assert_eq!(fetched.verify(&as_alice).unwrap().data["subject"], "Private");
            }

            #[tokio::test]
            async fn test_update_by_other_user_leaves_record_untouched() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("update")).await;

                let email = h
                    .entities
                    .create(t.workspace, "email", json!({ "subject": "Mine" }), None, CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();

                let err = h
                    .entities
                    .update(t.workspace, email.id, EntityUpdate::merge(json!({ "subject": "Yours" })), UpdateContext::as_user(t.bob))
                    .await
                    .unwrap_err();
                assert!(err.is_isolation_violation());

                let updated = h
                    .entities
                    .update(t.workspace, email.id, EntityUpdate::merge(json!({ "read": true })), UpdateContext::as_user(t.alice))
                    .await
                    .unwrap();
                assert_eq!(updated.data, json!({ "subject": "Mine", "read": true }));
                assert_eq!(updated.user_id, Some(t.alice));
            }

            #[tokio::test]
            async fn test_stored_foreign_row_is_filtered() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("planted")).await;

                // Written straight to the store, bypassing the service
                h.store
                    .insert(EntityRecord::new(t.workspace, Some(t.bob), "email", json!({ "subject": "Bob's" })))
                    .await
                    .unwrap();

                let found = h
                    .entities
                    .find(FindOptions::new(t.workspace, "email").for_user(t.alice))
                    .await
                    .unwrap();
                assert!(found.iter().all(|r| r.user_id == Some(t.alice)));
            }

            // ==================================================================
            // Queries
            // ==================================================================

            #[tokio::test]
            async fn test_relationship_query_reads_both_shapes() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("relations")).await;
                let contact = h
                    .entities
                    .create(t.workspace, "contact", json!({ "email": "ada@example.com" }), None, CreateContext::shared())
                    .await
                    .unwrap();
                let contact_id = contact.id.to_string();

                h.entities
                    .create(
                        t.workspace,
                        "deal",
                        json!({ "title": "Edge form" }),
                        Some(Relationships::Edges(vec![Edge::new("contact", &contact_id)])),
                        CreateContext::shared(),
                    )
                    .await
                    .unwrap();

                // Legacy keyed form, stored as-is
                let mut keyed = EntityRecord::new(t.workspace, None, "deal", json!({ "title": "Keyed form" }));
                keyed.relationships = serde_json::from_value(json!({ "contact": contact_id })).unwrap();
                h.store.insert(keyed).await.unwrap();

                h.entities
                    .create(t.workspace, "deal", json!({ "title": "Unrelated" }), None, CreateContext::shared())
                    .await
                    .unwrap();

                let related = h
                    .entities
                    .find(
                        FindOptions::new(t.workspace, "deal")
                            .filter(Condition::eq(Field::relationship("contact"), contact_id.clone())),
                    )
                    .await
                    .unwrap();
                assert_count(&related, 2);
                assert!(related.iter().all(|r| r.relationships.has_edge("contact", &contact_id)));
            }

            #[tokio::test]
            async fn test_order_limit_and_count() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("ordering")).await;

                for amount in [300, 100, 200] {
                    h.entities
                        .create(t.workspace, "deal", json!({ "amount": amount }), None, CreateContext::shared())
                        .await
                        .unwrap();
                }

                let page = h
                    .entities
                    .find(
                        FindOptions::new(t.workspace, "deal")
                            .order_by(SortKey::Data("amount".to_string()), Direction::Asc)
                            .limit(2),
                    )
                    .await
                    .unwrap();
                let amounts: Vec<i64> = page.iter().filter_map(|r| r.data["amount"].as_i64()).collect();
                assert_eq!(amounts, vec![100, 200]);

                let total = h.entities.count(FindOptions::new(t.workspace, "deal").limit(1)).await.unwrap();
                assert_eq!(total, 3);
            }

            #[tokio::test]
            async fn test_archived_records_hidden_from_active_queries() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("archive")).await;

                let account = h
                    .entities
                    .create(
                        t.workspace,
                        "calendar_account",
                        json!({ "email": "alice@example.com", "connected": true }),
                        None,
                        CreateContext::owned_by(t.alice),
                    )
                    .await
                    .unwrap();
                h.entities
                    .create(
                        t.workspace,
                        "calendar_account",
                        json!({ "email": "old@example.com", "connected": false }),
                        None,
                        CreateContext::owned_by(t.alice),
                    )
                    .await
                    .unwrap();

                let active = h
                    .entities
                    .find(FindOptions::new(t.workspace, "calendar_account").for_user(t.alice).active_only())
                    .await
                    .unwrap();
                assert_count(&active, 1);
                assert_eq!(active[0].id, account.id);

                h.entities
                    .archive(t.workspace, account.id, UpdateContext::as_user(t.alice))
                    .await
                    .unwrap();
                let active = h
                    .entities
                    .find(FindOptions::new(t.workspace, "calendar_account").for_user(t.alice).active_only())
                    .await
                    .unwrap();
                assert_count(&active, 0);
            }

            #[tokio::test]
            async fn test_search_is_case_insensitive_and_scoped() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("search")).await;

                h.entities
                    .create(t.workspace, "email_account", json!({ "email": "Alice@Example.com" }), None, CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();

                let mine = h
                    .entities
                    .search_entities(
                        t.workspace,
                        "email_account",
                        MatchCriteria::new().field("email", "alice@example.com"),
                        Some(t.alice),
                    )
                    .await
                    .unwrap();
                assert_count(&mine, 1);

                let err = h
                    .entities
                    .search_entities(t.workspace, "email_account", MatchCriteria::new().field("email", "alice@example.com"), None)
                    .await
                    .unwrap_err();
                assert!(err.is_validation());
            }

            #[tokio::test]
            async fn test_upsert_is_idempotent_per_owner() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("upsert")).await;
                let key = || MatchCriteria::new().field("providerId", "msg-1");

                let first = h
                    .entities
                    .upsert(t.workspace, "message", key(), json!({ "providerId": "msg-1", "body": "v1" }), CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();
                let second = h
                    .entities
                    .upsert(t.workspace, "message", key(), json!({ "providerId": "msg-1", "body": "v2" }), CreateContext::owned_by(t.alice))
                    .await
                    .unwrap();
                assert_eq!(first.id, second.id);
                assert_eq!(second.data["body"], "v2");

                // Bob's copy of the same provider object is a separate record
                let bobs = h
                    .entities
                    .upsert(t.workspace, "message", key(), json!({ "providerId": "msg-1", "body": "bob" }), CreateContext::owned_by(t.bob))
                    .await
                    .unwrap();
                assert_ne!(bobs.id, first.id);
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_concurrent_upserts_create_one_record() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("upsert_race")).await;

                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        let entities = h.entities.clone();
                        let (workspace, alice) = (t.workspace, t.alice);
                        tokio::spawn(async move {
                            entities
                                .upsert(
                                    workspace,
                                    "calendar_event",
                                    MatchCriteria::new().field("providerId", "evt-race"),
                                    json!({ "providerId": "evt-race", "attempt": i }),
                                    CreateContext::owned_by(alice),
                                )
                                .await
                        })
                    })
                    .collect();

                let results = tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    futures::future::join_all(handles),
                )
                .await
                .expect("Concurrent upserts timed out after 30s");

                let ids: Vec<_> = results
                    .into_iter()
                    .map(|joined| joined.unwrap().unwrap().id)
                    .collect();
                assert!(ids.iter().all(|id| *id == ids[0]), "All calls must land on one record");

                let count = h
                    .entities
                    .count(FindOptions::new(t.workspace, "calendar_event").for_user(t.alice))
                    .await
                    .unwrap();
                assert_eq!(count, 1);
            }

            #[tokio::test]
            async fn test_store_rejects_duplicate_upsert_key() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("upsert_key")).await;
                let key = MatchCriteria::new().field("providerId", "evt-1").upsert_key();

                let mut first = EntityRecord::new(t.workspace, Some(t.alice), "calendar_event", json!({}));
                first.metadata = json!({ "upsertKey": key });
                h.store.insert(first).await.unwrap();

                let mut duplicate = EntityRecord::new(t.workspace, Some(t.alice), "calendar_event", json!({}));
                duplicate.metadata = json!({ "upsertKey": key });
                let err = h.store.insert(duplicate).await.unwrap_err();
                assert!(err.is_unique_violation());
                assert_eq!(
                    err,
                    evergreen::core::error::StorageError::UniqueViolation {
                        constraint: UPSERT_KEY_CONSTRAINT.to_string()
                    }
                );

                // Same key under another owner is a different slot
                let mut bobs = EntityRecord::new(t.workspace, Some(t.bob), "calendar_event", json!({}));
                bobs.metadata = json!({ "upsertKey": key });
                h.store.insert(bobs).await.unwrap();
            }

            // ==================================================================
            // Condition edge cases, identical on every backend
            // ==================================================================

            #[tokio::test]
            async fn test_eq_ignore_case_skips_non_string_fields() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("ignore_case")).await;

                for code in [json!(42), json!("42"), json!(true)] {
                    h.entities
                        .create(t.workspace, "deal", json!({ "code": code }), None, CreateContext::shared())
                        .await
                        .unwrap();
                }

                let found = h
                    .entities
                    .find(FindOptions::new(t.workspace, "deal").filter(Condition::eq_ignore_case(Field::data("code"), "42")))
                    .await
                    .unwrap();
                assert_count(&found, 1);
                assert_eq!(found[0].data["code"], "42");

                let found = h
                    .entities
                    .find(FindOptions::new(t.workspace, "deal").filter(Condition::eq_ignore_case(Field::data("code"), "TRUE")))
                    .await
                    .unwrap();
                assert_count(&found, 0);
            }

            #[tokio::test]
            async fn test_keyed_relationship_scalar_targets_match_as_text() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("keyed_numeric")).await;

                for relationships in [
                    json!({ "contact": 42 }),
                    json!({ "contact": [7, 42] }),
                    json!({ "contact": { "id": "42" } }),
                    json!({ "contact": [] }),
                ] {
                    let mut record = EntityRecord::new(t.workspace, None, "deal", json!({}));
                    record.relationships = serde_json::from_value(relationships).unwrap();
                    h.store.insert(record).await.unwrap();
                }

                let matched = h
                    .entities
                    .find(FindOptions::new(t.workspace, "deal").filter(Condition::eq(Field::relationship("contact"), "42")))
                    .await
                    .unwrap();
                assert_count(&matched, 2);

                let linked = h
                    .entities
                    .find(FindOptions::new(t.workspace, "deal").filter(Condition::exists(Field::relationship("contact"))))
                    .await
                    .unwrap();
                assert_count(&linked, 2);

                let unmatched = h
                    .entities
                    .find(FindOptions::new(t.workspace, "deal").filter(Condition::ne(Field::relationship("contact"), "42")))
                    .await
                    .unwrap();
                assert_count(&unmatched, 2);
            }

            #[tokio::test]
            async fn test_eq_null_matches_null_or_missing_field() {
                let h = Harness::new($factory);
                let t = h.tenant(&unique_org("null_eq")).await;

                for data in [json!({ "stage": null }), json!({}), json!({ "stage": "won" })] {
                    h.entities
                        .create(t.workspace, "deal", data, None, CreateContext::shared())
                        .await
                        .unwrap();
                }

                let count = |condition: Condition| {
                    let entities = h.entities.clone();
                    let options = FindOptions::new(t.workspace, "deal").filter(condition);
                    async move { entities.count(options).await.unwrap() }
                };
                assert_eq!(count(Condition::eq(Field::data("stage"), serde_json::Value::Null)).await, 2);
                assert_eq!(count(Condition::ne(Field::data("stage"), serde_json::Value::Null)).await, 1);
                assert_eq!(count(Condition::ne(Field::data("stage"), "lost")).await, 3);
                assert_eq!(count(Condition::eq(Field::data("stage"), "won")).await, 1);
            }

            #[tokio::test]
            async fn test_request_context_requires_membership() {
                let h = Harness::new($factory);
                let org = unique_org("membership");
                let t = h.tenant(&org).await;

                let ctx = h
                    .resolver
                    .request_context(&org, &format!("{}_alice", org))
                    .await
                    .unwrap();
                assert_eq!(ctx.workspace_id, t.workspace);
                assert_eq!(ctx.user_id, t.alice);

                // A member of another workspace
                let elsewhere = unique_org("elsewhere");
                h.tenant(&elsewhere).await;
                let err = h
                    .resolver
                    .request_context(&org, &format!("{}_alice", elsewhere))
                    .await
                    .unwrap_err();
                assert!(err.is_not_found());
            }
        }
    };
}
