#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end lifecycle scenarios against both store backends.

mod common;

use common::{create, harnesses};
use featureboard_core::{FeatureError, FeaturePatch, NewFeature, Stage, VoteDirection};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn dark_mode_goes_from_inbox_to_published() {
    for h in harnesses() {
        let engine = &h.engine;
        let feature = engine
            .create_feature(NewFeature::new("Dark Mode", "Dim every page", "alice"))
            .await
            .expect("create");
        assert_eq!(feature.stage, Stage::Inbox, "{}", h.label);

        engine
            .move_stage(&feature.id, Stage::CollectingVotes, "admin")
            .await
            .expect("move to collecting_votes");

        for user in ["u1", "u2", "u3"] {
            engine
                .vote(&feature.id, user, VoteDirection::Up)
                .await
                .expect("up vote");
        }
        let voted = engine
            .vote(&feature.id, "u4", VoteDirection::Down)
            .await
            .expect("down vote");
        assert_eq!((voted.votes_up, voted.votes_down), (3, 1), "{}", h.label);

        engine
            .move_stage(&feature.id, Stage::Upcoming, "admin")
            .await
            .expect("move to upcoming");
        let published = engine.publish(&feature.id, "admin").await.expect("publish");

        assert_eq!(published.stage, Stage::Published, "{}", h.label);
        assert_eq!(published.progress, 100, "{}", h.label);
        assert_eq!((published.votes_up, published.votes_down), (3, 1));
        assert_eq!(published.created_by, "alice");
        assert_eq!(published.last_modified_by, "admin");

        let audited = engine.audit_votes(&feature.id).await.expect("audit");
        assert_eq!((audited.up, audited.down), (3, 1));
    }
}

#[tokio::test]
async fn inbox_cannot_jump_to_published() {
    for h in harnesses() {
        let feature = create(&h.engine, "Jump", Stage::Inbox).await;
        let err = h
            .engine
            .move_stage(&feature.id, Stage::Published, "admin")
            .await
            .expect_err("inbox -> published must fail");
        match err {
            FeatureError::InvalidTransition { from, to, .. } => {
                assert_eq!((from, to), (Stage::Inbox, Stage::Published));
            }
            other => panic!("{}: unexpected error {other:?}", h.label),
        }
        let reloaded = h.engine.get_feature(&feature.id).await.expect("get");
        assert_eq!(reloaded.stage, Stage::Inbox, "{}", h.label);
        assert_eq!(reloaded.version, feature.version);
    }
}

#[tokio::test]
async fn transition_table_closure_holds_for_every_pair() {
    for h in harnesses() {
        for from in Stage::all() {
            if from == Stage::Published {
                continue;
            }
            for to in Stage::all() {
                let feature = create(&h.engine, "Closure", from).await;
                let result = h.engine.move_stage(&feature.id, to, "admin").await;
                let reloaded = h.engine.get_feature(&feature.id).await.expect("get");
                if from.can_transition_to(to) {
                    assert!(result.is_ok(), "{}: {from} -> {to} should succeed", h.label);
                    assert_eq!(reloaded.stage, to);
                } else {
                    assert!(
                        matches!(result, Err(FeatureError::InvalidTransition { .. })),
                        "{}: {from} -> {to} should be rejected",
                        h.label
                    );
                    assert_eq!(reloaded.stage, from);
                }
            }
        }
    }
}

#[tokio::test]
async fn triage_cycle_can_be_walked_repeatedly() {
    for h in harnesses() {
        let feature = create(&h.engine, "Cycle", Stage::Suggested).await;
        for _ in 0..2 {
            for target in [Stage::Maybe, Stage::CollectingVotes, Stage::Suggested] {
                h.engine
                    .move_stage(&feature.id, target, "admin")
                    .await
                    .unwrap_or_else(|e| panic!("{}: move to {target}: {e}", h.label));
            }
        }
        let reloaded = h.engine.get_feature(&feature.id).await.expect("get");
        assert_eq!(reloaded.stage, Stage::Suggested);
        assert_eq!(reloaded.version, feature.version + 6);
    }
}

#[tokio::test]
async fn repeated_vote_counts_once() {
    for h in harnesses() {
        let feature = create(&h.engine, "Idempotent", Stage::CollectingVotes).await;
        let once = h
            .engine
            .vote(&feature.id, "u1", VoteDirection::Up)
            .await
            .expect("vote");
        let twice = h
            .engine
            .vote(&feature.id, "u1", VoteDirection::Up)
            .await
            .expect("vote again");
        assert_eq!(once, twice, "{}", h.label);
        assert_eq!(twice.votes_up, 1);
    }
}

#[tokio::test]
async fn flipping_leaves_exactly_one_row() {
    for h in harnesses() {
        let feature = create(&h.engine, "Flip", Stage::CollectingVotes).await;
        h.engine
            .vote(&feature.id, "u1", VoteDirection::Up)
            .await
            .expect("up");
        let flipped = h
            .engine
            .vote(&feature.id, "u1", VoteDirection::Down)
            .await
            .expect("down");
        assert_eq!((flipped.votes_up, flipped.votes_down), (0, 1), "{}", h.label);
        assert_eq!(
            h.engine.user_vote(&feature.id, "u1").await.expect("user_vote"),
            Some(VoteDirection::Down)
        );
        let tally = h.engine.audit_votes(&feature.id).await.expect("audit");
        assert_eq!(tally.up + tally.down, 1);
    }
}

#[tokio::test]
async fn counters_track_a_mixed_vote_sequence() {
    use VoteDirection::{Down, Up};

    for h in harnesses() {
        let feature = create(&h.engine, "Mixed", Stage::Suggested).await;
        let steps: &[(&str, Option<VoteDirection>)] = &[
            ("u1", Some(Up)),
            ("u2", Some(Up)),
            ("u3", Some(Down)),
            ("u1", Some(Down)),
            ("u2", None),
            ("u2", None),
            ("u4", Some(Up)),
            ("u3", Some(Down)),
            ("u5", None),
        ];
        for (user, step) in steps {
            match step {
                Some(direction) => h.engine.vote(&feature.id, user, *direction).await,
                None => h.engine.remove_vote(&feature.id, user).await,
            }
            .unwrap_or_else(|e| panic!("{}: {user}: {e}", h.label));
        }

        // u1 down, u3 down, u4 up; u2 and u5 hold nothing
        let current = h.engine.get_feature(&feature.id).await.expect("get");
        assert_eq!((current.votes_up, current.votes_down), (1, 2), "{}", h.label);
        assert_eq!(current.total_votes(), 3);
        assert_eq!(h.engine.user_vote(&feature.id, "u2").await.expect("u2"), None);
        let tally = h.engine.audit_votes(&feature.id).await.expect("audit");
        assert_eq!((tally.up, tally.down), (1, 2));
    }
}

#[tokio::test]
async fn removing_a_missing_vote_changes_nothing() {
    for h in harnesses() {
        let feature = create(&h.engine, "Unvote", Stage::Inbox).await;
        let after = h
            .engine
            .remove_vote(&feature.id, "nobody")
            .await
            .expect("remove_vote");
        assert_eq!(after, feature, "{}", h.label);
    }
}

#[tokio::test]
async fn publishing_twice_preserves_everything() {
    for h in harnesses() {
        let feature = create(&h.engine, "Twice", Stage::Upcoming).await;
        h.engine
            .vote(&feature.id, "u1", VoteDirection::Up)
            .await
            .expect("vote");
        let first = h.engine.publish(&feature.id, "admin").await.expect("publish");
        let second = h
            .engine
            .publish(&feature.id, "someone-else")
            .await
            .expect("publish again");

        assert_eq!(first, second, "{}", h.label);
        assert_eq!(second.title, "Twice");
        assert_eq!(second.votes_up, 1);
        assert_eq!(second.created_at, feature.created_at);
    }
}

#[tokio::test]
async fn votes_are_accepted_in_every_stage() {
    for h in harnesses() {
        let feature = create(&h.engine, "Late", Stage::Upcoming).await;
        h.engine.publish(&feature.id, "admin").await.expect("publish");
        let voted = h
            .engine
            .vote(&feature.id, "u1", VoteDirection::Up)
            .await
            .expect("vote on published");
        assert_eq!(voted.votes_up, 1, "{}", h.label);
        assert_eq!(voted.stage, Stage::Published);
    }
}

#[tokio::test]
async fn progress_edits_follow_the_stage() {
    for h in harnesses() {
        let feature = create(&h.engine, "Progress", Stage::Suggested).await;
        let patch = FeaturePatch {
            progress: Some(50),
            ..FeaturePatch::default()
        };
        assert!(
            matches!(
                h.engine.update_feature(&feature.id, &patch, "admin").await,
                Err(FeatureError::InvalidArgument { .. })
            ),
            "{}",
            h.label
        );

        h.engine
            .move_stage(&feature.id, Stage::Upcoming, "admin")
            .await
            .expect("move");
        let updated = h
            .engine
            .update_feature(&feature.id, &patch, "admin")
            .await
            .expect("update");
        assert_eq!(updated.progress, 50);
        assert_eq!(updated.stage, Stage::Upcoming);
    }
}

#[tokio::test]
async fn listing_filters_by_stage_newest_first() {
    for h in harnesses() {
        let a = create(&h.engine, "A", Stage::Suggested).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let b = create(&h.engine, "B", Stage::Suggested).await;
        create(&h.engine, "C", Stage::Maybe).await;

        let listing = h
            .engine
            .list_by_stage(Stage::Suggested)
            .await
            .expect("list");
        let ids: Vec<_> = listing.iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids, vec![b.id, a.id], "{}", h.label);
        assert!(
            h.engine
                .list_by_stage(Stage::Published)
                .await
                .expect("list published")
                .is_empty()
        );
    }
}

#[tokio::test]
async fn votes_keep_the_modification_stamp_of_the_last_edit() {
    for h in harnesses() {
        let feature = create(&h.engine, "Stamp", Stage::Suggested).await;
        let moved = h
            .engine
            .move_stage(&feature.id, Stage::CollectingVotes, "admin")
            .await
            .expect("move");

        let voted = h
            .engine
            .vote(&feature.id, "voter-1", VoteDirection::Up)
            .await
            .expect("vote");
        let flipped = h
            .engine
            .vote(&feature.id, "voter-1", VoteDirection::Down)
            .await
            .expect("flip");
        let removed = h
            .engine
            .remove_vote(&feature.id, "voter-1")
            .await
            .expect("unvote");

        for after in [&voted, &flipped, &removed] {
            assert_eq!(after.last_modified_by, "admin", "{}", h.label);
            assert_eq!(after.last_modified_at, moved.last_modified_at, "{}", h.label);
        }
        assert_eq!(voted.version, moved.version + 1);
        assert_eq!(removed.version, moved.version + 3);

        let reloaded = h.engine.get_feature(&feature.id).await.expect("get");
        assert_eq!(reloaded.last_modified_by, "admin", "{}", h.label);
        assert_eq!(reloaded.version, removed.version);
    }
}
