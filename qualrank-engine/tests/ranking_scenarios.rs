//! End-to-end ranking behavior: enqueue, run the worker, read the list

mod helpers;

use helpers::{positions, scenario_candidates, Fixture};
use qualrank_common::db::{EligibleEntry, ParticipationStatus, Placement, TierLevel};
use qualrank_engine::team::{TeamEntry, TeamMember};
use rust_decimal::Decimal;

#[tokio::test]
async fn test_first_tier_seed_builds_dense_list() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;

    let rows = fx.rows(tier, class).await;
    assert_eq!(rows.len(), 20, "one sporter per pool lacks history");
    assert!(rows.iter().all(|r| r.subject_id != "p0-5"));

    let mut orders: Vec<i64> = rows.iter().map(|r| r.order_index).collect();
    orders.sort_unstable();
    assert_eq!(orders, (1..=20).collect::<Vec<_>>());

    // Pool champions lead, strongest first
    for (order, subject, label) in [
        (1, "p0-0", "Champion North"),
        (2, "p1-0", "Champion East"),
        (3, "p2-0", "Champion South"),
        (4, "p3-0", "Champion West"),
    ] {
        let row = fx.row_at(tier, class, order).await;
        assert_eq!(row.subject_id, subject);
        assert_eq!(row.champion_label, label);
        assert_eq!(row.admission_rank, order);
    }
    assert_eq!(fx.row_at(tier, class, 5).await.subject_id, "p0-1");
    assert!(!fx.row_at(tier, class, 5).await.is_champion());

    let view = fx.service.class_view(tier, class).await.unwrap();
    assert_eq!(view.limit, 8);
    assert_eq!(view.participants.len(), 8);
    assert_eq!(view.reserves.len(), 12);
    assert!(view.not_participating.is_empty());
}

#[tokio::test]
async fn test_default_limits_by_class_kind() {
    let fx = Fixture::new().await;
    let tier = fx.regional_tier("Region 7").await;
    let individual = fx.class("Compound Women").await;
    let team = fx.service.create_class("Team Recurve", true).await.unwrap();
    let premier = fx
        .service
        .create_class("Team Recurve ERE", true)
        .await
        .unwrap();

    for (class, expected) in [(individual, 24), (team, 8), (premier, 12)] {
        let view = fx.service.class_view(tier, class).await.unwrap();
        assert_eq!(view.limit, expected, "class {}", view.class.description);
    }
}

#[tokio::test]
async fn test_withdraw_keeps_position_and_promotes_reserve() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;

    let target = fx.row_at(tier, class, 4).await;
    let first_reserve = fx.row_at(tier, class, 9).await;
    let untouched = fx.row_at(tier, class, 3).await;

    let mutation_id = fx.service.enqueue_withdraw(target.id, "sporter").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.count_applied(), 1);

    let withdrawn = fx.row(tier, class, &target.subject_id).await;
    assert_eq!(withdrawn.participation, ParticipationStatus::Withdrawn);
    assert_eq!(withdrawn.admission_rank, 0);
    assert_eq!(withdrawn.order_index, 4, "position frozen on withdrawal");
    assert!(withdrawn.audit_log.contains("Withdrawn by sporter"));

    let promoted = fx.row(tier, class, &first_reserve.subject_id).await;
    assert_eq!(promoted.order_index, 8);
    assert_eq!(promoted.admission_rank, 8);
    assert_eq!(promoted.placement(8), Placement::Participant);
    assert!(promoted.audit_log.contains("Rank 9 -> 8"));

    let before = fx.row(tier, class, &untouched.subject_id).await;
    assert_eq!((before.order_index, before.admission_rank), (3, 3));
    assert_eq!(before.audit_log, untouched.audit_log);

    let mutation = fx.mutation(mutation_id).await;
    assert!(mutation.is_processed);
    assert!(mutation.outcome.unwrap().starts_with("applied: withdrawn from rank 4"));
}

#[tokio::test]
async fn test_limit_change_moves_nobody() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;

    let second = fx.row_at(tier, class, 2).await;
    fx.service.enqueue_withdraw(second.id, "sporter").await.unwrap();
    fx.pass().await;
    let before = positions(&fx.rows(tier, class).await);

    fx.service.enqueue_cut_change(tier, class, 20, "organizer").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.count_applied(), 1);

    assert_eq!(positions(&fx.rows(tier, class).await), before);
    let view = fx.service.class_view(tier, class).await.unwrap();
    assert_eq!(view.limit, 20);
    assert_eq!(view.participants.len(), 19);
    assert!(view.reserves.is_empty());
    assert_eq!(view.not_participating.len(), 1);

    let activity = fx.service.activity(tier).await.unwrap();
    let limit_entries: Vec<_> = activity.iter().filter(|a| a.topic == "limit").collect();
    assert_eq!(limit_entries.len(), 2);
    assert!(limit_entries
        .iter()
        .any(|a| a.message.contains("from 8 to 20") && a.actor == "organizer"));
}

#[tokio::test]
async fn test_same_limit_is_rejected_without_changes() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;

    let id = fx.service.enqueue_cut_change(tier, class, 8, "organizer").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.count_failed(), 0);

    let record = fx.mutation(id).await;
    assert!(record.is_processed);
    assert!(record.outcome.unwrap().starts_with("no-op"));
}

#[tokio::test]
async fn test_reregistration_lands_among_reserves() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;

    let target = fx.row_at(tier, class, 3).await;
    fx.service.enqueue_withdraw(target.id, "sporter").await.unwrap();
    fx.pass().await;

    fx.service.enqueue_register(target.id, "sporter").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.count_applied(), 1);

    let row = fx.row(tier, class, &target.subject_id).await;
    assert_eq!(row.participation, ParticipationStatus::Unknown);
    assert!(row.admission_rank > 8, "re-entry never restores a slot");
    // Strongest reserve, so it heads the reserve segment
    assert_eq!(row.admission_rank, 9);
    assert_eq!(row.order_index, 9);
    assert_eq!(row.placement(8), Placement::Reserve);
    assert!(row.audit_log.contains("Re-registered by sporter"));

    let rows = fx.rows(tier, class).await;
    let mut reserves: Vec<_> = rows.iter().filter(|r| r.admission_rank > 8).collect();
    reserves.sort_by_key(|r| r.admission_rank);
    for pair in reserves.windows(2) {
        assert!(pair[0].seed_value >= pair[1].seed_value);
    }
    assert_eq!(rows.iter().filter(|r| !r.is_withdrawn()).count(), 20);
}

#[tokio::test]
async fn test_reentry_below_limit_returns_by_average() {
    let fx = Fixture::new().await;
    // 20 rows under the default limit of 24: nobody is a reserve
    let (tier, class) = fx.seeded_scenario_class(None).await;
    let strongest = fx.row_at(tier, class, 1).await;
    assert_eq!(strongest.subject_id, "p0-0");

    fx.service.enqueue_withdraw(strongest.id, "sporter").await.unwrap();
    fx.pass().await;
    assert_eq!(fx.row(tier, class, "p1-0").await.admission_rank, 1);

    fx.service.enqueue_register(strongest.id, "sporter").await.unwrap();
    fx.pass().await;

    let row = fx.row(tier, class, "p0-0").await;
    assert_eq!(row.admission_rank, 1);
    assert_eq!(row.participation, ParticipationStatus::Unknown);
    assert!(row.audit_log.contains("placed by average"));
    assert_eq!(fx.row(tier, class, "p1-0").await.admission_rank, 2);
    assert_eq!(fx.row_at(tier, class, 20).await.subject_id, "p3-4");
}

fn late_entry(subject: &str, avg: i64) -> EligibleEntry {
    EligibleEntry {
        subject_id: subject.to_string(),
        home_org_id: 1099,
        seed_value: Decimal::new(avg, 3),
        tiebreak_key: String::new(),
        champion_label: String::new(),
    }
}

#[tokio::test]
async fn test_late_entry_slots_in_by_average() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(None).await;

    // between p0-1 (8.900, rank 5) and p1-1 (8.890, rank 6)
    fx.service
        .enqueue_extra_entry(tier, class, &late_entry("late", 8895), "organizer")
        .await
        .unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.applied, 1);

    let row = fx.row(tier, class, "late").await;
    assert_eq!(row.admission_rank, 6);
    assert_eq!(row.participation, ParticipationStatus::Unknown);
    assert!(row.audit_log.contains("Added late by organizer"));
    let pushed = fx.row(tier, class, "p1-1").await;
    assert_eq!(pushed.admission_rank, 7);
    assert!(pushed.audit_log.contains("after late entry of late"));
    assert_eq!(fx.rows(tier, class).await.len(), 21);
}

#[tokio::test]
async fn test_late_entry_on_full_list_is_first_reserve() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;
    let before: Vec<_> = fx
        .rows(tier, class)
        .await
        .into_iter()
        .filter(|r| r.admission_rank <= 8)
        .collect();

    fx.service
        .enqueue_extra_entry(tier, class, &late_entry("late", 9500), "organizer")
        .await
        .unwrap();
    fx.pass().await;

    let row = fx.row(tier, class, "late").await;
    assert_eq!(row.admission_rank, 9);
    assert_eq!(row.placement(8), Placement::Reserve);
    for admitted in before {
        let now = fx.row(tier, class, &admitted.subject_id).await;
        assert_eq!(now.admission_rank, admitted.admission_rank);
    }
}

#[tokio::test]
async fn test_late_entry_for_listed_subject_rejected() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(None).await;
    let before = positions(&fx.rows(tier, class).await);

    fx.service
        .enqueue_extra_entry(tier, class, &late_entry("p0-1", 9900), "organizer")
        .await
        .unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.rejected, 1);
    assert_eq!(positions(&fx.rows(tier, class).await), before);
}

#[tokio::test]
async fn test_move_class_rebuilds_destination() {
    let fx = Fixture::new().await;
    let (tier, men) = fx.seeded_scenario_class(None).await;
    let women = fx.class("Recurve Women").await;
    let listed = vec![
        late_entry("w1", 9100),
        late_entry("w2", 8500),
        late_entry("w3", 8000),
    ];
    fx.service.enqueue_seed(tier, women, &listed, "system").await.unwrap();
    fx.pass().await;

    let mover = fx.row(tier, men, "p0-1").await;
    assert_eq!(mover.admission_rank, 5);
    fx.service.enqueue_move_class(mover.id, women, "organizer").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.applied, 1);

    // source closes the gap
    let men_rows = fx.rows(tier, men).await;
    assert_eq!(men_rows.len(), 19);
    assert_eq!(fx.row(tier, men, "p1-1").await.admission_rank, 5);

    // destination re-ranked by average
    let order = [("w1", 1), ("p0-1", 2), ("w2", 3), ("w3", 4)];
    for (subject, rank) in order {
        assert_eq!(fx.row(tier, women, subject).await.admission_rank, rank, "{}", subject);
    }
    let moved = fx.row(tier, women, "p0-1").await;
    assert_eq!(moved.id, mover.id);
    assert!(moved.audit_log.contains("Moved from Recurve Men to Recurve Women by organizer"));

    let activity = fx.service.activity(tier).await.unwrap();
    assert!(activity.iter().any(|entry| entry.topic == "move"));
}

#[tokio::test]
async fn test_move_class_refusals_leave_lists_alone() {
    let fx = Fixture::new().await;
    let (tier, men) = fx.seeded_scenario_class(None).await;
    let teams = fx.service.create_class("Team Recurve", true).await.unwrap();
    let target = fx.row(tier, men, "p2-2").await;
    let before = positions(&fx.rows(tier, men).await);

    fx.service.enqueue_move_class(target.id, men, "organizer").await.unwrap();
    fx.service.enqueue_move_class(target.id, teams, "organizer").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.rejected, 2);

    assert_eq!(positions(&fx.rows(tier, men).await), before);
    assert!(fx.rows(tier, teams).await.is_empty());
    let row = fx.row(tier, men, "p2-2").await;
    assert!(row.audit_log.contains("MOVE_CLASS ignored"));
}

#[tokio::test]
async fn test_renumber_closes_gaps_in_order() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(None).await;
    let before = positions(&fx.rows(tier, class).await);

    sqlx::query(
        "UPDATE qualifiers SET order_index = order_index * 2, admission_rank = admission_rank * 2 \
         WHERE tier_id = ? AND class_id = ?",
    )
    .bind(tier.0)
    .bind(class.0)
    .execute(&fx.pool)
    .await
    .unwrap();

    fx.service.enqueue_renumber(tier, class, "organizer").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.applied, 1);
    assert_eq!(positions(&fx.rows(tier, class).await), before);
    assert!(fx
        .row(tier, class, "p3-4")
        .await
        .audit_log
        .contains("Rank 40 -> 20 after renumbering by organizer"));

    // dense list: a second renumber moves nobody
    fx.service.enqueue_renumber(tier, class, "organizer").await.unwrap();
    fx.pass().await;
    assert_eq!(positions(&fx.rows(tier, class).await), before);
}

#[tokio::test]
async fn test_register_confirms_unknown_row_in_place() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;
    let target = fx.row_at(tier, class, 6).await;
    let before = positions(&fx.rows(tier, class).await);

    fx.service.enqueue_register(target.id, "sporter").await.unwrap();
    fx.pass().await;

    let row = fx.row(tier, class, &target.subject_id).await;
    assert_eq!(row.participation, ParticipationStatus::Confirmed);
    assert_eq!(positions(&fx.rows(tier, class).await), before);

    // A second confirmation is a no-op with a note on the row
    fx.service.enqueue_register(target.id, "sporter").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.rejected, 1);
    let row = fx.row(tier, class, &target.subject_id).await;
    assert!(row.audit_log.contains("REGISTER ignored"));
}

#[tokio::test]
async fn test_double_withdraw_is_noop() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;
    let target = fx.row_at(tier, class, 10).await;

    fx.service.enqueue_withdraw(target.id, "sporter").await.unwrap();
    fx.service.enqueue_withdraw(target.id, "sporter").await.unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.rejected, 1);

    let row = fx.row(tier, class, &target.subject_id).await;
    assert_eq!(row.order_index, 10);
    assert!(row.audit_log.contains("WITHDRAW ignored"));
}

#[tokio::test]
async fn test_invite_stamps_request_time() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(None).await;
    let target = fx.row_at(tier, class, 1).await;
    assert!(target.confirmation_requested_at.is_none());

    fx.service.enqueue_invite(target.id, "organizer").await.unwrap();
    fx.pass().await;

    let row = fx.row(tier, class, &target.subject_id).await;
    assert!(row.confirmation_requested_at.is_some());
    assert_eq!(row.participation, ParticipationStatus::Unknown);
    assert!(row.audit_log.contains("Invitation requested by organizer"));
}

#[tokio::test]
async fn test_reseeding_populated_class_rejected() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(None).await;

    fx.service
        .enqueue_first_tier_seed(tier, class, scenario_candidates(), 6, "system")
        .await
        .unwrap();
    let summary = fx.pass().await;
    assert_eq!(summary.rejected, 1);
    assert_eq!(fx.rows(tier, class).await.len(), 20);
}

#[tokio::test]
async fn test_replayed_pass_changes_nothing() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;
    let target = fx.row_at(tier, class, 2).await;
    fx.service.enqueue_withdraw(target.id, "sporter").await.unwrap();
    fx.pass().await;

    let snapshot: Vec<(String, i64, i64, String)> = fx
        .rows(tier, class)
        .await
        .into_iter()
        .map(|r| (r.subject_id, r.order_index, r.admission_rank, r.audit_log))
        .collect();

    for _ in 0..3 {
        assert!(fx.pass().await.is_idle());
    }

    let again: Vec<(String, i64, i64, String)> = fx
        .rows(tier, class)
        .await
        .into_iter()
        .map(|r| (r.subject_id, r.order_index, r.admission_rank, r.audit_log))
        .collect();
    assert_eq!(snapshot, again);
}

#[tokio::test]
async fn test_mixed_sequence_stays_consistent() {
    let fx = Fixture::new().await;
    let (tier, class) = fx.seeded_scenario_class(Some(8)).await;

    let picks = [
        fx.row_at(tier, class, 1).await,
        fx.row_at(tier, class, 7).await,
        fx.row_at(tier, class, 12).await,
        fx.row_at(tier, class, 20).await,
    ];
    let second = fx.row_at(tier, class, 2).await;
    for row in picks.iter().chain([&second]) {
        fx.service.enqueue_withdraw(row.id, "sporter").await.unwrap();
    }
    fx.service.enqueue_cut_change(tier, class, 6, "organizer").await.unwrap();
    fx.service.enqueue_register(picks[1].id, "sporter").await.unwrap();
    fx.service.enqueue_register(picks[3].id, "sporter").await.unwrap();

    let summary = fx.pass().await;
    assert_eq!(summary.count_applied(), 8);
    assert_eq!(summary.count_failed(), 0);

    for id in [picks[1].id, picks[3].id] {
        let row = fx.service.qualifier(id).await.unwrap();
        assert!(row.admission_rank > 6);
    }
    // Withdrawn rows keep the positions they left from
    let first = fx.service.qualifier(picks[0].id).await.unwrap();
    assert_eq!((first.order_index, first.admission_rank), (1, 0));
    let third = fx.service.qualifier(picks[2].id).await.unwrap();
    assert_eq!(third.admission_rank, 0);
}

#[tokio::test]
async fn test_team_class_seeded_by_top_three() {
    let fx = Fixture::new().await;
    let tier = fx.regional_tier("Region 3").await;
    let class = fx.service.create_class("Team Compound", true).await.unwrap();

    let member = |id: &str, avg: i64, count: usize| TeamMember {
        subject_id: id.to_string(),
        average: Decimal::new(avg, 3),
        score_count: count,
    };
    let teams = vec![
        TeamEntry {
            team_id: "club-a".to_string(),
            home_org_id: 11,
            members: vec![
                member("a1", 9000, 6),
                member("a2", 8800, 6),
                member("a3", 8700, 4),
                member("a4", 9500, 2),
            ],
            champion_label: String::new(),
        },
        TeamEntry {
            team_id: "club-b".to_string(),
            home_org_id: 12,
            members: vec![
                member("b1", 9100, 6),
                member("b2", 9000, 6),
                member("b3", 8900, 6),
            ],
            champion_label: String::new(),
        },
        TeamEntry {
            team_id: "club-c".to_string(),
            home_org_id: 13,
            members: vec![member("c1", 9900, 6), member("c2", 9900, 6)],
            champion_label: String::new(),
        },
    ];
    fx.service.enqueue_team_seed(tier, class, teams, "system").await.unwrap();
    fx.pass().await;

    let first = fx.row_at(tier, class, 1).await;
    assert_eq!(first.subject_id, "club-b");
    assert_eq!(first.seed_value, Decimal::new(27000, 3));
    let second = fx.row_at(tier, class, 2).await;
    assert_eq!(second.subject_id, "club-a");
    assert_eq!(second.seed_value, Decimal::new(26500, 3));
    let third = fx.row_at(tier, class, 3).await;
    assert_eq!(third.subject_id, "club-c");
    assert_eq!(third.seed_value, Decimal::ZERO);

    let view = fx.service.class_view(tier, class).await.unwrap();
    assert_eq!(view.limit, 8);
    assert_eq!(view.tier.level, TierLevel::Regional);
}
