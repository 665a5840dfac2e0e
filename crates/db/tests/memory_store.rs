//! Integration tests for the in-memory store.
//!
//! Exercises the `Store` contract:
//! - Project and variant CRUD
//! - Compare-and-set and terminal-state guards on variants
//! - Metrics upsert
//! - Alignment persistence round-trip
//! - Atomic project creation
//! - Restart recovery and run leases

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use assert_matches::assert_matches;
use posecraft_core::alignment::{KeypointAdaptation, Point, PoseAlignment};
use posecraft_core::metrics::{QualityMetrics, QualityScores};
use posecraft_core::scene::{PoseStyle, SceneType};
use posecraft_core::status::{ProjectStatus, VariantStatus};
use posecraft_core::style::StyleContext;
use posecraft_core::zones::InsertionZone;
use posecraft_db::models::project::{CreateProject, UpdateProject};
use posecraft_db::models::variant::{CompleteVariant, CreateVariant};
use posecraft_db::{MemoryStore, Store, StoreError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_project(name: &str) -> CreateProject {
    CreateProject {
        name: name.to_string(),
        background_url: "file:///bg.png".into(),
        mask_url: Some("file:///mask.png".into()),
        pose_reference_url: "file:///pose.png".into(),
        scene_type: SceneType::Terrace,
        pose_style: PoseStyle::Standing,
        variant_count: 3,
        controlnet_strength: 1.0,
        guidance_scale: 7.5,
        style: StyleContext {
            reference_url: None,
            palette: vec!["#C0A080".into()],
        },
        prompt: "a prompt".into(),
        custom_prompt: false,
    }
}

fn variants(seeds: &[i64]) -> Vec<CreateVariant> {
    seeds
        .iter()
        .enumerate()
        .map(|(i, seed)| CreateVariant {
            variant_number: i as i16 + 1,
            seed: *seed,
        })
        .collect()
}

fn completion() -> CompleteVariant {
    CompleteVariant {
        image_url: "out.png".into(),
        generation_time_secs: 12.5,
        backend_request_id: Some("req-1".into()),
        scores: QualityScores {
            ssim: 0.94,
            pose_accuracy: 0.88,
            color_delta: 2.1,
            style_consistency: Some(0.83),
        },
        correction_method: "original".into(),
        correction_score: 0.0,
    }
}

fn awkward_alignment() -> PoseAlignment {
    let mut adaptations = BTreeMap::new();
    adaptations.insert(
        "left_hip".to_string(),
        KeypointAdaptation {
            original: Point { x: 0.1 + 0.2, y: 1.0 / 3.0 },
            adapted: Point { x: std::f64::consts::FRAC_1_SQRT_2, y: 0.678_901_234_567_89 },
            confidence: 0.987_654_321,
            shift: 1e-17,
        },
    );
    adaptations.insert(
        "right_knee".to_string(),
        KeypointAdaptation {
            original: Point { x: 0.55, y: 0.62 },
            adapted: Point { x: 0.468_176_930_361_4, y: 0.700_837_781_711_3 },
            confidence: 0.5,
            shift: 0.123_456_789,
        },
    );
    PoseAlignment {
        adaptations,
        insertion_zone: InsertionZone {
            x_start: 0.125,
            x_end: 0.875,
            width: 0.75,
            avg_depth: 0.7,
            stability_score: 0.9,
        },
        validation_score: 0.966_666_666_666_666_7,
        pose_style: PoseStyle::Standing,
        scene_type: SceneType::Terrace,
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_find_project() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("Rooftop")).await.unwrap();
    assert_eq!(project.status().unwrap(), ProjectStatus::Pending);
    assert_eq!(project.scene().unwrap(), SceneType::Terrace);
    assert_eq!(project.style().palette, vec!["#C0A080".to_string()]);

    let found = store.find_project(project.id).await.unwrap();
    assert_eq!(found, project);
}

#[tokio::test]
async fn missing_project_is_not_found() {
    let store = MemoryStore::new();
    assert_matches!(
        store.find_project(99).await,
        Err(StoreError::NotFound { entity: "project", id: 99 })
    );
}

#[tokio::test]
async fn update_applies_only_given_fields() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("Rooftop")).await.unwrap();
    let updated = store
        .update_project(
            project.id,
            &UpdateProject {
                total_cost: Some(0.15),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.total_cost, 0.15);
    assert_eq!(updated.status_id, ProjectStatus::Pending.id());
    assert_eq!(updated.prompt, "a prompt");
}

#[tokio::test]
async fn update_sets_derived_mask() {
    let store = MemoryStore::new();
    let mut input = new_project("Rooftop");
    input.mask_url = None;
    let project = store.create_project(&input).await.unwrap();
    assert!(project.mask_url.is_none());

    let updated = store
        .update_project(
            project.id,
            &UpdateProject {
                mask_url: Some("file:///derived.png".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.mask_url.as_deref(), Some("file:///derived.png"));
}

#[tokio::test]
async fn create_with_variants_stores_both() {
    let store = MemoryStore::new();
    let (project, created) = store
        .create_project_with_variants(&new_project("p"), &variants(&[5, 6, 7]))
        .await
        .unwrap();
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|v| v.project_id == project.id));
    assert_eq!(store.list_variants(project.id).await.unwrap(), created);
}

#[tokio::test]
async fn create_with_variants_stores_nothing_on_conflict() {
    let store = MemoryStore::new();
    let mut repeated = variants(&[5, 6]);
    repeated[1].variant_number = repeated[0].variant_number;

    assert_matches!(
        store.create_project_with_variants(&new_project("p"), &repeated).await,
        Err(StoreError::Conflict(_))
    );
    assert!(store.claim_next_pending_project().await.unwrap().is_none());
}

#[tokio::test]
async fn claim_takes_oldest_pending_once() {
    let store = MemoryStore::new();
    let first = store.create_project(&new_project("first")).await.unwrap();
    let second = store.create_project(&new_project("second")).await.unwrap();

    let claimed = store.claim_next_pending_project().await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status().unwrap(), ProjectStatus::Generating);
    assert!(claimed.heartbeat_at.is_some());

    let claimed = store.claim_next_pending_project().await.unwrap().unwrap();
    assert_eq!(claimed.id, second.id);

    assert!(store.claim_next_pending_project().await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn variants_are_created_in_order() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let created = store
        .create_variants(project.id, &variants(&[111, 222, 333]))
        .await
        .unwrap();
    assert_eq!(created.len(), 3);

    let listed = store.list_variants(project.id).await.unwrap();
    let numbers: Vec<i16> = listed.iter().map(|v| v.variant_number).collect();
    let seeds: Vec<i64> = listed.iter().map(|v| v.seed).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(seeds, vec![111, 222, 333]);
    assert!(listed
        .iter()
        .all(|v| v.status().unwrap() == VariantStatus::Pending));
}

#[tokio::test]
async fn duplicate_variant_number_conflicts() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    store.create_variants(project.id, &variants(&[1])).await.unwrap();
    assert_matches!(
        store.create_variants(project.id, &variants(&[2])).await,
        Err(StoreError::Conflict(_))
    );
}

#[tokio::test]
async fn variants_need_existing_project() {
    let store = MemoryStore::new();
    assert_matches!(
        store.create_variants(42, &variants(&[1])).await,
        Err(StoreError::NotFound { entity: "project", .. })
    );
}

#[tokio::test]
async fn start_is_compare_and_set() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let v = store.create_variants(project.id, &variants(&[7])).await.unwrap().remove(0);

    assert!(store.start_variant(v.id).await.unwrap());
    assert!(!store.start_variant(v.id).await.unwrap());
    assert_eq!(
        store.find_variant(v.id).await.unwrap().status().unwrap(),
        VariantStatus::Generating
    );
}

#[tokio::test]
async fn complete_records_scores_and_method() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let v = store.create_variants(project.id, &variants(&[7])).await.unwrap().remove(0);
    store.start_variant(v.id).await.unwrap();

    let done = store.complete_variant(v.id, &completion()).await.unwrap();
    assert_eq!(done.status().unwrap(), VariantStatus::Completed);
    assert_eq!(done.correction_method.as_deref(), Some("original"));
    assert_eq!(done.quality_scores(), Some(completion().scores));

    let summary = done.summary().unwrap();
    assert_eq!(summary.generation_time_secs, Some(12.5));
}

#[tokio::test]
async fn complete_requires_generating() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let v = store.create_variants(project.id, &variants(&[7])).await.unwrap().remove(0);
    assert_matches!(
        store.complete_variant(v.id, &completion()).await,
        Err(StoreError::InvalidTransition { from: "pending", to: "completed", .. })
    );
}

#[tokio::test]
async fn terminal_variants_cannot_change() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let v = store.create_variants(project.id, &variants(&[7])).await.unwrap().remove(0);
    store.start_variant(v.id).await.unwrap();
    store.complete_variant(v.id, &completion()).await.unwrap();

    assert!(!store.start_variant(v.id).await.unwrap());
    assert_matches!(
        store.fail_variant(v.id, "late").await,
        Err(StoreError::InvalidTransition { from: "completed", .. })
    );
}

#[tokio::test]
async fn fail_records_message_without_method() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let v = store.create_variants(project.id, &variants(&[7])).await.unwrap().remove(0);

    let failed = store.fail_variant(v.id, "cancelled").await.unwrap();
    assert_eq!(failed.status().unwrap(), VariantStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("cancelled"));
    assert!(failed.correction_method.is_none());
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_upsert_keeps_one_record() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let mut metrics = QualityMetrics {
        project_id: project.id,
        avg_generation_time: 10.0,
        avg_ssim: 0.9,
        avg_pose_accuracy: 0.8,
        avg_color_delta: 2.0,
        avg_style_consistency: 0.0,
        success_rate: 0.5,
        completed_count: 1,
        total_count: 2,
        method_effectiveness: BTreeMap::from([("A".to_string(), 0.7)]),
        recommendations: vec!["x".into()],
    };
    let first = store.save_quality_metrics(&metrics).await.unwrap();

    metrics.success_rate = 1.0;
    let second = store.save_quality_metrics(&metrics).await.unwrap();
    assert_eq!(first.id, second.id);

    let found = store.find_quality_metrics(project.id).await.unwrap().unwrap();
    assert_eq!(found.to_metrics(), metrics);
}

#[tokio::test]
async fn metrics_absent_before_aggregation() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    assert!(store.find_quality_metrics(project.id).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Alignments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn alignment_round_trip_preserves_coordinates() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let alignment = awkward_alignment();
    store.save_alignment(project.id, &alignment).await.unwrap();

    let stored = store.find_latest_alignment(project.id).await.unwrap().unwrap();
    let read = &stored.alignment.0;
    for (name, original) in &alignment.adaptations {
        let back = &read.adaptations[name];
        assert!((back.adapted.x - original.adapted.x).abs() < 1e-9, "{name}");
        assert!((back.adapted.y - original.adapted.y).abs() < 1e-9, "{name}");
        assert!((back.original.x - original.original.x).abs() < 1e-9, "{name}");
    }
    assert_eq!(read, &alignment);
}

#[tokio::test]
async fn newer_alignment_supersedes_older() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let first = awkward_alignment();
    let mut second = awkward_alignment();
    second.validation_score = 0.5;

    store.save_alignment(project.id, &first).await.unwrap();
    store.save_alignment(project.id, &second).await.unwrap();

    let latest = store.find_latest_alignment(project.id).await.unwrap().unwrap();
    assert_eq!(latest.validation_score, 0.5);
    assert_eq!(latest.alignment.0, second);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_moves_generating_back_to_pending() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let vs = store.create_variants(project.id, &variants(&[1, 2])).await.unwrap();
    store.claim_next_pending_project().await.unwrap();
    store.start_variant(vs[0].id).await.unwrap();
    store.start_variant(vs[1].id).await.unwrap();
    store.complete_variant(vs[1].id, &completion()).await.unwrap();

    let reset = store
        .reset_interrupted(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(reset.projects, 1);
    assert_eq!(reset.variants, 1);

    let listed = store.list_variants(project.id).await.unwrap();
    assert_eq!(listed[0].status().unwrap(), VariantStatus::Pending);
    assert_eq!(listed[1].status().unwrap(), VariantStatus::Completed);
    assert_eq!(
        store.find_project(project.id).await.unwrap().status().unwrap(),
        ProjectStatus::Pending
    );
}

#[tokio::test]
async fn live_lease_is_not_reset() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let vs = store.create_variants(project.id, &variants(&[1])).await.unwrap();
    store.claim_next_pending_project().await.unwrap();
    store.start_variant(vs[0].id).await.unwrap();

    let reset = store
        .reset_interrupted(Utc::now() - Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(reset.projects, 0);
    assert_eq!(reset.variants, 0);
    assert_eq!(
        store.find_variant(vs[0].id).await.unwrap().status().unwrap(),
        VariantStatus::Generating
    );
}

#[tokio::test]
async fn touch_renews_the_lease() {
    let store = MemoryStore::new();
    let project = store.create_project(&new_project("p")).await.unwrap();
    let claimed = store.claim_next_pending_project().await.unwrap().unwrap();
    let cutoff = claimed.heartbeat_at.unwrap() + Duration::milliseconds(1);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.touch_project(project.id).await.unwrap();

    let reset = store.reset_interrupted(cutoff).await.unwrap();
    assert_eq!(reset.projects, 0);
    assert_matches!(
        store.touch_project(999).await,
        Err(StoreError::NotFound { entity: "project", id: 999 })
    );
}
