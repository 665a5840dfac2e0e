//! Repository for the `quality_metrics` table.

use posecraft_core::metrics::QualityMetrics;
use posecraft_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::quality_metrics::QualityMetricsRecord;

const COLUMNS: &str = "\
    id, project_id, avg_generation_time, avg_ssim, avg_pose_accuracy, \
    avg_color_delta, avg_style_consistency, success_rate, \
    completed_count, total_count, method_effectiveness, recommendations, \
    created_at, updated_at";

pub struct QualityMetricsRepo;

impl QualityMetricsRepo {
    /// Insert the project's metrics, replacing any earlier record.
    pub async fn upsert(pool: &PgPool, metrics: &QualityMetrics) -> Result<QualityMetricsRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO quality_metrics (project_id, avg_generation_time, avg_ssim, \
                 avg_pose_accuracy, avg_color_delta, avg_style_consistency, success_rate, \
                 completed_count, total_count, method_effectiveness, recommendations) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (project_id) DO UPDATE SET \
                 avg_generation_time = EXCLUDED.avg_generation_time, \
                 avg_ssim = EXCLUDED.avg_ssim, \
                 avg_pose_accuracy = EXCLUDED.avg_pose_accuracy, \
                 avg_color_delta = EXCLUDED.avg_color_delta, \
                 avg_style_consistency = EXCLUDED.avg_style_consistency, \
                 success_rate = EXCLUDED.success_rate, \
                 completed_count = EXCLUDED.completed_count, \
                 total_count = EXCLUDED.total_count, \
                 method_effectiveness = EXCLUDED.method_effectiveness, \
                 recommendations = EXCLUDED.recommendations, \
                 updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QualityMetricsRecord>(&query)
            .bind(metrics.project_id)
            .bind(metrics.avg_generation_time)
            .bind(metrics.avg_ssim)
            .bind(metrics.avg_pose_accuracy)
            .bind(metrics.avg_color_delta)
            .bind(metrics.avg_style_consistency)
            .bind(metrics.success_rate)
            .bind(metrics.completed_count as i32)
            .bind(metrics.total_count as i32)
            .bind(Json(&metrics.method_effectiveness))
            .bind(&metrics.recommendations)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Option<QualityMetricsRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM quality_metrics WHERE project_id = $1");
        sqlx::query_as::<_, QualityMetricsRecord>(&query)
            .bind(project_id)
            .fetch_optional(pool)
            .await
    }
}
