//! Scoring runs and the publication pointer.
//!
//! A publish writes every project_score row under the new run_id and then
//! moves `cluster_publication` in the same transaction, so readers see
//! either the previous run or the new one.

use crate::{
    error::{EngineError, EngineResult},
    report::{RunReport, RunStatus},
    risk::{ComponentScores, RiskComponent, RiskLevel},
    scoring::ScoredCluster,
    types::{ClusterKey, ProjectId, RunId},
    view::{ClusterSummary, ComponentAverages, ProjectRiskView},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

pub(super) fn write_publication(
    conn: &Connection,
    report: &RunReport,
    scored: &ScoredCluster,
) -> EngineResult<()> {
    let key = &scored.key;
    upsert_run(conn, report)?;

    let mut stmt = conn.prepare(
        "INSERT INTO project_score (
            run_id, project_id, total_cost, cost_per_kw, cost_rank, cost_percentile,
            risk_score_cost, risk_score_concentration, risk_score_dependency,
            risk_score_timeline, risk_score_overall, risk_level,
            unknown_components, codependents_json, overload_exposure
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )?;
    for p in scored.projects.values() {
        stmt.execute(params![
            report.run_id,
            p.project_id,
            p.total_cost,
            p.cost_per_kw,
            p.cost_rank,
            p.cost_percentile,
            p.components.cost,
            p.components.concentration,
            p.components.dependency,
            p.components.timeline,
            p.risk_score_overall,
            p.risk_level.map(|l| l.as_str()),
            serde_json::to_string(&p.unknown_components)?,
            serde_json::to_string(&p.codependent_project_ids)?,
            p.overload_exposure as i64,
        ])?;
    }

    super::records::update_cluster_totals(
        conn,
        key,
        scored.total_projects,
        scored.total_mw,
        &scored.shared_by_counts,
    )?;

    conn.execute(
        "INSERT INTO cluster_publication (cluster_name, phase, run_id, published_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (cluster_name, phase) DO UPDATE SET
             run_id       = excluded.run_id,
             published_at = excluded.published_at",
        params![key.name, key.phase, report.run_id, Utc::now().to_rfc3339()],
    )?;

    // Superseded score rows go; the run history stays.
    let pruned = conn.execute(
        "DELETE FROM project_score
         WHERE run_id IN (
             SELECT run_id FROM scoring_run
             WHERE cluster_name = ?1 AND phase = ?2 AND run_id != ?3
         )",
        params![key.name, key.phase, report.run_id],
    )?;
    log::debug!("{key}: published run {} (pruned {pruned} stale rows)", report.run_id);
    Ok(())
}

pub(super) fn upsert_run(conn: &Connection, report: &RunReport) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO scoring_run (
            run_id, cluster_name, phase, status, started_at, finished_at,
            project_count, warnings_json, error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (run_id) DO UPDATE SET
            status        = excluded.status,
            finished_at   = excluded.finished_at,
            project_count = excluded.project_count,
            warnings_json = excluded.warnings_json,
            error         = excluded.error",
        params![
            report.run_id,
            report.key.name,
            report.key.phase,
            report.status.as_str(),
            report.started_at.to_rfc3339(),
            report.finished_at.map(|t| t.to_rfc3339()),
            report.project_count as i64,
            serde_json::to_string(&report.warnings)?,
            report.error,
        ],
    )?;
    Ok(())
}

pub(super) fn published_run(conn: &Connection, key: &ClusterKey) -> EngineResult<Option<RunId>> {
    let run_id = conn
        .query_row(
            "SELECT run_id FROM cluster_publication WHERE cluster_name = ?1 AND phase = ?2",
            params![key.name, key.phase],
            |row| row.get(0),
        )
        .optional()?;
    Ok(run_id)
}

pub(super) fn run_report(conn: &Connection, run_id: &str) -> EngineResult<Option<RunReport>> {
    let row = conn
        .query_row(
            "SELECT cluster_name, phase, status, started_at, finished_at,
                    project_count, warnings_json, error
             FROM scoring_run WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;
    let Some((name, phase, status, started_at, finished_at, project_count, warnings, error)) = row
    else {
        return Ok(None);
    };

    let key = ClusterKey::new(name, phase);
    let status = RunStatus::parse(&status).ok_or_else(|| EngineError::InvariantViolation {
        key: key.clone(),
        detail: format!("run {run_id} has unknown status '{status}'"),
    })?;
    Ok(Some(RunReport {
        run_id: run_id.to_string(),
        key,
        status,
        started_at: parse_timestamp(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        project_count: project_count.max(0) as usize,
        warnings: serde_json::from_str(&warnings)?,
        error,
    }))
}

fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(anyhow::Error::from)?;
    Ok(parsed.with_timezone(&Utc))
}

/// Views from the currently published run, optionally narrowed to one project.
pub(super) fn published_scores(
    conn: &Connection,
    key: &ClusterKey,
    project_id: Option<&str>,
) -> EngineResult<Vec<ProjectRiskView>> {
    let mut stmt = conn.prepare(
        "SELECT s.project_id, s.run_id, s.total_cost, s.cost_per_kw, s.cost_rank,
                s.cost_percentile, s.risk_score_cost, s.risk_score_concentration,
                s.risk_score_dependency, s.risk_score_timeline, s.risk_score_overall,
                s.risk_level, s.unknown_components, s.codependents_json, s.overload_exposure
         FROM cluster_publication p
         JOIN project_score s ON s.run_id = p.run_id
         WHERE p.cluster_name = ?1 AND p.phase = ?2
           AND (?3 IS NULL OR s.project_id = ?3)
         ORDER BY s.project_id",
    )?;
    let rows = stmt
        .query_map(params![key.name, key.phase, project_id], |row| {
            Ok(ScoreRow {
                project_id: row.get(0)?,
                run_id: row.get(1)?,
                total_cost: row.get(2)?,
                cost_per_kw: row.get(3)?,
                cost_rank: row.get(4)?,
                cost_percentile: row.get(5)?,
                components: ComponentScores {
                    cost: row.get(6)?,
                    concentration: row.get(7)?,
                    dependency: row.get(8)?,
                    timeline: row.get(9)?,
                },
                risk_score_overall: row.get(10)?,
                risk_level: row.get(11)?,
                unknown_json: row.get(12)?,
                codependents_json: row.get(13)?,
                overload_exposure: row.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut views = Vec::with_capacity(rows.len());
    for r in rows {
        let unknown_components: Vec<RiskComponent> = serde_json::from_str(&r.unknown_json)?;
        let codependent_project_ids: Vec<ProjectId> = serde_json::from_str(&r.codependents_json)?;
        views.push(ProjectRiskView {
            project_id: r.project_id,
            run_id: r.run_id,
            total_cost: r.total_cost,
            cost_per_kw: r.cost_per_kw,
            cost_rank: r.cost_rank,
            cost_percentile: r.cost_percentile,
            risk_score_overall: r.risk_score_overall,
            components: r.components,
            unknown_components,
            risk_level: r.risk_level.as_deref().and_then(RiskLevel::parse),
            codependent_project_ids,
            overload_exposure: r.overload_exposure.max(0) as usize,
        });
    }
    Ok(views)
}

struct ScoreRow {
    project_id: ProjectId,
    run_id: RunId,
    total_cost: Option<f64>,
    cost_per_kw: Option<f64>,
    cost_rank: Option<u32>,
    cost_percentile: Option<f64>,
    components: ComponentScores,
    risk_score_overall: Option<f64>,
    risk_level: Option<String>,
    unknown_json: String,
    codependents_json: String,
    overload_exposure: i64,
}

pub(super) fn cluster_summary(conn: &Connection, key: &ClusterKey) -> EngineResult<ClusterSummary> {
    let (total_projects, total_mw) = conn
        .query_row(
            "SELECT total_projects, total_mw FROM cluster WHERE cluster_name = ?1 AND phase = ?2",
            params![key.name, key.phase],
            |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<f64>>(1)?)),
        )
        .optional()?
        .ok_or_else(|| EngineError::ClusterNotFound { key: key.clone() })?;

    let run_id = published_run(conn, key)?;
    let mut summary = ClusterSummary {
        key: key.clone(),
        run_id: run_id.clone(),
        total_projects: total_projects.unwrap_or(0),
        total_mw,
        total_cost: None,
        avg_cost_per_kw: None,
        avg_risk_score: None,
        risk_distribution: BTreeMap::new(),
        cost_distribution: BTreeMap::new(),
        component_averages: ComponentAverages::default(),
    };
    let Some(run_id) = run_id else {
        return Ok(summary);
    };

    conn.query_row(
        "SELECT COUNT(*), SUM(total_cost), AVG(cost_per_kw), AVG(risk_score_overall),
                AVG(risk_score_cost), AVG(risk_score_concentration),
                AVG(risk_score_dependency), AVG(risk_score_timeline)
         FROM project_score WHERE run_id = ?1",
        params![run_id],
        |row| {
            summary.total_projects = row.get(0)?;
            summary.total_cost = row.get(1)?;
            summary.avg_cost_per_kw = row.get(2)?;
            summary.avg_risk_score = row.get(3)?;
            summary.component_averages = ComponentAverages {
                cost: row.get(4)?,
                concentration: row.get(5)?,
                dependency: row.get(6)?,
                timeline: row.get(7)?,
                overall: row.get(3)?,
            };
            Ok(())
        },
    )?;

    let mut stmt = conn.prepare(
        "SELECT risk_level, COUNT(*) FROM project_score
         WHERE run_id = ?1 AND risk_level IS NOT NULL
         GROUP BY risk_level",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (level, count) = row?;
        summary.risk_distribution.insert(level, count);
    }

    let mut stmt = conn.prepare(
        "SELECT CASE
                    WHEN cost_percentile < 20 THEN 'q1'
                    WHEN cost_percentile < 40 THEN 'q2'
                    WHEN cost_percentile < 60 THEN 'q3'
                    WHEN cost_percentile < 80 THEN 'q4'
                    ELSE 'q5'
                END AS quintile,
                COUNT(*)
         FROM project_score
         WHERE run_id = ?1 AND cost_percentile IS NOT NULL
         GROUP BY quintile",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (quintile, count) = row?;
        summary.cost_distribution.insert(quintile, count);
    }
    Ok(summary)
}
