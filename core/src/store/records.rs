//! Raw cluster records: bulk load, bulk replace.

use crate::{
    error::{EngineError, EngineResult},
    model::{
        Cluster, ClusterSnapshot, FacilityOverload, LinkType, MwContribution, Project,
        ProjectStatus, ProjectUpgradeLink, Upgrade,
    },
    types::{ClusterKey, LedgerVersion},
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(super) fn list_clusters(conn: &Connection) -> EngineResult<Vec<ClusterKey>> {
    let mut stmt = conn.prepare(
        "SELECT cluster_name, phase FROM cluster ORDER BY cluster_name, phase",
    )?;
    let keys = stmt
        .query_map([], |row| Ok(ClusterKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

pub(super) fn load_snapshot(conn: &Connection, key: &ClusterKey) -> EngineResult<ClusterSnapshot> {
    let cluster = conn
        .query_row(
            "SELECT total_projects, total_mw, decision_deadline
             FROM cluster WHERE cluster_name = ?1 AND phase = ?2",
            params![key.name, key.phase],
            |row| {
                let deadline: Option<String> = row.get(2)?;
                Ok(Cluster {
                    key: key.clone(),
                    total_projects: row.get(0)?,
                    total_mw: row.get(1)?,
                    decision_deadline: deadline.and_then(|d| parse_deadline(key, &d)),
                })
            },
        )
        .optional()?
        .ok_or_else(|| EngineError::ClusterNotFound { key: key.clone() })?;

    let mut stmt = conn.prepare(
        "SELECT project_id, developer, utility, state, fuel_type, mw_capacity, total_cost,
                toif_cost, stand_alone_cost, network_upgrade_cost, system_reliability_cost,
                rd1_amount, rd2_amount, status
         FROM project WHERE cluster_name = ?1 AND phase = ?2
         ORDER BY project_id",
    )?;
    let projects = stmt
        .query_map(params![key.name, key.phase], |row| {
            Ok(Project {
                project_id: row.get(0)?,
                developer: row.get(1)?,
                utility: row.get(2)?,
                state: row.get(3)?,
                fuel_type: row.get(4)?,
                mw_capacity: row.get(5)?,
                total_cost: row.get(6)?,
                toif_cost: row.get(7)?,
                stand_alone_cost: row.get(8)?,
                network_upgrade_cost: row.get(9)?,
                system_reliability_cost: row.get(10)?,
                rd1_amount: row.get(11)?,
                rd2_amount: row.get(12)?,
                status: ProjectStatus::parse(&row.get::<_, String>(13)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT upgrade_id, utility, title, total_cost, shared_by_count
         FROM upgrade WHERE cluster_name = ?1 AND phase = ?2
         ORDER BY upgrade_id",
    )?;
    let upgrades = stmt
        .query_map(params![key.name, key.phase], |row| {
            Ok(Upgrade {
                upgrade_id: row.get(0)?,
                utility: row.get(1)?,
                title: row.get(2)?,
                total_cost: row.get(3)?,
                shared_by_count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT project_id, upgrade_id, link_type, percent_allocation, allocated_cost, mw_impact
         FROM project_upgrade WHERE cluster_name = ?1 AND phase = ?2
         ORDER BY seq",
    )?;
    let raw_links = stmt
        .query_map(params![key.name, key.phase], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut links = Vec::with_capacity(raw_links.len());
    for (project_id, upgrade_id, link_type, percent_allocation, allocated_cost, mw_impact) in raw_links {
        // The CHECK constraint makes this unreachable for rows we wrote.
        let link_type = LinkType::parse(&link_type).ok_or_else(|| EngineError::InvariantViolation {
            key: key.clone(),
            detail: format!("unknown link type '{link_type}'"),
        })?;
        links.push(ProjectUpgradeLink {
            project_id,
            upgrade_id,
            link_type,
            percent_allocation,
            allocated_cost,
            mw_impact,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT overload_id, project_id, mw_contribution, contribution_type
         FROM mw_contribution WHERE cluster_name = ?1 AND phase = ?2
         ORDER BY overload_id, seq",
    )?;
    let mut contributions: BTreeMap<String, Vec<MwContribution>> = BTreeMap::new();
    let rows = stmt.query_map(params![key.name, key.phase], |row| {
        Ok((
            row.get::<_, String>(0)?,
            MwContribution {
                project_id: row.get(1)?,
                mw_contribution: row.get(2)?,
                contribution_type: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (overload_id, contribution) = row?;
        contributions.entry(overload_id).or_default().push(contribution);
    }

    let mut stmt = conn.prepare(
        "SELECT overload_id, facility_name, contingency_name, contingency_type,
                loading_pct, rating_mva, mva_to_mitigate
         FROM facility_overload WHERE cluster_name = ?1 AND phase = ?2
         ORDER BY overload_id",
    )?;
    let mut overloads = stmt
        .query_map(params![key.name, key.phase], |row| {
            Ok(FacilityOverload {
                overload_id: row.get(0)?,
                facility_name: row.get(1)?,
                contingency_name: row.get(2)?,
                contingency_type: row.get(3)?,
                loading_pct: row.get(4)?,
                rating_mva: row.get(5)?,
                mva_to_mitigate: row.get(6)?,
                contributions: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for overload in &mut overloads {
        overload.contributions = contributions.remove(&overload.overload_id).unwrap_or_default();
    }

    log::debug!(
        "{key}: loaded {} projects, {} upgrades, {} links, {} overloads",
        projects.len(),
        upgrades.len(),
        links.len(),
        overloads.len()
    );
    Ok(ClusterSnapshot { cluster, projects, upgrades, links, overloads })
}

fn parse_deadline(key: &ClusterKey, raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(err) => {
            log::warn!("{key}: ignoring malformed decision_deadline '{raw}': {err}");
            None
        }
    }
}

pub(super) fn ledger_version(conn: &Connection, key: &ClusterKey) -> EngineResult<LedgerVersion> {
    conn.query_row(
        "SELECT ledger_version FROM cluster WHERE cluster_name = ?1 AND phase = ?2",
        params![key.name, key.phase],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| EngineError::ClusterNotFound { key: key.clone() })
}

/// Fails when the ledger was rewritten after the caller read version `read`.
/// Run inside the writing transaction.
pub(super) fn ensure_ledger_version(
    conn: &Connection,
    key: &ClusterKey,
    read: LedgerVersion,
) -> EngineResult<()> {
    let current = ledger_version(conn, key)?;
    if current != read {
        return Err(EngineError::LedgerChanged { key: key.clone(), read, current });
    }
    Ok(())
}

/// Replace every raw record for the snapshot's cluster+phase and bump its
/// ledger version. Callers wrap this in a transaction.
pub(super) fn write_snapshot(conn: &Connection, snapshot: &ClusterSnapshot) -> EngineResult<()> {
    let key = snapshot.key();
    for table in ["mw_contribution", "facility_overload", "project_upgrade", "upgrade", "project"] {
        conn.execute(
            &format!("DELETE FROM {table} WHERE cluster_name = ?1 AND phase = ?2"),
            params![key.name, key.phase],
        )?;
    }

    let c = &snapshot.cluster;
    conn.execute(
        "INSERT INTO cluster (cluster_name, phase, total_projects, total_mw, decision_deadline, ledger_version)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)
         ON CONFLICT (cluster_name, phase) DO UPDATE SET
             total_projects    = excluded.total_projects,
             total_mw          = excluded.total_mw,
             decision_deadline = excluded.decision_deadline,
             ledger_version    = cluster.ledger_version + 1",
        params![
            key.name,
            key.phase,
            c.total_projects,
            c.total_mw,
            c.decision_deadline.map(|d| d.format(DATE_FORMAT).to_string()),
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO project (
            cluster_name, phase, project_id, developer, utility, state, fuel_type,
            mw_capacity, total_cost, toif_cost, stand_alone_cost, network_upgrade_cost,
            system_reliability_cost, rd1_amount, rd2_amount, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?;
    for p in &snapshot.projects {
        stmt.execute(params![
            key.name,
            key.phase,
            p.project_id,
            p.developer,
            p.utility,
            p.state,
            p.fuel_type,
            p.mw_capacity,
            p.total_cost,
            p.toif_cost,
            p.stand_alone_cost,
            p.network_upgrade_cost,
            p.system_reliability_cost,
            p.rd1_amount,
            p.rd2_amount,
            p.status.as_str(),
        ])?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO upgrade (cluster_name, phase, upgrade_id, utility, title, total_cost, shared_by_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for u in &snapshot.upgrades {
        stmt.execute(params![
            key.name,
            key.phase,
            u.upgrade_id,
            u.utility,
            u.title,
            u.total_cost,
            u.shared_by_count,
        ])?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO project_upgrade (
            cluster_name, phase, seq, project_id, upgrade_id, link_type,
            percent_allocation, allocated_cost, mw_impact
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for (seq, l) in snapshot.links.iter().enumerate() {
        stmt.execute(params![
            key.name,
            key.phase,
            seq as i64,
            l.project_id,
            l.upgrade_id,
            l.link_type.as_str(),
            l.percent_allocation,
            l.allocated_cost,
            l.mw_impact,
        ])?;
    }

    let mut overload_stmt = conn.prepare(
        "INSERT INTO facility_overload (
            cluster_name, phase, overload_id, facility_name, contingency_name,
            contingency_type, loading_pct, rating_mva, mva_to_mitigate
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut contribution_stmt = conn.prepare(
        "INSERT INTO mw_contribution (
            cluster_name, phase, overload_id, seq, project_id, mw_contribution, contribution_type
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for o in &snapshot.overloads {
        overload_stmt.execute(params![
            key.name,
            key.phase,
            o.overload_id,
            o.facility_name,
            o.contingency_name,
            o.contingency_type,
            o.loading_pct,
            o.rating_mva,
            o.mva_to_mitigate,
        ])?;
        for (seq, c) in o.contributions.iter().enumerate() {
            contribution_stmt.execute(params![
                key.name,
                key.phase,
                o.overload_id,
                seq as i64,
                c.project_id,
                c.mw_contribution,
                c.contribution_type,
            ])?;
        }
    }
    Ok(())
}

/// Refresh the denormalised totals after a successful publish.
pub(super) fn update_cluster_totals(
    conn: &Connection,
    key: &ClusterKey,
    total_projects: i64,
    total_mw: f64,
    shared_by_counts: &BTreeMap<String, i64>,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE cluster SET total_projects = ?3, total_mw = ?4
         WHERE cluster_name = ?1 AND phase = ?2",
        params![key.name, key.phase, total_projects, total_mw],
    )?;
    conn.execute(
        "UPDATE upgrade SET shared_by_count = 0 WHERE cluster_name = ?1 AND phase = ?2",
        params![key.name, key.phase],
    )?;
    let mut stmt = conn.prepare(
        "UPDATE upgrade SET shared_by_count = ?4
         WHERE cluster_name = ?1 AND phase = ?2 AND upgrade_id = ?3",
    )?;
    for (upgrade_id, count) in shared_by_counts {
        stmt.execute(params![key.name, key.phase, upgrade_id, count])?;
    }
    Ok(())
}
