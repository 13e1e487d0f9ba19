//! Output formatting for the CLI.
//!
//! Every command renders either an aligned table or a single JSON document.

use kubeloop_events::{ClusterState, ObjectRecord};
use kubeloop_reconciler::{ConvergenceReport, ReconcileAction};
use serde::Serialize;

use crate::cli::OutputFormat;

/// One object as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRow {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl ObjectRow {
    fn from_record(record: &ObjectRecord) -> Self {
        let meta = &record.resource.meta;
        Self {
            kind: record.resource.kind().to_string(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            status: status(record),
            node: record.node.clone(),
            owner: meta
                .owner
                .as_ref()
                .map(|o| format!("{}/{}", o.kind, o.name)),
        }
    }
}

fn status(record: &ObjectRecord) -> String {
    if let Some(phase) = record.pod_phase {
        return phase.to_string();
    }
    if let Some(phase) = record.claim_phase {
        return phase.to_string();
    }
    record
        .resource
        .spec
        .replicas()
        .map(|n| format!("replicas={n}"))
        .unwrap_or_default()
}

/// JSON document of `apply`.
#[derive(Debug, Serialize)]
struct ApplyDocument<'a> {
    report: &'a ConvergenceReport,
    objects: Vec<ObjectRow>,
}

/// JSON document of `plan`.
#[derive(Debug, Serialize)]
struct PlanDocument<'a> {
    count: usize,
    actions: &'a [ReconcileAction],
}

/// JSON document of `replay`.
#[derive(Debug, Serialize)]
struct StateDocument {
    objects: Vec<ObjectRow>,
}

/// Rows for every object, in key order.
pub fn object_rows(state: &ClusterState) -> Vec<ObjectRow> {
    state.objects.values().map(ObjectRow::from_record).collect()
}

/// Render the cluster state.
///
/// # Errors
///
/// Returns error if JSON serialization fails.
pub fn render_state(state: &ClusterState, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&StateDocument {
            objects: object_rows(state),
        }),
        OutputFormat::Table => Ok(state_table(state)),
    }
}

/// Render the outcome of `apply`: the report and the final state.
///
/// # Errors
///
/// Returns error if JSON serialization fails.
pub fn render_apply(
    report: &ConvergenceReport,
    state: &ClusterState,
    format: OutputFormat,
) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&ApplyDocument {
            report,
            objects: object_rows(state),
        }),
        OutputFormat::Table => Ok(format!(
            "{}\n\nConverged after {} cycles ({} actions, {} failed)",
            state_table(state),
            report.cycles,
            report.actions_taken,
            report.actions_failed
        )),
    }
}

/// Render planned actions.
///
/// # Errors
///
/// Returns error if JSON serialization fails.
pub fn render_plan(actions: &[ReconcileAction], format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&PlanDocument {
            count: actions.len(),
            actions,
        }),
        OutputFormat::Table if actions.is_empty() => Ok("No changes.".to_string()),
        OutputFormat::Table => {
            let rows = actions
                .iter()
                .map(|a| vec![a.verb().to_string(), a.key().to_string(), a.description()])
                .collect::<Vec<_>>();
            Ok(table(&["ACTION", "OBJECT", "DETAIL"], &rows))
        }
    }
}

fn state_table(state: &ClusterState) -> String {
    if state.is_empty() {
        return "No objects.".to_string();
    }
    let rows = object_rows(state)
        .into_iter()
        .map(|row| {
            vec![
                row.kind,
                row.namespace,
                row.name,
                row.status,
                row.node.unwrap_or_else(|| "-".to_string()),
                row.owner.unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect::<Vec<_>>();
    table(&["KIND", "NAMESPACE", "NAME", "STATUS", "NODE", "OWNER"], &rows)
}

/// Left-aligned columns separated by two spaces.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(String::len)
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    std::iter::once(render_line(headers, &widths))
        .chain(rows.iter().map(|row| {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            render_line(&cells, &widths)
        }))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use kubeloop_events::{
        ClusterEvent, ClusterProjection, DeploymentSpec, ObjectKey, ObjectMeta, PodTemplate,
        Projection, Resource, ResourceKind, UpdateStrategy,
    };

    fn state_with_deployment() -> ClusterState {
        let projection = ClusterProjection::new();
        let mut state = projection.initial_state();
        let web = Resource::deployment(
            ObjectMeta::new("web"),
            DeploymentSpec {
                replicas: 3,
                strategy: UpdateStrategy::default(),
                template: PodTemplate::new("nginx"),
            },
        );
        projection.apply(&mut state, &ClusterEvent::created(web));
        state
    }

    #[test]
    fn test_table_is_aligned() {
        let rendered = table(
            &["A", "LONGER"],
            &[vec!["wide-cell".to_string(), "x".to_string()]],
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines, vec!["A          LONGER", "wide-cell  x"]);
    }

    #[test]
    fn test_state_table_lists_objects() {
        let rendered = render_state(&state_with_deployment(), OutputFormat::Table).unwrap();
        assert!(rendered.starts_with("KIND"));
        assert!(rendered.contains("replicas=3"));
    }

    #[test]
    fn test_state_json() {
        let rendered = render_state(&state_with_deployment(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["objects"][0]["name"], "web");
        assert!(value["objects"][0].get("node").is_none());
    }

    #[test]
    fn test_empty_plan() {
        assert_eq!(render_plan(&[], OutputFormat::Table).unwrap(), "No changes.");
    }

    #[test]
    fn test_plan_json_counts_actions() {
        let action = ReconcileAction::BindClaim {
            key: ObjectKey::default_ns(ResourceKind::PersistentVolumeClaim, "data-db-0"),
        };
        let rendered = render_plan(&[action], OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["count"], 1);
    }

    #[test]
    fn test_apply_table_ends_with_report() {
        let report = ConvergenceReport {
            cycles: 4,
            actions_taken: 9,
            actions_failed: 0,
        };
        let rendered = render_apply(&report, &state_with_deployment(), OutputFormat::Table).unwrap();
        assert!(rendered.ends_with("Converged after 4 cycles (9 actions, 0 failed)"));
    }
}
