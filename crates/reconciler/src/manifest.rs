//! YAML manifests declaring workloads.
//!
//! A manifest holds one or more `---` separated documents. Each document
//! declares a Deployment or a StatefulSet; the objects those own are made
//! by controllers and cannot be declared.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use kubeloop_events::{
    DeploymentSpec, ObjectMeta, PodManagementPolicy, PodTemplate, Resource, StatefulSetSpec,
    UpdateStrategy, VolumeClaimTemplate, validate_name,
};
use serde::Deserialize;
use tracing::debug;

use crate::controllers::derived_names;
use crate::error::{Error, Result};
use crate::types::DesiredState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    kind: String,
    metadata: Metadata,
    #[serde(default)]
    spec: Spec,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Spec {
    replicas: Option<u32>,
    strategy: Option<Strategy>,
    template: Option<Template>,
    pod_management_policy: Option<PolicyName>,
    #[serde(default)]
    volume_claim_templates: Vec<ClaimTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Strategy {
    #[serde(rename = "type", default)]
    kind: StrategyName,
    max_surge: Option<u32>,
    max_unavailable: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
enum StrategyName {
    #[default]
    RollingUpdate,
    Recreate,
}

#[derive(Debug, Deserialize)]
enum PolicyName {
    OrderedReady,
    Parallel,
}

#[derive(Debug, Deserialize)]
struct Template {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    image: String,
}

#[derive(Debug, Deserialize)]
struct ClaimTemplate {
    name: String,
    storage: String,
}

/// Parse every document of a manifest into workload resources.
///
/// Empty documents are skipped. Document indexes in errors start at 1.
///
/// # Errors
///
/// - `Error::ManifestInvalid` for YAML errors, unknown or undeclarable
///   kinds, invalid names, and impossible rollout strategies.
/// - `Error::DuplicateObject` when two documents declare the same object.
pub fn parse_manifest(text: &str) -> Result<Vec<Resource>> {
    let mut seen = BTreeSet::new();
    let mut resources = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let number = index + 1;
        let parsed = Option::<Document>::deserialize(document)
            .map_err(|e| Error::manifest_invalid(number, e.to_string()))?;

        let Some(parsed) = parsed else {
            continue;
        };

        let resource = to_resource(parsed)
            .and_then(check_derived_names)
            .map_err(|reason| Error::manifest_invalid(number, reason))?;
        let key = resource.key();
        if !seen.insert(key.clone()) {
            return Err(Error::duplicate_object(&key));
        }
        debug!(document = number, object = %key, "Parsed manifest document");
        resources.push(resource);
    }

    Ok(resources)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// `Error::ManifestRead` if the file cannot be read, otherwise the errors
/// of [`parse_manifest`].
pub async fn load_manifest(path: &Path) -> Result<Vec<Resource>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::manifest_read(path.display().to_string(), e.to_string()))?;
    parse_manifest(&text)
}

/// Read a manifest file straight into a desired state.
///
/// # Errors
///
/// Same as [`load_manifest`].
pub async fn load_desired_state(path: &Path) -> Result<DesiredState> {
    load_manifest(path).await.map(DesiredState::from_resources)
}

/// Controllers name owned objects after the workload, so a name that is
/// valid on its own can still be too long once suffixed.
fn check_derived_names(resource: Resource) -> std::result::Result<Resource, String> {
    for derived in derived_names(&resource) {
        validate_name(&derived).map_err(|e| {
            format!(
                "{} '{}' is too long for the objects it owns: {e}",
                resource.kind(),
                resource.meta.name
            )
        })?;
    }
    Ok(resource)
}

fn to_resource(document: Document) -> std::result::Result<Resource, String> {
    let Document {
        kind,
        metadata,
        spec,
    } = document;

    validate_name(&metadata.name).map_err(|e| e.to_string())?;
    let mut meta = ObjectMeta::new(metadata.name).with_labels(metadata.labels);
    if let Some(namespace) = metadata.namespace {
        validate_name(&namespace).map_err(|e| e.to_string())?;
        meta = meta.with_namespace(namespace);
    }

    let replicas = spec.replicas.unwrap_or(1);
    let template = spec
        .template
        .map(|t| PodTemplate {
            labels: t.labels,
            image: t.image,
        })
        .ok_or_else(|| format!("{kind} '{}' has no pod template", meta.name))?;

    match kind.as_str() {
        "Deployment" => {
            let strategy = spec.strategy.map(to_strategy).transpose()?.unwrap_or_default();
            Ok(Resource::deployment(
                meta,
                DeploymentSpec {
                    replicas,
                    strategy,
                    template,
                },
            ))
        }
        "StatefulSet" => {
            let claims = spec
                .volume_claim_templates
                .into_iter()
                .map(|c| {
                    validate_name(&c.name).map_err(|e| e.to_string())?;
                    Ok(VolumeClaimTemplate::new(c.name, c.storage))
                })
                .collect::<std::result::Result<Vec<_>, String>>()?;
            let pod_management_policy = match spec.pod_management_policy {
                Some(PolicyName::Parallel) => PodManagementPolicy::Parallel,
                Some(PolicyName::OrderedReady) | None => PodManagementPolicy::OrderedReady,
            };
            Ok(Resource::stateful_set(
                meta,
                StatefulSetSpec {
                    replicas,
                    template,
                    pod_management_policy,
                    volume_claim_templates: claims,
                },
            ))
        }
        "ReplicaSet" | "Pod" | "PersistentVolumeClaim" => Err(format!(
            "kind '{kind}' is managed by controllers and cannot be declared"
        )),
        other => Err(format!("unknown kind '{other}'")),
    }
}

fn to_strategy(strategy: Strategy) -> std::result::Result<UpdateStrategy, String> {
    match strategy.kind {
        StrategyName::Recreate => Ok(UpdateStrategy::Recreate),
        StrategyName::RollingUpdate => {
            let max_surge = strategy.max_surge.unwrap_or(1);
            let max_unavailable = strategy.max_unavailable.unwrap_or(0);
            if max_surge == 0 && max_unavailable == 0 {
                return Err("maxSurge and maxUnavailable cannot both be 0".to_string());
            }
            Ok(UpdateStrategy::RollingUpdate {
                max_surge,
                max_unavailable,
            })
        }
    }
}
