//! Local Kubernetes clusters via kind.

use std::path::Path;

use pxelab_core::driver::ClusterDriver;
use pxelab_core::error::DriverError;
use pxelab_core::types::{ClusterSpec, ResourceKind};
use tracing::{info, warn};

use crate::command::{CommandRunner, validate_name};

/// How long `kind create cluster` waits for the control plane.
const CONTROL_PLANE_WAIT: &str = "180s";

/// Production cluster driver backed by the `kind` CLI.
#[derive(Debug, Clone)]
pub struct KindClusterDriver {
    kind: CommandRunner,
}

impl KindClusterDriver {
    pub fn new(kind: CommandRunner) -> Self {
        Self { kind }
    }

    /// Names of clusters kind currently knows about.
    pub async fn list(&self) -> Result<Vec<String>, DriverError> {
        let out = self.kind.run(&["get", "clusters"]).await?;
        Ok(parse_cluster_list(&out.stdout))
    }
}

/// `kind get clusters` prints one name per line, or a notice on stderr when empty.
fn parse_cluster_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

impl ClusterDriver for KindClusterDriver {
    async fn create(&self, spec: &ClusterSpec, kubeconfig: &Path) -> Result<(), DriverError> {
        validate_name(ResourceKind::Cluster, &spec.name)?;

        let kubeconfig = kubeconfig.display().to_string();
        let mut args = vec![
            "create",
            "cluster",
            "--name",
            spec.name.as_str(),
            "--kubeconfig",
            kubeconfig.as_str(),
            "--wait",
            CONTROL_PLANE_WAIT,
        ];
        if let Some(image) = &spec.node_image {
            args.extend(["--image", image.as_str()]);
        }

        let out = self.kind.output(&args, None).await?;
        if !out.success {
            if out.stderr_mentions(&["already exist"]) {
                return Err(DriverError::AlreadyExists {
                    kind: ResourceKind::Cluster,
                    name: spec.name.clone(),
                });
            }
            // kind leaves partially created node containers behind on failure.
            if let Err(cleanup) = self.delete(&spec.name).await {
                warn!(cluster = %spec.name, error = %cleanup, "failed to remove partial cluster");
            }
            out.into_result()?;
        }

        info!(cluster = %spec.name, "cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), DriverError> {
        validate_name(ResourceKind::Cluster, name)?;
        // kind treats deleting an unknown cluster as success.
        self.kind
            .run(&["delete", "cluster", "--name", name])
            .await
            .map(|_| ())
    }

    async fn exists(&self, name: &str) -> Result<bool, DriverError> {
        validate_name(ResourceKind::Cluster, name)?;
        Ok(self.list().await?.iter().any(|c| c == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_list_ignores_blank_lines() {
        let names = parse_cluster_list("kind\npxe-lab\n\n");
        assert_eq!(names, vec!["kind", "pxe-lab"]);
        assert!(parse_cluster_list("").is_empty());
    }
}
