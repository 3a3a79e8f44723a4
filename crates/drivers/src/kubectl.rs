//! Service deployment with kubectl.
//!
//! A deployment either applies a user supplied manifest or, when only an image is
//! given, a generated Deployment + Service pair. In both cases the call returns
//! once `kubectl rollout status` reports the deployment available.

use std::path::Path;
use std::time::Duration;

use pxelab_core::driver::DeployDriver;
use pxelab_core::error::DriverError;
use pxelab_core::types::{DeploySpec, ResourceKind};
use tracing::info;

use crate::command::{CommandRunner, validate_name};

/// Renders a minimal single-replica Deployment and ClusterIP Service.
pub fn render_manifest(spec: &DeploySpec, image: &str) -> String {
    let DeploySpec {
        namespace,
        service,
        port,
        ..
    } = spec;
    format!(
        "apiVersion: apps/v1
kind: Deployment
metadata:
  name: {service}
  namespace: {namespace}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {service}
  template:
    metadata:
      labels:
        app: {service}
    spec:
      containers:
        - name: {service}
          image: {image}
          imagePullPolicy: IfNotPresent
          ports:
            - containerPort: {port}
          readinessProbe:
            tcpSocket:
              port: {port}
---
apiVersion: v1
kind: Service
metadata:
  name: {service}
  namespace: {namespace}
spec:
  selector:
    app: {service}
  ports:
    - port: {port}
      targetPort: {port}
"
    )
}

/// Production deploy driver.
///
/// Images are side-loaded into the kind cluster before the manifest is applied, so
/// locally built images work without a registry.
#[derive(Debug, Clone)]
pub struct KubectlDeployer {
    kubectl: CommandRunner,
    kind: CommandRunner,
    rollout_timeout: Duration,
}

impl KubectlDeployer {
    pub fn new(kubectl: CommandRunner, kind: CommandRunner) -> Self {
        let rollout_timeout = kubectl.timeout();
        Self {
            kubectl,
            kind,
            rollout_timeout,
        }
    }

    async fn ensure_namespace(&self, kubeconfig: &str, namespace: &str) -> Result<(), DriverError> {
        let out = self
            .kubectl
            .output(
                &["--kubeconfig", kubeconfig, "create", "namespace", namespace],
                None,
            )
            .await?;
        if out.success || out.stderr_mentions(&["alreadyexists", "already exists"]) {
            return Ok(());
        }
        out.into_result().map(|_| ())
    }
}

impl DeployDriver for KubectlDeployer {
    async fn deploy(
        &self,
        cluster: &str,
        kubeconfig: &Path,
        spec: &DeploySpec,
    ) -> Result<(), DriverError> {
        validate_name(ResourceKind::Cluster, cluster)?;
        validate_name(ResourceKind::Deployment, &spec.namespace)?;
        validate_name(ResourceKind::Deployment, &spec.service)?;

        let kubeconfig = kubeconfig.display().to_string();
        self.ensure_namespace(&kubeconfig, &spec.namespace).await?;

        if let Some(image) = &spec.image {
            self.kind
                .run(&["load", "docker-image", image, "--name", cluster])
                .await?;
        }

        let base = ["--kubeconfig", kubeconfig.as_str(), "-n", spec.namespace.as_str()];
        match (&spec.manifest, &spec.image) {
            (Some(manifest), _) => {
                let manifest = manifest.display().to_string();
                let mut args = base.to_vec();
                args.extend(["apply", "-f", manifest.as_str()]);
                self.kubectl.run(&args).await?;
            }
            (None, Some(image)) => {
                let mut args = base.to_vec();
                args.extend(["apply", "-f", "-"]);
                self.kubectl
                    .run_with_stdin(&args, &render_manifest(spec, image))
                    .await?;
            }
            (None, None) => {
                return Err(DriverError::Failed {
                    kind: ResourceKind::Deployment,
                    name: format!("{}/{}", spec.namespace, spec.service),
                    reason: "either a manifest or an image is required".to_owned(),
                });
            }
        }

        let target = format!("deployment/{}", spec.service);
        let timeout = format!("--timeout={}s", self.rollout_timeout.as_secs());
        let mut args = base.to_vec();
        args.extend(["rollout", "status", target.as_str(), timeout.as_str()]);
        self.kubectl.run(&args).await?;

        info!(
            cluster,
            namespace = %spec.namespace,
            service = %spec.service,
            "service deployed"
        );
        Ok(())
    }
}
