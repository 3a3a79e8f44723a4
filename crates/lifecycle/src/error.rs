//! 라이프사이클 에러 타입
//!
//! - [`ProvisionError`]: 환경 생성 실패 (명세 오류 또는 특정 단계 실패 + 롤백 결과)
//! - [`TeardownError`]: 해제 중 실패한 리소스 목록 (여러 원인을 모두 보존)
//! - [`StoreError`]: 환경 레코드 저장소 에러
//!
//! 모두 `From` 구현으로 [`PxelabError`]로 변환됩니다.

use std::fmt;

use pxelab_core::error::{DriverError, PxelabError, SpecError};
use pxelab_core::types::ResourceKind;

/// 프로비저닝 단계
///
/// 실행 순서대로 정의되어 있습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionStep {
    /// 작업 디렉토리 할당
    AllocateWorkspace,
    /// 브리지 생성
    CreateBridge,
    /// 가상 네트워크 생성
    CreateNetwork,
    /// 부트 서비스 시작
    StartBootService,
    /// 클러스터 생성
    CreateCluster,
    /// 서비스 배포
    DeployService,
}

impl ProvisionStep {
    /// 실행 순서대로 나열한 전체 단계
    pub const ALL: [ProvisionStep; 6] = [
        ProvisionStep::AllocateWorkspace,
        ProvisionStep::CreateBridge,
        ProvisionStep::CreateNetwork,
        ProvisionStep::StartBootService,
        ProvisionStep::CreateCluster,
        ProvisionStep::DeployService,
    ];

    /// 메트릭 레이블 값
    pub fn label(self) -> &'static str {
        match self {
            Self::AllocateWorkspace => "workspace",
            Self::CreateBridge => "bridge",
            Self::CreateNetwork => "network",
            Self::StartBootService => "boot_service",
            Self::CreateCluster => "cluster",
            Self::DeployService => "deploy",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AllocateWorkspace => "workspace allocation",
            Self::CreateBridge => "bridge creation",
            Self::CreateNetwork => "virtual network creation",
            Self::StartBootService => "boot service startup",
            Self::CreateCluster => "cluster creation",
            Self::DeployService => "deployment",
        };
        f.write_str(name)
    }
}

/// 환경 생성 에러
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// 명세 검증 실패 (리소스를 하나도 만들지 않음)
    #[error("invalid environment spec: {0}")]
    Invalid(#[from] SpecError),

    /// 특정 단계 실패
    ///
    /// 이미 만든 리소스는 롤백되었으며, 롤백이 불완전하면 `rollback`에 남습니다.
    /// 원래 원인(`source`)은 롤백 결과와 관계없이 보존됩니다.
    #[error(
        "{step} failed: {source}{}",
        .rollback.as_ref().map(|e| format!(" (rollback incomplete: {e})")).unwrap_or_default()
    )]
    Step {
        /// 실패한 단계
        step: ProvisionStep,
        /// 원래 원인
        source: DriverError,
        /// 롤백 중 발생한 에러
        rollback: Option<TeardownError>,
    },
}

impl ProvisionError {
    /// 실패한 단계 (명세 오류면 `None`)
    pub fn step(&self) -> Option<ProvisionStep> {
        match self {
            Self::Invalid(_) => None,
            Self::Step { step, .. } => Some(*step),
        }
    }

    /// 롤백이 불완전했는지 확인합니다.
    pub fn rollback_failed(&self) -> bool {
        matches!(self, Self::Step { rollback: Some(_), .. })
    }
}

/// 해제에 실패한 리소스 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    /// 리소스 종류
    pub kind: ResourceKind,
    /// 리소스 이름
    pub name: String,
    /// 실패 사유
    pub reason: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.name, self.reason)
    }
}

/// 환경 해제 에러
///
/// 해제는 실패해도 멈추지 않고 나머지 리소스를 계속 정리하므로, 실패한 리소스를
/// 모두 모아서 보고합니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("teardown failed for {} resource(s): {}", .failures.len(), join(.failures))]
pub struct TeardownError {
    failures: Vec<TeardownFailure>,
}

fn join(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl TeardownError {
    /// 실패 목록으로 에러를 만듭니다.
    pub fn new(failures: Vec<TeardownFailure>) -> Self {
        Self { failures }
    }

    /// 실패 목록 (해제 시도 순서)
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// 실패한 리소스 수
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// 실패 목록이 비었는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// 특정 종류의 리소스 해제가 실패 원인에 포함되는지 확인합니다.
    pub fn is_attributable_to(&self, kind: ResourceKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }
}

/// 환경 레코드 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 레코드 없음
    #[error("environment '{0}' not found")]
    NotFound(String),

    /// 접두어가 여러 레코드와 일치
    #[error("environment id prefix '{prefix}' is ambiguous ({matches} matches)")]
    Ambiguous { prefix: String, matches: usize },

    /// 레코드 파싱 실패
    #[error("corrupt environment record {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// ID 형식 오류
    #[error("invalid environment id '{0}'")]
    InvalidId(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProvisionError> for PxelabError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Invalid(spec) => PxelabError::Spec(spec),
            step @ ProvisionError::Step { .. } => PxelabError::Environment(step.to_string()),
        }
    }
}

impl From<TeardownError> for PxelabError {
    fn from(err: TeardownError) -> Self {
        PxelabError::Environment(err.to_string())
    }
}

impl From<StoreError> for PxelabError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => PxelabError::Io(e),
            other => PxelabError::Environment(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_failure() -> DriverError {
        DriverError::Failed {
            kind: ResourceKind::Deployment,
            name: "pxe-system/pxe-server".to_owned(),
            reason: "rollout timed out".to_owned(),
        }
    }

    #[test]
    fn step_failure_names_the_step_first() {
        let err = ProvisionError::Step {
            step: ProvisionStep::DeployService,
            source: driver_failure(),
            rollback: None,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("deployment failed"), "got: {msg}");
        assert!(msg.contains("rollout timed out"));
        assert!(!err.rollback_failed());
        assert_eq!(err.step(), Some(ProvisionStep::DeployService));
    }

    #[test]
    fn rollback_failure_does_not_mask_original_cause() {
        let rollback = TeardownError::new(vec![TeardownFailure {
            kind: ResourceKind::Bridge,
            name: "pxebr0".to_owned(),
            reason: "device busy".to_owned(),
        }]);
        let err = ProvisionError::Step {
            step: ProvisionStep::DeployService,
            source: driver_failure(),
            rollback: Some(rollback),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("deployment failed: "));
        assert!(msg.contains("rollout timed out"));
        assert!(msg.contains("rollback incomplete"));
        assert!(msg.contains("device busy"));
        assert!(err.rollback_failed());
    }

    #[test]
    fn teardown_error_lists_every_failure() {
        let err = TeardownError::new(vec![
            TeardownFailure {
                kind: ResourceKind::Cluster,
                name: "pxe".to_owned(),
                reason: "kind delete failed".to_owned(),
            },
            TeardownFailure {
                kind: ResourceKind::Bridge,
                name: "pxebr0".to_owned(),
                reason: "device busy".to_owned(),
            },
        ]);
        assert_eq!(err.len(), 2);
        assert!(err.is_attributable_to(ResourceKind::Cluster));
        assert!(err.is_attributable_to(ResourceKind::Bridge));
        assert!(!err.is_attributable_to(ResourceKind::VirtualNetwork));
        let msg = err.to_string();
        assert!(msg.contains("2 resource(s)"));
        assert!(msg.contains("cluster 'pxe'"));
        assert!(msg.contains("bridge 'pxebr0'"));
    }

    #[test]
    fn invalid_spec_converts_to_spec_error() {
        let err = ProvisionError::Invalid(SpecError::MissingField {
            field: "network.dhcp_range".to_owned(),
            label: "DHCP range".to_owned(),
        });
        assert!(err.to_string().contains("DHCP range"));
        let top: PxelabError = err.into();
        assert!(matches!(top, PxelabError::Spec(_)));
    }

    #[test]
    fn step_labels_are_unique() {
        let mut labels: Vec<_> = ProvisionStep::ALL.iter().map(|s| s.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ProvisionStep::ALL.len());
    }
}
