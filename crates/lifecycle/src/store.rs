//! 환경 레코드 저장소
//!
//! 생성된 환경을 `<state_dir>/<id>.json`으로 보관해 별도 프로세스(예: 이후의
//! `env destroy` 호출)가 해제할 수 있게 합니다. 쓰기는 임시 파일에 쓴 뒤
//! rename하므로 중간에 중단되어도 반쯤 쓰인 레코드가 남지 않습니다.

use std::path::{Path, PathBuf};

use pxelab_core::types::Environment;
use tracing::{debug, warn};

use crate::error::StoreError;

const RECORD_EXT: &str = "json";

/// 파일 기반 환경 레코드 저장소
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    dir: PathBuf,
}

impl EnvironmentStore {
    /// 저장소를 생성합니다. 디렉토리는 첫 저장 시 만들어집니다.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 저장 디렉토리
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.{RECORD_EXT}")))
    }

    /// 환경 레코드를 저장합니다.
    pub async fn save(&self, env: &Environment) -> Result<(), StoreError> {
        let path = self.record_path(&env.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_vec_pretty(env).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let tmp = path.with_extension(format!("{RECORD_EXT}.tmp"));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(env_id = %env.id, path = %path.display(), "environment record saved");
        Ok(())
    }

    /// ID로 레코드를 읽습니다.
    pub async fn load(&self, id: &str) -> Result<Environment, StoreError> {
        let path = self.record_path(id)?;
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// 레코드를 삭제합니다. 없는 레코드는 성공으로 취급합니다.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(env_id = id, "environment record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// 모든 레코드를 생성 시각 순으로 반환합니다.
    ///
    /// 파싱할 수 없는 레코드는 경고를 남기고 건너뜁니다.
    pub async fn list(&self) -> Result<Vec<Environment>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut envs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let content = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Environment>(&content) {
                Ok(env) => envs.push(env),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt environment record");
                }
            }
        }

        envs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(envs)
    }

    /// 전체 ID 또는 고유한 접두어로 레코드를 찾습니다.
    pub async fn find(&self, id_or_prefix: &str) -> Result<Environment, StoreError> {
        validate_id(id_or_prefix)?;

        let envs = self.list().await?;
        if let Some(env) = envs.iter().find(|e| e.id == id_or_prefix) {
            return Ok(env.clone());
        }

        let mut matches: Vec<_> = envs
            .into_iter()
            .filter(|e| e.id.starts_with(id_or_prefix))
            .collect();
        match matches.len() {
            0 => Err(StoreError::NotFound(id_or_prefix.to_owned())),
            1 => Ok(matches.remove(0)),
            n => Err(StoreError::Ambiguous {
                prefix: id_or_prefix.to_owned(),
                matches: n,
            }),
        }
    }
}

/// 파일 이름으로 안전한 ID인지 확인합니다.
fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_owned()))
    }
}
