//! 임대/콜백 신호 소스
//!
//! 상태 머신은 이 트레이트만 폴링합니다. 테스트에서는 가짜 소스를 주입하고,
//! 실제 실행에서는 부트 서비스 드라이버와 터널 너머의 HTTP API를 씁니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pxelab_core::driver::BootServiceDriver;
use pxelab_core::types::{CallbackRecord, Lease, TargetIdentity};
use serde::Deserialize;

use crate::error::{SignalError, ValidateError};

/// 단일 HTTP 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// 대상의 DHCP 임대 조회
pub trait LeaseSource: Send + Sync {
    fn lease_for(
        &self,
        target: &TargetIdentity,
    ) -> impl Future<Output = Result<Option<Lease>, SignalError>> + Send;
}

/// 서비스가 받은 부트 콜백 조회
pub trait CallbackSource: Send + Sync {
    fn callbacks(&self) -> impl Future<Output = Result<Vec<CallbackRecord>, SignalError>> + Send;
}

/// 부트 서비스 드라이버의 임대 파일을 읽는 소스
pub struct BootServiceLeases<B> {
    driver: Arc<B>,
    service_id: String,
}

impl<B: BootServiceDriver> BootServiceLeases<B> {
    pub fn new(driver: Arc<B>, service_id: impl Into<String>) -> Self {
        Self {
            driver,
            service_id: service_id.into(),
        }
    }
}

impl<B: BootServiceDriver> LeaseSource for BootServiceLeases<B> {
    async fn lease_for(&self, target: &TargetIdentity) -> Result<Option<Lease>, SignalError> {
        Ok(self.driver.lease_for(&self.service_id, target).await?)
    }
}

/// 서비스의 부트 이벤트 API를 조회하는 소스
///
/// 응답은 콜백 레코드 배열이거나 `{"events": [...]}` 형태여야 합니다.
#[derive(Debug, Clone)]
pub struct HttpCallbackSource {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CallbackBody {
    List(Vec<CallbackRecord>),
    Wrapped { events: Vec<CallbackRecord> },
}

impl HttpCallbackSource {
    /// `base_url`(예: 터널의 `http://127.0.0.1:PORT`)과 경로로 소스를 만듭니다.
    pub fn new(base_url: &str, path: &str) -> Result<Self, ValidateError> {
        if !path.starts_with('/') {
            return Err(ValidateError::InvalidConfig(format!(
                "callback path '{path}' must start with '/'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| ValidateError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}{path}", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CallbackSource for HttpCallbackSource {
    async fn callbacks(&self) -> Result<Vec<CallbackRecord>, SignalError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SignalError::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SignalError::Http(format!("{} returned {status}", self.url)));
        }
        let body = resp
            .json::<CallbackBody>()
            .await
            .map_err(|e| SignalError::Decode(e.to_string()))?;
        Ok(match body {
            CallbackBody::List(records) | CallbackBody::Wrapped { events: records } => records,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn serve_json(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn reads_plain_record_list() {
        let base = serve_json(r#"[{"hostname":"vm-1","profile":"rocky9"}]"#).await;
        let source = HttpCallbackSource::new(&base, "/api/v1/boot-events").unwrap();

        let records = source.callbacks().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname.as_deref(), Some("vm-1"));
        assert_eq!(records[0].profile.as_deref(), Some("rocky9"));
    }

    #[tokio::test]
    async fn reads_wrapped_event_list() {
        let base = serve_json(r#"{"events":[{"mac":"52:54:00:00:00:01"}]}"#).await;
        let source = HttpCallbackSource::new(&base, "/events").unwrap();

        let records = source.callbacks().await.unwrap();

        assert_eq!(records[0].mac.as_deref(), Some("52:54:00:00:00:01"));
    }

    #[tokio::test]
    async fn unreachable_service_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let source = HttpCallbackSource::new(&format!("http://{addr}"), "/events").unwrap();

        let err = source.callbacks().await.unwrap_err();

        assert!(matches!(err, SignalError::Http(_)));
    }

    #[test]
    fn url_joins_base_and_path() {
        let source = HttpCallbackSource::new("http://127.0.0.1:18080/", "/api/v1/boot-events")
            .unwrap();
        assert_eq!(source.url(), "http://127.0.0.1:18080/api/v1/boot-events");
        assert!(HttpCallbackSource::new("http://x", "events").is_err());
    }
}
