use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::hal::DirectoryBackend;
use crate::model::{AuthorizationRecord, CardIdentifier};
use crate::settings::DirectorySettings;

/// 查询结果：授权 / 未找到 / 暂时性错误（调用方据此区分“未授权”和“无法校验”）。
#[derive(Debug)]
pub enum LookupResult {
    Authorized(AuthorizationRecord),
    NotFound,
    TransientError(DirectoryError),
}

/// 目录客户端：每次查询由后端独立建立连接，不做连接池。
pub struct DirectoryClient {
    backend: Box<dyn DirectoryBackend>,
}

impl DirectoryClient {
    pub fn new(backend: Box<dyn DirectoryBackend>) -> Self {
        Self { backend }
    }

    pub fn lookup(&mut self, id: &CardIdentifier) -> LookupResult {
        match self.backend.find_principal(id) {
            Ok(Some(record)) => {
                log::info!("Fetched principal '{}' for card {}", record.principal, id);
                LookupResult::Authorized(record)
            }
            Ok(None) => {
                log::info!("Card {} not found in directory", id);
                LookupResult::NotFound
            }
            Err(err) => {
                log::warn!("Directory lookup for card {} failed: {}", id, err);
                LookupResult::TransientError(err)
            }
        }
    }
}

/// HTTP 响应（状态码 + 原始正文）。
#[derive(Clone, Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// 单次 HTTP POST 传输；实现方每次调用新建连接。
pub trait HttpTransport: Send {
    fn post_json(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpReply, DirectoryError>;
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    card_id: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct PrincipalResponse {
    #[serde(default)]
    card_id: Option<String>,
    name: String,
}

/// 卡号作为 JSON 字段绑定，不拼接进 URL 或语句。
pub fn encode_lookup_request(id: &CardIdentifier) -> Result<Vec<u8>, DirectoryError> {
    Ok(serde_json::to_vec(&LookupRequest { card_id: id.as_str() })?)
}

/// 解析目录响应：404 或 data 为空视为未找到，其余非 2xx 为暂时性错误。
pub fn decode_lookup_reply(
    id: &CardIdentifier,
    reply: &HttpReply,
) -> Result<Option<AuthorizationRecord>, DirectoryError> {
    if reply.status == 404 {
        return Ok(None);
    }
    if !(200..300).contains(&reply.status) {
        return Err(DirectoryError::HttpStatus(reply.status));
    }
    let payload: ApiResponse<PrincipalResponse> = serde_json::from_slice(&reply.body)?;
    if !payload.success {
        return Err(DirectoryError::Api(
            payload.message.unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    let Some(principal) = payload.data else {
        return Ok(None);
    };
    if let Some(card_id) = principal.card_id.as_deref() {
        if card_id != id.as_str() {
            return Err(DirectoryError::Api(format!(
                "directory answered for card {} instead of {}",
                card_id, id
            )));
        }
    }
    Ok(Some(AuthorizationRecord::new(id.clone(), &principal.name)))
}

/// HTTP 目录后端。
pub struct HttpDirectory<T> {
    transport: T,
    url: String,
    authorization: Option<String>,
}

impl<T: HttpTransport> HttpDirectory<T> {
    pub fn new(transport: T, settings: &DirectorySettings) -> Self {
        Self {
            transport,
            url: settings.lookup_url(),
            authorization: settings.token.as_ref().map(|token| format!("Bearer {}", token)),
        }
    }
}

impl<T: HttpTransport> DirectoryBackend for HttpDirectory<T> {
    fn find_principal(
        &mut self,
        id: &CardIdentifier,
    ) -> Result<Option<AuthorizationRecord>, DirectoryError> {
        let body = encode_lookup_request(id)?;
        let content_length = body.len().to_string();
        let mut headers = vec![
            ("content-type", "application/json"),
            ("accept", "application/json"),
            ("content-length", content_length.as_str()),
        ];
        if let Some(auth) = self.authorization.as_deref() {
            headers.push(("authorization", auth));
        }
        let reply = self.transport.post_json(&self.url, &headers, &body)?;
        decode_lookup_reply(id, &reply)
    }
}

#[derive(Deserialize)]
struct TableRow {
    card_id: String,
    name: String,
}

/// 本地 JSON 授权表（`[{"card_id": "...", "name": "..."}]`），每次查询重新读取。
pub struct TableDirectory {
    path: PathBuf,
}

impl TableDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DirectoryBackend for TableDirectory {
    fn find_principal(
        &mut self,
        id: &CardIdentifier,
    ) -> Result<Option<AuthorizationRecord>, DirectoryError> {
        let text = fs::read_to_string(&self.path)?;
        let rows: Vec<TableRow> = serde_json::from_str(&text)?;
        Ok(rows
            .into_iter()
            .find(|row| row.card_id == id.as_str())
            .map(|row| AuthorizationRecord::new(id.clone(), &row.name)))
    }
}
