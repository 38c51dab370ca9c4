use crate::error::IngestError;
use crate::models::DocumentPage;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<DocumentPage>, IngestError>;
}

/// Local text extraction with lopdf. Tables are not recognized.
#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_pages(&self, path: &Path) -> Result<Vec<DocumentPage>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(DocumentPage {
                    page_num: page_no,
                    text,
                    tables: Vec::new(),
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::Extraction(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

#[async_trait]
impl DocumentExtractor for LopdfExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<DocumentPage>, IngestError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || LopdfExtractor.extract_pages(&path))
            .await
            .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))?
    }
}

#[derive(Debug, Clone)]
pub struct ParsingEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
}

/// Remote parsing service: submit the PDF as a task, then poll its state
/// until it reports `done` or `error`.
pub struct RemoteExtractor {
    client: Client,
    config: ParsingEndpointConfig,
}

#[derive(Debug, Serialize)]
struct TaskRequest {
    file_name: String,
    file_base64: String,
    is_ocr: bool,
    enable_formula: bool,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    data: TaskData,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    state: String,
    #[serde(default)]
    err_msg: Option<String>,
    #[serde(default)]
    data: Option<TaskResultData>,
}

#[derive(Debug, Deserialize)]
struct TaskResultData {
    #[serde(default)]
    pages: Vec<DocumentPage>,
}

enum TaskState {
    Pending,
    Done(Vec<DocumentPage>),
}

impl RemoteExtractor {
    pub fn new(config: ParsingEndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.endpoint.trim_end_matches('/'))
    }

    async fn submit(&self, path: &Path) -> Result<String, IngestError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;

        let mut request = self.client.post(self.url("extract/task")).json(&TaskRequest {
            file_name,
            file_base64: STANDARD.encode(bytes),
            is_ocr: true,
            enable_formula: false,
        });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(extraction_error)?;
        if !response.status().is_success() {
            return Err(IngestError::Extraction(format!(
                "task submission returned {}",
                response.status()
            )));
        }
        let task: TaskResponse = response.json().await.map_err(extraction_error)?;
        Ok(task.data.task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<TaskState, IngestError> {
        let mut request = self
            .client
            .get(self.url(&format!("extract/result/{task_id}")));
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(extraction_error)?;
        if !response.status().is_success() {
            return Err(IngestError::Extraction(format!(
                "polling task {task_id} returned {}",
                response.status()
            )));
        }
        let result: TaskResult = response.json().await.map_err(extraction_error)?;
        task_state(task_id, result)
    }
}

fn extraction_error(error: reqwest::Error) -> IngestError {
    IngestError::Extraction(error.to_string())
}

fn task_state(task_id: &str, result: TaskResult) -> Result<TaskState, IngestError> {
    match result.state.as_str() {
        "done" => {
            let mut pages: Vec<DocumentPage> = result
                .data
                .map(|data| data.pages)
                .unwrap_or_default()
                .into_iter()
                .filter(|page| !page.text.trim().is_empty() || !page.tables.is_empty())
                .collect();
            if pages.is_empty() {
                return Err(IngestError::Extraction(format!(
                    "task {task_id} finished without readable pages"
                )));
            }
            pages.sort_by_key(|page| page.page_num);
            Ok(TaskState::Done(pages))
        }
        "error" | "failed" => Err(IngestError::Extraction(format!(
            "task {task_id} failed: {}",
            result.err_msg.unwrap_or_else(|| "no reason given".to_string())
        ))),
        _ => Ok(TaskState::Pending),
    }
}

#[async_trait]
impl DocumentExtractor for RemoteExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<DocumentPage>, IngestError> {
        let task_id = self.submit(path).await?;
        info!(path = %path.display(), task_id = %task_id, "parsing task submitted");

        loop {
            match self.poll(&task_id).await? {
                TaskState::Done(pages) => {
                    info!(task_id = %task_id, pages = pages.len(), "parsing task finished");
                    return Ok(pages);
                }
                TaskState::Pending => {
                    debug!(task_id = %task_id, "parsing task pending");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn result(value: serde_json::Value) -> TaskResult {
        serde_json::from_value(value).expect("valid task result")
    }

    #[test]
    fn done_task_yields_sorted_non_empty_pages() {
        let state = task_state(
            "t1",
            result(json!({
                "state": "done",
                "data": {"pages": [
                    {"page_num": 2, "text": "Balance sheet", "tables": [
                        {"headers": ["Item", "2023"], "rows": [["Cash", "10"]]}
                    ]},
                    {"page_num": 1, "text": "Chairman's letter"},
                    {"page_num": 3, "text": "   "}
                ]}
            })),
        )
        .unwrap();

        match state {
            TaskState::Done(pages) => {
                let numbers: Vec<_> = pages.iter().map(|page| page.page_num).collect();
                assert_eq!(numbers, vec![1, 2]);
                assert_eq!(pages[1].tables.len(), 1);
            }
            TaskState::Pending => panic!("task should be done"),
        }
    }

    #[test]
    fn running_task_is_pending() {
        let state = task_state("t1", result(json!({"state": "running"}))).unwrap();
        assert!(matches!(state, TaskState::Pending));
    }

    #[test]
    fn failed_task_surfaces_its_message() {
        let error = task_state("t1", result(json!({"state": "error", "err_msg": "bad pdf"})))
            .err()
            .expect("error state fails");
        assert!(error.to_string().contains("bad pdf"));
    }

    #[test]
    fn done_task_without_pages_fails() {
        assert!(task_state("t1", result(json!({"state": "done", "data": {"pages": []}}))).is_err());
    }

    #[tokio::test]
    async fn lopdf_rejects_unreadable_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = LopdfExtractor.extract(&path).await;
        assert!(matches!(result, Err(IngestError::Extraction(_))));
        Ok(())
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let header_end = buffer
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
                .map(|position| position + 4);
            if let Some(header_end) = header_end {
                let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
                let body_len = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buffer.len() >= header_end + body_len {
                    return head.lines().next().unwrap_or_default().to_string();
                }
            }
            let read = socket.read(&mut chunk).await.expect("request readable");
            if read == 0 {
                return String::new();
            }
            buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Answers one connection per scripted `(status, body)` pair, in order.
    async fn scripted_service(replies: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let endpoint = format!("http://{}", listener.local_addr().expect("local addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let line = read_request(&mut socket).await;
                seen.lock().expect("request log").push(line);
                let reason = if status == 200 { "OK" } else { "Internal Server Error" };
                let reply = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (endpoint, requests)
    }

    fn extractor(endpoint: String) -> RemoteExtractor {
        RemoteExtractor::new(ParsingEndpointConfig {
            endpoint,
            api_key: Some("secret".to_string()),
            poll_interval: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn remote_task_is_polled_until_done() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("acme.pdf");
        fs::write(&path, b"%PDF-1.4\n%fake")?;

        let running = json!({"state": "running"}).to_string();
        let (endpoint, requests) = scripted_service(vec![
            (200, json!({"data": {"task_id": "t-7"}}).to_string()),
            (200, running.clone()),
            (200, running),
            (
                200,
                json!({"state": "done", "data": {"pages": [
                    {"page_num": 2, "text": "Cash flow statement"},
                    {"page_num": 1, "text": "Annual report 2023"}
                ]}})
                .to_string(),
            ),
        ])
        .await;

        let pages = extractor(endpoint).extract(&path).await?;

        let numbers: Vec<_> = pages.iter().map(|page| page.page_num).collect();
        assert_eq!(numbers, vec![1, 2]);

        let requests = requests.lock().expect("request log").clone();
        assert_eq!(requests.len(), 4);
        assert!(requests[0].starts_with("POST /extract/task "));
        assert!(requests[1..]
            .iter()
            .all(|line| line.starts_with("GET /extract/result/t-7 ")));
        Ok(())
    }

    #[tokio::test]
    async fn failing_poll_status_stops_the_loop() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("acme.pdf");
        fs::write(&path, b"%PDF-1.4\n%fake")?;

        let (endpoint, requests) = scripted_service(vec![
            (200, json!({"data": {"task_id": "t-8"}}).to_string()),
            (200, json!({"state": "pending"}).to_string()),
            (500, "{}".to_string()),
            (200, json!({"state": "done", "data": {"pages": [{"page_num": 1, "text": "x"}]}}).to_string()),
        ])
        .await;

        let result = extractor(endpoint).extract(&path).await;

        assert!(matches!(result, Err(IngestError::Extraction(details)) if details.contains("500")));
        assert_eq!(requests.lock().expect("request log").len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn error_state_ends_polling_with_its_message() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("acme.pdf");
        fs::write(&path, b"%PDF-1.4\n%fake")?;

        let (endpoint, _requests) = scripted_service(vec![
            (200, json!({"data": {"task_id": "t-9"}}).to_string()),
            (200, json!({"state": "error", "err_msg": "encrypted pdf"}).to_string()),
        ])
        .await;

        let result = extractor(endpoint).extract(&path).await;
        assert!(matches!(result, Err(IngestError::Extraction(details)) if details.contains("encrypted pdf")));
        Ok(())
    }
}
