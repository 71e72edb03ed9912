// HTTP transport seam used by the extraction client and the uploader

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::errors::TransportError;

/// Status and raw body of an HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, lossy; for log lines
    pub fn text_lossy(&self, max: usize) -> String {
        String::from_utf8_lossy(&self.body).chars().take(max).collect()
    }
}

/// File attached to a multipart form
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub path: PathBuf,
}

/// Multipart form: text fields plus at most one file
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub file: Option<FilePart>,
}

impl MultipartForm {
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.file = Some(part);
        self
    }
}

/// HTTP operations the resolver needs. Non-2xx statuses are returned as
/// replies, not errors, except for `download`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError>;

    /// Stream `url` into `dest`, failing with `TooLarge` past `max_bytes`.
    /// Returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<u64, TransportError>;

    async fn post_multipart(
        &self,
        url: &str,
        form: MultipartForm,
    ) -> Result<HttpReply, TransportError>;
}

/// `Transport` over a shared reqwest client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn into_reply(response: reqwest::Response) -> Result<HttpReply, TransportError> {
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpReply::new(status, body.to_vec()))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        let response = self.client.get(url).send().await?;
        Self::into_reply(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError> {
        let response = self.client.post(url).json(body).send().await?;
        Self::into_reply(response).await
    }

    async fn download(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<u64, TransportError> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(TransportError::TooLarge { limit: max_bytes });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(TransportError::TooLarge { limit: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn post_multipart(
        &self,
        url: &str,
        form: MultipartForm,
    ) -> Result<HttpReply, TransportError> {
        let mut multipart = reqwest::multipart::Form::new();
        for (name, value) in form.fields {
            multipart = multipart.text(name, value);
        }
        if let Some(file) = form.file {
            let bytes = tokio::fs::read(&file.path).await?;
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(file.file_name)
                .mime_str(&file.mime)?;
            multipart = multipart.part(file.field, part);
        }

        let response = self.client.post(url).multipart(multipart).send().await?;
        Self::into_reply(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_helpers() {
        let reply = HttpReply::new(200, br#"{"status":true}"#.to_vec());
        assert!(reply.is_success());
        let value: serde_json::Value = reply.json().unwrap();
        assert_eq!(value["status"], true);

        let err = HttpReply::new(503, "unavailable");
        assert!(!err.is_success());
        assert_eq!(err.text_lossy(5), "unava");
    }

    #[test]
    fn test_form_builder() {
        let form = MultipartForm::default()
            .text("chat_id", "-100123")
            .file(FilePart {
                field: "video".to_string(),
                file_name: "clip.mp4".to_string(),
                mime: "video/mp4".to_string(),
                path: PathBuf::from("/tmp/clip.mp4"),
            });
        assert_eq!(form.fields, vec![("chat_id".to_string(), "-100123".to_string())]);
        assert_eq!(form.file.as_ref().map(|f| f.field.as_str()), Some("video"));
    }
}
