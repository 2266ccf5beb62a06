use std::time::Duration;

use tracing::info;

use crate::error::{AppError, ErrorKind, Result};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Content acquisition for PDF sources: download, signature check, text
/// extraction. All failures surface as typed errors; nothing is retried.
#[derive(Debug, Clone)]
pub struct PdfService {
    http_client: reqwest::Client,
}

impl PdfService {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self { http_client }
    }

    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        info!(url, "downloading PDF");

        let resp = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::with_detail(ErrorKind::Internal, "Failed to download PDF", e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AppError::internal(format!(
                "Failed to download PDF: status {}",
                resp.status().as_u16()
            )));
        }

        let data = resp
            .bytes()
            .await
            .map_err(|e| AppError::with_detail(ErrorKind::Internal, "Failed to read PDF data", e.to_string()))?;

        Ok(data.to_vec())
    }

    /// Checks the minimal `%PDF` file signature.
    pub fn validate(&self, data: &[u8]) -> Result<()> {
        if data.len() < PDF_MAGIC.len() {
            return Err(AppError::invalid_params("Invalid PDF: file too small"));
        }
        if !data.starts_with(PDF_MAGIC) {
            return Err(AppError::invalid_params("Invalid PDF: incorrect file format"));
        }
        Ok(())
    }

    /// Extracts plain text from validated PDF bytes. Extraction is CPU bound,
    /// so it runs on the blocking pool.
    pub async fn extract_text(&self, data: Vec<u8>) -> Result<String> {
        info!(bytes = data.len(), "extracting text from PDF");

        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
            .await
            .map_err(|e| AppError::with_detail(ErrorKind::Internal, "Failed to extract text from PDF", e.to_string()))?
            .map_err(|e| AppError::with_detail(ErrorKind::Internal, "Failed to extract text from PDF", e.to_string()))?;

        Ok(text)
    }
}

impl Default for PdfService {
    fn default() -> Self {
        Self::new()
    }
}
