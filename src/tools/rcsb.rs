use crate::remote::StructureSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use std::time::Duration;

/// Downloads PDB-format entries from an RCSB file server.
pub struct RcsbDownloader {
    client: reqwest::Client,
    base_url: String,
}

impl RcsbDownloader {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build RCSB http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, structure_id: &str) -> String {
        format!("{}/{}.pdb", self.base_url, structure_id)
    }
}

#[async_trait]
impl StructureSource for RcsbDownloader {
    async fn fetch(&self, structure_id: &str) -> Result<Vec<u8>> {
        let url = self.url_for(structure_id);
        info!("Attempting to download {} from {}", structure_id, url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context(format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Download of {} failed with status {}", url, status);
        }

        let bytes = response
            .bytes()
            .await
            .context(format!("Failed to read body from {}", url))?;
        Ok(bytes.to_vec())
    }
}
