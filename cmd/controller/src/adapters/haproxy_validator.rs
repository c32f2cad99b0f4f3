//! `HaproxyValidator` backed by the `haproxy` binary itself, invoked with `-c` (config-check,
//! no listeners bound) against a throwaway directory laid out the same way a live instance's
//! Dataplane `maps_dir`/`ssl_certs_dir`/`general_storage_dir` would be, so map/cert references
//! in the rendered config resolve the same way they will once deployed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use htic_core::external::{HaproxySemanticReport, HaproxyValidator};

pub struct HaproxyBinaryValidator {
    binary_path: String,
    maps_dir: String,
    ssl_certs_dir: String,
    general_storage_dir: String,
    config_file: String,
}

impl HaproxyBinaryValidator {
    pub fn new(binary_path: String, maps_dir: String, ssl_certs_dir: String, general_storage_dir: String, config_file: String) -> Self {
        Self {
            binary_path,
            maps_dir,
            ssl_certs_dir,
            general_storage_dir,
            config_file,
        }
    }

    async fn write_sandbox(
        &self,
        config_bytes: &[u8],
        aux_files: &BTreeMap<String, Vec<u8>>,
    ) -> std::io::Result<(tempfile::TempDir, PathBuf)> {
        let sandbox = tempfile::tempdir()?;
        let root = sandbox.path();
        for dir in [&self.maps_dir, &self.ssl_certs_dir, &self.general_storage_dir] {
            let relative = dir.trim_start_matches('/');
            tokio::fs::create_dir_all(root.join(relative)).await?;
        }

        let config_path = root.join(self.config_file.trim_start_matches('/'));
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&config_path, config_bytes).await?;

        for (name, body) in aux_files {
            for dir in [&self.maps_dir, &self.ssl_certs_dir, &self.general_storage_dir] {
                let candidate = root.join(dir.trim_start_matches('/')).join(name);
                tokio::fs::write(&candidate, body).await?;
            }
        }

        Ok((sandbox, config_path))
    }

    async fn run_check(&self, config_bytes: &[u8], aux_files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<String>, Vec<String>> {
        let (sandbox, config_path) = self
            .write_sandbox(config_bytes, aux_files)
            .await
            .map_err(|err| vec![format!("failed to prepare validation sandbox: {err}")])?;

        let output = Command::new(&self.binary_path)
            .arg("-c")
            .arg("-f")
            .arg(&config_path)
            .output()
            .await
            .map_err(|err| vec![format!("failed to invoke {}: {err}", self.binary_path)])?;
        drop(sandbox);

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<String> = stderr.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();

        if output.status.success() {
            Ok(lines.into_iter().filter(|l| l.contains("WARNING")).collect())
        } else {
            let errors: Vec<String> = lines.into_iter().filter(|l| l.contains("ALERT") || l.contains("FATAL")).collect();
            if errors.is_empty() {
                Err(vec![format!("haproxy -c exited with {}", output.status)])
            } else {
                Err(errors)
            }
        }
    }
}

#[async_trait]
impl HaproxyValidator for HaproxyBinaryValidator {
    async fn validate_syntax(&self, config_bytes: &[u8]) -> Result<(), Vec<String>> {
        self.run_check(config_bytes, &BTreeMap::new()).await.map(|_| ())
    }

    async fn validate_semantic(
        &self,
        config_bytes: &[u8],
        aux_files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<HaproxySemanticReport, Vec<String>> {
        let warnings = self.run_check(config_bytes, aux_files).await?;
        Ok(HaproxySemanticReport { warnings })
    }
}
