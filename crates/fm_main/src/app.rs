//! Request loop

use crate::Cli;
use anyhow::{Context, Result};
use fm_core::dispatch::{error_envelope, success_envelope};
use fm_core::{Dispatcher, FileManager, FmConfig, FmError, Payload, Storage};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

/// Load the configuration, apply overrides and open the document root
pub fn build_manager(cli: &Cli) -> Result<FileManager> {
    let config_path = cli.config.clone().unwrap_or_else(FmConfig::config_path);
    let config = FmConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let overrides = parse_overrides(&cli.overrides)?;
    let config = config.with_options(&overrides)?;

    Ok(FileManager::new(config)?)
}

fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.to_string()))
                .with_context(|| format!("override {:?} is not KEY=VALUE", pair))
        })
        .collect()
}

/// Serve requests until stdin closes
pub fn run<S: Storage>(manager: &FileManager<S>, output_dir: Option<&Path>) -> Result<()> {
    let dispatcher = Dispatcher::new(manager);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match dispatcher.handle_json(&line) {
            Ok(payload) => match render_payload(payload, output_dir) {
                Ok(data) => success_envelope(data),
                Err(e) => {
                    tracing::error!("Failed to hand over binary payload: {}", e);
                    error_envelope(&FmError::Server(e.to_string()))
                }
            },
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                error_envelope(&e)
            }
        };

        serde_json::to_writer(&mut stdout, &response)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }

    tracing::info!("Input closed, shutting down");
    Ok(())
}

/// JSON passes through; binary content is written to `output_dir` and referenced
fn render_payload(payload: Payload, output_dir: Option<&Path>) -> Result<Value> {
    match payload {
        Payload::Json(value) => Ok(value),
        Payload::Binary {
            file_name,
            mime,
            bytes,
        } => {
            let mut data = json!({
                "fileName": file_name,
                "mime": mime,
                "size": bytes.len(),
            });

            if let Some(dir) = output_dir {
                std::fs::create_dir_all(dir)?;
                let target = dir.join(&file_name);
                std::fs::write(&target, &bytes)?;
                data["savedTo"] = Value::String(target.display().to_string());
            }

            Ok(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let parsed = parse_overrides(&[
            "security.read_only=true".to_string(),
            "edit.extensions=txt,md".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed["security.read_only"], "true");
        assert_eq!(parsed["edit.extensions"], "txt,md");

        assert!(parse_overrides(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_binary_payload_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload::Binary {
            file_name: "a.txt".into(),
            mime: "text/plain".into(),
            bytes: b"hello".to_vec(),
        };

        let data = render_payload(payload, Some(dir.path())).unwrap();
        assert_eq!(data["size"], 5);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    }
}
