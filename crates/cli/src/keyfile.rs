//! On-disk key files.
//!
//! A key file is JSON: `{"public": <JWK>, "private": "<base64url>"}`. `private` is absent for
//! keys shared with other parties (trusted signers, encryption recipients).

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;
use vpr_envelope::{Jwk, KeyMaterial};

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyFile {
    public: Jwk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<String>,
}

pub fn read(path: &Path) -> anyhow::Result<KeyMaterial> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    let file: KeyFile = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a key file", path.display()))?;

    let private = file
        .private
        .map(|encoded| general_purpose::URL_SAFE_NO_PAD.decode(encoded))
        .transpose()
        .with_context(|| format!("private key in {} is not base64url", path.display()))?;
    Ok(KeyMaterial::new(file.public, private)?)
}

pub fn read_all(paths: &[std::path::PathBuf]) -> anyhow::Result<Vec<KeyMaterial>> {
    paths.iter().map(|path| read(path)).collect()
}

/// Write `key`, including its private part when `include_private` is set.
pub fn write(path: &Path, key: &KeyMaterial, include_private: bool) -> anyhow::Result<()> {
    let file = KeyFile {
        public: key.public_key(),
        private: key
            .export_private_key()
            .filter(|_| include_private)
            .map(|bytes| general_purpose::URL_SAFE_NO_PAD.encode(bytes)),
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write key file {}", path.display()))?;
    Ok(())
}
