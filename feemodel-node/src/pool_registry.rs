//! Loads the static pool-identification registry (`PoolInfoRegistry`)
//! from a TOML file: `[payout_addresses]` and `[coinbase_tags]` tables
//! mapping addresses / tag substrings to pool names.

use anyhow::Context;
use feemodel_core::PoolInfoRegistry;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
struct PoolInfoFile {
    #[serde(default)]
    payout_addresses: BTreeMap<String, String>,
    #[serde(default)]
    coinbase_tags: BTreeMap<String, String>,
}

pub fn load(path: Option<&Path>) -> anyhow::Result<PoolInfoRegistry> {
    let file = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read pool info file {path:?}"))?;
            toml::from_str(&text).with_context(|| format!("failed to parse pool info file {path:?}"))?
        }
        None => PoolInfoFile::default(),
    };
    Ok(PoolInfoRegistry {
        payout_addresses: file.payout_addresses,
        coinbase_tags: file.coinbase_tags,
    })
}
