// Runtime settings for the block-index binary.
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::blockchain::errors::IndexResult;

pub const DEFAULT_CONFIG_FILE: &str = "block_index";
pub const ENV_PREFIX: &str = "BLOCK_INDEX";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    /// Binary snapshot to import into the database before reporting.
    pub snapshot_path: Option<String>,
    pub log_level: String,
    /// When set, ids from this height are listed in the report.
    pub range_start: Option<u32>,
    /// Cap on ids returned by a single range query.
    pub max_ids_per_query: u32,
}

impl Settings {
    /// Defaults, then `<file>.toml` if present, then `BLOCK_INDEX_*` variables.
    pub fn load(config_file: &str) -> IndexResult<Self> {
        let settings = Config::builder()
            .set_default("db_path", "block_index.sqlite")?
            .set_default("log_level", "info")?
            .set_default("max_ids_per_query", 10_000_i64)?
            .add_source(File::with_name(config_file).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
