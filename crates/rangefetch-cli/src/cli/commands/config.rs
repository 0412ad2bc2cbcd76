//! `rangefetch config` – show the effective configuration.

use anyhow::Result;
use rangefetch_core::config::RangeFetchConfig;

pub fn run_config(cfg: &RangeFetchConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
