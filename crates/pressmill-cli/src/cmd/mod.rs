pub mod config;
pub mod init;
pub mod posts;
pub mod repair;
pub mod run;
pub mod status;
pub mod unlock;

use anyhow::Context;
use pressmill_core::{config::Config, generator, paths, store::StateStore};
use std::path::Path;

pub(crate) fn load_config(root: &Path) -> anyhow::Result<Config> {
    Config::load_validated(root).context("failed to load config")
}

pub(crate) fn open_store(root: &Path) -> anyhow::Result<StateStore> {
    let path = paths::state_db_path(root);
    StateStore::open(&path).with_context(|| format!("failed to open state store {}", path.display()))
}

pub(crate) fn build_generator(
    config: &Config,
) -> anyhow::Result<generator::Generator<generator::OllamaProvider>> {
    generator::from_config(&config.generation).context("failed to set up text generation")
}
