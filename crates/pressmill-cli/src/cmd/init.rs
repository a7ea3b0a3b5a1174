use anyhow::Context;
use pressmill_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing pressmill in: {}", root.display());

    // 1. State directory
    let state_dir = paths::state_dir(root);
    io::ensure_dir(&state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;

    // 2. config.yaml if missing
    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::scaffold()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    // 3. State store (tables are created on open)
    let db_path = paths::state_db_path(root);
    let existed = db_path.exists();
    super::open_store(root)?;
    if existed {
        println!("  exists:  {}", paths::STATE_DB);
    } else {
        println!("  created: {}", paths::STATE_DB);
    }

    // 4. Output directory, from whatever config is now on disk
    let config = Config::load(root).context("failed to load config")?;
    let output = config.output_dir(root);
    io::ensure_dir(&paths::posts_dir(&output))
        .with_context(|| format!("failed to create {}", output.display()))?;
    println!("  output:  {}", output.display());

    println!("\nEdit {} to add your portfolio, then schedule `pressmill run`.", paths::CONFIG_FILE);
    Ok(())
}
