//! Print or initialize the configuration file.

use golive_common::config::{config_file_path, AppConfig};

pub fn run(config: AppConfig, init: bool) -> anyhow::Result<()> {
    let path = config_file_path();
    if init {
        config.save()?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
