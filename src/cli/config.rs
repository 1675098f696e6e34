use crate::config::generate::generate_starter_config;
use console::style;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/logtide/config.yml first
    let config_path = dirs::home_dir()
        .map(|home| home.join(".config/logtide/config.yml"))
        .filter(|path| match path.parent().map(fs::create_dir_all) {
            Some(Err(_)) | None => {
                eprintln!("Warning: could not create ~/.config/logtide");
                eprintln!("Falling back to /etc/logtide/config.yml");
                false
            }
            Some(Ok(())) => true,
        })
        .unwrap_or_else(|| PathBuf::from("/etc/logtide/config.yml"));

    write_new(&config_path, &config_content)?;
    println!(
        "{}",
        style(format!("✓ Config file written to {}", config_path.display())).green()
    );
    Ok(())
}

/// Writes `content` to `path`, refusing to replace an existing file.
pub fn write_new(path: &Path, content: &str) -> io::Result<()> {
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "config file already exists at {}; remove it first or use --stdout",
                path.display()
            ),
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}
