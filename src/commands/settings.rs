use super::GlobalArgs;
use crate::config::SAMPLE_CONFIG;
use crate::error::Result;
use std::path::Path;

/// Directories created by `p3 init`, relative to the working directory.
const LAYOUT: [&str; 6] = ["data", "config", "logs", "data/audio", "exports", "blog_posts"];

/// Create the working layout, write a starter config unless one exists and
/// initialize the store schema.
pub fn init(global: &GlobalArgs, force: bool) -> Result<()> {
    init_in(Path::new("."), global, force)
}

fn init_in(root: &Path, global: &GlobalArgs, force: bool) -> Result<()> {
    for dir in LAYOUT {
        std::fs::create_dir_all(root.join(dir))?;
        log::debug!("Ensured directory {}", dir);
    }

    let config_path = root.join(&global.config_path);
    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Wrote sample config to {}", config_path.display());
    }

    let db_path = root.join(&global.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    super::open_db(&db_path)?;
    println!("Database ready at {}", db_path.display());
    println!("P3 initialized. Edit {} to add your feeds.", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn global() -> GlobalArgs {
        GlobalArgs {
            config_path: PathBuf::from("config/feeds.yaml"),
            db_path: PathBuf::from("data/p3.db"),
        }
    }

    #[test]
    fn test_init_creates_layout_and_config() {
        let root = TempDir::new().unwrap();
        init_in(root.path(), &global(), false).unwrap();

        for dir in LAYOUT {
            assert!(root.path().join(dir).is_dir(), "{} missing", dir);
        }
        let config = Config::load(&root.path().join("config/feeds.yaml")).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert!(root.path().join("data/p3.db").exists());
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("config")).unwrap();
        std::fs::write(root.path().join("config/feeds.yaml"), "feeds: []\n").unwrap();

        init_in(root.path(), &global(), false).unwrap();
        let kept = std::fs::read_to_string(root.path().join("config/feeds.yaml")).unwrap();
        assert_eq!(kept, "feeds: []\n");

        init_in(root.path(), &global(), true).unwrap();
        let replaced = std::fs::read_to_string(root.path().join("config/feeds.yaml")).unwrap();
        assert_eq!(replaced, SAMPLE_CONFIG);
    }
}
