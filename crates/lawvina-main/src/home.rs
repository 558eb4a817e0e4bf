use std::path::{Path, PathBuf};

const DEFAULT_HOME_DIR_NAME: &str = ".lawvina";
pub const CONFIG_FILE_NAME: &str = "lawvina.toml";

/// Resolved layout of the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LawvinaHome {
    root: PathBuf,
}

impl LawvinaHome {
    /// `--conf-dir` wins; `~` is expanded and relative paths are taken
    /// against the working directory. Without it, `~/.lawvina`.
    pub fn resolve(conf_dir: Option<&Path>) -> Self {
        let root = match conf_dir {
            Some(dir) => {
                let expanded = expand_home_path(&dir.to_string_lossy());
                std::path::absolute(&expanded).unwrap_or(expanded)
            }
            None => home_dir().join(DEFAULT_HOME_DIR_NAME),
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

pub fn expand_home_path(path: &str) -> PathBuf {
    match path.trim() {
        "~" => home_dir(),
        trimmed => match trimmed.strip_prefix("~/") {
            Some(suffix) => home_dir().join(suffix),
            None => PathBuf::from(trimmed),
        },
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_conf_dir_is_used_directly() {
        let home = LawvinaHome::resolve(Some(Path::new("/tmp/lawvina-home")));
        assert_eq!(home.root(), Path::new("/tmp/lawvina-home"));
        assert_eq!(
            home.config_path(),
            PathBuf::from("/tmp/lawvina-home/lawvina.toml")
        );
        assert_eq!(home.storage_dir(), PathBuf::from("/tmp/lawvina-home/storage"));
    }

    #[test]
    fn default_home_ends_with_dot_lawvina() {
        let home = LawvinaHome::resolve(None);
        assert!(
            home.root().ends_with(".lawvina"),
            "unexpected default home {}",
            home.root().display()
        );
    }

    #[test]
    fn relative_conf_dir_is_anchored_at_the_working_directory() {
        let home = LawvinaHome::resolve(Some(Path::new("lawvina-conf")));
        assert!(home.root().is_absolute());
        assert!(home.root().ends_with("lawvina-conf"));
    }

    #[test]
    fn tilde_paths_expand_against_home() {
        assert!(expand_home_path("~/logs").ends_with("logs"));
        assert_eq!(expand_home_path(" /var/log "), PathBuf::from("/var/log"));
    }
}
