use std::path::PathBuf;

/// Well-known locations relative to the working directory.
pub struct ToolPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub local_config: PathBuf,
    pub user_config: Option<PathBuf>,
}

impl ToolPaths {
    pub fn new() -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_root(root)
    }

    pub fn from_root(root: PathBuf) -> Self {
        let user_config = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
            .map(|dir| dir.join("tablesearch/tables.yaml"));

        Self {
            data: root.join(".tablesearch"),
            local_config: root.join("tables.yaml"),
            user_config,
            root,
        }
    }

    pub fn default_db(&self) -> PathBuf {
        self.data.join("index.db")
    }

    /// Config files tried in order when none is given explicitly.
    pub fn config_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = vec![self.local_config.clone()];
        candidates.extend(self.user_config.clone());
        candidates
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = ToolPaths::from_root(PathBuf::from("/repo"));
        assert_eq!(paths.default_db(), PathBuf::from("/repo/.tablesearch/index.db"));
        assert_eq!(paths.config_candidates()[0], PathBuf::from("/repo/tables.yaml"));
    }
}
