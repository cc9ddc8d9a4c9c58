//! File-backed identity: the raw 8 id bytes under the user's config directory.

use std::path::{Path, PathBuf};

use nearmatch_core::identity::ID_LEN;
use nearmatch_core::{IdentityError, IdentityStore, SelfId};

pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// $XDG_CONFIG_HOME/nearmatch/identity, else ~/.config/nearmatch/identity.
    pub fn default_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("nearmatch").join("identity"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<SelfId>, IdentityError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        SelfId::from_slice(&bytes)
            .map(Some)
            .ok_or(IdentityError::Corrupt(bytes.len()))
    }

    fn save(&self, id: &SelfId) -> Result<(), IdentityError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, &id.as_bytes()[..ID_LEN])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearmatch_core::load_or_create;
    use tempfile::tempdir;

    #[test]
    fn identity_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/identity");
        let first = load_or_create(&FileIdentityStore::new(&path)).unwrap();
        let second = load_or_create(&FileIdentityStore::new(&path)).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&path).unwrap(), first.as_bytes().to_vec());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = FileIdentityStore::new(dir.path().join("identity"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn wrong_length_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity");
        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            FileIdentityStore::new(&path).load(),
            Err(IdentityError::Corrupt(5))
        ));
    }
}
