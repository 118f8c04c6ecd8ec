use super::Framework;
use crate::error::{Error, Result};

impl Framework {
    /// Reconstructs the path of `ino` relative to the task's registered
    /// parent directory.
    ///
    /// Best-effort by design: `Ok(None)` means the inode is not
    /// reachable under the parent (or the path outgrew the cap), and
    /// consumers are expected to skip such inodes. Only an unknown inode
    /// number is an error.
    pub fn get_path(&self, id: u8, ino: u64) -> Result<Option<String>> {
        if !self.online() {
            return Err(Error::NotInitialized);
        }

        let task = self.find(id)?;
        let parent = task
            .scope
            .parent
            .ok_or(Error::InvalidArgument("task has no parent directory"))?;

        task.scope.volume.relative_path(ino, parent)
    }
}
