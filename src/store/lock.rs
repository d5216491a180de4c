use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

/// Exclusive advisory lock serializing every plan read and mutation
/// across workers and cooperating processes.
///
/// The lock is held on a sidecar file, not on the plan itself: plan
/// writes go through rename, which would detach a lock held on the
/// replaced inode. The sidecar is created once and never renamed.
/// Acquisition blocks until the peer releases.
pub struct PlanLock {
    file: File,
}

impl PlanLock {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        // Open without truncating; the file may be held by a peer.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for PlanLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
