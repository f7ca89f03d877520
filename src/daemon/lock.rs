use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::daemon::DaemonError;

/// Pid file inside the state directory
pub static PID_FILE: &str = "jatko.pid";

/// Holds the pid file for as long as the daemon runs
///
/// Only one daemon may drive a state directory. The file is created exclusively and removed
/// on drop. A file left behind by a crashed daemon has to be removed by hand.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    pub fn acquire(state_dir: &Path) -> Result<PidLock, DaemonError> {
        let path = state_dir.join(PID_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = read_pid(state_dir).map(|pid| pid.to_string()).unwrap_or_else(|| "unknown".to_string());
                return Err(DaemonError::Locked { path, pid: holder });
            }
            Err(source) => return Err(DaemonError::Lock { path, source }),
        };
        writeln!(file, "{}", std::process::id()).map_err(|source| DaemonError::Lock { path: path.clone(), source })?;

        info!("Holding lock {}", path.display());
        Ok(PidLock { path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Can't remove lock {}: {err}", self.path.display());
        }
    }
}

/// Pid of the daemon holding the state directory
pub fn read_pid(state_dir: &Path) -> Option<u32> {
    fs::read_to_string(state_dir.join(PID_FILE)).ok()?.trim().parse().ok()
}
