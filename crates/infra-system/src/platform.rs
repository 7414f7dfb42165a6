// Platform kill helpers

#[cfg(unix)]
pub use unix::signal_tree;

#[cfg(windows)]
pub use windows::{taskkill_tree, CREATE_NEW_PROCESS_GROUP};

#[cfg(unix)]
mod unix {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;
    use tracing::debug;

    /// Signal a process and, when it leads its own group, the whole group
    ///
    /// A process that has already gone (ESRCH) is not an error.
    pub fn signal_tree(pid: u32, signal: Signal, group: bool) -> nix::Result<()> {
        let pid = Pid::from_raw(pid as i32);
        debug!(pid = %pid, signal = %signal, group = group, "Sending signal");

        match kill(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e),
        }
        if group {
            match killpg(pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::process::{Command, Stdio};

    pub const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

    /// Kill a process and all of its descendants
    pub fn taskkill_tree(pid: u32) -> io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        // 128: process not found, i.e. already gone
        if status.success() || status.code() == Some(128) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("taskkill exited with {}", status),
            ))
        }
    }
}
