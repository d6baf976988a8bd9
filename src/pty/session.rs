use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portable_pty::{Child, MasterPty};

/// Shared writer handle so both the input forwarder and the recorder can
/// write to the PTY.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Shared child handle so the capture thread can reap the shell after EOF.
pub type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

/// A live recording session tying together the PTY master, the child shell,
/// and the capture thread.
pub struct RecordSession {
    /// Master side of the PTY; taken on kill so the capture thread sees EOF
    master: Option<Box<dyn MasterPty + Send>>,
    child: SharedChild,
    writer: SharedWriter,
    running: Arc<AtomicBool>,
    capture_handle: Option<std::thread::JoinHandle<()>>,
}

impl RecordSession {
    pub fn new(
        master: Box<dyn MasterPty + Send>,
        child: Box<dyn Child + Send + Sync>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            master: Some(master),
            child: Arc::new(Mutex::new(child)),
            writer: Arc::new(Mutex::new(writer)),
            running: Arc::new(AtomicBool::new(true)),
            capture_handle: None,
        }
    }

    /// Handle for writing keystrokes into the PTY.
    pub fn writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }

    /// Flag the worker threads watch to know the session is still live.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Handle on the child shell process.
    pub fn child(&self) -> SharedChild {
        Arc::clone(&self.child)
    }

    pub fn set_capture_handle(&mut self, handle: std::thread::JoinHandle<()>) {
        self.capture_handle = Some(handle);
    }

    /// Write input bytes to the shell via the PTY.
    pub fn write_input(&self, data: &[u8]) -> Result<(), std::io::Error> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Check if the child process has exited.
    pub fn try_wait(&self) -> Option<portable_pty::ExitStatus> {
        self.child.lock().try_wait().ok().flatten()
    }

    /// Tear the session down: end the shell, then reclaim the capture
    /// thread.
    ///
    /// The shell first gets a hangup (portable-pty's `kill()` delivers
    /// SIGHUP on Unix) and a short grace period to exit on its own.
    /// Anything still alive after that is SIGKILLed, process group
    /// included. Dropping the master afterwards EOFs the capture thread so
    /// the join below cannot block forever.
    pub fn kill(&mut self) {
        self.running.store(false, Ordering::Release);

        {
            let mut child = self.child.lock();
            let pid = child.process_id();
            let _ = child.kill();

            if !wait_for_exit(&mut **child, Duration::from_millis(200)) {
                #[cfg(unix)]
                if let Some(pid) = pid {
                    sigkill_group(pid);
                }
                // Reap whatever the signals left behind
                let _ = child.try_wait();
            }
        }

        drop(self.master.take());

        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Poll the child until it exits or the grace period runs out.
fn wait_for_exit(child: &mut (dyn Child + Send + Sync), grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// SIGKILL a stubborn shell. The group signal covers children the shell
/// spawned; the direct one covers a shell that left its own group.
#[cfg(unix)]
fn sigkill_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

impl Drop for RecordSession {
    fn drop(&mut self) {
        self.kill();
    }
}
