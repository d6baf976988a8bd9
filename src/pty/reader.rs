use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::session::SharedWriter;

/// One chunk of terminal output with its capture time relative to the start
/// of the recording.
#[derive(Debug, Clone)]
pub struct TimedChunk {
    pub elapsed: Duration,
    pub data: Vec<u8>,
}

/// Spawn the capture thread: reads PTY output, stamps each chunk with the
/// elapsed wall-clock time, ships it to the recorder, and echoes it to the
/// user's terminal so the session stays interactive.
pub fn spawn_capture_thread(
    mut reader: Box<dyn Read + Send>,
    sender: Sender<TimedChunk>,
    running: Arc<AtomicBool>,
    echo: bool,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("pty-capture".to_string())
        .spawn(move || {
            let start = Instant::now();
            let mut buf = [0u8; 4096];

            while running.load(Ordering::Acquire) {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        // EOF: the shell exited
                        tracing::info!("PTY capture reached EOF");
                        running.store(false, Ordering::Release);
                        break;
                    }
                    Ok(n) => {
                        let elapsed = start.elapsed();
                        if echo {
                            let mut stdout = std::io::stdout().lock();
                            let _ = stdout.write_all(&buf[..n]);
                            let _ = stdout.flush();
                        }
                        let chunk = TimedChunk {
                            elapsed,
                            data: buf[..n].to_vec(),
                        };
                        if sender.send(chunk).is_err() {
                            // Consumer stopped pulling; unwind quietly
                            tracing::debug!("recording consumer cancelled, stopping capture");
                            running.store(false, Ordering::Release);
                            break;
                        }
                    }
                    Err(e) => {
                        if running.load(Ordering::Acquire) {
                            tracing::error!("PTY read error: {e}");
                        }
                        running.store(false, Ordering::Release);
                        break;
                    }
                }
            }
            // Sender drops here; the recorder sees the channel close.
        })
        .expect("failed to spawn PTY capture thread")
}

/// Spawn the input forwarder: user keystrokes from stdin go straight to the
/// PTY. The thread is detached; it ends with the process, since a blocking
/// stdin read cannot be interrupted portably.
pub fn spawn_input_thread(writer: SharedWriter, running: Arc<AtomicBool>) {
    let result = std::thread::Builder::new()
        .name("pty-input".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut buf = [0u8; 1024];

            while running.load(Ordering::Acquire) {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut writer = writer.lock();
                        if writer.write_all(&buf[..n]).is_err() {
                            break;
                        }
                        let _ = writer.flush();
                    }
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = result {
        tracing::error!("failed to spawn input thread: {e}");
    }
}
