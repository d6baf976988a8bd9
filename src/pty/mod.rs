//! PTY session recorder: spawns a shell on a pseudo-terminal, captures its
//! output with wall-clock timing, and exposes the session as a stream of
//! asciicast v2 events.

pub mod reader;
pub mod session;

pub use session::RecordSession;

use std::io;

use crossbeam_channel::Receiver;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};

use crate::asciicast::{Event, Header};
use crate::error::Result;
use reader::TimedChunk;

/// Result of spawning a shell: the session itself plus the reader handle
/// which must be passed to the capture thread.
pub struct SpawnResult {
    pub session: RecordSession,
    pub reader: Box<dyn io::Read + Send>,
}

fn detect_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Spawn a shell on a fresh PTY of the given size.
pub fn spawn_shell(shell: Option<&str>, columns: u16, rows: u16) -> Result<SpawnResult> {
    let pty_system = native_pty_system();
    let shell = match shell {
        Some(s) => s.to_string(),
        None => detect_shell(),
    };

    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols: columns,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(io::Error::other)?;

    let mut cmd = CommandBuilder::new(&shell);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(io::Error::other)?;
    let reader = pair.master.try_clone_reader().map_err(io::Error::other)?;
    let writer = pair.master.take_writer().map_err(io::Error::other)?;

    tracing::info!(shell = %shell, columns, rows, "spawned recording shell");

    Ok(SpawnResult {
        session: RecordSession::new(pair.master, child, writer),
        reader,
    })
}

/// A live recording: the asciicast header plus a blocking stream of output
/// events. Iteration ends when the shell exits or the capture thread stops.
pub struct Recording {
    header: Header,
    session: RecordSession,
    chunks: Receiver<TimedChunk>,
    /// Incomplete trailing UTF-8 bytes carried to the next chunk.
    carry: Vec<u8>,
}

/// Start recording an interactive shell session of the given geometry.
/// Output is echoed to the caller's terminal; input forwarding is the
/// caller's job via [`Recording::writer`].
pub fn record(shell: Option<&str>, columns: u16, rows: u16) -> Result<Recording> {
    let SpawnResult {
        mut session,
        reader,
    } = spawn_shell(shell, columns, rows)?;

    let (sender, chunks) = crossbeam_channel::bounded(64);
    let handle = reader::spawn_capture_thread(reader, sender, session.running(), true);
    session.set_capture_handle(handle);

    Ok(Recording {
        header: Header {
            version: 2,
            width: i64::from(columns),
            height: i64::from(rows),
            theme: None,
            idle_time_limit: None,
        },
        session,
        chunks,
        carry: Vec::new(),
    })
}

impl Recording {
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Shared PTY writer, for forwarding the user's keystrokes.
    pub fn writer(&self) -> session::SharedWriter {
        self.session.writer()
    }

    /// Shared running flag for helper threads.
    pub fn running(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.session.running()
    }

}

/// Decode a chunk into a string, holding back an incomplete trailing UTF-8
/// sequence in `carry` for the next chunk. Invalid bytes in the middle are
/// replaced rather than dropped.
fn decode_utf8(carry: &mut Vec<u8>, data: &[u8]) -> String {
    carry.extend_from_slice(data);
    let bytes = std::mem::take(carry);

    match std::str::from_utf8(&bytes) {
        Ok(s) => s.to_string(),
        Err(e) if e.error_len().is_none() => {
            // Incomplete sequence at the end; carry it over
            let valid = e.valid_up_to();
            *carry = bytes[valid..].to_vec();
            String::from_utf8_lossy(&bytes[..valid]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

impl Iterator for Recording {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk = self.chunks.recv().ok()?;
            let data = decode_utf8(&mut self.carry, &chunk.data);
            if data.is_empty() {
                continue;
            }
            return Some(Event::output(chunk.elapsed.as_secs_f64(), data));
        }
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        self.session.kill();
    }
}
