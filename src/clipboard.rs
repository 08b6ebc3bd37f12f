use anyhow::{Result, anyhow};
#[cfg(target_os = "linux")]
use std::io::Write;
#[cfg(target_os = "linux")]
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(not(target_os = "linux"))]
use copypasta::{ClipboardContext, ClipboardProvider};

use crate::record::Record;

/// Shared text buffer another process may hold open.
pub trait ExchangeBuffer {
    /// Name of whoever holds the buffer open right now, if anyone.
    fn probe_owner(&mut self) -> Option<String>;
    fn clear(&mut self) -> Result<()>;
    fn write(&mut self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Keep trying while the buffer is held by someone else.
    pub retry: bool,
    /// Upper bound on attempts when `retry` is set.
    pub attempts: u32,
    /// Pause between clearing and writing.
    pub settle_delay: Duration,
    /// Wait before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    /// Return [`CopyOutcome::Busy`] instead of [`CopyOutcome::Dropped`].
    pub report_busy: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            retry: false,
            attempts: 3,
            settle_delay: Duration::from_millis(100),
            backoff: Duration::from_millis(250),
            report_busy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// Buffer stayed locked; only returned when `report_busy` is set.
    Busy(Option<String>),
    Dropped,
    /// The write itself failed. Logged, never propagated.
    WriteFailed,
    NoCode,
}

/// Writes `text` once the buffer is free.
///
/// Nothing here returns an error: a failed copy must not fail the code
/// generation that triggered it.
pub fn copy_with_retry(
    buffer: &mut dyn ExchangeBuffer,
    text: &str,
    opts: &CopyOptions,
) -> CopyOutcome {
    let attempts = if opts.retry { opts.attempts.max(1) } else { 1 };
    let mut owner = None;

    for attempt in 1..=attempts {
        owner = buffer.probe_owner();
        if let Some(name) = &owner {
            warn!(attempt, "clipboard in use by '{name}'");
            if attempt < attempts {
                thread::sleep(backoff_delay(opts.backoff, attempt));
            }
            continue;
        }

        if let Err(e) = buffer.clear() {
            debug!("clipboard clear failed: {e}");
        }
        thread::sleep(opts.settle_delay);

        return match buffer.write(text) {
            Ok(()) => CopyOutcome::Copied,
            Err(e) => {
                warn!("clipboard write failed: {e}");
                CopyOutcome::WriteFailed
            }
        };
    }

    if opts.report_busy {
        CopyOutcome::Busy(owner)
    } else {
        CopyOutcome::Dropped
    }
}

/// Linear backoff, capped at `Duration::MAX`.
fn backoff_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(attempt)
}

impl Record {
    /// Copies `code`, or the current code when `None`, into `buffer`.
    pub fn copy_code_to_buffer(
        &mut self,
        code: Option<String>,
        buffer: &mut dyn ExchangeBuffer,
        opts: &CopyOptions,
    ) -> CopyOutcome {
        let code = match code {
            Some(code) => code,
            None => match self.current_code() {
                Ok(Some(code)) => code,
                Ok(None) => return CopyOutcome::NoCode,
                Err(e) => {
                    debug!("no code to copy: {e}");
                    return CopyOutcome::NoCode;
                }
            },
        };
        copy_with_retry(buffer, &code, opts)
    }
}

/// The desktop clipboard.
///
/// Linux: wl-copy (Wayland) or xclip (X11). Elsewhere: copypasta.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl ExchangeBuffer for SystemClipboard {
    // No portable way to ask who holds the clipboard; a locked clipboard
    // surfaces as a write failure instead.
    fn probe_owner(&mut self) -> Option<String> {
        None
    }

    fn clear(&mut self) -> Result<()> {
        copy_to_clipboard("")
    }

    fn write(&mut self, text: &str) -> Result<()> {
        copy_to_clipboard(text)
    }
}

#[cfg(target_os = "linux")]
fn copy_to_clipboard(value: &str) -> Result<()> {
    let has_wayland = std::env::var("WAYLAND_DISPLAY").is_ok();
    let has_x11 = std::env::var("DISPLAY").is_ok();

    if !has_wayland && !has_x11 {
        return Err(anyhow!(
            "No GUI clipboard detected (no DISPLAY or WAYLAND_DISPLAY). \
             Use: otpkeep code <file> | xclip -selection clipboard"
        ));
    }

    if has_wayland && try_pipe_to("wl-copy", &[], value).is_ok() {
        return Ok(());
    }

    if has_x11 && try_pipe_to("xclip", &["-selection", "clipboard"], value).is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Failed to copy to clipboard: wl-copy/xclip not available or failed.\n\
         Try installing `wl-clipboard` or `xclip`."
    ))
}

#[cfg(target_os = "linux")]
fn try_pipe_to(cmd: &str, args: &[&str], value: &str) -> Result<()> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("failed to spawn {}: {e}", cmd))?;

    // stdin is dropped after the write so the tool sees EOF; the child is
    // reaped even when the write fails
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(value.as_bytes()),
        None => Ok(()),
    };
    let status = child.wait()?;

    written.map_err(|e| anyhow!("failed to write to {cmd}: {e}"))?;
    if !status.success() {
        return Err(anyhow!("{cmd} exited with status {status}"));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn copy_to_clipboard(value: &str) -> Result<()> {
    let mut ctx =
        ClipboardContext::new().map_err(|e| anyhow!("Failed to initialize clipboard: {e}"))?;

    ctx.set_contents(value.to_string())
        .map_err(|e| anyhow!("Failed to copy to clipboard: {e}"))?;

    Ok(())
}
