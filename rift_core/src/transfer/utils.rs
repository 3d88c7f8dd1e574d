use crate::TransferEvent;
use crate::transfer::constants::MAX_FILENAME_LENGTH;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::sync::mpsc;

/// Create (or truncate) a file readable only by its owner (0o600 on Unix)
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Reduce a peer-supplied name to a single safe path component
pub fn sanitize_file_name(file_name: &str) -> String {
    // Last component only, whichever separator the peer used
    let file_name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // Windows reserved device names
    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if RESERVED.iter().any(|r| clean_name.eq_ignore_ascii_case(r)) {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        // Keep a short extension when there is one
        let ext_start = clean_name
            .rfind('.')
            .filter(|&idx| clean_name.len() - idx < 20);
        match ext_start {
            Some(idx) => {
                let ext = clean_name[idx..].to_string();
                let mut base = clean_name[..idx].to_string();
                truncate_at_char_boundary(&mut base, MAX_FILENAME_LENGTH - ext.len());
                base.push_str(&ext);
                clean_name = base;
            }
            None => truncate_at_char_boundary(&mut clean_name, MAX_FILENAME_LENGTH),
        }
    }

    clean_name
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    let mut cutoff = max.min(s.len());
    while !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s.truncate(cutoff);
}

/// First path in `dir` named `file_name` that does not exist yet,
/// appending ` (1)`, ` (2)`, ... before the extension.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    };
    (1u32..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Whole-percent progress that only moves forward.
///
/// Stays at or below 99 until [`ProgressTracker::complete`] reports 100, and
/// each value is reported once.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<u8>,
    completed: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// New percentage for `done` of `total`, if it changed.
    pub fn update(&mut self, done: u64, total: u64) -> Option<u8> {
        if self.completed || total == 0 {
            return None;
        }
        let percent = (done.min(total) as u128 * 100 / total as u128).min(99) as u8;
        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }

    /// 100, the first time only.
    pub fn complete(&mut self) -> Option<u8> {
        if self.completed {
            return None;
        }
        self.completed = true;
        self.last = Some(100);
        Some(100)
    }
}

/// Report a progress value to the event channel
pub async fn report_progress(event_tx: &mpsc::Sender<TransferEvent>, progress: Option<u8>) {
    if let Some(percent) = progress {
        let _ = event_tx.send(TransferEvent::Progress(percent)).await;
    }
}
