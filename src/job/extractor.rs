//! Progress extraction from an engine's human-readable output.
//!
//! The engine has no progress callback, only a verbose text stream. A
//! [`CaptureScope`] hands the engine a [`ProgressSink`] to write into for the
//! duration of one job; the monitor polls [`ProgressCapture::check_progress`]
//! to pull the latest percentage out of whatever arrived since the last poll.

use lazy_static::lazy_static;
use regex::Regex;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Upper bound on unread output kept between polls.
const MAX_BUFFERED_BYTES: usize = 256 * 1024;

lazy_static! {
    /// tqdm-style bar: ` 37%|█████     | 37/100 [00:12<00:20, ...]`
    static ref BAR_RE: Regex =
        Regex::new(r"(\d{1,3})%\|[^|\r\n]*\|\s*\d+/\d+").expect("Invalid regex pattern");
    /// whisper.cpp `-pp` output: `cb_progress: progress =  37%`
    static ref CALLBACK_RE: Regex =
        Regex::new(r"progress\s*=\s*(\d{1,3})%").expect("Invalid regex pattern");
}

struct Captured {
    pending: Vec<u8>,
    open: bool,
}

/// Read side of a capture: drains and parses what the engine wrote.
#[derive(Clone)]
pub struct ProgressCapture {
    shared: Arc<Mutex<Captured>>,
}

/// Write side handed to the engine.
pub struct ProgressSink {
    shared: Arc<Mutex<Captured>>,
}

/// Owns the capture for one job. Dropping it closes the sink (later writes are
/// discarded) and clears anything unread, on every exit path.
pub struct CaptureScope {
    capture: ProgressCapture,
}

fn lock(shared: &Mutex<Captured>) -> MutexGuard<'_, Captured> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CaptureScope {
    pub fn open() -> Self {
        Self {
            capture: ProgressCapture {
                shared: Arc::new(Mutex::new(Captured {
                    pending: Vec::new(),
                    open: true,
                })),
            },
        }
    }

    pub fn capture(&self) -> ProgressCapture {
        self.capture.clone()
    }

    pub fn sink(&self) -> ProgressSink {
        ProgressSink {
            shared: self.capture.shared.clone(),
        }
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        let mut captured = lock(&self.capture.shared);
        captured.open = false;
        captured.pending.clear();
    }
}

impl Write for ProgressSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut captured = lock(&self.shared);
        if captured.open {
            captured.pending.extend_from_slice(buf);
            let len = captured.pending.len();
            if len > MAX_BUFFERED_BYTES {
                captured.pending.drain(..len - MAX_BUFFERED_BYTES);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ProgressCapture {
    /// Latest percentage written since the previous call, or `None` when
    /// nothing new matched. An unterminated trailing fragment that does not
    /// parse yet is kept for the next call.
    pub fn check_progress(&self) -> Option<u8> {
        let drained = {
            let mut captured = lock(&self.shared);
            if captured.pending.is_empty() {
                return None;
            }
            std::mem::take(&mut captured.pending)
        };

        let split = drained
            .iter()
            .rposition(|b| *b == b'\n' || *b == b'\r')
            .map_or(0, |i| i + 1);
        let (complete, tail) = drained.split_at(split);

        let mut latest = String::from_utf8_lossy(complete)
            .split(['\r', '\n'])
            .filter_map(parse_percent)
            .last();

        if !tail.is_empty() {
            match parse_percent(&String::from_utf8_lossy(tail)) {
                Some(p) => latest = Some(p),
                None => {
                    let mut captured = lock(&self.shared);
                    if captured.open {
                        let mut kept = tail.to_vec();
                        kept.extend_from_slice(&captured.pending);
                        captured.pending = kept;
                    }
                }
            }
        }
        latest
    }
}

/// Last percentage on a single line, from either progress format.
pub fn parse_percent(line: &str) -> Option<u8> {
    let caps = BAR_RE
        .captures_iter(line)
        .last()
        .or_else(|| CALLBACK_RE.captures_iter(line).last())?;
    let value: u16 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(sink: &mut ProgressSink, text: &str) {
        sink.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn yields_each_new_percentage_then_no_signal() {
        let scope = CaptureScope::open();
        let capture = scope.capture();
        let mut sink = scope.sink();

        feed(&mut sink, "  5%|...| 5/100\n");
        assert_eq!(capture.check_progress(), Some(5));
        feed(&mut sink, "37%|...| 37/100\n");
        assert_eq!(capture.check_progress(), Some(37));
        feed(&mut sink, "Detected language: Japanese\n");
        assert_eq!(capture.check_progress(), None);
    }

    #[test]
    fn last_match_in_a_drain_wins() {
        let scope = CaptureScope::open();
        let mut sink = scope.sink();
        feed(&mut sink, " 10%|█     | 10/100\r 20%|██    | 20/100\r 30%|███   | 30/100\r");
        assert_eq!(scope.capture().check_progress(), Some(30));
        assert_eq!(scope.capture().check_progress(), None);
    }

    #[test]
    fn fragment_split_across_writes_is_reassembled() {
        let scope = CaptureScope::open();
        let capture = scope.capture();
        let mut sink = scope.sink();

        feed(&mut sink, " 4");
        assert_eq!(capture.check_progress(), None);
        feed(&mut sink, "2%|████▏     | 4200/10000 [00:03<00:04]\r");
        assert_eq!(capture.check_progress(), Some(42));
    }

    #[test]
    fn unterminated_complete_bar_counts_immediately() {
        let scope = CaptureScope::open();
        let mut sink = scope.sink();
        feed(&mut sink, " 64%|██████▍   | 6400/10000");
        assert_eq!(scope.capture().check_progress(), Some(64));
    }

    #[test]
    fn multibyte_bar_cut_mid_character_survives() {
        let scope = CaptureScope::open();
        let capture = scope.capture();
        let mut sink = scope.sink();
        let line = " 55%|█████▌    | 55/100\n".as_bytes();
        // cut inside the three-byte block character
        sink.write_all(&line[..7]).unwrap();
        assert_eq!(capture.check_progress(), None);
        sink.write_all(&line[7..]).unwrap();
        assert_eq!(capture.check_progress(), Some(55));
    }

    #[test]
    fn recognises_whisper_cpp_progress_lines() {
        let scope = CaptureScope::open();
        let mut sink = scope.sink();
        feed(
            &mut sink,
            "whisper_init_from_file: loading model\ncb_progress: progress =  15%\ncb_progress: progress =  20%\n",
        );
        assert_eq!(scope.capture().check_progress(), Some(20));
    }

    #[test]
    fn closed_scope_discards_late_writes() {
        let scope = CaptureScope::open();
        let capture = scope.capture();
        let mut sink = scope.sink();
        feed(&mut sink, " 12%|█| 12/100\n");
        drop(scope);
        feed(&mut sink, " 99%|█| 99/100\n");
        assert_eq!(capture.check_progress(), None);
    }

    #[test]
    fn parse_percent_clamps_and_ignores_noise() {
        assert_eq!(parse_percent("100%|██████████| 100/100"), Some(100));
        assert_eq!(parse_percent("progress = 250%"), Some(100));
        assert_eq!(parse_percent("loaded 5% of weights"), None);
        assert_eq!(parse_percent(""), None);
    }
}
