use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use log::LevelFilter;
use tauri::plugin::TauriPlugin;
use tauri::Runtime;
use tauri_plugin_log::{Target, TargetKind};

pub const BACKEND_LOG_TARGET: &str = "backend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives every line the backend writes. Lines arrive from reader threads.
pub type LineSink = Arc<dyn Fn(StreamKind, &str) + Send + Sync>;

pub fn plugin<R: Runtime>() -> TauriPlugin<R> {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    tauri_plugin_log::Builder::new()
        .targets([
            Target::new(TargetKind::Stdout),
            Target::new(TargetKind::LogDir { file_name: None }),
        ])
        .level(level)
        .level_for("ureq", LevelFilter::Warn)
        .build()
}

pub fn log_backend_line(stream: StreamKind, line: &str) {
    match stream {
        StreamKind::Stdout => log::info!(target: BACKEND_LOG_TARGET, "[Backend] {}", line),
        StreamKind::Stderr => log::warn!(target: BACKEND_LOG_TARGET, "[Backend] {}", line),
    }
}

pub fn backend_log_sink() -> LineSink {
    Arc::new(log_backend_line)
}

/// Pump `reader` until EOF, handing each line to `sink` without its `\n`.
/// Blank lines and carriage returns are kept. Bytes that are not UTF-8 are
/// replaced, never rejected.
pub fn forward_lines<R: Read>(reader: R, stream: StreamKind, sink: &LineSink) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                sink(stream, &String::from_utf8_lossy(line));
            }
            Err(e) => {
                log::debug!("Backend {:?} stream closed: {}", stream, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn capture() -> (LineSink, Arc<Mutex<Vec<(StreamKind, String)>>>) {
        let lines: Arc<Mutex<Vec<(StreamKind, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink: LineSink = Arc::new(move |stream: StreamKind, line: &str| {
            sink_lines.lock().unwrap().push((stream, line.to_string()));
        });
        (sink, lines)
    }

    #[test]
    fn forwards_lines_verbatim() {
        let (sink, lines) = capture();
        let input = " * Running on http://127.0.0.1:5000\nGET / 200 -\n\nlast without newline";
        forward_lines(Cursor::new(input), StreamKind::Stderr, &sink);
        let lines = lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (StreamKind::Stderr, " * Running on http://127.0.0.1:5000".to_string()),
                (StreamKind::Stderr, "GET / 200 -".to_string()),
                (StreamKind::Stderr, String::new()),
                (StreamKind::Stderr, "last without newline".to_string()),
            ]
        );
    }

    #[test]
    fn blank_lines_and_carriage_returns_survive() {
        let (sink, lines) = capture();
        forward_lines(Cursor::new("\n\nprogress 50%\r\n  \n"), StreamKind::Stdout, &sink);
        let lines: Vec<String> = lines.lock().unwrap().iter().map(|(_, l)| l.clone()).collect();
        assert_eq!(lines, vec!["", "", "progress 50%\r", "  "]);
    }

    #[test]
    fn binary_output_does_not_break_forwarding() {
        let (sink, lines) = capture();
        let input: &[u8] = b"ok\n\xff\xfe\x00raw\nafter\n";
        forward_lines(Cursor::new(input), StreamKind::Stdout, &sink);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].1, "\u{fffd}\u{fffd}\u{0}raw");
        assert_eq!(lines[2].1, "after");
    }

    #[test]
    fn log_sink_accepts_both_streams() {
        let sink = backend_log_sink();
        sink(StreamKind::Stdout, "hello");
        sink(StreamKind::Stderr, "Traceback (most recent call last):");
    }
}
