//! Progress rendering for a running solve.
//!
//! The reporter drains the status channel until the producer closes it.
//! It observes no cancellation token: when a sibling task fails, the
//! reporter keeps rendering so the solver's error output still reaches the
//! user.

use std::collections::HashMap;
use std::fmt;
use std::io::{IsTerminal, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{SolveStatus, StatusReceiver, Vertex, VertexLog, VertexStatus};

use super::error::BuildError;

/// Shared sink for plain output
pub type ProgressWriter = Arc<Mutex<dyn Write + Send>>;

/// Progress style selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Interactive when attached to a terminal, plain otherwise
    #[default]
    Auto,

    /// Interactive; failing to attach to a terminal is an error
    Tty,

    /// Line-oriented log output
    Plain,
}

impl FromStr for ProgressMode {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "tty" => Ok(Self::Tty),
            "plain" => Ok(Self::Plain),
            other => Err(BuildError::InvalidProgressMode(other.to_string())),
        }
    }
}

impl fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Tty => "tty",
            Self::Plain => "plain",
        };
        f.write_str(name)
    }
}

/// Renders progress events to a terminal or a plain writer
#[derive(Clone)]
pub struct Reporter {
    mode: ProgressMode,
    interactive: bool,
    plain_out: ProgressWriter,
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("mode", &self.mode)
            .field("interactive", &self.interactive)
            .finish()
    }
}

impl Reporter {
    /// Reporter writing to stderr, interactive if stderr is a terminal
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            interactive: std::io::stderr().is_terminal(),
            plain_out: Arc::new(Mutex::new(std::io::stderr())),
        }
    }

    /// Override terminal detection
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Send plain output somewhere other than stderr
    pub fn with_plain_writer(mut self, out: ProgressWriter) -> Self {
        self.plain_out = out;
        self
    }

    /// Whether this reporter will render interactively
    pub fn renders_interactive(&self) -> Result<bool, BuildError> {
        match self.mode {
            ProgressMode::Plain => Ok(false),
            ProgressMode::Auto => Ok(self.interactive),
            ProgressMode::Tty if self.interactive => Ok(true),
            ProgressMode::Tty => Err(BuildError::Console(
                "stderr is not a terminal".to_string(),
            )),
        }
    }

    /// Render every event until the channel closes
    pub async fn display(&self, mut rx: StatusReceiver) -> Result<(), BuildError> {
        if self.renders_interactive()? {
            let mut view = TtyView::new();
            while let Some(status) = rx.recv().await {
                view.apply(&status);
            }
            view.finish();
            Ok(())
        } else {
            let mut view = PlainView::default();
            while let Some(status) = rx.recv().await {
                let mut out = self.plain_out.lock().unwrap_or_else(|e| e.into_inner());
                view.apply(&status, &mut *out)?;
            }
            let mut out = self.plain_out.lock().unwrap_or_else(|e| e.into_inner());
            view.finish(&mut *out)?;
            debug!(vertexes = view.vertexes.len(), "progress stream closed");
            Ok(())
        }
    }
}

/// Line-oriented renderer in the solver's plain format
#[derive(Default)]
struct PlainView {
    /// digest → display index, assigned in order of first appearance
    vertexes: HashMap<String, usize>,
    started: HashMap<String, bool>,
    finished: HashMap<String, bool>,
    errors: usize,
    partial: LineBuffer,
}

/// Reassembles log lines that arrive split across chunks
#[derive(Default)]
struct LineBuffer {
    pending: HashMap<String, Vec<u8>>,
}

impl LineBuffer {
    /// Append a chunk for `vertex` and return the lines it completes
    fn push(&mut self, vertex: &str, data: &[u8]) -> Vec<String> {
        let buf = self.pending.entry(vertex.to_string()).or_default();
        buf.extend_from_slice(data);

        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = buf.drain(..=end).collect();
        complete[..end]
            .split(|b| *b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Unterminated trailing lines, keyed by vertex
    fn drain(&mut self) -> Vec<(String, String)> {
        self.pending
            .drain()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(vertex, buf)| (vertex, decode_line(&buf)))
            .collect()
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

impl PlainView {
    fn index(&mut self, digest: &str) -> usize {
        let next = self.vertexes.len() + 1;
        *self.vertexes.entry(digest.to_string()).or_insert(next)
    }

    fn apply(&mut self, status: &SolveStatus, out: &mut dyn Write) -> Result<(), BuildError> {
        for vertex in &status.vertexes {
            self.vertex(vertex, out)?;
        }
        for vs in &status.statuses {
            self.status(vs, out)?;
        }
        for log in &status.logs {
            self.log(log, out)?;
        }
        Ok(())
    }

    fn vertex(&mut self, vertex: &Vertex, out: &mut dyn Write) -> Result<(), BuildError> {
        let idx = self.index(&vertex.digest);

        if vertex.started.is_some() && !self.started.contains_key(&vertex.digest) {
            self.started.insert(vertex.digest.clone(), true);
            writeln!(out, "#{} {}", idx, vertex.name)?;
        }

        if self.finished.contains_key(&vertex.digest) {
            return Ok(());
        }

        if let Some(err) = &vertex.error {
            self.finished.insert(vertex.digest.clone(), true);
            self.errors += 1;
            writeln!(out, "#{} ERROR: {}", idx, err)?;
        } else if vertex.cached {
            self.finished.insert(vertex.digest.clone(), true);
            writeln!(out, "#{} CACHED", idx)?;
        } else if let Some(duration) = vertex.duration() {
            self.finished.insert(vertex.digest.clone(), true);
            let secs = duration.num_milliseconds() as f64 / 1000.0;
            writeln!(out, "#{} DONE {:.1}s", idx, secs)?;
        }
        Ok(())
    }

    fn status(&mut self, vs: &VertexStatus, out: &mut dyn Write) -> Result<(), BuildError> {
        if vs.completed.is_none() {
            return Ok(());
        }
        let idx = self.index(&vs.vertex);
        if vs.total > 0 {
            writeln!(out, "#{} {} {}/{} done", idx, vs.id, vs.current, vs.total)?;
        } else {
            writeln!(out, "#{} {} done", idx, vs.id)?;
        }
        Ok(())
    }

    fn log(&mut self, log: &VertexLog, out: &mut dyn Write) -> Result<(), BuildError> {
        let idx = self.index(&log.vertex);
        for line in self.partial.push(&log.vertex, &log.data) {
            writeln!(out, "#{} {}", idx, line)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn Write) -> Result<(), BuildError> {
        let mut rest: Vec<(usize, String)> = self
            .partial
            .drain()
            .into_iter()
            .map(|(digest, line)| (self.index(&digest), line))
            .collect();
        rest.sort();
        for (idx, line) in rest {
            writeln!(out, "#{} {}", idx, line)?;
        }

        if self.errors > 0 {
            writeln!(out, "{} of {} steps failed", self.errors, self.vertexes.len())?;
        } else if !self.vertexes.is_empty() {
            writeln!(out, "{} steps finished", self.vertexes.len())?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Interactive renderer: one spinner per vertex, updated in place
struct TtyView {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
    partial: LineBuffer,
}

impl TtyView {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.blue} {prefix:>4} {wide_msg} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
            bars: HashMap::new(),
            style,
            partial: LineBuffer::default(),
        }
    }

    fn bar(&mut self, digest: &str, name: &str) -> &ProgressBar {
        let next = self.bars.len() + 1;
        let multi = &self.multi;
        let style = &self.style;
        self.bars.entry(digest.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style.clone());
            bar.set_prefix(format!("#{}", next));
            bar.set_message(name.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        })
    }

    fn apply(&mut self, status: &SolveStatus) {
        for vertex in &status.vertexes {
            let bar = self.bar(&vertex.digest, &vertex.name).clone();
            if bar.is_finished() {
                continue;
            }
            if let Some(err) = &vertex.error {
                bar.abandon_with_message(format!("{} ERROR: {}", vertex.name, err));
            } else if vertex.cached {
                bar.finish_with_message(format!("{} CACHED", vertex.name));
            } else if vertex.completed.is_some() {
                bar.finish_with_message(format!("{} DONE", vertex.name));
            }
        }
        for vs in &status.statuses {
            if let Some(bar) = self.bars.get(&vs.vertex) {
                if vs.total > 0 {
                    bar.set_length(vs.total.max(0) as u64);
                    bar.set_position(vs.current.max(0) as u64);
                }
            }
        }
        for log in &status.logs {
            for line in self.partial.push(&log.vertex, &log.data) {
                let _ = self.multi.println(line);
            }
        }
    }

    fn finish(mut self) {
        for (_, line) in self.partial.drain() {
            let _ = self.multi.println(line);
        }
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::domain::status_channel;

    fn buffer() -> (Arc<Mutex<Vec<u8>>>, ProgressWriter) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let writer: ProgressWriter = buf.clone();
        (buf, writer)
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("auto".parse::<ProgressMode>().unwrap(), ProgressMode::Auto);
        assert_eq!("tty".parse::<ProgressMode>().unwrap(), ProgressMode::Tty);
        assert_eq!("plain".parse::<ProgressMode>().unwrap(), ProgressMode::Plain);
        assert!(matches!(
            "fancy".parse::<ProgressMode>(),
            Err(BuildError::InvalidProgressMode(v)) if v == "fancy"
        ));
        assert!("TTY".parse::<ProgressMode>().is_err());
    }

    #[test]
    fn test_mode_selection() {
        let auto = Reporter::new(ProgressMode::Auto).with_interactive(false);
        assert!(!auto.renders_interactive().unwrap());

        let plain = Reporter::new(ProgressMode::Plain).with_interactive(true);
        assert!(!plain.renders_interactive().unwrap());

        let tty = Reporter::new(ProgressMode::Tty).with_interactive(false);
        assert!(matches!(tty.renders_interactive(), Err(BuildError::Console(_))));
    }

    #[tokio::test]
    async fn test_tty_without_terminal_fails_fast() {
        let reporter = Reporter::new(ProgressMode::Tty).with_interactive(false);
        let (tx, rx) = status_channel();
        let err = reporter.display(rx).await.unwrap_err();
        assert!(matches!(err, BuildError::Console(_)));

        // Producer must not block once the reporter is gone.
        assert!(tx.send(SolveStatus::default()).is_err());
    }

    #[tokio::test]
    async fn test_plain_output_preserves_event_order() {
        let (buf, writer) = buffer();
        let reporter = Reporter::new(ProgressMode::Plain).with_plain_writer(writer);
        let (tx, rx) = status_channel();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(1200);

        tx.send(SolveStatus {
            vertexes: vec![Vertex {
                digest: "sha256:a".to_string(),
                name: "[1/2] FROM alpine".to_string(),
                started: Some(t0),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap();
        tx.send(SolveStatus {
            logs: vec![VertexLog {
                vertex: "sha256:a".to_string(),
                stream: 1,
                data: b"fetching\n".to_vec(),
                timestamp: None,
            }],
            ..Default::default()
        })
        .unwrap();
        tx.send(SolveStatus {
            vertexes: vec![
                Vertex {
                    digest: "sha256:a".to_string(),
                    name: "[1/2] FROM alpine".to_string(),
                    started: Some(t0),
                    completed: Some(t1),
                    ..Default::default()
                },
                Vertex {
                    digest: "sha256:b".to_string(),
                    name: "[2/2] RUN apk add perl".to_string(),
                    started: Some(t1),
                    completed: Some(t1),
                    cached: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        })
        .unwrap();
        drop(tx);

        reporter.display(rx).await.unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#1 [1/2] FROM alpine",
                "#1 fetching",
                "#1 DONE 1.2s",
                "#2 [2/2] RUN apk add perl",
                "#2 CACHED",
                "2 steps finished",
            ]
        );
    }

    #[tokio::test]
    async fn test_plain_output_reports_errors() {
        let (buf, writer) = buffer();
        let reporter = Reporter::new(ProgressMode::Auto)
            .with_interactive(false)
            .with_plain_writer(writer);
        let (tx, rx) = status_channel();

        tx.send(SolveStatus {
            vertexes: vec![Vertex {
                digest: "sha256:c".to_string(),
                name: "RUN false".to_string(),
                started: Some(Utc::now()),
                completed: Some(Utc::now()),
                error: Some("exit code: 1".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap();
        drop(tx);

        reporter.display(rx).await.unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(text.contains("#1 ERROR: exit code: 1"));
        assert!(text.contains("1 of 1 steps failed"));
    }

    fn log_chunk(vertex: &str, data: &[u8]) -> SolveStatus {
        SolveStatus {
            logs: vec![VertexLog {
                vertex: vertex.to_string(),
                stream: 1,
                data: data.to_vec(),
                timestamp: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_line_buffer_joins_chunks() {
        let mut lines = LineBuffer::default();
        assert!(lines.push("a", b"hel").is_empty());
        assert_eq!(lines.push("a", b"lo world\r\nnext\n"), ["hello world", "next"]);
        assert!(lines.push("a", b"tail").is_empty());
        assert_eq!(lines.drain(), [("a".to_string(), "tail".to_string())]);
        assert!(lines.drain().is_empty());
    }

    #[tokio::test]
    async fn test_plain_output_reassembles_split_log_lines() {
        let (buf, writer) = buffer();
        let reporter = Reporter::new(ProgressMode::Plain).with_plain_writer(writer);
        let (tx, rx) = status_channel();

        tx.send(log_chunk("sha256:a", b"hel")).unwrap();
        tx.send(log_chunk("sha256:b", b"other\n")).unwrap();
        tx.send(log_chunk("sha256:a", b"lo world\nunterminated")).unwrap();
        drop(tx);

        reporter.display(rx).await.unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["#2 other", "#1 hello world", "#1 unterminated", "2 steps finished"]
        );
    }
}
