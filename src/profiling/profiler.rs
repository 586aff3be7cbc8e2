//! Chrome Trace span recorder.
//!
//! Enabled with `--features profiling`; otherwise every entry point is an
//! inlined no-op and [`SpanGuard`] is a unit struct.
//!
//! ```text
//! pgas_array::profiler::init("profile/reduce.json");
//! let y = x.sum()?;          // spans recorded on caller and pool threads
//! pgas_array::profiler::shutdown();
//! ```

use std::borrow::Cow;
use std::path::Path;

#[cfg(feature = "profiling")]
mod enabled {
    use std::fs::File;
    use std::io::{self, BufWriter, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::OnceLock;
    use std::time::Instant;

    use parking_lot::Mutex;

    use super::*;

    const CATEGORY: &str = "darray";
    const PID: u32 = 1;

    enum Record {
        Span {
            name: String,
            start_us: u64,
            dur_us: u64,
            tid: u64,
            args: Vec<(String, Arg)>,
        },
        Thread {
            tid: u64,
            name: String,
        },
    }

    impl Record {
        fn write_json<W: Write>(&self, w: &mut W) -> io::Result<()> {
            match self {
                Record::Span { name, start_us, dur_us, tid, args } => {
                    write!(w, "{{\"name\":")?;
                    write_str(w, name)?;
                    write!(
                        w,
                        ",\"cat\":\"{CATEGORY}\",\"ph\":\"X\",\"ts\":{start_us},\"dur\":{dur_us},\"pid\":{PID},\"tid\":{tid}"
                    )?;
                    if !args.is_empty() {
                        write!(w, ",\"args\":{{")?;
                        for (i, (key, value)) in args.iter().enumerate() {
                            if i > 0 {
                                write!(w, ",")?;
                            }
                            write_str(w, key)?;
                            write!(w, ":")?;
                            write_arg(w, value)?;
                        }
                        write!(w, "}}")?;
                    }
                    write!(w, "}}")
                }
                Record::Thread { tid, name } => {
                    write!(w, "{{\"name\":\"thread_name\",\"ph\":\"M\",\"pid\":{PID},\"tid\":{tid},\"args\":{{\"name\":")?;
                    write_str(w, name)?;
                    write!(w, "}}}}")
                }
            }
        }
    }

    fn write_arg<W: Write>(w: &mut W, arg: &Arg) -> io::Result<()> {
        match arg {
            Arg::Str(s) => write_str(w, s),
            Arg::U64(v) => write!(w, "{v}"),
            Arg::I64(v) => write!(w, "{v}"),
            Arg::F64(v) if v.is_finite() => write!(w, "{v}"),
            Arg::F64(v) => write_str(w, &v.to_string()),
            Arg::Bool(v) => write!(w, "{v}"),
        }
    }

    fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
        write!(w, "\"")?;
        for ch in s.chars() {
            match ch {
                '"' => write!(w, "\\\"")?,
                '\\' => write!(w, "\\\\")?,
                '\n' => write!(w, "\\n")?,
                '\t' => write!(w, "\\t")?,
                c if c.is_control() => write!(w, "\\u{:04x}", c as u32)?,
                c => write!(w, "{c}")?,
            }
        }
        write!(w, "\"")
    }

    struct Recorder {
        epoch: Instant,
        path: PathBuf,
        recording: AtomicBool,
        records: Mutex<Vec<Record>>,
    }

    impl Recorder {
        fn active() -> Option<&'static Recorder> {
            RECORDER.get().filter(|r| r.recording.load(Ordering::Acquire))
        }

        fn elapsed_us(&self) -> u64 {
            self.epoch.elapsed().as_micros() as u64
        }

        fn push(&self, record: Record) {
            if self.recording.load(Ordering::Acquire) {
                self.records.lock().push(record);
            }
        }

        fn flush(&self) -> io::Result<()> {
            let records = std::mem::take(&mut *self.records.lock());
            if let Some(dir) = self.path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut w = BufWriter::new(File::create(&self.path)?);
            write!(w, "{{\"traceEvents\":[")?;
            for (i, record) in records.iter().enumerate() {
                if i > 0 {
                    write!(w, ",")?;
                }
                record.write_json(&mut w)?;
            }
            write!(w, "]}}")?;
            w.flush()
        }
    }

    static RECORDER: OnceLock<Recorder> = OnceLock::new();
    static NEXT_TID: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    }

    fn tid() -> u64 {
        TID.with(|t| *t)
    }

    /// Starts recording; spans are written to `path` on [`shutdown`].
    /// Later calls are ignored.
    pub fn init<P: AsRef<Path>>(path: P) {
        let _ = RECORDER.set(Recorder {
            epoch: Instant::now(),
            path: path.as_ref().to_path_buf(),
            recording: AtomicBool::new(true),
            records: Mutex::new(Vec::new()),
        });
    }

    /// Stops recording and writes the trace file.
    pub fn shutdown() {
        if let Some(recorder) = RECORDER.get() {
            recorder.recording.store(false, Ordering::Release);
            if let Err(e) = recorder.flush() {
                tracing::warn!(path = %recorder.path.display(), error = %e, "failed to write trace");
            }
        }
    }

    /// Names the calling thread in the trace viewer.
    pub fn thread_name(name: impl Into<String>) {
        if let Some(recorder) = Recorder::active() {
            recorder.push(Record::Thread { tid: tid(), name: name.into() });
        }
    }

    /// Opens a span that closes when the guard drops.
    pub fn span(name: impl Into<SpanName>) -> SpanGuard {
        match Recorder::active() {
            Some(recorder) => SpanGuard(Some(OpenSpan {
                name: name.into().0.into_owned(),
                start_us: recorder.elapsed_us(),
                tid: tid(),
                args: Vec::new(),
                recorder,
            })),
            None => SpanGuard(None),
        }
    }

    struct OpenSpan {
        name: String,
        start_us: u64,
        tid: u64,
        args: Vec<(String, Arg)>,
        recorder: &'static Recorder,
    }

    /// Records one complete event on drop.
    pub struct SpanGuard(Option<OpenSpan>);

    impl SpanGuard {
        /// Attaches an argument to the span.
        #[inline]
        pub fn arg(mut self, key: impl Into<String>, value: Arg) -> Self {
            if let Some(open) = self.0.as_mut() {
                open.args.push((key.into(), value));
            }
            self
        }
    }

    impl Drop for SpanGuard {
        fn drop(&mut self) {
            if let Some(open) = self.0.take() {
                let dur_us = open.recorder.elapsed_us().saturating_sub(open.start_us);
                open.recorder.push(Record::Span {
                    name: open.name,
                    start_us: open.start_us,
                    dur_us,
                    tid: open.tid,
                    args: open.args,
                });
            }
        }
    }
}

#[cfg(not(feature = "profiling"))]
mod disabled {
    use super::*;

    /// No-op.
    #[inline]
    pub fn init<P: AsRef<Path>>(_path: P) {}

    /// No-op.
    #[inline]
    pub fn shutdown() {}

    /// No-op.
    #[inline]
    pub fn thread_name(_name: impl Into<String>) {}

    /// No-op.
    #[inline]
    pub fn span(_name: impl Into<SpanName>) -> SpanGuard {
        SpanGuard
    }

    /// No-op span guard.
    pub struct SpanGuard;

    impl SpanGuard {
        /// No-op.
        #[inline]
        pub fn arg(self, _key: impl Into<String>, _value: Arg) -> Self {
            self
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API surface (stable regardless of feature flag)
// ─────────────────────────────────────────────────────────────────────────────

/// A span name; `&'static str` or `String`.
pub struct SpanName(pub Cow<'static, str>);

impl From<&'static str> for SpanName {
    fn from(s: &'static str) -> Self {
        SpanName(Cow::Borrowed(s))
    }
}

impl From<String> for SpanName {
    fn from(s: String) -> Self {
        SpanName(Cow::Owned(s))
    }
}

/// Span argument, written to the event's `args` object.
#[derive(Debug, Clone)]
pub enum Arg {
    /// String.
    Str(String),
    /// Unsigned integer, e.g. a task or processor id.
    U64(u64),
    /// Signed integer.
    I64(i64),
    /// Float; non-finite values are written as strings.
    F64(f64),
    /// Flag.
    Bool(bool),
}

#[cfg(feature = "profiling")]
pub use enabled::{init, shutdown, span, thread_name, SpanGuard};

#[cfg(not(feature = "profiling"))]
pub use disabled::{init, shutdown, span, thread_name, SpanGuard};
