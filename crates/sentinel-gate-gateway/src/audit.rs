// sentinel-gate-gateway/src/audit.rs
// ============================================================================
// Module: Audit pipeline
// Description: The audit interceptor (start-time stamping for tool calls),
//              the bounded non-blocking recorder, and the rotating
//              JSON-Lines file store with a ring-buffered recent cache.
// Purpose: Give every tool call a durable, tamper-evident trail without the
//          hot path ever blocking on disk I/O beyond a short bounded wait.
// Dependencies: sentinel-gate-core, tokio, serde_json, time
// ============================================================================

//! ## Overview
//! [`AuditStage`] only stamps `message.audit_started_at_ms` for `tools/call`
//! requests and never rejects; it cannot see the outcome of the stages that
//! run after it ([`crate::policy::PolicyStage`] and the router), so the
//! actual [`sentinel_gate_core::audit::AuditRecord`] is assembled by the
//! caller that drives the full chain (the server loop), once the final
//! result — forwarded or rejected — is known. [`AuditRecorder`] is the
//! non-blocking ingress to that record's eventual home: a bounded channel
//! drained by one writer task that owns a [`FileAuditStore`].

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sentinel_gate_core::audit::AuditRecord;
use sentinel_gate_core::diagnostic::{DiagnosticEvent, DiagnosticSink};
use sentinel_gate_core::interceptor::{InterceptStage, Interceptor};
use sentinel_gate_core::message::{Direction, Message};
use sentinel_gate_core::GatewayError;
use time::{Date, Month, OffsetDateTime};

/// The interceptor that marks the entry point of the audit window. Runs at
/// the declared `Audit` position, between `UserRateLimit` and `Policy`.
pub struct AuditStage;

impl Interceptor for AuditStage {
    fn name(&self) -> &'static str {
        "audit"
    }
}

#[async_trait::async_trait]
impl InterceptStage for AuditStage {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }
        let is_tool_call = message
            .envelope()
            .and_then(|e| e.method.as_deref())
            .map(|m| m == "tools/call")
            .unwrap_or(false);
        if is_tool_call {
            message.audit_started_at_ms = Some(now_ms());
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    let now = OffsetDateTime::now_utc();
    u64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(0)
}

/// Builds the [`AuditRecord`] for a completed `tools/call`, given the
/// message as it stood when the chain finished and the chain's result.
/// Returns `None` when `message` never entered the audit window (not a
/// tool call, or a `ServerToClient` message).
#[must_use]
pub fn build_record(
    message: &Message,
    result: &Result<(), GatewayError>,
    log_arguments: bool,
) -> Option<AuditRecord> {
    let started_at_ms = message.audit_started_at_ms?;
    let envelope = message.envelope()?;
    let params = envelope.params.clone().unwrap_or_default();
    let tool_name = params
        .get("name")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let arguments = if log_arguments {
        params
            .get("arguments")
            .map(|a| sentinel_gate_core::audit::redact(a))
    } else {
        None
    };

    let (outcome, error_kind) = match result {
        Ok(()) => (sentinel_gate_core::error::Outcome::Allow, None),
        Err(err) => (err.outcome(), Some(err.kind_label())),
    };
    let (rule_id, reason) = match result {
        Err(GatewayError::PolicyDenied(denial)) => {
            (Some(denial.rule_id.clone()), Some(denial.reason.clone()))
        }
        _ => (None, None),
    };
    let protocol = if message.peer_addr.is_some() { "http" } else { "stdio" };

    Some(AuditRecord {
        timestamp_ms: started_at_ms,
        request_id: envelope.id.as_ref().map(ToString::to_string),
        session_id: message.session.as_ref().map(|s| s.id.clone()),
        method: "tools/call".to_string(),
        tool_name,
        subject_id: message.identity.as_ref().map(|i| i.subject_id.clone()),
        identity_name: message.identity.as_ref().map(|i| i.display_name.clone()),
        peer_addr: message.peer_addr.clone(),
        outcome,
        error_kind,
        rule_id,
        reason,
        arguments,
        duration_ms: now_ms().saturating_sub(started_at_ms),
        scan: sentinel_gate_core::audit::ScanFindings::default(),
        protocol: protocol.to_string(),
        framework: "mcp".to_string(),
    })
}

/// The non-blocking ingress to the audit pipeline: `record` tries a
/// non-blocking send, falls back to a bounded timed wait, and otherwise
/// drops the record and counts the drop. The caller is never blocked beyond
/// `send_timeout`.
pub struct AuditRecorder {
    sender: tokio::sync::mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
    send_timeout: Duration,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl AuditRecorder {
    /// Builds a recorder and its paired receiver, which the caller hands to
    /// [`spawn_writer`].
    #[must_use]
    pub fn new(
        capacity: usize,
        send_timeout: Duration,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> (Self, tokio::sync::mpsc::Receiver<AuditRecord>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        let recorder = Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
            send_timeout,
            diagnostics,
        };
        (recorder, receiver)
    }

    /// Submits `record` for durable storage, never blocking longer than the
    /// configured send timeout.
    pub async fn record(&self, record: AuditRecord) {
        let record = match self.sender.try_send(record) {
            Ok(()) => return,
            Err(tokio::sync::mpsc::error::TrySendError::Full(record)) => record,
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                self.note_dropped();
                return;
            }
        };
        match tokio::time::timeout(self.send_timeout, self.sender.send(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => self.note_dropped(),
        }
    }

    fn note_dropped(&self) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        self.diagnostics
            .record(&DiagnosticEvent::AuditRecordDropped { total_dropped: total });
    }

    /// Current number of queued-but-unwritten records.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// The configured channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total records dropped because the channel stayed full past the send
    /// timeout.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains `receiver`, appending each record to `store`, until the channel
/// closes or `shutdown` fires. On shutdown the receiver is drained of
/// whatever is already queued before the store is flushed, so no record
/// submitted before shutdown was requested is lost.
pub fn spawn_writer(
    mut receiver: tokio::sync::mpsc::Receiver<AuditRecord>,
    store: Arc<FileAuditStore>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_record = receiver.recv() => {
                    match maybe_record {
                        Some(record) => {
                            if let Err(err) = store.append(&record) {
                                diagnostics.record(&DiagnosticEvent::ConfigRejected {
                                    field: "audit.log_dir",
                                    reason: err.to_string(),
                                });
                            }
                        }
                        None => break,
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        while let Ok(record) = receiver.try_recv() {
                            let _ = store.append(&record);
                        }
                        break;
                    }
                }
            }
        }
        let _ = store.flush();
    })
}

/// Parses an audit log filename of the form `audit-YYYY-MM-DD.log` or
/// `audit-YYYY-MM-DD-N.log` into its date and optional rotation suffix.
/// Malformed names yield `None` and are skipped by every caller.
fn parse_filename(name: &str) -> Option<(Date, Option<u32>)> {
    let stem = name.strip_prefix("audit-")?.strip_suffix(".log")?;
    let mut parts = stem.splitn(4, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    let suffix = match parts.next() {
        Some(s) => Some(s.parse().ok()?),
        None => None,
    };
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some((date, suffix))
}

fn filename_for(date: Date, suffix: Option<u32>) -> String {
    let month: u8 = date.month().into();
    match suffix {
        None => format!("audit-{:04}-{:02}-{:02}.log", date.year(), month, date.day()),
        Some(n) => format!("audit-{:04}-{:02}-{:02}-{n}.log", date.year(), month, date.day()),
    }
}

/// The currently-open audit log file and its rotation bookkeeping.
struct CurrentFile {
    file: File,
    date: Date,
    suffix: Option<u32>,
    size: u64,
}

/// The rotating, retained, ring-cached JSON-Lines audit log store.
pub struct FileAuditStore {
    dir: PathBuf,
    max_file_size: u64,
    retention_days: u32,
    current: Mutex<CurrentFile>,
    ring: Mutex<VecDeque<AuditRecord>>,
    cache_size: usize,
}

impl FileAuditStore {
    /// Opens (creating if necessary) the audit directory, resumes today's
    /// log file at its highest existing rotation suffix, warms the recent-
    /// records ring from the latest non-empty file, and runs an initial
    /// retention sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or log file cannot be created or
    /// opened.
    pub fn open(
        dir: &Path,
        max_file_size: u64,
        retention_days: u32,
        cache_size: usize,
    ) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }

        let today = OffsetDateTime::now_utc().date();
        let highest_suffix = existing_suffixes_for(dir, today).into_iter().max();
        let suffix = highest_suffix.flatten();
        let path = dir.join(filename_for(today, suffix));
        let file = open_append(&path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let ring = warm_cache(dir, cache_size);

        let store = Self {
            dir: dir.to_path_buf(),
            max_file_size,
            retention_days,
            current: Mutex::new(CurrentFile { file, date: today, suffix, size }),
            ring: Mutex::new(ring),
            cache_size,
        };
        store.retention_sweep(OffsetDateTime::now_utc());
        Ok(store)
    }

    /// Appends one record, rotating by date or size first if needed, and
    /// pushes it onto the in-memory recent-records ring.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn append(&self, record: &AuditRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let record_date = date_from_millis(record.timestamp_ms);

        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if record_date != current.date {
            let path = self.dir.join(filename_for(record_date, None));
            let file = open_append(&path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
            }
            *current = CurrentFile { file, date: record_date, suffix: None, size: 0 };
        } else if current.size >= self.max_file_size {
            let next_suffix = current.suffix.map_or(1, |n| n + 1);
            let path = self.dir.join(filename_for(record_date, Some(next_suffix)));
            let file = open_append(&path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
            }
            *current = CurrentFile { file, date: record_date, suffix: Some(next_suffix), size: 0 };
        }

        writeln!(current.file, "{line}")?;
        current.size += line.len() as u64 + 1;

        let mut ring = self.ring.lock().unwrap_or_else(|p| p.into_inner());
        ring.push_front(record.clone());
        if ring.len() > self.cache_size {
            ring.pop_back();
        }
        Ok(())
    }

    /// Returns up to `n` of the most recently appended records, newest
    /// first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let ring = self.ring.lock().unwrap_or_else(|p| p.into_inner());
        ring.iter().take(n).cloned().collect()
    }

    /// Deletes audit files whose parsed date is older than
    /// `now - retention_days`. Malformed filenames are skipped, not
    /// deleted.
    pub fn retention_sweep(&self, now: OffsetDateTime) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some((date, _)) = parse_filename(&name) else {
                continue;
            };
            let age_days = (now.date() - date).whole_days();
            if age_days > i64::from(self.retention_days) && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Fsyncs the currently open file.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `sync_all` call fails.
    pub fn flush(&self) -> io::Result<()> {
        let current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        current.file.sync_all()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn date_from_millis(timestamp_ms: u64) -> Date {
    let nanos = i128::from(timestamp_ms) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map(|dt| dt.date())
        .unwrap_or_else(|_| OffsetDateTime::now_utc().date())
}

fn existing_suffixes_for(dir: &Path, date: Date) -> Vec<Option<u32>> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(parse_filename))
        .filter(|(d, _)| *d == date)
        .map(|(_, suffix)| suffix)
        .collect()
}

fn warm_cache(dir: &Path, cache_size: usize) -> VecDeque<AuditRecord> {
    let mut ring = VecDeque::with_capacity(cache_size);
    let Some(latest) = latest_nonempty_file(dir) else {
        return ring;
    };
    let Ok(file) = File::open(latest) else {
        return ring;
    };
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        let Ok(record) = serde_json::from_str::<AuditRecord>(&line) else {
            continue;
        };
        ring.push_front(record);
        if ring.len() > cache_size {
            ring.pop_back();
        }
    }
    ring
}

fn latest_nonempty_file(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut candidates: Vec<(Date, Option<u32>, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let (date, suffix) = parse_filename(&name)?;
            let len = entry.metadata().ok()?.len();
            (len > 0).then_some((date, suffix, entry.path()))
        })
        .collect();
    candidates.sort_by_key(|(date, suffix, _)| (*date, *suffix));
    candidates.pop().map(|(_, _, path)| path)
}

/// Periodically runs [`FileAuditStore::retention_sweep`]. Mirrors the other
/// background sweepers in shape: a ticker, a shutdown watch, idempotent
/// exit.
pub fn spawn_retention_sweeper(
    store: Arc<FileAuditStore>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        diagnostics.record(&DiagnosticEvent::SweeperStarted {
            sweeper: "audit_retention",
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        });
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    store.retention_sweep(OffsetDateTime::now_utc());
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        diagnostics.record(&DiagnosticEvent::SweeperStopped { sweeper: "audit_retention" });
    })
}
