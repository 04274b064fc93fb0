//! Operation log replay.
//!
//! A dump may carry `oplog.bson` at its root: the write operations that ran
//! while the dump was taken. Replaying them after the data restore brings the
//! destination to a consistent point. An optional limit `"<secs>[:<inc>]"`
//! bounds the replay to entries strictly older than that timestamp and
//! strictly newer than the destination's own newest log entry.

use crate::client::{command_error, command_succeeded, Destination, Query};
use crate::config::RestoreOptions;
use crate::dispatch::{Dispatcher, UnitContext};
use crate::error::{RestoreError, RestoreResult};
use crate::matcher::Matcher;
use crate::namespace::{ADMIN_DB, OPLOG_FILE, OPLOG_NAMESPACE};
use crate::records::RecordReader;
use docrestore_codec::{Document, Timestamp};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A server release number.
///
/// Pre-releases sort before the release they lead up to, so `1.7.4-pre-`
/// is older than `1.7.4` but newer than `1.7.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerVersion {
    /// Major, minor and patch numbers.
    pub parts: [u32; 3],
    /// True for pre-release builds.
    pub pre_release: bool,
}

/// Oldest server that can apply replayed operations.
pub const MIN_REPLAY_VERSION: ServerVersion = ServerVersion {
    parts: [1, 7, 4],
    pre_release: true,
};

impl ServerVersion {
    /// Parses `major[.minor[.patch]][-suffix]`. Missing parts are zero.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (numbers, suffix) = match text.split_once('-') {
            Some((numbers, suffix)) => (numbers, Some(suffix)),
            None => (text, None),
        };
        let mut parts = [0u32; 3];
        let mut count = 0;
        for piece in numbers.split('.') {
            if count == parts.len() {
                return None;
            }
            parts[count] = piece.parse().ok()?;
            count += 1;
        }
        Some(Self {
            parts,
            pre_release: suffix.is_some(),
        })
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts
            .cmp(&other.parts)
            .then_with(|| other.pre_release.cmp(&self.pre_release))
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.parts;
        write!(f, "{major}.{minor}.{patch}")?;
        if self.pre_release {
            write!(f, "-pre")?;
        }
        Ok(())
    }
}

/// Parses an oplog limit `"<seconds>[:<increment>]"`.
///
/// # Errors
///
/// Returns [`RestoreError::ReplayIneligible`] if either part is not an
/// unsigned 32-bit number.
pub fn parse_oplog_limit(text: &str) -> RestoreResult<Timestamp> {
    let (secs, inc) = match text.split_once(':') {
        Some((secs, "")) => (secs, "0"),
        Some((secs, inc)) => (secs, inc),
        None => (text, "0"),
    };
    let invalid = || {
        RestoreError::replay_ineligible(format!(
            "invalid oplog limit {text:?}, expected <seconds>[:<increment>]"
        ))
    };
    let secs = secs.trim().parse::<u32>().map_err(|_| invalid())?;
    let inc = inc.trim().parse::<u32>().map_err(|_| invalid())?;
    Ok(Timestamp::new(secs, inc))
}

/// The window of log entries a bounded replay applies.
#[derive(Debug, Clone, PartialEq)]
pub struct OplogReplayLimit {
    /// Entries must be strictly older than this.
    pub bound: Timestamp,
    /// Entries must be strictly newer than this, if set.
    pub start_exclusive: Option<Timestamp>,
    matcher: Matcher,
}

impl OplogReplayLimit {
    /// Builds a window.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::ReplayIneligible`] if `start_exclusive` is not
    /// older than `bound`.
    pub fn new(bound: Timestamp, start_exclusive: Option<Timestamp>) -> RestoreResult<Self> {
        if let Some(start) = start_exclusive {
            if start >= bound {
                return Err(RestoreError::replay_ineligible(format!(
                    "the destination's newest oplog entry ({start}) is not older than the limit ({bound})"
                )));
            }
        }

        let mut window = Document::new();
        if let Some(start) = start_exclusive {
            window.insert("$gt", start);
        }
        window.insert("$lt", bound);
        let matcher = Matcher::new(&Document::new().with("ts", window))?;

        Ok(Self {
            bound,
            start_exclusive,
            matcher,
        })
    }

    /// The predicate log entries must satisfy.
    #[must_use]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayCounters {
    /// Entries applied.
    pub applied: u64,
    /// Entries outside the window.
    pub skipped: u64,
}

impl ReplayCounters {
    /// Entries applied or skipped. No-op entries are not counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.applied + self.skipped
    }
}

/// Returns the timestamp of the destination's newest log entry.
///
/// # Errors
///
/// Returns a client error if the query fails.
pub fn latest_oplog_timestamp<D: Destination + ?Sized>(
    client: &mut D,
) -> RestoreResult<Option<Timestamp>> {
    let query = Query::default().newest_first().limit(1).project(&["ts"]);
    let newest = client.query(OPLOG_NAMESPACE, &query)?;
    Ok(newest.first().and_then(|entry| entry.get_timestamp("ts")))
}

/// Returns the destination's version as reported by `buildinfo`.
///
/// # Errors
///
/// Returns [`RestoreError::CommandFailed`] if the command fails, or
/// [`RestoreError::ReplayIneligible`] if the version cannot be parsed.
pub fn server_version<D: Destination + ?Sized>(client: &mut D) -> RestoreResult<ServerVersion> {
    let reply = client.run_command(ADMIN_DB, Document::new().with("buildinfo", 1))?;
    if !command_succeeded(&reply) {
        return Err(RestoreError::CommandFailed {
            db: ADMIN_DB.to_string(),
            command: "buildinfo".to_string(),
            message: command_error(&reply),
        });
    }
    let text = reply.get_str("version").unwrap_or_default();
    ServerVersion::parse(text).ok_or_else(|| {
        RestoreError::replay_ineligible(format!("cannot parse server version {text:?}"))
    })
}

/// A replay that passed its eligibility checks.
#[derive(Debug, Clone)]
pub struct OplogReplayer {
    path: PathBuf,
    limit: Option<OplogReplayLimit>,
}

impl OplogReplayer {
    /// Checks that replay can run and computes its window.
    ///
    /// Runs before the dump is walked, so an ineligible replay aborts the run
    /// before the destination is modified.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::ReplayIneligible`] if a database override is
    /// set, the dump has no root oplog file, the destination is a router or
    /// older than [`MIN_REPLAY_VERSION`], the limit is malformed, or the
    /// destination already holds entries at or past the limit.
    pub fn prepare<D: Destination + ?Sized>(
        client: &mut D,
        root: &Path,
        options: &RestoreOptions,
    ) -> RestoreResult<Self> {
        if options.db.is_some() {
            return Err(RestoreError::replay_ineligible(
                "oplog replay cannot be combined with a database name",
            ));
        }

        let path = root.join(OPLOG_FILE);
        if !path.is_file() {
            return Err(RestoreError::replay_ineligible(format!(
                "no oplog file {} in the dump",
                path.display()
            )));
        }

        if client.is_router_process() {
            return Err(RestoreError::replay_ineligible(
                "the destination is a router and has no oplog to replay into",
            ));
        }

        let version = server_version(client)?;
        if version < MIN_REPLAY_VERSION {
            return Err(RestoreError::replay_ineligible(format!(
                "the destination runs {version}, replay needs {MIN_REPLAY_VERSION} or newer"
            )));
        }

        let limit = match &options.oplog_limit {
            Some(text) => {
                let bound = parse_oplog_limit(text)?;
                let latest = latest_oplog_timestamp(client)?;
                debug!(bound = %bound, latest = ?latest, "computing replay window");
                Some(OplogReplayLimit::new(bound, latest)?)
            }
            None => None,
        };

        Ok(Self { path, limit })
    }

    /// The log file to replay.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The replay window, if bounded.
    #[must_use]
    pub fn limit(&self) -> Option<&OplogReplayLimit> {
        self.limit.as_ref()
    }

    /// Applies the log file in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the destination fails.
    pub fn replay<D: Destination + ?Sized>(
        &self,
        dispatcher: &mut Dispatcher<'_, D>,
    ) -> RestoreResult<ReplayCounters> {
        info!(path = %self.path.display(), "replaying oplog");

        let window = self.limit.as_ref().map(|limit| limit.matcher().clone());
        let mut ctx = UnitContext::log_replay(window);
        for entry in RecordReader::open(&self.path)? {
            ctx.counters.read += 1;
            dispatcher.dispatch(&mut ctx, entry?)?;
        }

        let counters = ReplayCounters {
            applied: ctx.counters.applied,
            skipped: ctx.counters.skipped,
        };
        info!(
            applied = counters.applied,
            skipped = counters.skipped,
            total = counters.total(),
            unroutable = ctx.counters.unroutable,
            "oplog replay finished"
        );
        Ok(counters)
    }
}
