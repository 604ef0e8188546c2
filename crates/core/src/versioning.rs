//! Versioning / optimistic concurrency decisions (pure, no IO).
//!
//! A [`Versioning`] strategy is built once per append call and answers two
//! questions against the stream's current [`StreamState`]:
//!
//! - is this append legal? ([`Versioning::check`])
//! - which versions do the new events get? ([`Versioning::versions`])
//!
//! The storage backend must run the check and record [`Versioning::next_state`]
//! atomically with the insert, so two appenders never both observe the same
//! current version.

use crate::error::{CoreError, CoreResult};

/// Optimistic concurrency expectation supplied by the caller.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No precondition; events are appended after whatever is there.
    #[default]
    Any,
    /// The stream is versionless; events carry no version.
    NoVersioning,
    /// Require the stream to be at exactly this version (`0` = stream must not exist).
    Exact(u64),
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        ExpectedVersion::Exact(value)
    }
}

/// What the storage backend knows about a stream before an append.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum StreamState {
    /// Stream has never been written (or was deleted).
    #[default]
    New,
    /// Stream written with versions; holds the last assigned version.
    Versioned(u64),
    /// Stream written with `NoVersioning`.
    Versionless,
}

impl StreamState {
    /// Current version (0 for new and versionless streams).
    pub fn version(self) -> u64 {
        match self {
            StreamState::Versioned(v) => v,
            StreamState::New | StreamState::Versionless => 0,
        }
    }
}

/// Versioning strategy for a single append call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Versioning {
    expected: ExpectedVersion,
    event_count: u64,
}

impl Versioning {
    /// Build the strategy for appending `event_count` events.
    pub fn build(expected: ExpectedVersion, event_count: usize) -> CoreResult<Self> {
        if event_count == 0 {
            return Err(CoreError::NoEventsToAppend);
        }
        Ok(Self {
            expected,
            event_count: event_count as u64,
        })
    }

    pub fn expected(&self) -> ExpectedVersion {
        self.expected
    }

    pub fn event_count(&self) -> usize {
        self.event_count as usize
    }

    /// Validate the append against the stream's current state.
    pub fn check(&self, state: StreamState) -> CoreResult<()> {
        match (self.expected, state) {
            (ExpectedVersion::NoVersioning, StreamState::Versioned(_)) => {
                Err(CoreError::NoExpectedVersionGivenOnVersionedStream)
            }
            (ExpectedVersion::NoVersioning, _) => Ok(()),
            (_, StreamState::Versionless) => Err(CoreError::ExpectedVersionUsedOnVersionlessStream),
            (ExpectedVersion::Any, _) => Ok(()),
            (ExpectedVersion::Exact(expected), state) => {
                let actual = state.version();
                if actual == expected {
                    Ok(())
                } else {
                    Err(CoreError::conflict(actual, expected))
                }
            }
        }
    }

    /// Versions to assign, one per event, in order.
    pub fn versions(&self, state: StreamState) -> CoreResult<Vec<Option<u64>>> {
        self.check(state)?;
        let versions = match self.expected {
            ExpectedVersion::NoVersioning => vec![None; self.event_count()],
            ExpectedVersion::Any | ExpectedVersion::Exact(_) => {
                let current = state.version();
                (current + 1..=current + self.event_count).map(Some).collect()
            }
        };
        Ok(versions)
    }

    /// Stream state after a successful append.
    pub fn next_state(&self, state: StreamState) -> CoreResult<StreamState> {
        self.check(state)?;
        Ok(match self.expected {
            ExpectedVersion::NoVersioning => StreamState::Versionless,
            ExpectedVersion::Any | ExpectedVersion::Exact(_) => {
                StreamState::Versioned(state.version() + self.event_count)
            }
        })
    }
}
