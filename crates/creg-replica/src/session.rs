//! Client-side session guarantees.
//!
//! Replicas only ever check one thing: does the local clock dominate the
//! request's dependency vector? Every session guarantee is expressed by which
//! of the client's past observations it puts into that vector.
//!
//! | Semantic            | Read dependency     | Write dependency    |
//! |---------------------|---------------------|---------------------|
//! | Eventual            | zero                | zero                |
//! | Monotonic Reads     | last read           | zero                |
//! | Monotonic Writes    | zero                | last write          |
//! | Read-Your-Writes    | last write          | zero                |
//! | Writes-Follow-Reads | zero                | last read           |
//! | Causal              | last read ⊔ last write | last read ⊔ last write |

use crate::error::UnknownSemantic;
use crate::message::{ClientId, ClientRequest, OperationType, ServerReply};
use creg_core::{Value, VersionVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionSemantic {
    #[default]
    Eventual,
    MonotonicReads,
    MonotonicWrites,
    ReadYourWrites,
    WritesFollowReads,
    Causal,
}

impl SessionSemantic {
    pub const ALL: [SessionSemantic; 6] = [
        SessionSemantic::Eventual,
        SessionSemantic::MonotonicReads,
        SessionSemantic::MonotonicWrites,
        SessionSemantic::ReadYourWrites,
        SessionSemantic::WritesFollowReads,
        SessionSemantic::Causal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SessionSemantic::Eventual => "eventual",
            SessionSemantic::MonotonicReads => "monotonic-reads",
            SessionSemantic::MonotonicWrites => "monotonic-writes",
            SessionSemantic::ReadYourWrites => "read-your-writes",
            SessionSemantic::WritesFollowReads => "writes-follow-reads",
            SessionSemantic::Causal => "causal",
        }
    }

    /// Numeric codes used by the benchmark configuration files.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(SessionSemantic::Eventual),
            1 => Some(SessionSemantic::WritesFollowReads),
            2 => Some(SessionSemantic::MonotonicWrites),
            3 => Some(SessionSemantic::MonotonicReads),
            4 => Some(SessionSemantic::ReadYourWrites),
            5 => Some(SessionSemantic::Causal),
            _ => None,
        }
    }
}

impl fmt::Display for SessionSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SessionSemantic {
    type Err = UnknownSemantic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        if let Ok(code) = normalized.parse::<u64>() {
            return SessionSemantic::from_code(code).ok_or_else(|| UnknownSemantic(s.to_string()));
        }
        SessionSemantic::ALL
            .into_iter()
            .find(|semantic| semantic.name() == normalized)
            .or(match normalized.as_str() {
                "mr" => Some(SessionSemantic::MonotonicReads),
                "mw" => Some(SessionSemantic::MonotonicWrites),
                "ryw" => Some(SessionSemantic::ReadYourWrites),
                "wfr" => Some(SessionSemantic::WritesFollowReads),
                _ => None,
            })
            .ok_or_else(|| UnknownSemantic(s.to_string()))
    }
}

/// What one client has observed so far, and the requests it issues next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    client_id: ClientId,
    semantic: SessionSemantic,
    replica_count: usize,
    last_read: VersionVector,
    last_write: VersionVector,
    last_request_id: u64,
}

impl Session {
    pub fn new(client_id: ClientId, semantic: SessionSemantic, replica_count: usize) -> Self {
        Self {
            client_id,
            semantic,
            replica_count,
            last_read: VersionVector::zero(replica_count),
            last_write: VersionVector::zero(replica_count),
            last_request_id: 0,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn semantic(&self) -> SessionSemantic {
        self.semantic
    }

    pub fn last_read(&self) -> &VersionVector {
        &self.last_read
    }

    pub fn last_write(&self) -> &VersionVector {
        &self.last_write
    }

    /// Sequence number of the most recent request this session issued.
    pub fn last_request_id(&self) -> u64 {
        self.last_request_id
    }

    fn zero(&self) -> VersionVector {
        VersionVector::zero(self.replica_count)
    }

    pub fn read_dependency(&self) -> VersionVector {
        match self.semantic {
            SessionSemantic::Eventual
            | SessionSemantic::MonotonicWrites
            | SessionSemantic::WritesFollowReads => self.zero(),
            SessionSemantic::MonotonicReads => self.last_read.clone(),
            SessionSemantic::ReadYourWrites => self.last_write.clone(),
            SessionSemantic::Causal => self.last_read.merged_with(&self.last_write),
        }
    }

    pub fn write_dependency(&self) -> VersionVector {
        match self.semantic {
            SessionSemantic::Eventual
            | SessionSemantic::MonotonicReads
            | SessionSemantic::ReadYourWrites => self.zero(),
            SessionSemantic::MonotonicWrites => self.last_write.clone(),
            SessionSemantic::WritesFollowReads => self.last_read.clone(),
            SessionSemantic::Causal => self.last_read.merged_with(&self.last_write),
        }
    }

    /// Issue the next read. Each request gets a fresh sequence number.
    pub fn read_request(&mut self) -> ClientRequest {
        let request = ClientRequest::read(self.client_id, self.read_dependency());
        request.with_request_id(self.next_request_id())
    }

    pub fn write_request(&mut self, value: Value) -> ClientRequest {
        let request = ClientRequest::write(self.client_id, value, self.write_dependency());
        request.with_request_id(self.next_request_id())
    }

    fn next_request_id(&mut self) -> u64 {
        self.last_request_id += 1;
        self.last_request_id
    }

    /// Record the vector a reply carried.
    pub fn observe(&mut self, reply: &ServerReply) {
        match reply.operation_type {
            OperationType::Read => self.last_read = reply.version_vector.clone(),
            OperationType::Write => self.last_write = reply.version_vector.clone(),
        }
    }
}
