use std::fmt::{Display, Formatter};

use crate::fetcher::PageKind;

/// Fetching a portal page failed (network, timeout or non-success status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub page: PageKind,
    pub message: String,
}

impl TransportError {
    pub fn new(page: PageKind, message: impl Into<String>) -> Self {
        Self {
            page,
            message: message.into(),
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to fetch {}: {}", self.page, self.message)
    }
}

impl std::error::Error for TransportError {}

/// The fetched markup did not match any known layout.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    MissingTable,
    MalformedRow { row: usize, reason: String },
    DuplicateThread(u64),
    Unparseable(String),
    EmptyData,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTable => f.write_str("homework thread table not found"),
            Self::MalformedRow { row, reason } => write!(f, "homework row {row} is malformed: {reason}"),
            Self::DuplicateThread(id) => write!(f, "thread {id} is listed more than once"),
            Self::Unparseable(reason) => write!(f, "marks data is unparseable: {reason}"),
            Self::EmptyData => f.write_str("marks data contains no disciplines"),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchReason {
    LengthDiffers { old: usize, new: usize },
    ThreadIdDiffers { old: u64, new: u64 },
    SubjectDiffers { old: String, new: String },
    AliasDiffers { old: String, new: String },
}

/// Two snapshots cannot be compared position by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralMismatch {
    pub position: usize,
    pub reason: MismatchReason,
}

impl StructuralMismatch {
    pub fn is_length_mismatch(&self) -> bool {
        matches!(self.reason, MismatchReason::LengthDiffers { .. })
    }
}

impl Display for StructuralMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            MismatchReason::LengthDiffers { old, new } => {
                write!(f, "snapshot length changed from {old} to {new}")
            }
            MismatchReason::ThreadIdDiffers { old, new } => {
                write!(f, "thread at position {} changed from {old} to {new}", self.position)
            }
            MismatchReason::SubjectDiffers { old, new } => {
                write!(f, "subject at position {} changed from {old:?} to {new:?}", self.position)
            }
            MismatchReason::AliasDiffers { old, new } => {
                write!(f, "task at position {} changed from {old:?} to {new:?}", self.position)
            }
        }
    }
}

impl std::error::Error for StructuralMismatch {}

/// Failure of a single user check. Structural mismatches are not errors here:
/// the orchestrators recover from them and report a `CheckOutcome`.
#[derive(Debug)]
pub enum CheckError {
    Transport(TransportError),
    Parse(ParseError),
    Store(anyhow::Error),
}

impl CheckError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::Store(_) => "store",
        }
    }
}

impl Display for CheckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::Parse(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "snapshot store failed: {err:#}"),
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Store(err) => Some(&**err),
        }
    }
}

impl From<TransportError> for CheckError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<ParseError> for CheckError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}
