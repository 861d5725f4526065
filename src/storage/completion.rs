//! Piece completion state
//!
//! Tracks per-piece verification state. State only changes through explicit
//! mark calls; reads and writes never touch it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StorageError};

/// Verification state reported by a piece handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Piece is present and verified (meaningful only when `ok`)
    pub complete: bool,
    /// Whether the state is known at all
    pub ok: bool,
}

impl Completion {
    pub const UNKNOWN: Completion = Completion {
        complete: false,
        ok: false,
    };
    pub const INCOMPLETE: Completion = Completion {
        complete: false,
        ok: true,
    };
    pub const COMPLETE: Completion = Completion {
        complete: true,
        ok: true,
    };

    /// Verified present
    pub fn is_complete(&self) -> bool {
        self.ok && self.complete
    }
}

/// Status of a piece in the completion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PieceState {
    /// Nothing is known about the piece
    #[default]
    Unknown,
    /// Verified absent or invalidated
    Incomplete,
    /// Verified present
    CompleteVerified,
}

impl PieceState {
    pub fn completion(self) -> Completion {
        match self {
            PieceState::Unknown => Completion::UNKNOWN,
            PieceState::Incomplete => Completion::INCOMPLETE,
            PieceState::CompleteVerified => Completion::COMPLETE,
        }
    }
}

impl From<Completion> for PieceState {
    fn from(completion: Completion) -> Self {
        match (completion.ok, completion.complete) {
            (false, _) => PieceState::Unknown,
            (true, false) => PieceState::Incomplete,
            (true, true) => PieceState::CompleteVerified,
        }
    }
}

/// Completion state of every piece in a torrent
#[derive(Debug)]
pub struct CompletionTable {
    states: Mutex<Vec<PieceState>>,
}

impl CompletionTable {
    /// Create a table with every piece Unknown
    pub fn new(piece_count: usize) -> Self {
        Self {
            states: Mutex::new(vec![PieceState::Unknown; piece_count]),
        }
    }

    /// Create a table from previously recorded states
    pub fn from_states(states: Vec<PieceState>) -> Self {
        Self {
            states: Mutex::new(states),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.states.lock().len()
    }

    /// Get the state of a piece
    pub fn get(&self, index: usize) -> Option<PieceState> {
        self.states.lock().get(index).copied()
    }

    /// Record that the engine verified the piece
    pub fn mark_complete(&self, index: usize) -> Result<PieceState> {
        self.set(index, PieceState::CompleteVerified)
    }

    /// Revert the piece to incomplete
    pub fn mark_not_complete(&self, index: usize) -> Result<PieceState> {
        self.set(index, PieceState::Incomplete)
    }

    /// Set a piece's state, returning the previous one
    pub fn set(&self, index: usize, next: PieceState) -> Result<PieceState> {
        let mut states = self.states.lock();
        let count = states.len();
        let slot = states.get_mut(index).ok_or_else(|| {
            StorageError::precondition(format!("piece {} out of range ({} pieces)", index, count))
        })?;
        let previous = std::mem::replace(slot, next);
        if previous != next {
            debug!("Piece {} completion: {:?} -> {:?}", index, previous, next);
        }
        Ok(previous)
    }

    /// Copy of every state, in piece order
    pub fn snapshot(&self) -> Vec<PieceState> {
        self.states.lock().clone()
    }

    /// Get the number of verified pieces
    pub fn completed_count(&self) -> usize {
        self.states
            .lock()
            .iter()
            .filter(|s| **s == PieceState::CompleteVerified)
            .count()
    }

    /// Check if all pieces are verified
    pub fn is_complete(&self) -> bool {
        self.states
            .lock()
            .iter()
            .all(|s| *s == PieceState::CompleteVerified)
    }

    /// Get the bitfield representation of verified pieces
    pub fn bitfield(&self) -> Vec<u8> {
        let states = self.states.lock();
        let mut bitfield = vec![0u8; states.len().div_ceil(8)];
        for (i, state) in states.iter().enumerate() {
            if *state == PieceState::CompleteVerified {
                bitfield[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bitfield
    }
}
