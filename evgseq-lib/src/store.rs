//! The committed (code, timestamp) table of a sequence
//!
//! The store is the only place where the table which goes
//! to the hardware lives. Updates are all-or-nothing: a
//! table which fails validation is rejected and the last
//! good one stays in place.
//!
//! The store mutex is the sequence lock. It serializes
//! commits, snapshots and the loading of the table into
//! a sequence RAM.

use std::fmt;
use std::sync::{
  Mutex,
  MutexGuard,
  TryLockError,
};

use crate::constants::{
  END_OF_SEQUENCE,
  MAX_EVENT_TIMESTAMP,
  MAX_SEQUENCE_EVENTS,
};
use crate::errors::SequenceError;

/// A committed table, terminated by the end-of-sequence
/// marker
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceTable {
  pub codes      : Vec<u8>,
  pub timestamps : Vec<u32>,
  /// counts successful commits, 0 is the initial table
  pub generation : u64,
}

impl SequenceTable {
  /// "Nothing scheduled" - just the marker at tick 0
  pub fn quiescent() -> Self {
    Self {
      codes      : vec![END_OF_SEQUENCE],
      timestamps : vec![0],
      generation : 0,
    }
  }

  /// Number of entries including the marker
  pub fn len(&self) -> usize {
    self.codes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.codes.is_empty()
  }

  /// Number of scheduled events (without the marker)
  pub fn n_events(&self) -> usize {
    self.codes.len().saturating_sub(1)
  }
}

impl Default for SequenceTable {
  fn default() -> Self {
    Self::quiescent()
  }
}

impl fmt::Display for SequenceTable {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<SequenceTable (gen {}) :", self.generation);
    for (code, ts) in self.codes.iter().zip(self.timestamps.iter()) {
      repr += &(format!("\n  {:>10} -> {:3}", ts, code));
    }
    write!(f, "{}>", repr)
  }
}

/// Check a table before it gets committed
///
/// Timestamps have to be non-decreasing. The marker
/// is added later, so it must not be part of the input.
pub fn validate_table(codes : &[u8], timestamps : &[u32]) -> Result<(), SequenceError> {
  if codes.len() != timestamps.len() {
    return Err(SequenceError::SizeMismatch {codes : codes.len(), timestamps : timestamps.len()});
  }
  if codes.len() + 1 > MAX_SEQUENCE_EVENTS {
    return Err(SequenceError::TooLarge(codes.len() + 1));
  }
  if let Some(idx) = codes.iter().position(|c| *c == END_OF_SEQUENCE) {
    return Err(SequenceError::ReservedCode(idx));
  }
  if let Some(idx) = timestamps.iter().position(|ts| *ts > MAX_EVENT_TIMESTAMP) {
    return Err(SequenceError::TimestampOutOfRange(idx));
  }
  for k in 1..timestamps.len() {
    if timestamps[k] < timestamps[k-1] {
      return Err(SequenceError::NotMonotonic(k));
    }
  }
  Ok(())
}

#[derive(Debug)]
pub struct SequenceStore {
  sequence : u32,
  table    : Mutex<SequenceTable>,
}

impl SequenceStore {
  pub fn new(sequence : u32) -> Self {
    Self {
      sequence : sequence,
      table    : Mutex::new(SequenceTable::quiescent()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, SequenceTable> {
    match self.table.lock() {
      Ok(table) => table,
      Err(err)  => {
        warn!("Table of sequence {} was poisoned, recovering!", self.sequence);
        err.into_inner()
      }
    }
  }

  /// Validate and replace the committed table
  ///
  /// Returns the generation of the new table
  pub fn commit(&self, codes : &[u8], timestamps : &[u32]) -> Result<u64, SequenceError> {
    match validate_table(codes, timestamps) {
      Err(err) => {
        warn!("Rejecting table for sequence {}! {}", self.sequence, err);
        return Err(err);
      }
      Ok(_) => ()
    }
    let mut new_codes = Vec::<u8>::with_capacity(codes.len() + 1);
    new_codes.extend_from_slice(codes);
    new_codes.push(END_OF_SEQUENCE);
    let mut new_times = Vec::<u32>::with_capacity(timestamps.len() + 1);
    new_times.extend_from_slice(timestamps);
    let end_time = match timestamps.last() {
      None     => 0,
      Some(ts) => ts + 1,
    };
    new_times.push(end_time);
    // build everything first, the lock is only
    // held for the swap
    let mut table = self.lock();
    table.codes      = new_codes;
    table.timestamps = new_times;
    table.generation += 1;
    debug!("Committed sequence {} gen {} with {} events", self.sequence, table.generation, table.n_events());
    Ok(table.generation)
  }

  /// A copy of the committed table
  pub fn snapshot(&self) -> SequenceTable {
    self.lock().clone()
  }

  /// Like snapshot, but gives up instead of waiting
  /// if somebody else holds the sequence lock
  pub fn try_snapshot(&self) -> Option<SequenceTable> {
    self.try_with_table(|table| table.clone())
  }

  /// Run `f` with the sequence lock held
  pub fn with_table<R, F>(&self, f : F) -> R
    where F : FnOnce(&SequenceTable) -> R {
    let table = self.lock();
    f(&table)
  }

  /// Run `f` with the sequence lock held, if the lock
  /// is free right now
  pub fn try_with_table<R, F>(&self, f : F) -> Option<R>
    where F : FnOnce(&SequenceTable) -> R {
    match self.table.try_lock() {
      Ok(table) => Some(f(&table)),
      Err(TryLockError::WouldBlock) => {
        trace!("Table of sequence {} is busy", self.sequence);
        None
      },
      Err(TryLockError::Poisoned(err)) => {
        warn!("Table of sequence {} was poisoned, recovering!", self.sequence);
        let table = err.into_inner();
        Some(f(&table))
      }
    }
  }

  pub fn generation(&self) -> u64 {
    self.lock().generation
  }
}
