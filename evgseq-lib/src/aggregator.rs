//! Collect per-event attribute updates and build
//! the (code, timestamp) table for a sequence
//!
//! Updates arrive asynchronously and in arbitrary order.
//! Nothing is checked for consistency until the table is
//! finalized, which happens only on request.

use std::collections::HashMap;
use std::sync::{
  Mutex,
  MutexGuard,
};

use crate::constants::MAX_SEQUENCE_EVENTS;
use crate::errors::SequenceError;
use crate::events::{
  EventField,
  EventHandle,
  Exclusion,
  FieldValue,
  SequenceEvent,
  TimeUnits,
};

/// Two parallel arrays, sorted by time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizedTable {
  pub codes      : Vec<u8>,
  pub timestamps : Vec<u32>,
  /// input revision the table was built from
  pub revision   : u64,
}

impl FinalizedTable {
  pub fn len(&self) -> usize {
    self.codes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.codes.is_empty()
  }
}

#[derive(Debug, Default)]
struct Inputs {
  events   : Vec<SequenceEvent>,
  names    : HashMap<String, usize>,
  /// bumped with every accepted update
  revision : u64,
}

#[derive(Debug)]
pub struct EventInputAggregator {
  sequence : u32,
  capacity : usize,
  inputs   : Mutex<Inputs>,
}

impl EventInputAggregator {
  pub fn new(sequence : u32) -> Self {
    Self::with_capacity(sequence, MAX_SEQUENCE_EVENTS)
  }

  pub fn with_capacity(sequence : u32, capacity : usize) -> Self {
    Self {
      sequence : sequence,
      capacity : capacity,
      inputs   : Mutex::new(Inputs::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inputs> {
    match self.inputs.lock() {
      Ok(inputs) => inputs,
      Err(err)   => {
        warn!("Event inputs of sequence {} were poisoned, recovering!", self.sequence);
        err.into_inner()
      }
    }
  }

  /// Declare an event by name. Declaring the same
  /// name again returns the same handle.
  pub fn declare_event(&self, name : &str) -> Result<EventHandle, SequenceError> {
    let mut inputs = self.lock();
    if let Some(index) = inputs.names.get(name) {
      return Ok(EventHandle {sequence : self.sequence, index : *index});
    }
    if inputs.events.len() >= self.capacity {
      error!("Sequence {} is full, can not declare event '{}'", self.sequence, name);
      return Err(SequenceError::CapacityExceeded);
    }
    let index = inputs.events.len();
    inputs.events.push(SequenceEvent::new(name, self.sequence, index));
    inputs.names.insert(String::from(name), index);
    inputs.revision += 1;
    debug!("Declared event '{}' as #{} in sequence {}", name, index, self.sequence);
    Ok(EventHandle {sequence : self.sequence, index : index})
  }

  /// Look up an already declared event
  pub fn event(&self, name : &str) -> Option<EventHandle> {
    let inputs = self.lock();
    inputs.names.get(name).map(|index| EventHandle {sequence : self.sequence, index : *index})
  }

  fn check_handle(&self, inputs : &Inputs, handle : &EventHandle) -> Result<(), SequenceError> {
    if handle.sequence != self.sequence || handle.index >= inputs.events.len() {
      return Err(SequenceError::InvalidHandle);
    }
    Ok(())
  }

  /// Store a new attribute value. Nothing goes to
  /// the hardware until the table is committed.
  pub fn set_field(&self, handle : &EventHandle, value : FieldValue) -> Result<(), SequenceError> {
    let mut inputs = self.lock();
    self.check_handle(&inputs, handle)?;
    trace!("Sequence {} event #{} <- {:?}", self.sequence, handle.index, value);
    inputs.events[handle.index].apply(value);
    inputs.revision += 1;
    Ok(())
  }

  pub fn get_field(&self, handle : &EventHandle, field : EventField)
    -> Result<Option<FieldValue>, SequenceError> {
    let inputs = self.lock();
    self.check_handle(&inputs, handle)?;
    Ok(inputs.events[handle.index].get(field))
  }

  /// Number of declared events (enabled or not)
  pub fn len(&self) -> usize {
    self.lock().events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn revision(&self) -> u64 {
    self.lock().revision
  }

  /// Build the table over all enabled events, sorted by
  /// (timestamp, priority, declaration order).
  ///
  /// Events which can not be played are left out. An
  /// empty table is a valid result.
  pub fn finalize(&self, units : TimeUnits, ticks_per_second : f64) -> FinalizedTable {
    let inputs = self.lock();
    let mut scheduled = Vec::<(u32, i32, u8)>::with_capacity(inputs.events.len());
    for ev in inputs.events.iter() {
      match ev.schedule(units, ticks_per_second) {
        Ok((code, ticks)) => scheduled.push((ticks, ev.priority(), code)),
        Err(excl) => {
          match excl {
            Exclusion::Disabled => {
              trace!("Sequence {} event '{}' is disabled", self.sequence, ev.name());
            },
            _ => {
              warn!("Sequence {} event '{}' is left out of the table! {:?}", self.sequence, ev.name(), excl);
            }
          }
        }
      }
    }
    // events are in declaration order, and the sort is stable
    scheduled.sort_by_key(|(ticks, prio, _)| (*ticks, *prio));
    let mut table = FinalizedTable {
      codes      : Vec::<u8>::with_capacity(scheduled.len()),
      timestamps : Vec::<u32>::with_capacity(scheduled.len()),
      revision   : inputs.revision,
    };
    for (ticks, _, code) in scheduled {
      table.codes.push(code);
      table.timestamps.push(ticks);
    }
    debug!("Finalized sequence {} with {} of {} events", self.sequence, table.len(), inputs.events.len());
    table
  }

  /// Listing of the declared events
  ///
  /// # Arguments
  ///
  /// * level : 0 - nothing, 1 - summary, >=2 - every event
  pub fn report(&self, level : u8) -> String {
    let inputs = self.lock();
    let mut repr = String::new();
    if level < 1 {
      return repr;
    }
    repr += &(format!("  Seq {} : {} declared events (rev {})\n", self.sequence, inputs.events.len(), inputs.revision));
    if level < 2 {
      return repr;
    }
    repr += "    Event  Enable   Time Stamp          Priority  Name\n";
    for ev in inputs.events.iter() {
      repr += &(format!("  {}\n", ev));
    }
    repr
  }
}
