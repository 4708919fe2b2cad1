//! Named sequence events and their individually
//! updated attributes
//!
//! Each attribute (code, time, enable, priority) of an event
//! is written by a different input in the control system,
//! in no particular order. The event only collects the values,
//! the table gets built by the aggregator.

use std::fmt;

use crate::constants::{
  END_OF_SEQUENCE,
  MAX_EVENT_TIMESTAMP,
};

/// Reference to one declared event of one sequence
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EventHandle {
  pub(crate) sequence : u32,
  pub(crate) index    : usize,
}

impl EventHandle {
  /// The id of the sequence the event belongs to
  pub fn sequence(&self) -> u32 {
    self.sequence
  }

  /// Position in declaration order
  pub fn index(&self) -> usize {
    self.index
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventField {
  Code,
  Time,
  Enable,
  Priority,
}

/// A typed update for a single event attribute
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FieldValue {
  Code(u8),
  /// in the units of the owning sequence
  Time(f64),
  Enable(bool),
  Priority(i32),
}

impl FieldValue {
  pub fn field(&self) -> EventField {
    match self {
      FieldValue::Code(_)     => EventField::Code,
      FieldValue::Time(_)     => EventField::Time,
      FieldValue::Enable(_)   => EventField::Enable,
      FieldValue::Priority(_) => EventField::Priority,
    }
  }
}

/// Units the requested event times are given in
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum TimeUnits {
  /// Event clock ticks
  Ticks,
  /// Seconds since the start of the sequence
  Seconds,
}

impl Default for TimeUnits {
  fn default() -> Self {
    TimeUnits::Ticks
  }
}

impl fmt::Display for TimeUnits {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      TimeUnits::Ticks   => write!(f, "ticks"),
      TimeUnits::Seconds => write!(f, "s"),
    }
  }
}

/// Why an event did not make it into a finalized table
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exclusion {
  Disabled,
  NoCode,
  NoTime,
  ReservedCode,
  IllegalTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceEvent {
  name     : String,
  /// id of the owning sequence
  sequence : u32,
  /// declaration order
  index    : usize,
  code     : Option<u8>,
  time     : Option<f64>,
  enable   : bool,
  priority : i32,
}

impl SequenceEvent {
  pub fn new(name : &str, sequence : u32, index : usize) -> Self {
    Self {
      name     : String::from(name),
      sequence : sequence,
      index    : index,
      code     : None,
      time     : None,
      enable   : true,
      priority : 0,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn sequence(&self) -> u32 {
    self.sequence
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn code(&self) -> Option<u8> {
    self.code
  }

  pub fn time(&self) -> Option<f64> {
    self.time
  }

  pub fn enabled(&self) -> bool {
    self.enable
  }

  pub fn priority(&self) -> i32 {
    self.priority
  }

  pub fn apply(&mut self, value : FieldValue) {
    match value {
      FieldValue::Code(code)      => self.code     = Some(code),
      FieldValue::Time(time)      => self.time     = Some(time),
      FieldValue::Enable(enable)  => self.enable   = enable,
      FieldValue::Priority(prio)  => self.priority = prio,
    }
  }

  pub fn get(&self, field : EventField) -> Option<FieldValue> {
    match field {
      EventField::Code     => self.code.map(FieldValue::Code),
      EventField::Time     => self.time.map(FieldValue::Time),
      EventField::Enable   => Some(FieldValue::Enable(self.enable)),
      EventField::Priority => Some(FieldValue::Priority(self.priority)),
    }
  }

  /// The requested time in event clock ticks, rounded
  /// to the nearest tick.
  ///
  /// Returns None if the time is negative, not a number
  /// or later than the hardware can play.
  pub fn ticks(&self, units : TimeUnits, ticks_per_second : f64) -> Option<u32> {
    let time = self.time?;
    let raw = match units {
      TimeUnits::Ticks   => time,
      TimeUnits::Seconds => time*ticks_per_second,
    };
    let rounded = (raw + 0.5).floor();
    if !rounded.is_finite() || rounded < 0.0 || rounded > MAX_EVENT_TIMESTAMP as f64 {
      return None;
    }
    Some(rounded as u32)
  }

  /// Check that the event can be played, and at which tick
  pub fn schedule(&self, units : TimeUnits, ticks_per_second : f64)
    -> Result<(u8, u32), Exclusion> {
    if !self.enable {
      return Err(Exclusion::Disabled);
    }
    let code = match self.code {
      None       => return Err(Exclusion::NoCode),
      Some(code) => code,
    };
    if code == END_OF_SEQUENCE {
      return Err(Exclusion::ReservedCode);
    }
    if self.time.is_none() {
      return Err(Exclusion::NoTime);
    }
    match self.ticks(units, ticks_per_second) {
      None        => Err(Exclusion::IllegalTime),
      Some(ticks) => Ok((code, ticks)),
    }
  }
}

impl fmt::Display for SequenceEvent {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let code = match self.code {
      None       => String::from("  -"),
      Some(code) => format!("{:3}", code),
    };
    let time = match self.time {
      None       => String::from("-"),
      Some(time) => format!("{}", time),
    };
    write!(f, "  {}   {}   {:>18}  {:8}  {}",
           code,
           if self.enable {"Ena"} else {"Dis"},
           time,
           self.priority,
           self.name)
  }
}

#[cfg(test)]
mod test_events {
  use super::*;

  #[test]
  fn ticks_round_half_up() {
    let mut ev = SequenceEvent::new("A", 0, 0);
    ev.apply(FieldValue::Time(2.5));
    assert_eq!(ev.ticks(TimeUnits::Ticks, 1.0), Some(3));
    ev.apply(FieldValue::Time(2.49));
    assert_eq!(ev.ticks(TimeUnits::Ticks, 1.0), Some(2));
  }

  #[test]
  fn seconds_are_scaled_by_the_event_clock() {
    let mut ev = SequenceEvent::new("A", 0, 0);
    ev.apply(FieldValue::Time(1e-6));
    assert_eq!(ev.ticks(TimeUnits::Seconds, 125e6), Some(125));
  }

  #[test]
  fn illegal_times() {
    let mut ev = SequenceEvent::new("A", 0, 0);
    ev.apply(FieldValue::Code(3));
    assert_eq!(ev.schedule(TimeUnits::Ticks, 1.0), Err(Exclusion::NoTime));
    ev.apply(FieldValue::Time(-1.0));
    assert_eq!(ev.schedule(TimeUnits::Ticks, 1.0), Err(Exclusion::IllegalTime));
    ev.apply(FieldValue::Time(f64::NAN));
    assert_eq!(ev.schedule(TimeUnits::Ticks, 1.0), Err(Exclusion::IllegalTime));
    ev.apply(FieldValue::Time(5e9));
    assert_eq!(ev.schedule(TimeUnits::Ticks, 1.0), Err(Exclusion::IllegalTime));
    ev.apply(FieldValue::Time(7.0));
    assert_eq!(ev.schedule(TimeUnits::Ticks, 1.0), Ok((3, 7)));
  }

  #[test]
  fn end_marker_is_not_schedulable() {
    let mut ev = SequenceEvent::new("A", 0, 0);
    ev.apply(FieldValue::Code(END_OF_SEQUENCE));
    ev.apply(FieldValue::Time(1.0));
    assert_eq!(ev.schedule(TimeUnits::Ticks, 1.0), Err(Exclusion::ReservedCode));
  }

  #[test]
  fn defaults() {
    let ev = SequenceEvent::new("A", 4, 1);
    assert!(ev.enabled());
    assert_eq!(ev.priority(), 0);
    assert_eq!(ev.get(EventField::Code), None);
    assert_eq!(ev.get(EventField::Enable), Some(FieldValue::Enable(true)));
    assert_eq!(ev.sequence(), 4);
  }
}
