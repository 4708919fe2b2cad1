//! Errors for sequence construction and settings
//!
//! Validation errors never touch the last good table,
//! they are just reported back to the caller.

use std::error::Error;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SequenceError {
  /// All event slots of the sequence are declared
  CapacityExceeded,
  /// The handle does not belong to this sequence
  InvalidHandle,
  /// Code and timestamp arrays differ in length
  SizeMismatch { codes : usize, timestamps : usize },
  /// The table will not fit into a sequence RAM
  TooLarge(usize),
  /// Timestamp at index decreases w.r.t. its predecessor
  NotMonotonic(usize),
  /// The end-of-sequence code is used at index
  ReservedCode(usize),
  /// Timestamp at index is beyond what the hardware can play
  TimestampOutOfRange(usize),
  /// There is no sequence with this id
  UnknownSequence(u32),
}

impl fmt::Display for SequenceError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype : String;
    match self {
      SequenceError::CapacityExceeded => {
        etype = String::from("CapacityExceeded");
      },
      SequenceError::InvalidHandle => {
        etype = String::from("InvalidHandle");
      },
      SequenceError::SizeMismatch { codes, timestamps } => {
        etype = format!("SizeMismatch ({codes} codes, {timestamps} timestamps)");
      },
      SequenceError::TooLarge(size) => {
        etype = format!("TooLarge ({size} entries)");
      },
      SequenceError::NotMonotonic(idx) => {
        etype = format!("NotMonotonic (at index {idx})");
      },
      SequenceError::ReservedCode(idx) => {
        etype = format!("ReservedCode (at index {idx})");
      },
      SequenceError::TimestampOutOfRange(idx) => {
        etype = format!("TimestampOutOfRange (at index {idx})");
      },
      SequenceError::UnknownSequence(id) => {
        etype = format!("UnknownSequence ({id})");
      }
    }
    write!(f, "<SequenceError: {}>", etype)
  }
}

impl Error for SequenceError {
}

#[derive(Debug)]
pub enum SettingsError {
  Io(std::io::Error),
  TomlDecoding(toml::de::Error),
  TomlEncoding(toml::ser::Error),
}

impl fmt::Display for SettingsError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      SettingsError::Io(err)           => write!(f, "<SettingsError: Io {}>", err),
      SettingsError::TomlDecoding(err) => write!(f, "<SettingsError: TomlDecoding {}>", err),
      SettingsError::TomlEncoding(err) => write!(f, "<SettingsError: TomlEncoding {}>", err),
    }
  }
}

impl Error for SettingsError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      SettingsError::Io(err)           => Some(err),
      SettingsError::TomlDecoding(err) => Some(err),
      SettingsError::TomlEncoding(err) => Some(err),
    }
  }
}

impl From<std::io::Error> for SettingsError {
  fn from(err : std::io::Error) -> Self {
    SettingsError::Io(err)
  }
}

impl From<toml::de::Error> for SettingsError {
  fn from(err : toml::de::Error) -> Self {
    SettingsError::TomlDecoding(err)
  }
}

impl From<toml::ser::Error> for SettingsError {
  fn from(err : toml::ser::Error) -> Self {
    SettingsError::TomlEncoding(err)
  }
}
