//! Event sequences for an event generator
//!
//! Everything in here is independent of the hardware:
//! the per-event inputs, the table which gets built
//! from them, the committed table and the settings.
//! The card side (sequence RAMs, interrupts) lives in
//! evgseq-mrm.
//!

pub mod constants;
pub mod errors;
pub mod events;
pub mod aggregator;
pub mod store;
pub mod scan;
pub mod sequence;
pub mod settings;
pub mod threading;

#[macro_use] extern crate log;
extern crate env_logger;

use std::io::Write;

use colored::{
  Colorize,
  ColoredString,
};
use log::Level;

pub use aggregator::{
  EventInputAggregator,
  FinalizedTable,
};
pub use errors::{
  SequenceError,
  SettingsError,
};
pub use events::{
  EventField,
  EventHandle,
  FieldValue,
  TimeUnits,
};
pub use scan::{
  ScanKind,
  ScanRequest,
};
pub use sequence::{
  RunMode,
  Sequence,
  TriggerSource,
};
pub use settings::EvgSeqSettings;
pub use store::{
  SequenceStore,
  SequenceTable,
};
pub use threading::ThreadControl;

/// Make sure that the loglevel is in color, even though not using pretty_env logger
pub fn color_log(level : &Level) -> ColoredString {
  match level {
    Level::Error    => String::from(" ERROR!").red(),
    Level::Warn     => String::from(" WARN  ").yellow(),
    Level::Info     => String::from(" Info  ").green(),
    Level::Debug    => String::from(" debug ").blue(),
    Level::Trace    => String::from(" trace ").cyan(),
  }
}

/// Set up the environmental (env) logger
/// with our format
///
/// Ensure that the lines and module paths
/// are printed in the logging output
pub fn init_env_logger() {
  env_logger::builder()
    .format(|buf, record| {
    writeln!( buf, "[{level}][{module_path}:{line}] {args}",
      level = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line = record.line().unwrap_or(0),
      args = record.args()
      )
    }).init();
}
