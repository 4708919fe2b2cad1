//! A logical event sequence
//!
//! A sequence combines the per-event inputs, the committed
//! table and the settings (trigger source, run mode) which
//! go to the sequence RAM together with the table.
//! A sequence does not reference any hardware by itself,
//! it only becomes active when the card binds it to one
//! of its sequence RAMs.
//!
//! Locks (outer to inner): bank pool (card side) ->
//! sequence state -> sequence store.

use std::fmt;
use std::sync::{
  Mutex,
  MutexGuard,
};
use std::sync::atomic::{
  AtomicU32,
  AtomicU64,
  AtomicUsize,
  Ordering,
};

use chrono::{
  DateTime,
  Utc,
};
use crossbeam_channel::Sender;

use crate::aggregator::EventInputAggregator;
use crate::errors::SequenceError;
use crate::events::TimeUnits;
use crate::scan::{
  request_scan,
  ScanKind,
  ScanRequest,
};
use crate::store::{
  SequenceStore,
  SequenceTable,
};

/// What happens after the sequence RAM reached the
/// end of the table
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum RunMode {
  /// play once, then disable
  Single,
  /// start over right away, without a new trigger
  Automatic,
  /// wait for the next trigger and play again
  Normal,
}

impl Default for RunMode {
  fn default() -> Self {
    RunMode::Single
  }
}

impl fmt::Display for RunMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      RunMode::Single    => "Single",
      RunMode::Automatic => "Automatic",
      RunMode::Normal    => "Normal",
    };
    write!(f, "{}", repr)
  }
}

/// The signal which starts the playback
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum TriggerSource {
  /// one of the 8 multiplexed counters
  Mxc(u8),
  /// the AC line synchronized input
  AcInput,
  /// the software trigger of the bound sequence RAM
  Software,
  /// never trigger
  Disabled,
}

impl Default for TriggerSource {
  fn default() -> Self {
    TriggerSource::Software
  }
}

impl fmt::Display for TriggerSource {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      TriggerSource::Mxc(n)   => write!(f, "Mxc{}", n),
      TriggerSource::AcInput  => write!(f, "AC"),
      TriggerSource::Software => write!(f, "Software"),
      TriggerSource::Disabled => write!(f, "Disabled"),
    }
  }
}

/// Snapshot of the sequence-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceConfig {
  pub description    : String,
  pub trigger_source : TriggerSource,
  pub run_mode       : RunMode,
  pub time_units     : TimeUnits,
  /// the user wants the sequence to be played
  pub enabled        : bool,
}

impl Default for SequenceConfig {
  fn default() -> Self {
    Self {
      description    : String::new(),
      trigger_source : TriggerSource::default(),
      run_mode       : RunMode::default(),
      time_units     : TimeUnits::default(),
      enabled        : false,
    }
  }
}

#[derive(Debug, Default)]
struct SequenceState {
  config            : SequenceConfig,
  /// trigger source and run mode as of the last commit
  committed_trigger : TriggerSource,
  committed_mode    : RunMode,
  /// settings changed since the last commit
  settings_changed  : bool,
  last_error        : Option<(DateTime<Utc>, String)>,
}

/// Value of the bank back-reference when not bound
const NO_BANK : usize = usize::MAX;

#[derive(Debug)]
pub struct Sequence {
  id                 : u32,
  card               : u32,
  aggregator         : EventInputAggregator,
  store              : SequenceStore,
  state              : Mutex<SequenceState>,
  /// input revision the committed table was built from
  committed_revision : AtomicU64,
  /// non-owning, maintained by the bank pool
  bank               : AtomicUsize,
  num_starts         : AtomicU32,
  num_ends           : AtomicU32,
  scan               : Option<Sender<ScanRequest>>,
}

impl Sequence {
  pub fn new(card : u32, id : u32) -> Self {
    Self {
      id                 : id,
      card               : card,
      aggregator         : EventInputAggregator::new(id),
      store              : SequenceStore::new(id),
      state              : Mutex::new(SequenceState::default()),
      committed_revision : AtomicU64::new(0),
      bank               : AtomicUsize::new(NO_BANK),
      num_starts         : AtomicU32::new(0),
      num_ends           : AtomicU32::new(0),
      scan               : None,
    }
  }

  /// Send scan requests for this sequence to `ch`
  pub fn with_scan(mut self, ch : Sender<ScanRequest>) -> Self {
    self.scan = Some(ch);
    self
  }

  fn lock(&self) -> MutexGuard<'_, SequenceState> {
    match self.state.lock() {
      Ok(state) => state,
      Err(err)  => {
        warn!("State of sequence {} was poisoned, recovering!", self.id);
        err.into_inner()
      }
    }
  }

  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn card(&self) -> u32 {
    self.card
  }

  pub fn aggregator(&self) -> &EventInputAggregator {
    &self.aggregator
  }

  pub fn store(&self) -> &SequenceStore {
    &self.store
  }

  pub fn scan_request(&self, kind : ScanKind) {
    request_scan(&self.scan, ScanRequest {card : self.card, sequence : self.id, kind : kind});
  }

  pub fn config(&self) -> SequenceConfig {
    self.lock().config.clone()
  }

  pub fn set_description(&self, desc : &str) {
    self.lock().config.description = String::from(desc);
    self.scan_request(ScanKind::Changed);
  }

  pub fn set_trigger_source(&self, src : TriggerSource) {
    {
      let mut state = self.lock();
      state.config.trigger_source = src;
      state.settings_changed = true;
    }
    self.scan_request(ScanKind::Changed);
  }

  pub fn set_run_mode(&self, mode : RunMode) {
    {
      let mut state = self.lock();
      state.config.run_mode = mode;
      state.settings_changed = true;
    }
    self.scan_request(ScanKind::Changed);
  }

  pub fn set_time_units(&self, units : TimeUnits) {
    {
      let mut state = self.lock();
      state.config.time_units = units;
      state.settings_changed = true;
    }
    self.scan_request(ScanKind::Changed);
  }

  /// Set the logical enable flag. Whether the hardware
  /// follows is up to the card.
  pub fn set_enabled(&self, enabled : bool) {
    let changed = {
      let mut state = self.lock();
      let changed = state.config.enabled != enabled;
      state.config.enabled = enabled;
      changed
    };
    if changed {
      self.scan_request(ScanKind::Changed);
    }
  }

  pub fn enabled(&self) -> bool {
    self.lock().config.enabled
  }

  /// Trigger source and run mode the hardware should use,
  /// that is the ones from the last commit
  pub fn hardware_settings(&self) -> (TriggerSource, RunMode) {
    let state = self.lock();
    (state.committed_trigger, state.committed_mode)
  }

  /// Finalize the event inputs and commit the result
  ///
  /// # Arguments
  ///
  /// * ticks_per_second : event clock rate, to convert
  ///                      times given in seconds
  pub fn commit_inputs(&self, ticks_per_second : f64) -> Result<u64, SequenceError> {
    let mut state = self.lock();
    let table = self.aggregator.finalize(state.config.time_units, ticks_per_second);
    let gen = self.commit_locked(&mut state, &table.codes, &table.timestamps)?;
    self.committed_revision.store(table.revision, Ordering::SeqCst);
    drop(state);
    self.scan_request(ScanKind::Changed);
    Ok(gen)
  }

  /// Commit a table which was built elsewhere. It will be
  /// checked the same way as one built from the inputs.
  pub fn commit_table(&self, codes : &[u8], timestamps : &[u32]) -> Result<u64, SequenceError> {
    let mut state = self.lock();
    let gen = self.commit_locked(&mut state, codes, timestamps)?;
    self.committed_revision.store(self.aggregator.revision(), Ordering::SeqCst);
    drop(state);
    self.scan_request(ScanKind::Changed);
    Ok(gen)
  }

  fn commit_locked(&self,
                   state      : &mut SequenceState,
                   codes      : &[u8],
                   timestamps : &[u32]) -> Result<u64, SequenceError> {
    match self.store.commit(codes, timestamps) {
      Err(err) => {
        state.last_error = Some((Utc::now(), format!("commit failed: {}", err)));
        self.scan_request(ScanKind::Error);
        Err(err)
      }
      Ok(gen) => {
        state.committed_trigger = state.config.trigger_source;
        state.committed_mode    = state.config.run_mode;
        state.settings_changed  = false;
        Ok(gen)
      }
    }
  }

  pub fn snapshot(&self) -> SequenceTable {
    self.store.snapshot()
  }

  /// False if inputs or settings changed since the last commit
  pub fn is_committed(&self) -> bool {
    let state = self.lock();
    !state.settings_changed
      && self.committed_revision.load(Ordering::SeqCst) == self.aggregator.revision()
  }

  pub fn bound_bank(&self) -> Option<usize> {
    match self.bank.load(Ordering::SeqCst) {
      NO_BANK => None,
      bank    => Some(bank),
    }
  }

  /// Maintain the back-reference to the sequence RAM.
  /// Only the bank pool of the card should call this,
  /// with its lock held.
  pub fn set_bound_bank(&self, bank : Option<usize>) {
    self.bank.store(bank.unwrap_or(NO_BANK), Ordering::SeqCst);
    self.scan_request(ScanKind::Changed);
  }

  pub fn count_start(&self) {
    self.num_starts.fetch_add(1, Ordering::SeqCst);
    self.scan_request(ScanKind::Started);
  }

  pub fn count_end(&self) {
    self.num_ends.fetch_add(1, Ordering::SeqCst);
    self.scan_request(ScanKind::Ended);
  }

  pub fn num_starts(&self) -> u32 {
    self.num_starts.load(Ordering::SeqCst)
  }

  pub fn num_ends(&self) -> u32 {
    self.num_ends.load(Ordering::SeqCst)
  }

  pub fn record_error(&self, msg : &str) {
    self.lock().last_error = Some((Utc::now(), String::from(msg)));
    self.scan_request(ScanKind::Error);
  }

  pub fn last_error(&self) -> Option<(DateTime<Utc>, String)> {
    self.lock().last_error.clone()
  }

  /// Human readable status
  ///
  /// # Arguments
  ///
  /// * level : 0 - nothing, 1 - sequence summary,
  ///           2 - declared events, 3 - committed table
  pub fn report(&self, level : u8) -> String {
    let mut repr = String::new();
    if level < 1 {
      return repr;
    }
    let config = self.config();
    let bank = match self.bound_bank() {
      None       => String::from("-"),
      Some(bank) => format!("{}", bank),
    };
    repr += &(format!("Card {}, Seq {} '{}'\n", self.card, self.id, config.description));
    repr += &(format!("  trig {} | mode {} | units {} | enabled {} | committed {} | bank {}\n",
                      config.trigger_source,
                      config.run_mode,
                      config.time_units,
                      config.enabled,
                      self.is_committed(),
                      bank));
    repr += &(format!("  starts {} | ends {}\n", self.num_starts(), self.num_ends()));
    if let Some((when, msg)) = self.last_error() {
      repr += &(format!("  last error [{}] {}\n", when.format("%Y-%m-%dT%H:%M:%S"), msg));
    }
    if level >= 2 {
      repr += &self.aggregator.report(level);
    }
    if level >= 3 {
      repr += &(format!("{}\n", self.snapshot()));
    }
    repr
  }
}
