//! Double buffered loading of sequences into the
//! sequence RAMs of the card
//!
//! A card has a small fixed number of sequence RAMs
//! (banks). A sequence gets bound to one of them and
//! its committed table gets copied into the RAM. While
//! the RAM is playing, a new table is never written.
//! Instead the RAM is switched to single shot, so that
//! the current pass is the last one, and the new table
//! goes in once the end of sequence interrupt arrived.
//!
//! Locks (outer to inner): bank pool -> sequence state
//! -> sequence store. On the interrupt path the store
//! is only ever try-locked.

use std::error::Error;
use std::fmt;
use std::sync::{
  Arc,
  Mutex,
  MutexGuard,
};
use std::sync::atomic::{
  AtomicU32,
  Ordering,
};

use evgseq_lib::{
  RunMode,
  Sequence,
  SequenceTable,
  TriggerSource,
};

use crate::control;
use crate::memory::{
  RegisterError,
  RegisterIo,
};
use crate::registers::NUM_SEQ_RAMS;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BankState {
  /// nothing armed, free to be (re)loaded
  Idle,
  /// a table was written, not armed yet
  Loading,
  /// waiting for a trigger
  Armed,
  /// playing, the RAM must not be touched
  Running,
}

impl fmt::Display for BankState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      BankState::Idle    => "Idle",
      BankState::Loading => "Loading",
      BankState::Armed   => "Armed",
      BankState::Running => "Running",
    };
    write!(f, "{}", repr)
  }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SeqRamError {
  /// All sequence RAMs are in use
  NoIdleBank,
  /// The sequence is not bound to a sequence RAM
  NotBound,
  /// The sequence RAM is armed or running
  BankBusy,
  /// No table has been loaded into the sequence RAM
  NotLoaded,
  /// The sequence RAM is not armed
  NotArmed,
  InvalidBank(usize),
  Bus(RegisterError),
}

impl fmt::Display for SeqRamError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype : String;
    match self {
      SeqRamError::NoIdleBank => {
        etype = String::from("NoIdleBank");
      },
      SeqRamError::NotBound => {
        etype = String::from("NotBound");
      },
      SeqRamError::BankBusy => {
        etype = String::from("BankBusy");
      },
      SeqRamError::NotLoaded => {
        etype = String::from("NotLoaded");
      },
      SeqRamError::NotArmed => {
        etype = String::from("NotArmed");
      },
      SeqRamError::InvalidBank(bank) => {
        etype = format!("InvalidBank ({})", bank);
      },
      SeqRamError::Bus(err) => {
        etype = format!("Bus {}", err);
      }
    }
    write!(f, "<SeqRamError: {}>", etype)
  }
}

impl Error for SeqRamError {
}

impl From<RegisterError> for SeqRamError {
  fn from(err : RegisterError) -> Self {
    SeqRamError::Bus(err)
  }
}

/// What happened to a sequence RAM after a table
/// update or an end of sequence
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
  /// the current table was loaded and armed
  Armed,
  /// the current table was loaded, the sequence is disabled
  Loaded,
  /// the RAM is busy, the table goes in later
  Pending,
  /// automatic mode, plays again by itself
  Rearmed,
  /// single shot finished
  Idle,
  /// normal mode, armed again for the next trigger
  Waiting,
  /// nothing bound to the sequence RAM
  Unbound,
}

/// One of the sequence RAMs of the card
#[derive(Debug)]
pub struct SeqRamBank {
  pub id                : usize,
  pub state             : BankState,
  sequence              : Option<Arc<Sequence>>,
  /// what is actually programmed into the hardware
  pub hw_trigger        : TriggerSource,
  pub hw_mode           : RunMode,
  /// generation of the table in the RAM
  pub loaded_generation : Option<u64>,
  pub swap_pending      : bool,
  /// switched to single shot to get a swap done
  pub forced_single     : bool,
  /// persistent bits of the control register
  pub control           : u32,
}

impl SeqRamBank {
  pub fn new(id : usize) -> Self {
    Self {
      id                : id,
      state             : BankState::Idle,
      sequence          : None,
      hw_trigger        : TriggerSource::Disabled,
      hw_mode           : RunMode::Single,
      loaded_generation : None,
      swap_pending      : false,
      forced_single     : false,
      control           : control::control_word(TriggerSource::Disabled, RunMode::Single, id),
    }
  }

  /// Id of the bound sequence
  pub fn sequence(&self) -> Option<u32> {
    self.sequence.as_ref().map(|seq| seq.id())
  }

  fn holds(&self, seq : &Arc<Sequence>) -> bool {
    match &self.sequence {
      None       => false,
      Some(mine) => Arc::ptr_eq(mine, seq),
    }
  }
}

impl fmt::Display for SeqRamBank {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let seq = match self.sequence() {
      None     => String::from("-"),
      Some(id) => format!("{}", id),
    };
    let gen = match self.loaded_generation {
      None      => String::from("-"),
      Some(gen) => format!("{}", gen),
    };
    write!(f, "<SeqRamBank {}: {} | seq {} | gen {} | trig {} | mode {} | pending {}{}>",
           self.id, self.state, seq, gen, self.hw_trigger, self.hw_mode, self.swap_pending,
           if self.forced_single {" (forced single)"} else {""})
  }
}

pub struct SequenceRamSync {
  io             : Arc<dyn RegisterIo>,
  n_banks        : usize,
  banks          : Mutex<Vec<SeqRamBank>>,
  num_irq_errors : AtomicU32,
}

impl SequenceRamSync {
  pub fn new(io : Arc<dyn RegisterIo>) -> Self {
    Self::with_banks(io, NUM_SEQ_RAMS)
  }

  pub fn with_banks(io : Arc<dyn RegisterIo>, n_banks : usize) -> Self {
    let banks = (0..n_banks).map(SeqRamBank::new).collect();
    Self {
      io             : io,
      n_banks        : n_banks,
      banks          : Mutex::new(banks),
      num_irq_errors : AtomicU32::new(0),
    }
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<SeqRamBank>> {
    match self.banks.lock() {
      Ok(banks) => banks,
      Err(err)  => {
        warn!("Bank pool was poisoned, recovering!");
        err.into_inner()
      }
    }
  }

  /// Fixed at construction, does not take the bank lock
  pub fn n_banks(&self) -> usize {
    self.n_banks
  }

  /// (state, bound sequence, swap pending) of a bank
  pub fn bank_status(&self, bank : usize) -> Result<(BankState, Option<u32>, bool), SeqRamError> {
    let banks = self.lock();
    match banks.get(bank) {
      None    => Err(SeqRamError::InvalidBank(bank)),
      Some(b) => Ok((b.state, b.sequence(), b.swap_pending)),
    }
  }

  /// Errors on the interrupt path since startup
  pub fn num_irq_errors(&self) -> u32 {
    self.num_irq_errors.load(Ordering::SeqCst)
  }

  fn bound_index(banks : &[SeqRamBank], seq : &Arc<Sequence>) -> Option<usize> {
    match seq.bound_bank() {
      Some(b) if b < banks.len() && banks[b].holds(seq) => Some(b),
      _ => banks.iter().position(|b| b.holds(seq)),
    }
  }

  /// Bind the sequence to a free sequence RAM
  ///
  /// A RAM is free when it is idle and either nobody or a
  /// disabled sequence (e.g. a finished single shot) is
  /// bound to it. Never waits for a RAM to become free.
  pub fn bind(&self, seq : &Arc<Sequence>) -> Result<usize, SeqRamError> {
    let mut banks = self.lock();
    if let Some(b) = Self::bound_index(&banks, seq) {
      return Ok(b);
    }
    for bank in banks.iter_mut() {
      if bank.state != BankState::Idle {
        continue;
      }
      let free = match &bank.sequence {
        None       => true,
        Some(prev) => !prev.enabled(),
      };
      if !free {
        continue;
      }
      if let Some(prev) = bank.sequence.take() {
        info!("Sequence RAM {} is taken over from sequence {} by sequence {}", bank.id, prev.id(), seq.id());
        prev.set_bound_bank(None);
      }
      bank.sequence          = Some(Arc::clone(seq));
      bank.loaded_generation = None;
      bank.swap_pending      = false;
      seq.set_bound_bank(Some(bank.id));
      debug!("Bound sequence {} to sequence RAM {}", seq.id(), bank.id);
      return Ok(bank.id);
    }
    warn!("No idle sequence RAM for sequence {}!", seq.id());
    Err(SeqRamError::NoIdleBank)
  }

  /// Stop the sequence RAM and drop the binding
  pub fn unbind(&self, seq : &Arc<Sequence>) -> Result<(), SeqRamError> {
    let mut banks = self.lock();
    let b = match Self::bound_index(&banks, seq) {
      None    => return Err(SeqRamError::NotBound),
      Some(b) => b,
    };
    let bank = &mut banks[b];
    control::disable_seq_ram(self.io.as_ref(), b, bank.control)?;
    control::reset_seq_ram(self.io.as_ref(), b, bank.control)?;
    bank.state             = BankState::Idle;
    bank.sequence          = None;
    bank.loaded_generation = None;
    bank.swap_pending      = false;
    bank.forced_single     = false;
    seq.set_bound_bank(None);
    debug!("Unbound sequence {} from sequence RAM {}", seq.id(), b);
    Ok(())
  }

  fn load_locked(&self, bank : &mut SeqRamBank, table : &SequenceTable) -> Result<(), SeqRamError> {
    match bank.state {
      BankState::Armed | BankState::Running => {
        return Err(SeqRamError::BankBusy);
      },
      _ => ()
    }
    control::disable_seq_ram(self.io.as_ref(), bank.id, bank.control)?;
    control::write_seq_ram_table(self.io.as_ref(), bank.id, &table.codes, &table.timestamps)?;
    bank.state             = BankState::Loading;
    bank.loaded_generation = Some(table.generation);
    bank.swap_pending      = false;
    debug!("Loaded gen {} with {} events into sequence RAM {}", table.generation, table.n_events(), bank.id);
    Ok(())
  }

  fn arm_locked(&self, bank : &mut SeqRamBank, trigger : TriggerSource, mode : RunMode) -> Result<(), SeqRamError> {
    match bank.state {
      BankState::Armed | BankState::Running => {
        return Err(SeqRamError::BankBusy);
      },
      BankState::Idle if bank.loaded_generation.is_none() => {
        return Err(SeqRamError::NotLoaded);
      },
      _ => ()
    }
    let word = control::control_word(trigger, mode, bank.id);
    control::write_seq_control(self.io.as_ref(), bank.id, word)?;
    control::arm_seq_ram(self.io.as_ref(), bank.id, word)?;
    bank.control       = word;
    bank.hw_trigger    = trigger;
    bank.hw_mode       = mode;
    bank.forced_single = false;
    bank.state         = BankState::Armed;
    debug!("Armed sequence RAM {} (trig {}, mode {})", bank.id, trigger, mode);
    Ok(())
  }

  /// Write `table` into sequence RAM `bank`
  pub fn load(&self, bank : usize, table : &SequenceTable) -> Result<(), SeqRamError> {
    let mut banks = self.lock();
    match banks.get_mut(bank) {
      None    => Err(SeqRamError::InvalidBank(bank)),
      Some(b) => self.load_locked(b, table),
    }
  }

  /// Program trigger source and run mode and arm the
  /// sequence RAM
  pub fn arm(&self, bank : usize, trigger : TriggerSource, mode : RunMode) -> Result<(), SeqRamError> {
    let mut banks = self.lock();
    match banks.get_mut(bank) {
      None    => Err(SeqRamError::InvalidBank(bank)),
      Some(b) => self.arm_locked(b, trigger, mode),
    }
  }

  /// Load the table and arm, if the sequence wants to
  /// be played
  fn load_and_arm(&self, bank : &mut SeqRamBank, seq : &Sequence, table : &SequenceTable)
    -> Result<SwapOutcome, SeqRamError> {
    self.load_locked(bank, table)?;
    if seq.enabled() {
      let (trigger, mode) = seq.hardware_settings();
      self.arm_locked(bank, trigger, mode)?;
      Ok(SwapOutcome::Armed)
    } else {
      Ok(SwapOutcome::Loaded)
    }
  }

  /// Bring the sequence RAM in line with the committed
  /// table and the enable flag of the sequence
  ///
  /// While the RAM is playing it is switched to single
  /// shot and the swap happens at the end of sequence.
  pub fn sync_sequence(&self, seq : &Arc<Sequence>) -> Result<SwapOutcome, SeqRamError> {
    let mut banks = self.lock();
    let b = match Self::bound_index(&banks, seq) {
      None    => return Err(SeqRamError::NotBound),
      Some(b) => b,
    };
    let bank = &mut banks[b];
    if bank.state == BankState::Armed && control::seq_ram_running(self.io.as_ref(), b)? {
      // triggered, but the start interrupt is not through yet
      bank.state = BankState::Running;
    }
    if bank.state == BankState::Running {
      if !bank.forced_single {
        let word = control::control_word(bank.hw_trigger, RunMode::Single, b);
        control::write_seq_control(self.io.as_ref(), b, word)?;
        bank.control       = word;
        bank.forced_single = true;
      }
      bank.swap_pending = true;
      debug!("Sequence RAM {} is running, swap for sequence {} is pending", b, seq.id());
      return Ok(SwapOutcome::Pending);
    }
    if bank.state == BankState::Armed {
      control::disable_seq_ram(self.io.as_ref(), b, bank.control)?;
      bank.state = BankState::Idle;
    }
    let table = seq.snapshot();
    self.load_and_arm(bank, seq, &table)
  }

  /// Start of sequence, from the deferred interrupt path
  pub fn handle_start(&self, bank : usize) -> Result<(), SeqRamError> {
    let mut banks = self.lock();
    let b = match banks.get_mut(bank) {
      None    => return Err(SeqRamError::InvalidBank(bank)),
      Some(b) => b,
    };
    match b.state {
      BankState::Armed | BankState::Running => {
        b.state = BankState::Running;
      },
      _ => {
        warn!("Start of sequence on sequence RAM {} which is {}!", bank, b.state);
      }
    }
    if let Some(seq) = &b.sequence {
      seq.count_start();
    }
    Ok(())
  }

  fn irq_failure(&self, seq : &Sequence, bank : usize, err : &SeqRamError) {
    error!("Swapping sequence {} into sequence RAM {} failed! {}", seq.id(), bank, err);
    self.num_irq_errors.fetch_add(1, Ordering::SeqCst);
    seq.record_error(&format!("sequence RAM {}: {}", bank, err));
  }

  /// Try to get the pending table into the RAM without
  /// waiting for the sequence lock
  fn try_swap(&self, bank : &mut SeqRamBank, seq : &Sequence) -> SwapOutcome {
    let table = match seq.store().try_snapshot() {
      None => {
        debug!("Sequence {} is busy, swap into sequence RAM {} stays pending", seq.id(), bank.id);
        bank.swap_pending = true;
        return SwapOutcome::Pending;
      }
      Some(table) => table,
    };
    match self.load_and_arm(bank, seq, &table) {
      Ok(outcome) => outcome,
      Err(err) => {
        self.irq_failure(seq, bank.id, &err);
        bank.swap_pending = true;
        SwapOutcome::Pending
      }
    }
  }

  /// End of sequence, from the deferred interrupt path
  ///
  /// Swaps in a pending table, otherwise follows the
  /// run mode the RAM was armed with.
  pub fn swap_on_complete(&self, bank : usize) -> Result<SwapOutcome, SeqRamError> {
    let mut banks = self.lock();
    let b = match banks.get_mut(bank) {
      None    => return Err(SeqRamError::InvalidBank(bank)),
      Some(b) => b,
    };
    let seq = match &b.sequence {
      None => {
        warn!("End of sequence on unbound sequence RAM {}!", bank);
        b.state = BankState::Idle;
        return Ok(SwapOutcome::Unbound);
      }
      Some(seq) => Arc::clone(seq),
    };
    seq.count_end();
    let newer = match seq.store().try_with_table(|t| t.generation) {
      Some(gen) => b.loaded_generation != Some(gen),
      None      => false,
    };
    if b.swap_pending || b.forced_single || newer {
      // the hardware disarmed itself after the single pass
      b.state = BankState::Idle;
      return Ok(self.try_swap(b, &seq));
    }
    match b.hw_mode {
      RunMode::Single => {
        b.state = BankState::Idle;
        seq.set_enabled(false);
        Ok(SwapOutcome::Idle)
      },
      RunMode::Automatic => {
        b.state = BankState::Armed;
        Ok(SwapOutcome::Rearmed)
      },
      RunMode::Normal => {
        // still enabled in hardware, the next trigger plays it again
        b.state = BankState::Armed;
        Ok(SwapOutcome::Waiting)
      }
    }
  }

  /// Service every sequence RAM which still has a swap
  /// pending. Returns the number of swaps done.
  pub fn rearm_pending(&self) -> usize {
    let mut banks = self.lock();
    let mut n_done = 0usize;
    for bank in banks.iter_mut() {
      if !bank.swap_pending {
        continue;
      }
      match bank.state {
        BankState::Armed | BankState::Running => continue,
        _ => ()
      }
      let seq = match &bank.sequence {
        None => {
          bank.swap_pending = false;
          continue;
        }
        Some(seq) => Arc::clone(seq),
      };
      match self.try_swap(bank, &seq) {
        SwapOutcome::Pending => (),
        _ => n_done += 1,
      }
    }
    n_done
  }

  /// Send the software trigger to the RAM of the sequence
  pub fn soft_trigger(&self, seq : &Arc<Sequence>) -> Result<(), SeqRamError> {
    let banks = self.lock();
    let b = match Self::bound_index(&banks, seq) {
      None    => return Err(SeqRamError::NotBound),
      Some(b) => b,
    };
    let bank = &banks[b];
    match bank.state {
      BankState::Armed => (),
      BankState::Running => return Err(SeqRamError::BankBusy),
      _ => return Err(SeqRamError::NotArmed),
    }
    control::soft_trigger_seq_ram(self.io.as_ref(), b, bank.control)?;
    Ok(())
  }

  /// Disarm the RAM of the sequence. The binding and
  /// the loaded table stay.
  pub fn disable(&self, seq : &Arc<Sequence>) -> Result<(), SeqRamError> {
    let mut banks = self.lock();
    let b = match Self::bound_index(&banks, seq) {
      None    => return Err(SeqRamError::NotBound),
      Some(b) => b,
    };
    let bank = &mut banks[b];
    control::disable_seq_ram(self.io.as_ref(), b, bank.control)?;
    bank.state         = BankState::Idle;
    bank.swap_pending  = false;
    bank.forced_single = false;
    seq.set_enabled(false);
    debug!("Disabled sequence RAM {} of sequence {}", b, seq.id());
    Ok(())
  }

  pub fn halt(&self, seq : &Arc<Sequence>) -> Result<(), SeqRamError> {
    self.disable(seq)
  }

  pub fn report(&self) -> String {
    let banks = self.lock();
    let mut repr = String::new();
    for bank in banks.iter() {
      repr += &(format!("  {}\n", bank));
    }
    repr
  }
}

#[cfg(test)]
mod test_seqram {
  use super::*;
  use crate::memory::SimulatedRegisters;
  use crate::registers::*;
  use evgseq_lib::constants::END_OF_SEQUENCE;

  fn setup() -> (Arc<SimulatedRegisters>, SequenceRamSync) {
    let sim = Arc::new(SimulatedRegisters::new());
    let io : Arc<dyn RegisterIo> = sim.clone();
    (sim, SequenceRamSync::new(io))
  }

  fn sequence(id : u32, codes : &[u8], times : &[u32]) -> Arc<Sequence> {
    let seq = Arc::new(Sequence::new(0, id));
    seq.commit_table(codes, times).unwrap();
    seq
  }

  #[test]
  fn bind_is_stable() {
    let (_sim, sync) = setup();
    let seq = sequence(0, &[1], &[1]);
    let b = sync.bind(&seq).unwrap();
    assert_eq!(sync.bind(&seq).unwrap(), b);
    assert_eq!(seq.bound_bank(), Some(b));
  }

  #[test]
  fn load_writes_the_table() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[4, 5], &[10, 20]);
    let b = sync.bind(&seq).unwrap();
    assert_eq!(sync.sync_sequence(&seq).unwrap(), SwapOutcome::Loaded);
    let (codes, times) = control::read_seq_ram_table(sim.as_ref(), b).unwrap();
    assert_eq!(codes, vec![4, 5, END_OF_SEQUENCE]);
    assert_eq!(times, vec![10, 20, 21]);
    assert_eq!(sync.bank_status(b).unwrap().0, BankState::Loading);
  }

  #[test]
  fn arm_requires_a_table() {
    let (_sim, sync) = setup();
    assert_eq!(sync.arm(0, TriggerSource::Software, RunMode::Single), Err(SeqRamError::NotLoaded));
    assert_eq!(sync.arm(7, TriggerSource::Software, RunMode::Single), Err(SeqRamError::InvalidBank(7)));
  }

  #[test]
  fn enabled_sequence_gets_armed() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[4], &[10]);
    seq.set_enabled(true);
    let b = sync.bind(&seq).unwrap();
    assert_eq!(sync.sync_sequence(&seq).unwrap(), SwapOutcome::Armed);
    assert!(sim.is_armed(b));
    let ctrl = sim.read32(seq_control(b)).unwrap();
    assert_eq!(ctrl & SEQ_CTRL_TRIG_SRC_MASK, TRIG_SRC_SOFT + b as u32);
    assert_eq!(ctrl & SEQ_CTRL_REPEAT_MASK, SEQ_CTRL_SINGLE);
  }

  #[test]
  fn running_bank_is_not_touched() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[4], &[10]);
    seq.set_enabled(true);
    seq.commit_table(&[4], &[10]).unwrap();
    let b = sync.bind(&seq).unwrap();
    sync.sync_sequence(&seq).unwrap();
    assert!(sim.start_sequence(b));
    sync.handle_start(b).unwrap();
    let writes = sim.n_writes();
    seq.commit_table(&[7, 8], &[1, 2]).unwrap();
    assert_eq!(sync.sync_sequence(&seq).unwrap(), SwapOutcome::Pending);
    // only the switch to single shot went out
    assert_eq!(sim.n_writes(), writes + 1);
    let (codes, _) = control::read_seq_ram_table(sim.as_ref(), b).unwrap();
    assert_eq!(codes, vec![4, END_OF_SEQUENCE]);
    assert!(sim.end_sequence(b));
    assert_eq!(sync.swap_on_complete(b).unwrap(), SwapOutcome::Armed);
    let (codes, _) = control::read_seq_ram_table(sim.as_ref(), b).unwrap();
    assert_eq!(codes, vec![7, 8, END_OF_SEQUENCE]);
    assert_eq!(seq.num_starts(), 1);
    assert_eq!(seq.num_ends(), 1);
  }

  #[test]
  fn single_shot_end_frees_the_bank() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[4], &[10]);
    seq.set_enabled(true);
    let b = sync.bind(&seq).unwrap();
    sync.sync_sequence(&seq).unwrap();
    sim.start_sequence(b);
    sync.handle_start(b).unwrap();
    sim.end_sequence(b);
    assert_eq!(sync.swap_on_complete(b).unwrap(), SwapOutcome::Idle);
    assert!(!seq.enabled());
    assert_eq!(sync.bank_status(b).unwrap().0, BankState::Idle);
  }

  #[test]
  fn automatic_and_normal_modes() {
    let (sim, sync) = setup();
    let auto = sequence(0, &[4], &[10]);
    auto.set_run_mode(RunMode::Automatic);
    auto.commit_table(&[4], &[10]).unwrap();
    auto.set_enabled(true);
    let norm = sequence(1, &[5], &[10]);
    norm.set_run_mode(RunMode::Normal);
    norm.commit_table(&[5], &[10]).unwrap();
    norm.set_enabled(true);
    let ba = sync.bind(&auto).unwrap();
    let bn = sync.bind(&norm).unwrap();
    sync.sync_sequence(&auto).unwrap();
    sync.sync_sequence(&norm).unwrap();
    for b in [ba, bn] {
      sim.start_sequence(b);
      sync.handle_start(b).unwrap();
      sim.end_sequence(b);
    }
    assert_eq!(sync.swap_on_complete(ba).unwrap(), SwapOutcome::Rearmed);
    assert_eq!(sync.bank_status(ba).unwrap().0, BankState::Armed);
    assert_eq!(sync.swap_on_complete(bn).unwrap(), SwapOutcome::Waiting);
    assert_eq!(sync.bank_status(bn).unwrap().0, BankState::Armed);
    assert!(sim.is_armed(bn));
    // normal mode waits for the next trigger
    assert!(sync.soft_trigger(&norm).is_ok());
  }

  #[test]
  fn normal_mode_commit_between_passes() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[1], &[10]);
    seq.set_run_mode(RunMode::Normal);
    seq.commit_table(&[1], &[10]).unwrap();
    seq.set_enabled(true);
    let b = sync.bind(&seq).unwrap();
    sync.sync_sequence(&seq).unwrap();
    sync.soft_trigger(&seq).unwrap();
    sync.handle_start(b).unwrap();
    assert!(sim.end_sequence(b));
    assert_eq!(sync.swap_on_complete(b).unwrap(), SwapOutcome::Waiting);
    assert!(!control::seq_ram_running(sim.as_ref(), b).unwrap());

    // nothing is playing, the new table goes in right away
    seq.commit_table(&[2, 3], &[10, 20]).unwrap();
    assert_eq!(sync.sync_sequence(&seq).unwrap(), SwapOutcome::Armed);
    assert_eq!(sync.bank_status(b).unwrap(), (BankState::Armed, Some(0), false));
    let (codes, times) = control::read_seq_ram_table(sim.as_ref(), b).unwrap();
    assert_eq!(codes, vec![2, 3, END_OF_SEQUENCE]);
    assert_eq!(times, vec![10, 20, 21]);
    let ctrl = sim.read32(seq_control(b)).unwrap();
    assert_eq!(ctrl & SEQ_CTRL_REPEAT_MASK, SEQ_CTRL_NORMAL);
    assert!(sync.soft_trigger(&seq).is_ok());
  }

  #[test]
  fn normal_mode_retriggered_before_the_commit() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[1], &[10]);
    seq.set_run_mode(RunMode::Normal);
    seq.commit_table(&[1], &[10]).unwrap();
    seq.set_enabled(true);
    let b = sync.bind(&seq).unwrap();
    sync.sync_sequence(&seq).unwrap();
    sim.start_sequence(b);
    sync.handle_start(b).unwrap();
    sim.end_sequence(b);
    sync.swap_on_complete(b).unwrap();
    // second pass started, its interrupt is not serviced yet
    assert!(sim.start_sequence(b));
    seq.commit_table(&[4], &[10]).unwrap();
    assert_eq!(sync.sync_sequence(&seq).unwrap(), SwapOutcome::Pending);
    let (codes, _) = control::read_seq_ram_table(sim.as_ref(), b).unwrap();
    assert_eq!(codes, vec![1, END_OF_SEQUENCE]);
    sync.handle_start(b).unwrap();
    assert!(sim.end_sequence(b));
    assert_eq!(sync.swap_on_complete(b).unwrap(), SwapOutcome::Armed);
    let (codes, _) = control::read_seq_ram_table(sim.as_ref(), b).unwrap();
    assert_eq!(codes, vec![4, END_OF_SEQUENCE]);
  }

  #[test]
  fn bus_error_keeps_state() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[4], &[10]);
    let b = sync.bind(&seq).unwrap();
    sim.inject_fault(Some(seq_ram_entry(b, 0)..seq_ram_entry(b, 1)));
    match sync.sync_sequence(&seq) {
      Err(SeqRamError::Bus(RegisterError::BusError(_))) => (),
      other => panic!("unexpected {:?}", other),
    }
    assert_eq!(sync.bank_status(b).unwrap().0, BankState::Idle);
    sim.inject_fault(None);
    assert_eq!(sync.sync_sequence(&seq).unwrap(), SwapOutcome::Loaded);
  }

  #[test]
  fn disable_and_unbind() {
    let (sim, sync) = setup();
    let seq = sequence(0, &[4], &[10]);
    seq.set_enabled(true);
    let b = sync.bind(&seq).unwrap();
    sync.sync_sequence(&seq).unwrap();
    sync.disable(&seq).unwrap();
    assert!(!sim.is_armed(b));
    assert!(!seq.enabled());
    assert_eq!(sync.soft_trigger(&seq), Err(SeqRamError::NotArmed));
    sync.unbind(&seq).unwrap();
    assert_eq!(seq.bound_bank(), None);
    assert_eq!(sync.unbind(&seq), Err(SeqRamError::NotBound));
  }
}
