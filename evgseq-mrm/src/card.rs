//! The event generator card
//!
//! A card owns the register access, its sequences and
//! the sequence RAMs. Interrupts are split in two
//! halves: `on_interrupt` only reads and acknowledges
//! the flags and hands them over on a channel, the
//! actual work is done in `service_interrupts`.

use std::error::Error;
use std::fmt;
use std::sync::{
  Arc,
  RwLock,
  RwLockReadGuard,
  RwLockWriteGuard,
};
use std::time::Duration;

use crossbeam_channel::{
  unbounded,
  Receiver,
  RecvTimeoutError,
  Sender,
};

use evgseq_lib::constants::{
  MAX_CARDS,
  MAX_SEQUENCES_PER_CARD,
};
use evgseq_lib::settings::SequenceSettings;
use evgseq_lib::{
  FieldValue,
  ScanRequest,
  Sequence,
  SequenceError,
};

use crate::control;
use crate::memory::{
  RegisterError,
  RegisterIo,
};
use crate::registers::{
  irq_start_ram,
  irq_stop_ram,
};
use crate::seqram::{
  SeqRamError,
  SequenceRamSync,
  SwapOutcome,
};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CardError {
  Sequence(SequenceError),
  SeqRam(SeqRamError),
  Register(RegisterError),
  DuplicateSequence(u32),
  SequenceIdOutOfRange(u32),
  DuplicateCard(u32),
  UnknownCard(u32),
}

impl fmt::Display for CardError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype : String;
    match self {
      CardError::Sequence(err) => {
        etype = format!("{}", err);
      },
      CardError::SeqRam(err) => {
        etype = format!("{}", err);
      },
      CardError::Register(err) => {
        etype = format!("{}", err);
      },
      CardError::DuplicateSequence(id) => {
        etype = format!("DuplicateSequence ({})", id);
      },
      CardError::SequenceIdOutOfRange(id) => {
        etype = format!("SequenceIdOutOfRange ({})", id);
      },
      CardError::DuplicateCard(id) => {
        etype = format!("DuplicateCard ({})", id);
      },
      CardError::UnknownCard(id) => {
        etype = format!("UnknownCard ({})", id);
      }
    }
    write!(f, "<CardError: {}>", etype)
  }
}

impl Error for CardError {
}

impl From<SequenceError> for CardError {
  fn from(err : SequenceError) -> Self {
    CardError::Sequence(err)
  }
}

impl From<SeqRamError> for CardError {
  fn from(err : SeqRamError) -> Self {
    CardError::SeqRam(err)
  }
}

impl From<RegisterError> for CardError {
  fn from(err : RegisterError) -> Self {
    CardError::Register(err)
  }
}

/// What the interrupt handler found in the flag register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IrqEvent {
  Start(usize),
  End(usize),
}

pub struct EvgCard {
  id              : u32,
  io              : Arc<dyn RegisterIo>,
  sequences       : RwLock<Vec<Option<Arc<Sequence>>>>,
  seqram          : SequenceRamSync,
  irq_tx          : Sender<IrqEvent>,
  irq_rx          : Receiver<IrqEvent>,
  scan            : Option<Sender<ScanRequest>>,
  event_clock_mhz : f64,
  fpga_version    : u32,
}

impl EvgCard {
  /// Set up the card and enable the sequence RAM
  /// interrupts
  ///
  /// # Arguments
  ///
  /// * fallback_mhz : event clock to use if the card
  ///                  does not tell
  pub fn new(id           : u32,
             io           : Arc<dyn RegisterIo>,
             fallback_mhz : f64,
             scan         : Option<Sender<ScanRequest>>) -> Result<Self, RegisterError> {
    let fpga_version = control::fpga_version(io.as_ref())?;
    let event_clock_mhz = match control::event_clock_mhz(io.as_ref())? {
      0 => {
        warn!("Card {} reports no event clock, using {} MHz", id, fallback_mhz);
        fallback_mhz
      },
      mhz => mhz as f64,
    };
    control::enable_seq_irqs(io.as_ref())?;
    info!("Card {} firmware 0x{:08x}, event clock {} MHz", id, fpga_version, event_clock_mhz);
    let (irq_tx, irq_rx) = unbounded();
    Ok(Self {
      id              : id,
      io              : Arc::clone(&io),
      sequences       : RwLock::new(vec![None; MAX_SEQUENCES_PER_CARD]),
      seqram          : SequenceRamSync::new(io),
      irq_tx          : irq_tx,
      irq_rx          : irq_rx,
      scan            : scan,
      event_clock_mhz : event_clock_mhz,
      fpga_version    : fpga_version,
    })
  }

  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn seqram(&self) -> &SequenceRamSync {
    &self.seqram
  }

  pub fn ticks_per_second(&self) -> f64 {
    self.event_clock_mhz*1e6
  }

  fn read_sequences(&self) -> RwLockReadGuard<'_, Vec<Option<Arc<Sequence>>>> {
    match self.sequences.read() {
      Ok(seqs) => seqs,
      Err(err) => err.into_inner(),
    }
  }

  fn write_sequences(&self) -> RwLockWriteGuard<'_, Vec<Option<Arc<Sequence>>>> {
    match self.sequences.write() {
      Ok(seqs) => seqs,
      Err(err) => err.into_inner(),
    }
  }

  pub fn create_sequence(&self, id : u32, description : &str) -> Result<Arc<Sequence>, CardError> {
    let mut seqs = self.write_sequences();
    let slot = match seqs.get_mut(id as usize) {
      None       => return Err(CardError::SequenceIdOutOfRange(id)),
      Some(slot) => slot,
    };
    if slot.is_some() {
      return Err(CardError::DuplicateSequence(id));
    }
    let mut seq = Sequence::new(self.id, id);
    if let Some(ch) = &self.scan {
      seq = seq.with_scan(ch.clone());
    }
    seq.set_description(description);
    let seq = Arc::new(seq);
    *slot = Some(Arc::clone(&seq));
    debug!("Card {} created sequence {}", self.id, id);
    Ok(seq)
  }

  pub fn sequence(&self, id : u32) -> Result<Arc<Sequence>, CardError> {
    match self.read_sequences().get(id as usize) {
      Some(Some(seq)) => Ok(Arc::clone(seq)),
      _ => Err(CardError::Sequence(SequenceError::UnknownSequence(id))),
    }
  }

  pub fn sequences(&self) -> Vec<Arc<Sequence>> {
    self.read_sequences().iter().flatten().cloned().collect()
  }

  fn sync_if_bound(&self, seq : &Arc<Sequence>) -> Result<Option<SwapOutcome>, CardError> {
    if seq.bound_bank().is_none() {
      return Ok(None);
    }
    match self.seqram.sync_sequence(seq) {
      Err(SeqRamError::NotBound) => Ok(None),
      Err(err) => {
        seq.record_error(&format!("{}", err));
        Err(CardError::SeqRam(err))
      },
      Ok(outcome) => Ok(Some(outcome)),
    }
  }

  /// Build the table from the event inputs, commit it
  /// and bring it to the sequence RAM if bound
  pub fn commit(&self, id : u32) -> Result<u64, CardError> {
    let seq = self.sequence(id)?;
    let gen = seq.commit_inputs(self.ticks_per_second())?;
    self.sync_if_bound(&seq)?;
    Ok(gen)
  }

  /// Commit a complete table, bypassing the event inputs
  pub fn commit_table(&self, id : u32, codes : &[u8], timestamps : &[u32]) -> Result<u64, CardError> {
    let seq = self.sequence(id)?;
    let gen = seq.commit_table(codes, timestamps)?;
    self.sync_if_bound(&seq)?;
    Ok(gen)
  }

  /// Bind the sequence to a sequence RAM and load it
  pub fn load(&self, id : u32) -> Result<usize, CardError> {
    let seq = self.sequence(id)?;
    let bank = self.seqram.bind(&seq)?;
    self.sync_if_bound(&seq)?;
    Ok(bank)
  }

  pub fn unload(&self, id : u32) -> Result<(), CardError> {
    let seq = self.sequence(id)?;
    self.seqram.unbind(&seq)?;
    Ok(())
  }

  pub fn enable(&self, id : u32) -> Result<(), CardError> {
    let seq = self.sequence(id)?;
    seq.set_enabled(true);
    self.sync_if_bound(&seq)?;
    Ok(())
  }

  pub fn disable(&self, id : u32) -> Result<(), CardError> {
    let seq = self.sequence(id)?;
    match self.seqram.disable(&seq) {
      Err(SeqRamError::NotBound) => {
        seq.set_enabled(false);
        Ok(())
      },
      Err(err) => Err(CardError::SeqRam(err)),
      Ok(_)    => Ok(()),
    }
  }

  pub fn soft_trigger(&self, id : u32) -> Result<(), CardError> {
    let seq = self.sequence(id)?;
    self.seqram.soft_trigger(&seq)?;
    Ok(())
  }

  /// Create and fill the sequences from the settings
  pub fn configure(&self, settings : &[SequenceSettings]) -> Result<(), CardError> {
    for cfg in settings {
      let seq = self.create_sequence(cfg.id, &cfg.description)?;
      seq.set_trigger_source(cfg.trigger_source);
      seq.set_run_mode(cfg.run_mode);
      seq.set_time_units(cfg.time_units);
      let agg = seq.aggregator();
      for ev in cfg.events.iter() {
        let h = agg.declare_event(&ev.name)?;
        agg.set_field(&h, FieldValue::Code(ev.code))?;
        agg.set_field(&h, FieldValue::Time(ev.time))?;
        agg.set_field(&h, FieldValue::Enable(ev.enable))?;
        agg.set_field(&h, FieldValue::Priority(ev.priority))?;
      }
      seq.set_enabled(cfg.enable);
      self.commit(cfg.id)?;
      if cfg.load {
        let bank = self.load(cfg.id)?;
        info!("Sequence {} '{}' is in sequence RAM {}", cfg.id, cfg.description, bank);
      }
    }
    Ok(())
  }

  /// Interrupt context: read and acknowledge the flags
  /// and pass them on. Returns the flags.
  pub fn on_interrupt(&self) -> Result<u32, RegisterError> {
    let flags = control::read_irq_flags(self.io.as_ref())?;
    if flags == 0 {
      return Ok(0);
    }
    control::ack_irq(self.io.as_ref(), flags)?;
    for bank in 0..self.seqram.n_banks() {
      if flags & irq_start_ram(bank) != 0 {
        self.hand_over(IrqEvent::Start(bank));
      }
      if flags & irq_stop_ram(bank) != 0 {
        self.hand_over(IrqEvent::End(bank));
      }
    }
    Ok(flags)
  }

  fn hand_over(&self, ev : IrqEvent) {
    match self.irq_tx.try_send(ev) {
      Err(err) => error!("Can not hand over {:?}! {err}", ev),
      Ok(_)    => ()
    }
  }

  fn dispatch(&self, ev : IrqEvent) {
    match ev {
      IrqEvent::Start(bank) => {
        if let Err(err) = self.seqram.handle_start(bank) {
          error!("Start of sequence on card {} failed! {}", self.id, err);
        }
      },
      IrqEvent::End(bank) => {
        match self.seqram.swap_on_complete(bank) {
          Err(err)    => error!("End of sequence on card {} failed! {}", self.id, err),
          Ok(outcome) => trace!("Card {} sequence RAM {} -> {:?}", self.id, bank, outcome),
        }
      }
    }
  }

  /// Do the work for all interrupts handed over so far,
  /// then look after pending swaps. Returns the number
  /// of interrupt events.
  pub fn service_interrupts(&self) -> usize {
    let mut n_events = 0usize;
    while let Ok(ev) = self.irq_rx.try_recv() {
      self.dispatch(ev);
      n_events += 1;
    }
    self.seqram.rearm_pending();
    n_events
  }

  /// Like service_interrupts, but waits up to `timeout`
  /// for the first interrupt event
  pub fn wait_and_service(&self, timeout : Duration) -> usize {
    match self.irq_rx.recv_timeout(timeout) {
      Ok(ev) => {
        self.dispatch(ev);
        1 + self.service_interrupts()
      },
      Err(RecvTimeoutError::Timeout) => {
        self.seqram.rearm_pending();
        0
      },
      Err(RecvTimeoutError::Disconnected) => {
        error!("Interrupt channel of card {} is gone!", self.id);
        0
      }
    }
  }

  /// Human readable status
  ///
  /// # Arguments
  ///
  /// * level : 0 - nothing, 1 - card and sequences,
  ///           2 - plus events, 3 - plus tables
  pub fn report(&self, level : u8) -> String {
    let mut repr = String::new();
    if level < 1 {
      return repr;
    }
    repr += &(format!("Card {} | firmware 0x{:08x} | event clock {} MHz | irq errors {}\n",
                      self.id, self.fpga_version, self.event_clock_mhz, self.seqram.num_irq_errors()));
    repr += &self.seqram.report();
    for seq in self.sequences() {
      repr += &seq.report(level);
    }
    repr
  }
}

/// All cards, by card id
pub struct CardRegistry {
  cards : Vec<Option<Arc<EvgCard>>>,
}

impl CardRegistry {
  pub fn new() -> Self {
    Self {
      cards : vec![None; MAX_CARDS],
    }
  }

  pub fn add(&mut self, card : EvgCard) -> Result<Arc<EvgCard>, CardError> {
    let id = card.id();
    let slot = match self.cards.get_mut(id as usize) {
      None       => return Err(CardError::UnknownCard(id)),
      Some(slot) => slot,
    };
    if slot.is_some() {
      return Err(CardError::DuplicateCard(id));
    }
    let card = Arc::new(card);
    *slot = Some(Arc::clone(&card));
    Ok(card)
  }

  pub fn get(&self, id : u32) -> Result<Arc<EvgCard>, CardError> {
    match self.cards.get(id as usize) {
      Some(Some(card)) => Ok(Arc::clone(card)),
      _ => Err(CardError::UnknownCard(id)),
    }
  }

  pub fn cards(&self) -> Vec<Arc<EvgCard>> {
    self.cards.iter().flatten().cloned().collect()
  }
}

impl Default for CardRegistry {
  fn default() -> Self {
    Self::new()
  }
}
