//! Register access for the event generator
//!
//! The register map of the card is exposed by the
//! kernel as a uio device, e.g. /dev/uio0, which gets
//! mapped into our memory. The same device delivers
//! the interrupts: a blocking read returns once the
//! card raised its interrupt line, writing 1 enables
//! the line again.
//!
//! For tests and for running without a card, the
//! `SimulatedRegisters` emulate the part of the
//! register map the sequence RAMs need.

extern crate memmap;

use std::error::Error;
use std::fs::File;
use std::fmt;
use std::io::{
  Read,
  Write,
};
use std::ops::Range;
use std::ptr;
use std::sync::{
  Mutex,
  MutexGuard,
};

use memmap::MmapMut;

use crate::registers::*;

/// The size of a 32bit unsigned int in byte
/// (all words in registers are u32)
pub const SIZEOF_U32 : usize = 4;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RegisterError {
  /// The register map could not be mapped
  MMapFail,
  /// Address is outside the register map
  OutOfBounds(u32),
  /// The access to the address did not go through
  BusError(u32),
  /// Waiting on/enabling the interrupt line failed
  IrqFail,
}

impl fmt::Display for RegisterError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype : String;
    match self {
      RegisterError::MMapFail => {
        etype = String::from("MMapFail");
      },
      RegisterError::OutOfBounds(addr) => {
        etype = format!("OutOfBounds (0x{:x})", addr);
      },
      RegisterError::BusError(addr) => {
        etype = format!("BusError (0x{:x})", addr);
      },
      RegisterError::IrqFail => {
        etype = String::from("IrqFail");
      }
    }
    write!(f, "<RegisterError: {}>", etype)
  }
}

impl Error for RegisterError {
}

/// 32bit register access by byte offset
///
/// Implementations have to be usable from the
/// interrupt listener and the control system
/// threads at the same time.
pub trait RegisterIo : Send + Sync {
  fn read32(&self, addr : u32) -> Result<u32, RegisterError>;

  fn write32(&self, addr : u32, data : u32) -> Result<(), RegisterError>;

  /// 16bit registers share a word with a neighbour. The
  /// one at the higher address is the low half of the word.
  fn read16(&self, addr : u32) -> Result<u16, RegisterError> {
    let word = self.read32(addr & !0x3)?;
    if addr & 0x2 == 0x2 {
      Ok((word & 0xffff) as u16)
    } else {
      Ok((word >> 16) as u16)
    }
  }
}

/// The register map of a card, mapped from /dev/uio*
pub struct UioRegisters {
  device : String,
  /// keeps the mapping alive, all accesses go through `base`
  _map   : MmapMut,
  base   : *mut u8,
  size   : usize,
}

// all accesses are single volatile word reads/writes
// into device memory
unsafe impl Send for UioRegisters {}
unsafe impl Sync for UioRegisters {}

impl UioRegisters {
  /// Map `size` bytes of the register map of `device`
  pub fn new(device : &str, size : usize) -> Result<Self, RegisterError> {
    let file = match File::options().read(true).write(true).open(device) {
      Err(err) => {
        error!("Can not open {}! {}", device, err);
        return Err(RegisterError::MMapFail);
      }
      Ok(file) => file,
    };
    let mut map = match unsafe {
      memmap::MmapOptions::new()
        .offset(0)
        .len(size)
        .map_mut(&file)
    } {
      Err(err) => {
        error!("Failed to mmap {}! {}", device, err);
        return Err(RegisterError::MMapFail);
      }
      Ok(map) => map,
    };
    let base = map.as_mut_ptr();
    info!("Mapped {} bytes of {}", size, device);
    Ok(Self {
      device : String::from(device),
      _map   : map,
      base   : base,
      size   : size,
    })
  }

  pub fn device(&self) -> &str {
    &self.device
  }

  fn check(&self, addr : u32) -> Result<usize, RegisterError> {
    let offset = addr as usize;
    if offset % SIZEOF_U32 != 0 || offset + SIZEOF_U32 > self.size {
      return Err(RegisterError::OutOfBounds(addr));
    }
    Ok(offset)
  }
}

impl RegisterIo for UioRegisters {
  fn read32(&self, addr : u32) -> Result<u32, RegisterError> {
    let offset = self.check(addr)?;
    let value : u32;
    unsafe {
      value = ptr::read_volatile(self.base.add(offset) as *const u32);
    }
    Ok(value)
  }

  fn write32(&self, addr : u32, data : u32) -> Result<(), RegisterError> {
    let offset = self.check(addr)?;
    trace!("Writing 0x{:x} at addr 0x{:x}", data, addr);
    unsafe {
      ptr::write_volatile(self.base.add(offset) as *mut u32, data);
    }
    Ok(())
  }
}

/// The interrupt line of a card, through /dev/uio*
pub struct UioInterrupt {
  device : String,
  file   : File,
}

impl UioInterrupt {
  pub fn new(device : &str) -> Result<Self, RegisterError> {
    match File::options().read(true).write(true).open(device) {
      Err(err) => {
        error!("Can not open {} for interrupts! {}", device, err);
        Err(RegisterError::IrqFail)
      }
      Ok(file) => Ok(Self {
        device : String::from(device),
        file   : file,
      })
    }
  }

  /// (Re)enable the interrupt line
  pub fn enable(&mut self) -> Result<(), RegisterError> {
    match self.file.write_all(&1u32.to_ne_bytes()) {
      Err(err) => {
        error!("Can not enable interrupts on {}! {}", self.device, err);
        Err(RegisterError::IrqFail)
      }
      Ok(_) => Ok(())
    }
  }

  /// Block until the next interrupt. Returns the
  /// total number of interrupts seen by the kernel.
  pub fn wait(&mut self) -> Result<u32, RegisterError> {
    let mut buf = [0u8; SIZEOF_U32];
    match self.file.read_exact(&mut buf) {
      Err(err) => {
        error!("Waiting for interrupt on {} failed! {}", self.device, err);
        Err(RegisterError::IrqFail)
      }
      Ok(_) => Ok(u32::from_ne_bytes(buf))
    }
  }
}

/// Strobes in the sequencer control register,
/// they do not keep their value
const SEQ_CTRL_STROBES : u32 = SEQ_CTRL_SW_TRIG
                             | SEQ_CTRL_RESET
                             | SEQ_CTRL_DISABLE
                             | SEQ_CTRL_ARM;

#[derive(Debug)]
struct SimState {
  words    : Vec<u32>,
  /// accesses to these addresses fail
  fault    : Option<Range<u32>>,
  n_writes : usize,
}

/// An event generator in memory
///
/// Knows about the sequencer control registers
/// (arm, disable, reset, software trigger, status
/// bits) and the interrupt flags. Playing the sequence
/// has to be done from the outside with
/// `start_sequence` and `end_sequence`.
#[derive(Debug)]
pub struct SimulatedRegisters {
  state : Mutex<SimState>,
}

impl SimulatedRegisters {
  pub fn new() -> Self {
    let mut words = vec![0u32; EVG_REGMAP_SIZE/SIZEOF_U32];
    words[(FPGA_VERSION as usize)/SIZEOF_U32]  = 0x2207_0207;
    // 125 MHz event clock
    words[(USEC_DIV_WORD as usize)/SIZEOF_U32] = 125;
    Self {
      state : Mutex::new(SimState {
        words    : words,
        fault    : None,
        n_writes : 0,
      })
    }
  }

  fn lock(&self) -> MutexGuard<'_, SimState> {
    match self.state.lock() {
      Ok(state) => state,
      Err(err)  => err.into_inner(),
    }
  }

  /// Let every access to `addrs` fail with a bus error,
  /// None to heal
  pub fn inject_fault(&self, addrs : Option<Range<u32>>) {
    self.lock().fault = addrs;
  }

  /// Number of register writes so far
  pub fn n_writes(&self) -> usize {
    self.lock().n_writes
  }

  /// Sequence RAM `bank` got triggered. Returns false
  /// if it was not armed.
  pub fn start_sequence(&self, bank : usize) -> bool {
    let mut state = self.lock();
    let ctrl_idx  = (seq_control(bank) as usize)/SIZEOF_U32;
    let ctrl      = state.words[ctrl_idx];
    if ctrl & SEQ_CTRL_ENABLED == 0 || ctrl & SEQ_CTRL_RUNNING != 0 {
      return false;
    }
    state.words[ctrl_idx] |= SEQ_CTRL_RUNNING;
    state.words[(IRQ_FLAG as usize)/SIZEOF_U32] |= irq_start_ram(bank);
    true
  }

  /// Sequence RAM `bank` played the end of sequence
  /// marker. Returns false if it was not running.
  pub fn end_sequence(&self, bank : usize) -> bool {
    let mut state = self.lock();
    let ctrl_idx  = (seq_control(bank) as usize)/SIZEOF_U32;
    let ctrl      = state.words[ctrl_idx];
    if ctrl & SEQ_CTRL_RUNNING == 0 {
      return false;
    }
    let mut new_ctrl = ctrl & !SEQ_CTRL_RUNNING;
    if ctrl & SEQ_CTRL_REPEAT_MASK == SEQ_CTRL_SINGLE {
      new_ctrl &= !SEQ_CTRL_ENABLED;
    }
    state.words[ctrl_idx] = new_ctrl;
    state.words[(IRQ_FLAG as usize)/SIZEOF_U32] |= irq_stop_ram(bank);
    true
  }

  /// Sequence RAM `bank` is armed and would react to
  /// a trigger
  pub fn is_armed(&self, bank : usize) -> bool {
    let state = self.lock();
    let ctrl  = state.words[(seq_control(bank) as usize)/SIZEOF_U32];
    ctrl & SEQ_CTRL_ENABLED != 0 && ctrl & SEQ_CTRL_RUNNING == 0
  }

  /// Interrupts which are flagged and enabled
  pub fn pending_irq(&self) -> u32 {
    let state   = self.lock();
    let flags   = state.words[(IRQ_FLAG as usize)/SIZEOF_U32];
    let enabled = state.words[(IRQ_ENABLE as usize)/SIZEOF_U32];
    if enabled & IRQ_MASTER_ENABLE == 0 {
      return 0;
    }
    flags & enabled
  }

  fn write_seq_control(state : &mut SimState, bank : usize, data : u32) {
    let idx      = (seq_control(bank) as usize)/SIZEOF_U32;
    let old      = state.words[idx];
    let status   = old & (SEQ_CTRL_RUNNING | SEQ_CTRL_ENABLED);
    let mut word = status | (data & SEQ_CTRL_WRITABLE_MASK & !SEQ_CTRL_STROBES);
    if data & SEQ_CTRL_DISABLE != 0 {
      word &= !(SEQ_CTRL_ENABLED | SEQ_CTRL_RUNNING);
    }
    if data & SEQ_CTRL_RESET != 0 {
      word &= !SEQ_CTRL_RUNNING;
    }
    if data & SEQ_CTRL_ARM != 0 {
      word |= SEQ_CTRL_ENABLED;
    }
    if data & SEQ_CTRL_SW_TRIG != 0 {
      let own_trigger = TRIG_SRC_SOFT + bank as u32;
      if word & SEQ_CTRL_ENABLED != 0
        && word & SEQ_CTRL_RUNNING == 0
        && word & SEQ_CTRL_TRIG_SRC_MASK == own_trigger {
        word |= SEQ_CTRL_RUNNING;
        state.words[(IRQ_FLAG as usize)/SIZEOF_U32] |= irq_start_ram(bank);
      }
    }
    state.words[idx] = word;
  }
}

impl Default for SimulatedRegisters {
  fn default() -> Self {
    Self::new()
  }
}

impl RegisterIo for SimulatedRegisters {
  fn read32(&self, addr : u32) -> Result<u32, RegisterError> {
    let state = self.lock();
    if (addr as usize) % SIZEOF_U32 != 0 || (addr as usize) + SIZEOF_U32 > EVG_REGMAP_SIZE {
      return Err(RegisterError::OutOfBounds(addr));
    }
    if let Some(range) = &state.fault {
      if range.contains(&addr) {
        return Err(RegisterError::BusError(addr));
      }
    }
    Ok(state.words[(addr as usize)/SIZEOF_U32])
  }

  fn write32(&self, addr : u32, data : u32) -> Result<(), RegisterError> {
    let mut state = self.lock();
    if (addr as usize) % SIZEOF_U32 != 0 || (addr as usize) + SIZEOF_U32 > EVG_REGMAP_SIZE {
      return Err(RegisterError::OutOfBounds(addr));
    }
    if let Some(range) = &state.fault {
      if range.contains(&addr) {
        return Err(RegisterError::BusError(addr));
      }
    }
    state.n_writes += 1;
    if addr == IRQ_FLAG {
      // write 1 to clear
      state.words[(IRQ_FLAG as usize)/SIZEOF_U32] &= !data;
      return Ok(());
    }
    for bank in 0..NUM_SEQ_RAMS {
      if addr == seq_control(bank) {
        Self::write_seq_control(&mut state, bank, data);
        return Ok(());
      }
    }
    if addr == FPGA_VERSION {
      return Ok(());
    }
    state.words[(addr as usize)/SIZEOF_U32] = data;
    Ok(())
  }
}

#[cfg(test)]
mod test_memory {
  use super::*;

  #[test]
  fn usec_div_is_low_half() {
    let sim = SimulatedRegisters::new();
    assert_eq!(sim.read16(USEC_DIV).unwrap(), 125);
    assert_eq!(sim.read16(USEC_DIV_WORD).unwrap(), 0);
  }

  #[test]
  fn arm_trigger_end() {
    let sim  = SimulatedRegisters::new();
    let ctrl = seq_control(1);
    sim.write32(ctrl, SEQ_CTRL_SINGLE | (TRIG_SRC_SOFT + 1) | SEQ_CTRL_ARM).unwrap();
    let word = sim.read32(ctrl).unwrap();
    assert_ne!(word & SEQ_CTRL_ENABLED, 0);
    assert_eq!(word & SEQ_CTRL_ARM, 0);
    assert!(sim.is_armed(1));
    sim.write32(ctrl, SEQ_CTRL_SINGLE | (TRIG_SRC_SOFT + 1) | SEQ_CTRL_SW_TRIG).unwrap();
    assert_ne!(sim.read32(ctrl).unwrap() & SEQ_CTRL_RUNNING, 0);
    assert!(sim.end_sequence(1));
    assert_eq!(sim.read32(ctrl).unwrap() & (SEQ_CTRL_RUNNING | SEQ_CTRL_ENABLED), 0);
    let flags = sim.read32(IRQ_FLAG).unwrap();
    assert_eq!(flags, irq_start_ram(1) | irq_stop_ram(1));
    sim.write32(IRQ_FLAG, flags).unwrap();
    assert_eq!(sim.read32(IRQ_FLAG).unwrap(), 0);
  }

  #[test]
  fn faults_and_bounds() {
    let sim = SimulatedRegisters::new();
    sim.inject_fault(Some(0x8000..0x8010));
    assert_eq!(sim.write32(0x8008, 1), Err(RegisterError::BusError(0x8008)));
    assert!(sim.write32(0x8010, 1).is_ok());
    assert_eq!(sim.read32(0x10000), Err(RegisterError::OutOfBounds(0x10000)));
    sim.inject_fault(None);
    assert!(sim.write32(0x8008, 1).is_ok());
  }
}
