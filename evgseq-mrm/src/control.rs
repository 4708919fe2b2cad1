//! Convenience functions to read/write
//!  the sequencer related registers
//!
//!  For the mapping of registers/addresses,
//!  see `registers.rs`
//!

use evgseq_lib::constants::{
  END_OF_SEQUENCE,
  MAX_SEQUENCE_EVENTS,
};
use evgseq_lib::{
  RunMode,
  TriggerSource,
};

use crate::registers::*;
use crate::memory::{
  RegisterError,
  RegisterIo,
};

/// The trigger source code for sequence RAM `bank`
pub fn trigger_source_code(src : TriggerSource, bank : usize) -> u32 {
  match src {
    TriggerSource::Mxc(n)   => {
      if n > TRIG_SRC_MXC_MAX {
        warn!("There is no multiplexed counter {}, disabling trigger!", n);
        TRIG_SRC_DISABLED
      } else {
        n as u32
      }
    },
    TriggerSource::AcInput  => TRIG_SRC_AC,
    TriggerSource::Software => TRIG_SRC_SOFT + bank as u32,
    TriggerSource::Disabled => TRIG_SRC_DISABLED,
  }
}

pub fn run_mode_bits(mode : RunMode) -> u32 {
  match mode {
    RunMode::Single    => SEQ_CTRL_SINGLE,
    RunMode::Automatic => SEQ_CTRL_RECYCLE,
    RunMode::Normal    => SEQ_CTRL_NORMAL,
  }
}

/// The persistent part of the control register
pub fn control_word(src : TriggerSource, mode : RunMode, bank : usize) -> u32 {
  trigger_source_code(src, bank) | run_mode_bits(mode)
}

pub fn read_seq_control(io : &dyn RegisterIo, bank : usize) -> Result<u32, RegisterError> {
  io.read32(seq_control(bank))
}

/// Write the persistent bits of the control register
pub fn write_seq_control(io : &dyn RegisterIo, bank : usize, value : u32) -> Result<(), RegisterError> {
  io.write32(seq_control(bank), value & SEQ_CTRL_WRITABLE_MASK)
}

/// Write one of the strobes, keeping the persistent bits
fn seq_strobe(io : &dyn RegisterIo, bank : usize, shadow : u32, strobe : u32) -> Result<(), RegisterError> {
  write_seq_control(io, bank, shadow | strobe)
}

pub fn arm_seq_ram(io : &dyn RegisterIo, bank : usize, shadow : u32) -> Result<(), RegisterError> {
  trace!("Arm sequence RAM {}", bank);
  seq_strobe(io, bank, shadow, SEQ_CTRL_ARM)?;
  Ok(())
}

pub fn disable_seq_ram(io : &dyn RegisterIo, bank : usize, shadow : u32) -> Result<(), RegisterError> {
  trace!("Disable sequence RAM {}", bank);
  seq_strobe(io, bank, shadow, SEQ_CTRL_DISABLE)?;
  Ok(())
}

pub fn reset_seq_ram(io : &dyn RegisterIo, bank : usize, shadow : u32) -> Result<(), RegisterError> {
  trace!("Reset sequence RAM {}", bank);
  seq_strobe(io, bank, shadow, SEQ_CTRL_RESET)?;
  Ok(())
}

pub fn soft_trigger_seq_ram(io : &dyn RegisterIo, bank : usize, shadow : u32) -> Result<(), RegisterError> {
  trace!("Software trigger for sequence RAM {}", bank);
  seq_strobe(io, bank, shadow, SEQ_CTRL_SW_TRIG)?;
  Ok(())
}

/// Check if the sequence RAM is playing right now
pub fn seq_ram_running(io : &dyn RegisterIo, bank : usize) -> Result<bool, RegisterError> {
  let value = read_seq_control(io, bank)?;
  Ok(value & SEQ_CTRL_RUNNING > 0)
}

/// Check if the sequence RAM is armed
pub fn seq_ram_enabled(io : &dyn RegisterIo, bank : usize) -> Result<bool, RegisterError> {
  let value = read_seq_control(io, bank)?;
  Ok(value & SEQ_CTRL_ENABLED > 0)
}

/// Copy a table into sequence RAM `bank`, entry by
/// entry. The table has to carry the end marker.
pub fn write_seq_ram_table(io         : &dyn RegisterIo,
                           bank       : usize,
                           codes      : &[u8],
                           timestamps : &[u32]) -> Result<(), RegisterError> {
  let n_entries = codes.len().min(timestamps.len()).min(MAX_SEQUENCE_EVENTS);
  for k in 0..n_entries {
    let addr = seq_ram_entry(bank, k);
    io.write32(addr, timestamps[k])?;
    io.write32(addr + 4, codes[k] as u32)?;
  }
  debug!("Wrote {} entries into sequence RAM {}", n_entries, bank);
  Ok(())
}

/// Read back the table in sequence RAM `bank`, up to
/// and including the end marker
pub fn read_seq_ram_table(io : &dyn RegisterIo, bank : usize)
  -> Result<(Vec<u8>, Vec<u32>), RegisterError> {
  let mut codes = Vec::<u8>::new();
  let mut times = Vec::<u32>::new();
  for k in 0..MAX_SEQUENCE_EVENTS {
    let addr = seq_ram_entry(bank, k);
    let ts   = io.read32(addr)?;
    let code = (io.read32(addr + 4)? & 0xff) as u8;
    codes.push(code);
    times.push(ts);
    if code == END_OF_SEQUENCE {
      break;
    }
  }
  Ok((codes, times))
}

pub fn read_irq_flags(io : &dyn RegisterIo) -> Result<u32, RegisterError> {
  io.read32(IRQ_FLAG)
}

/// Clear the given flags (write 1 to clear)
pub fn ack_irq(io : &dyn RegisterIo, flags : u32) -> Result<(), RegisterError> {
  io.write32(IRQ_FLAG, flags)
}

/// Enable start and end of sequence interrupts for all
/// sequence RAMs, leaving other sources as they are
pub fn enable_seq_irqs(io : &dyn RegisterIo) -> Result<(), RegisterError> {
  let mut mask = io.read32(IRQ_ENABLE)?;
  mask |= IRQ_MASTER_ENABLE;
  for bank in 0..NUM_SEQ_RAMS {
    mask |= irq_start_ram(bank) | irq_stop_ram(bank);
  }
  io.write32(IRQ_ENABLE, mask)?;
  Ok(())
}

/// The event clock in MHz as programmed in the
/// card (0 if not set)
pub fn event_clock_mhz(io : &dyn RegisterIo) -> Result<u16, RegisterError> {
  io.read16(USEC_DIV)
}

pub fn fpga_version(io : &dyn RegisterIo) -> Result<u32, RegisterError> {
  io.read32(FPGA_VERSION)
}
