//! Registers of the MRM event generator which are
//! needed to drive the sequence RAMs. All offsets are
//! byte offsets (Addr8) into the register map, every
//! register is 32bit big unless noted otherwise.
//!
//! Registers with the same address hold different
//! fields in different bits.

/// Size of the register map exposed through /dev/uio
pub const EVG_REGMAP_SIZE   : usize = 0x10000;

/// Number of sequence RAMs on the card
pub const NUM_SEQ_RAMS      : usize = 2;

//========== Interrupts =================
//
//=======================================

pub const IRQ_FLAG          : u32 = 0x08;   // [31:0] rw1c pending interrupts
pub const IRQ_ENABLE        : u32 = 0x0c;   // [31:0] rw   interrupt mask

pub const IRQ_MASTER_ENABLE : u32 = 0x8000_0000; // [31] master enable (IRQ_ENABLE only)

/// End of sequence interrupt flag of sequence RAM `n`
pub const fn irq_stop_ram(n : usize) -> u32 {
  0x1000 << n
}

/// Start of sequence interrupt flag of sequence RAM `n`
pub const fn irq_start_ram(n : usize) -> u32 {
  0x100 << n
}

//========== General ====================
//
//=======================================

pub const FPGA_VERSION      : u32 = 0x2c;   // [31:0] ro firmware version
/// 16bit register in the low half of the word at 0x4c
/// (big endian word layout)
pub const USEC_DIV          : u32 = 0x4e;   // [15:0] rw event clock in MHz (rounded)
pub const USEC_DIV_WORD     : u32 = 0x4c;

//========== Sequencer control ==========
//
//=======================================

/// Control register of sequence RAM `n`
pub const fn seq_control(n : usize) -> u32 {
  0x70 + 4*(n as u32)
}

pub const SEQ_CTRL_RUNNING  : u32 = 0x0200_0000; // [25] ro sequence is playing
pub const SEQ_CTRL_ENABLED  : u32 = 0x0100_0000; // [24] ro armed, waiting for trigger
pub const SEQ_CTRL_SW_TRIG  : u32 = 0x0020_0000; // [21] wo software trigger strobe
pub const SEQ_CTRL_RESET    : u32 = 0x0004_0000; // [18] wo reset the RAM pointer
pub const SEQ_CTRL_DISABLE  : u32 = 0x0002_0000; // [17] wo disarm
pub const SEQ_CTRL_ARM      : u32 = 0x0001_0000; // [16] wo arm

pub const SEQ_CTRL_REPEAT_MASK : u32 = 0x0018_0000; // [20:19] rw run mode
pub const SEQ_CTRL_NORMAL      : u32 = 0x0000_0000; // restart on every trigger
pub const SEQ_CTRL_SINGLE      : u32 = 0x0010_0000; // disarm after one pass
pub const SEQ_CTRL_RECYCLE     : u32 = 0x0008_0000; // restart without trigger

pub const SEQ_CTRL_TRIG_SRC_MASK : u32 = 0x0000_00ff; // [7:0] rw trigger source
/// Bits which keep their value, all others are strobes
/// or read only
pub const SEQ_CTRL_WRITABLE_MASK : u32 = 0x00ff_ffff;

/// Trigger source codes
pub const TRIG_SRC_AC       : u32 = 16;
/// software trigger of sequence RAM 0, RAM n is + n
pub const TRIG_SRC_SOFT     : u32 = 17;
pub const TRIG_SRC_DISABLED : u32 = 31;
pub const TRIG_SRC_MXC_MAX  : u8  = 7;

//========== Sequence RAM ===============
//
//=======================================

pub const SEQ_RAM_BASE      : u32 = 0x8000;
pub const SEQ_RAM_STRIDE    : u32 = 0x4000;
/// Each entry is a 32bit timestamp followed by
/// a 32bit word with the event code
pub const SEQ_RAM_ENTRY     : u32 = 8;

/// Address of the timestamp word of entry `i` of
/// sequence RAM `n`. The code word is at + 4.
pub const fn seq_ram_entry(n : usize, i : usize) -> u32 {
  SEQ_RAM_BASE + SEQ_RAM_STRIDE*(n as u32) + SEQ_RAM_ENTRY*(i as u32)
}
