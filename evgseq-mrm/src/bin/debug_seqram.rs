//! Dump the sequencer registers and the content
//! of the sequence RAMs of a card
extern crate evgseq_mrm;

use clap::Parser;

use evgseq_mrm::control::*;
use evgseq_mrm::memory::*;
use evgseq_mrm::registers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
  /// uio device of the card
  #[arg(short, long, default_value_t = String::from("/dev/uio0"))]
  device : String,
  /// Number of entries to print per sequence RAM
  #[arg(short, long, default_value_t = 16)]
  nentries : usize,
}

fn decode_control(ctrl : u32) -> String {
  let mode = match ctrl & SEQ_CTRL_REPEAT_MASK {
    SEQ_CTRL_SINGLE  => "single",
    SEQ_CTRL_RECYCLE => "recycle",
    SEQ_CTRL_NORMAL  => "normal",
    _                => "??",
  };
  format!("0x{:08x} (running {}, enabled {}, mode {}, trig src {})",
          ctrl,
          ctrl & SEQ_CTRL_RUNNING > 0,
          ctrl & SEQ_CTRL_ENABLED > 0,
          mode,
          ctrl & SEQ_CTRL_TRIG_SRC_MASK)
}

fn main () {
  let args = Args::parse();
  let regs = match UioRegisters::new(&args.device, EVG_REGMAP_SIZE) {
    Err(err) => {
      println!("=> Can not map {}! {}", args.device, err);
      return;
    }
    Ok(regs) => regs,
  };
  println!("=> Firmware    : {:?}", fpga_version(&regs).map(|v| format!("0x{:08x}", v)));
  println!("=> Event clock : {:?} MHz", event_clock_mhz(&regs));
  println!("=> IRQ flags   : {:?}", read_irq_flags(&regs).map(|v| format!("0x{:08x}", v)));
  println!("=> IRQ enable  : {:?}", regs.read32(IRQ_ENABLE).map(|v| format!("0x{:08x}", v)));
  for bank in 0..NUM_SEQ_RAMS {
    match read_seq_control(&regs, bank) {
      Err(err) => println!("=> Sequence RAM {} : {}", bank, err),
      Ok(ctrl) => println!("=> Sequence RAM {} : {}", bank, decode_control(ctrl)),
    }
    match read_seq_ram_table(&regs, bank) {
      Err(err) => println!("   can not read table! {}", err),
      Ok((codes, times)) => {
        println!("   {} entries (including end marker)", codes.len());
        for (code, ts) in codes.iter().zip(times.iter()).take(args.nentries) {
          println!("   {:>10} -> {:3}", ts, code);
        }
      }
    }
  }
}
