use std::sync::{
  Arc,
  Mutex,
};
use std::thread;
use std::time::Duration;

use evgseq_lib::ThreadControl;

use crate::card::EvgCard;
use crate::memory::{
  RegisterIo,
  SimulatedRegisters,
};
use crate::registers::{
  seq_control,
  SEQ_CTRL_TRIG_SRC_MASK,
  TRIG_SRC_SOFT,
};

/// The RAM waits for a trigger from outside the card
/// (multiplexed counter or AC input)
fn external_trigger(sim : &SimulatedRegisters, bank : usize) -> bool {
  match sim.read32(seq_control(bank)) {
    Err(_)   => false,
    Ok(ctrl) => ctrl & SEQ_CTRL_TRIG_SRC_MASK < TRIG_SRC_SOFT,
  }
}

fn raise(card : &EvgCard) {
  if let Err(err) = card.on_interrupt() {
    error!("Simulated interrupt failed! {}", err);
  }
}

/// Play the sequence RAMs of a simulated card
///
/// Every period each armed sequence RAM with an external
/// trigger gets triggered and plays its table, which
/// raises the start and end of sequence interrupts.
/// Software triggered RAMs only play after a soft
/// trigger. The thread stands in for the interrupt
/// listener, so it also runs the first half of the
/// interrupt handling.
///
/// # Arguments:
///
/// * sim            - the simulated registers of `card`
/// * card           - the simulated card
/// * period         - time between two triggers
/// * thread_control - stop flag, liveness
pub fn sim_sequencer(sim            : Arc<SimulatedRegisters>,
                     card           : Arc<EvgCard>,
                     period         : Duration,
                     thread_control : Arc<Mutex<ThreadControl>>) {
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_sim_sequencer_active = true;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
  let n_banks = card.seqram().n_banks();
  loop {
    match thread_control.lock() {
      Ok(tc) => {
        if tc.stop_flag {
          info!("Received stop signal. Will stop thread!");
          break;
        }
      },
      Err(err) => {
        trace!("Can't acquire lock! {err}");
      },
    }
    thread::sleep(period);
    for bank in 0..n_banks {
      if external_trigger(&sim, bank) {
        sim.start_sequence(bank);
      }
      // software triggered RAMs are already running
      if sim.pending_irq() != 0 {
        raise(&card);
      }
      // the table takes no time to play
      if sim.end_sequence(bank) && sim.pending_irq() != 0 {
        raise(&card);
      }
    }
  }
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_sim_sequencer_active = false;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
}
