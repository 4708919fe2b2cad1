use std::sync::{
  Arc,
  Mutex,
};

use evgseq_lib::ThreadControl;

use crate::card::EvgCard;
use crate::memory::UioInterrupt;

/// First half of the interrupt handling
///
/// Blocks on the uio device until the card raises its
/// interrupt line, lets the card read and acknowledge
/// the flags, then enables the line again.
///
/// # Arguments:
///
/// * card           - the card the interrupt line belongs to
/// * uio            - interrupt line of the card
/// * thread_control - stop flag, liveness
pub fn irq_listener(card           : Arc<EvgCard>,
                    mut uio        : UioInterrupt,
                    thread_control : Arc<Mutex<ThreadControl>>) {
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_irq_listener_active = true;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
  let mut n_fails = 0u32;
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
    if let Err(err) = uio.enable() {
      error!("Can not enable interrupts for card {}! {}", card.id(), err);
      n_fails += 1;
      if n_fails > 10 {
        error!("Giving up on the interrupts of card {}!", card.id());
        break;
      }
      continue;
    }
    match uio.wait() {
      Err(err) => {
        error!("Waiting for interrupt of card {} failed! {}", card.id(), err);
        n_fails += 1;
        if n_fails > 10 {
          error!("Giving up on the interrupts of card {}!", card.id());
          break;
        }
      },
      Ok(count) => {
        n_fails = 0;
        match card.on_interrupt() {
          Err(err)  => error!("Reading interrupt flags of card {} failed! {}", card.id(), err),
          Ok(flags) => trace!("Interrupt #{} on card {}, flags 0x{:x}", count, card.id(), flags),
        }
      }
    }
  }
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_irq_listener_active = false;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
}
