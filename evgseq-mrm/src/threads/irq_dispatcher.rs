use std::sync::{
  Arc,
  Mutex,
};
use std::time::Duration;

use evgseq_lib::ThreadControl;

use crate::card::CardRegistry;

/// Second half of the interrupt handling
///
/// Does the work for the interrupts handed over by the
/// listeners (counting, swapping tables) and retries
/// swaps which could not be done right away.
///
/// # Arguments:
///
/// * registry       - all cards
/// * poll_interval  - wait at most this long for an
///                    interrupt before checking on the
///                    pending swaps
/// * thread_control - stop flag, liveness
pub fn irq_dispatcher(registry       : Arc<CardRegistry>,
                      poll_interval  : Duration,
                      thread_control : Arc<Mutex<ThreadControl>>) {
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_dispatcher_active = true;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
  let cards = registry.cards();
  if cards.is_empty() {
    warn!("No cards to dispatch interrupts for!");
  }
  // every card gets its share of the interval
  let per_card = poll_interval/(cards.len().max(1) as u32);
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
    if cards.is_empty() {
      std::thread::sleep(poll_interval);
      continue;
    }
    for card in cards.iter() {
      let n_events = card.wait_and_service(per_card);
      if n_events > 0 {
        trace!("Card {} : {} interrupt events", card.id(), n_events);
      }
    }
  }
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_dispatcher_active = false;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
}
