//! Thread control structures

use std::fmt;

/// Send runtime information
/// to threads via shared memory
/// (Arc(Mutex)
#[derive(Default, Debug)]
pub struct ThreadControl {
  /// Stop ALL threads
  pub stop_flag                   : bool,
  /// alive indicator for the interrupt listener
  pub thread_irq_listener_active  : bool,
  /// alive indicator for the interrupt dispatcher
  pub thread_dispatcher_active    : bool,
  /// alive indicator for the simulated sequencer
  pub thread_sim_sequencer_active : bool,
}

impl ThreadControl {
  pub fn new() -> Self {
    Self {
      stop_flag                   : false,
      thread_irq_listener_active  : false,
      thread_dispatcher_active    : false,
      thread_sim_sequencer_active : false,
    }
  }
}

impl fmt::Display for ThreadControl {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ThreadControl:");
    repr        += &(format!("\n  stop flag      : {}", self.stop_flag));
    repr        += "\n  -- reported thread activity:";
    repr        += &(format!("\n  irq listener   : {}", self.thread_irq_listener_active));
    repr        += &(format!("\n  dispatcher     : {}", self.thread_dispatcher_active));
    repr        += &(format!("\n  sim sequencer  : {}>", self.thread_sim_sequencer_active));
    write!(f, "{}", repr)
  }
}
