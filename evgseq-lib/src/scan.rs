//! Notifications to the control system that readback
//! values have changed and should be read again

use std::fmt;

use crossbeam_channel::Sender;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScanKind {
  /// inputs, committed table, binding or enable state changed
  Changed,
  /// the sequence RAM started playing the sequence
  Started,
  /// the sequence RAM reached the end of the sequence
  Ended,
  /// a new error message is available
  Error,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanRequest {
  pub card     : u32,
  pub sequence : u32,
  pub kind     : ScanKind,
}

impl fmt::Display for ScanRequest {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<ScanRequest: card {} seq {} {:?}>", self.card, self.sequence, self.kind)
  }
}

/// Fire and forget. Nobody listening is not an error.
pub fn request_scan(ch : &Option<Sender<ScanRequest>>, req : ScanRequest) {
  if let Some(sender) = ch {
    match sender.try_send(req) {
      Err(err) => trace!("Can't send {}! {err}", req),
      Ok(_)    => ()
    }
  }
}
