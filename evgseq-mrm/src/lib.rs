//! Sequence RAMs of MRM event generator cards
//!
//! The card side of the sequence engine: register map,
//! register access through /dev/uio (or a simulation),
//! loading tables into the sequence RAMs and the
//! interrupt handling.

pub mod registers;
pub mod memory;
pub mod control;
pub mod seqram;
pub mod card;
pub mod threads;

extern crate crossbeam_channel;
#[macro_use] extern crate log;

pub use card::{
  CardError,
  CardRegistry,
  EvgCard,
  IrqEvent,
};
pub use seqram::{
  BankState,
  SeqRamError,
  SequenceRamSync,
  SwapOutcome,
};
