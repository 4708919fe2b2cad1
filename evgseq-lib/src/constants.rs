//! Hardware limits and defaults shared by the
//! sequence construction and the card side

/// Number of entries a single sequence RAM can hold,
/// including the end-of-sequence marker
pub const MAX_SEQUENCE_EVENTS    : usize = 2048;

/// The event code which terminates a sequence in
/// the sequence RAM. Never part of user tables.
pub const END_OF_SEQUENCE        : u8    = 0x7f;

/// Largest timestamp (in event clock ticks) an event
/// may be scheduled at. 0xffffffff is reserved by the
/// firmware for controlled rollover and the marker
/// needs one more tick after the last event.
pub const MAX_EVENT_TIMESTAMP    : u32   = 0xffff_fffd;

/// Number of sequences which can be configured per card
pub const MAX_SEQUENCES_PER_CARD : usize = 16;

/// Number of cards the registry can hold
pub const MAX_CARDS              : usize = 8;

/// Event clock frequency used when the card does
/// not report one (MHz)
pub const DEFAULT_EVENT_CLOCK_MHZ : f64  = 125.0;
