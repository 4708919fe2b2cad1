pub mod irq_listener;
pub mod irq_dispatcher;
pub mod sim_sequencer;

pub use irq_listener::irq_listener;
pub use irq_dispatcher::irq_dispatcher;
pub use sim_sequencer::sim_sequencer;
