//! # Sequence RAM daemon for MRM event generators
//!
//! Sets up the card and its sequences from a config
//! file, loads the sequences into the sequence RAMs and
//! keeps serving the interrupts until stopped.
//!
use std::sync::{
  Arc,
  Mutex,
};
use std::sync::atomic::{
  AtomicBool,
  Ordering,
};
use std::process::exit;
use std::thread;
use std::time::{
  Duration,
  Instant,
};

extern crate crossbeam_channel;
use crossbeam_channel::unbounded;

#[macro_use] extern crate log;

extern crate clap;
use clap::Parser;
use colored::Colorize;
use signal_hook::consts::{
  SIGINT,
  SIGTERM,
};

use evgseq_lib::{
  init_env_logger,
  EvgSeqSettings,
  ScanRequest,
  ThreadControl,
};
use evgseq_mrm::card::{
  CardRegistry,
  EvgCard,
};
use evgseq_mrm::memory::{
  RegisterIo,
  SimulatedRegisters,
  UioInterrupt,
  UioRegisters,
};
use evgseq_mrm::threads::{
  irq_dispatcher,
  irq_listener,
  sim_sequencer,
};

#[derive(Parser, Debug)]
#[command(author = "evgseq", version, about, long_about = None)]
struct Args {
  /// Settings for the card and the sequences
  #[arg(short, long)]
  config : Option<String>,
  /// Do not touch any hardware, simulate the card
  #[arg(long, default_value_t = false)]
  simulate : bool,
  /// Detail of the periodic report (0 - off, 3 - everything)
  #[arg(short, long, default_value_t = 1)]
  report_level : u8,
  /// Write the default settings to this file and exit
  #[arg(long)]
  write_default_config : Option<String>,
}

fn main() {
  init_env_logger();
  let args = Args::parse();

  if let Some(fname) = args.write_default_config {
    let settings = EvgSeqSettings::new();
    match settings.to_toml(&fname) {
      Err(err) => {
        error!("Unable to write default settings! {}", err);
        exit(1);
      }
      Ok(_) => {
        println!("=> Wrote default settings to {}", fname);
        exit(0);
      }
    }
  }

  let settings = match &args.config {
    None => {
      warn!("No config file given, using the default settings!");
      EvgSeqSettings::new()
    }
    Some(fname) => {
      match EvgSeqSettings::from_toml(fname) {
        Err(err) => {
          error!("Unable to read settings from {}! {}", fname, err);
          exit(1);
        }
        Ok(settings) => settings,
      }
    }
  };
  debug!("Using settings {}", settings);
  let simulate = args.simulate || settings.card.simulate;

  let thread_control = Arc::new(Mutex::new(ThreadControl::new()));
  let (scan_tx, scan_rx) = unbounded::<ScanRequest>();

  let mut sim : Option<Arc<SimulatedRegisters>> = None;
  let io : Arc<dyn RegisterIo> = if simulate {
    println!("=> {}", "Simulating the card, no hardware will be touched!".yellow().bold());
    let regs = Arc::new(SimulatedRegisters::new());
    sim = Some(Arc::clone(&regs));
    regs
  } else {
    match UioRegisters::new(&settings.card.uio_device, settings.card.regmap_size) {
      Err(err) => {
        error!("Can not access the card through {}! {}", settings.card.uio_device, err);
        exit(1);
      }
      Ok(regs) => Arc::new(regs),
    }
  };

  let card = match EvgCard::new(settings.card.id, io, settings.card.event_clock_mhz, Some(scan_tx)) {
    Err(err) => {
      error!("Unable to set up card {}! {}", settings.card.id, err);
      exit(1);
    }
    Ok(card) => card,
  };
  let mut registry = CardRegistry::new();
  let card = match registry.add(card) {
    Err(err) => {
      error!("Unable to register card! {}", err);
      exit(1);
    }
    Ok(card) => card,
  };
  if let Err(err) = card.configure(&settings.sequences) {
    // keep going with what could be set up
    error!("Configuring the sequences failed! {}", err);
  }
  let registry = Arc::new(registry);

  // first half of the interrupt handling
  match &sim {
    Some(regs) => {
      let regs_c   = Arc::clone(regs);
      let card_c   = Arc::clone(&card);
      let tc_c     = Arc::clone(&thread_control);
      let period   = Duration::from_millis(settings.dispatcher.sim_period_ms);
      let spawned = thread::Builder::new()
        .name("sim-sequencer".into())
        .spawn(move || {
          sim_sequencer(regs_c, card_c, period, tc_c);
        });
      if let Err(err) = spawned {
        error!("Unable to start the simulated sequencer, nothing will be played! {}", err);
      }
    }
    None => {
      match UioInterrupt::new(&settings.card.uio_device) {
        Err(err) => {
          error!("No interrupts for card {}, sequence RAMs will not be swapped! {}", card.id(), err);
        }
        Ok(uio) => {
          let card_c = Arc::clone(&card);
          let tc_c   = Arc::clone(&thread_control);
          let spawned = thread::Builder::new()
            .name("irq-listener".into())
            .spawn(move || {
              irq_listener(card_c, uio, tc_c);
            });
          if let Err(err) = spawned {
            error!("Unable to start the interrupt listener, sequence RAMs will not be swapped! {}", err);
          }
        }
      }
    }
  }

  // second half
  let registry_c    = Arc::clone(&registry);
  let tc_c          = Arc::clone(&thread_control);
  let poll_interval = Duration::from_millis(settings.dispatcher.poll_interval_ms);
  let dispatcher = thread::Builder::new()
    .name("irq-dispatcher".into())
    .spawn(move || {
      irq_dispatcher(registry_c, poll_interval, tc_c);
    });
  let dispatcher = match dispatcher {
    Err(err) => {
      error!("Unable to start the interrupt dispatcher, interrupts will not be served! {}", err);
      None
    },
    Ok(handle) => Some(handle),
  };

  let stop = Arc::new(AtomicBool::new(false));
  for sig in [SIGINT, SIGTERM] {
    if let Err(err) = signal_hook::flag::register(sig, Arc::clone(&stop)) {
      error!("Can not install handler for signal {}! {}", sig, err);
    }
  }

  println!("==> All threads initialized!");
  let report_interval = Duration::from_secs(settings.dispatcher.report_interval_s);
  let mut report_timer = Instant::now();
  while !stop.load(Ordering::Relaxed) {
    for req in scan_rx.try_iter() {
      debug!("{}", req);
    }
    if settings.dispatcher.report_interval_s > 0 && report_timer.elapsed() > report_interval {
      for card in registry.cards() {
        println!("[{}]\n{}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"), card.report(args.report_level));
      }
      report_timer = Instant::now();
    }
    thread::sleep(Duration::from_millis(100));
  }

  println!("==> \u{1F6D1} received signal, stopping the sequence RAMs!");
  for card in registry.cards() {
    for seq in card.sequences() {
      if seq.bound_bank().is_some() {
        if let Err(err) = card.disable(seq.id()) {
          error!("Can not disable sequence {}! {}", seq.id(), err);
        }
      }
    }
  }
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.stop_flag = true;
    },
    Err(err) => {
      error!("Can't acquire lock! {err}");
    },
  }
  // the listener might sit in a blocking read, only
  // the dispatcher is waited for
  if let Some(handle) = dispatcher {
    if handle.join().is_err() {
      error!("The interrupt dispatcher panicked!");
    }
  }
  println!("So long and thanks for all the \u{1F41F}");
}
