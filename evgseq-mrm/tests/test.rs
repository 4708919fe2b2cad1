use std::sync::{
  Arc,
  Mutex,
};
use std::thread;
use std::time::{
  Duration,
  Instant,
};

use rand::Rng;

use evgseq_lib::constants::END_OF_SEQUENCE;
use evgseq_lib::{
  EvgSeqSettings,
  RunMode,
  ThreadControl,
  TriggerSource,
};
use evgseq_mrm::control::read_seq_ram_table;
use evgseq_mrm::memory::{
  RegisterIo,
  SimulatedRegisters,
};
use evgseq_mrm::registers::seq_ram_entry;
use evgseq_mrm::threads::{
  irq_dispatcher,
  sim_sequencer,
};
use evgseq_mrm::{
  BankState,
  CardError,
  CardRegistry,
  EvgCard,
  SeqRamError,
};

fn sim_card() -> (Arc<SimulatedRegisters>, EvgCard) {
  let sim = Arc::new(SimulatedRegisters::new());
  let io : Arc<dyn RegisterIo> = sim.clone();
  let card = EvgCard::new(0, io, 125.0, None).unwrap();
  (sim, card)
}

#[test]
fn all_banks_busy_then_one_finishes() {
  let (sim, card) = sim_card();
  for id in 0..3 {
    card.create_sequence(id, &format!("seq {}", id)).unwrap();
    card.commit_table(id, &[1 + id as u8], &[10]).unwrap();
  }
  let mut banks = Vec::new();
  for id in 0..2 {
    card.enable(id).unwrap();
    banks.push(card.load(id).unwrap());
    card.soft_trigger(id).unwrap();
  }
  card.on_interrupt().unwrap();
  card.service_interrupts();
  for bank in banks.iter() {
    assert_eq!(card.seqram().bank_status(*bank).unwrap().0, BankState::Running);
  }
  assert_eq!(card.load(2).err(), Some(CardError::SeqRam(SeqRamError::NoIdleBank)));

  // the single shot of sequence 0 is over
  assert!(sim.end_sequence(banks[0]));
  card.on_interrupt().unwrap();
  card.service_interrupts();
  assert_eq!(card.load(2).unwrap(), banks[0]);
  assert_eq!(card.sequence(0).unwrap().bound_bank(), None);
  let (codes, _) = read_seq_ram_table(sim.as_ref(), banks[0]).unwrap();
  assert_eq!(codes, vec![3, END_OF_SEQUENCE]);
}

#[test]
fn swap_waits_for_the_sequence_lock() {
  let (sim, card) = sim_card();
  let seq = card.create_sequence(0, "").unwrap();
  seq.set_run_mode(RunMode::Normal);
  card.commit_table(0, &[1], &[10]).unwrap();
  card.enable(0).unwrap();
  let bank = card.load(0).unwrap();
  card.soft_trigger(0).unwrap();
  card.on_interrupt().unwrap();
  card.service_interrupts();

  card.commit_table(0, &[2, 3], &[10, 20]).unwrap();
  assert!(card.seqram().bank_status(bank).unwrap().2);
  assert!(sim.end_sequence(bank));
  card.on_interrupt().unwrap();
  seq.store().with_table(|_| {
    card.service_interrupts();
  });
  // still the old table, the swap is pending
  assert!(card.seqram().bank_status(bank).unwrap().2);
  let (codes, _) = read_seq_ram_table(sim.as_ref(), bank).unwrap();
  assert_eq!(codes, vec![1, END_OF_SEQUENCE]);

  card.service_interrupts();
  let (codes, times) = read_seq_ram_table(sim.as_ref(), bank).unwrap();
  assert_eq!(codes, vec![2, 3, END_OF_SEQUENCE]);
  assert_eq!(times, vec![10, 20, 21]);
  assert_eq!(card.seqram().bank_status(bank).unwrap(), (BankState::Armed, Some(0), false));
  // back in normal mode, not the forced single shot
  assert!(sim.is_armed(bank));
  assert_eq!(seq.num_ends(), 1);
}

#[test]
fn normal_mode_takes_a_commit_after_a_pass() {
  let (sim, card) = sim_card();
  let seq = card.create_sequence(0, "").unwrap();
  seq.set_run_mode(RunMode::Normal);
  card.commit_table(0, &[1], &[10]).unwrap();
  card.enable(0).unwrap();
  let bank = card.load(0).unwrap();
  card.soft_trigger(0).unwrap();
  card.on_interrupt().unwrap();
  card.service_interrupts();
  assert!(sim.end_sequence(bank));
  card.on_interrupt().unwrap();
  card.service_interrupts();
  assert_eq!(card.seqram().bank_status(bank).unwrap(), (BankState::Armed, Some(0), false));

  card.commit_table(0, &[2, 3], &[10, 20]).unwrap();
  for _ in 0..5 {
    card.service_interrupts();
  }
  let (codes, _) = read_seq_ram_table(sim.as_ref(), bank).unwrap();
  assert_eq!(codes, vec![2, 3, END_OF_SEQUENCE]);
  assert!(!card.seqram().bank_status(bank).unwrap().2);
  card.soft_trigger(0).unwrap();
  card.on_interrupt().unwrap();
  card.service_interrupts();
  assert_eq!(seq.num_starts(), 2);
}

#[test]
fn bus_error_on_swap_is_recorded() {
  let (sim, card) = sim_card();
  let seq = card.create_sequence(0, "").unwrap();
  card.commit_table(0, &[1], &[10]).unwrap();
  card.enable(0).unwrap();
  let bank = card.load(0).unwrap();
  card.soft_trigger(0).unwrap();
  card.on_interrupt().unwrap();
  card.service_interrupts();
  card.commit_table(0, &[2], &[10]).unwrap();
  sim.end_sequence(bank);
  card.on_interrupt().unwrap();
  sim.inject_fault(Some(seq_ram_entry(bank, 0)..seq_ram_entry(bank, 1)));
  card.service_interrupts();
  assert!(seq.last_error().is_some());
  assert!(card.seqram().num_irq_errors() >= 1);
  assert!(card.seqram().bank_status(bank).unwrap().2);
  sim.inject_fault(None);
  card.service_interrupts();
  let (codes, _) = read_seq_ram_table(sim.as_ref(), bank).unwrap();
  assert_eq!(codes, vec![2, END_OF_SEQUENCE]);
}

#[test]
fn invalid_commit_keeps_the_ram() {
  let (sim, card) = sim_card();
  card.create_sequence(0, "").unwrap();
  card.commit_table(0, &[1, 2], &[5, 6]).unwrap();
  let bank = card.load(0).unwrap();
  let writes = sim.n_writes();
  assert!(card.commit_table(0, &[1, 2, 3], &[5, 6]).is_err());
  assert!(card.commit_table(0, &[1, 2], &[6, 5]).is_err());
  assert_eq!(sim.n_writes(), writes);
  let (codes, _) = read_seq_ram_table(sim.as_ref(), bank).unwrap();
  assert_eq!(codes, vec![1, 2, END_OF_SEQUENCE]);
}

#[test]
fn configure_from_file() {
  let settings = EvgSeqSettings::from_toml("config/evgseq.toml").unwrap();
  let (sim, card) = sim_card();
  card.configure(&settings.sequences).unwrap();
  let inj = card.sequence(0).unwrap();
  assert_eq!(inj.hardware_settings(), (TriggerSource::AcInput, RunMode::Normal));
  let table = inj.snapshot();
  assert_eq!(table.codes, vec![1, 3, 2, END_OF_SEQUENCE]);
  assert_eq!(table.timestamps, vec![125, 15625, 15625, 15626]);
  let b0 = inj.bound_bank().unwrap();
  assert!(sim.is_armed(b0));
  let test = card.sequence(1).unwrap();
  let b1 = test.bound_bank().unwrap();
  assert_ne!(b0, b1);
  assert_eq!(card.seqram().bank_status(b1).unwrap().0, BankState::Loading);
  let (codes, _) = read_seq_ram_table(sim.as_ref(), b1).unwrap();
  assert_eq!(codes, vec![10, END_OF_SEQUENCE]);
  println!("{}", card.report(3));
}

#[test]
fn commits_while_playing() {
  let sim = Arc::new(SimulatedRegisters::new());
  let io : Arc<dyn RegisterIo> = sim.clone();
  let mut registry = CardRegistry::new();
  let card = registry.add(EvgCard::new(0, io, 125.0, None).unwrap()).unwrap();
  let registry = Arc::new(registry);
  let seq = card.create_sequence(0, "busy").unwrap();
  seq.set_trigger_source(TriggerSource::Mxc(0));
  seq.set_run_mode(RunMode::Normal);
  card.commit_table(0, &[1], &[1]).unwrap();
  card.enable(0).unwrap();
  let bank = card.load(0).unwrap();

  let thread_control = Arc::new(Mutex::new(ThreadControl::new()));
  let (sim_c, card_c, tc_c) = (Arc::clone(&sim), Arc::clone(&card), Arc::clone(&thread_control));
  let player = thread::spawn(move || {
    sim_sequencer(sim_c, card_c, Duration::from_millis(1), tc_c);
  });
  let (reg_c, tc_c) = (Arc::clone(&registry), Arc::clone(&thread_control));
  let dispatcher = thread::spawn(move || {
    irq_dispatcher(reg_c, Duration::from_millis(1), tc_c);
  });

  let mut rng = rand::thread_rng();
  for _ in 0..50 {
    let n : usize = rng.gen_range(1..32);
    let codes : Vec<u8> = (0..n).map(|_| rng.gen_range(1..0x7f)).collect();
    let times : Vec<u32> = (0..n as u32).map(|k| 10*k).collect();
    card.commit_table(0, &codes, &times).unwrap();
    thread::sleep(Duration::from_micros(rng.gen_range(0..2000)));
  }

  // eventually the last table is in the RAM
  let expected = seq.snapshot();
  let start = Instant::now();
  let mut in_ram = (Vec::new(), Vec::new());
  while start.elapsed() < Duration::from_secs(5) {
    let pending = card.seqram().bank_status(bank).unwrap().2;
    in_ram = read_seq_ram_table(sim.as_ref(), bank).unwrap();
    if !pending && in_ram.0 == expected.codes {
      break;
    }
    thread::sleep(Duration::from_millis(5));
  }
  thread_control.lock().unwrap().stop_flag = true;
  player.join().unwrap();
  dispatcher.join().unwrap();
  assert_eq!(in_ram.0, expected.codes);
  assert_eq!(in_ram.1, expected.timestamps);
  assert!(seq.num_starts() > 0);
  assert!(seq.num_ends() > 0);
  assert_eq!(card.seqram().num_irq_errors(), 0);
}
