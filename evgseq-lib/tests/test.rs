use std::sync::Arc;
use std::thread;

use rand::Rng;
use rand::seq::SliceRandom;

use evgseq_lib::{
  EvgSeqSettings,
  FieldValue,
  Sequence,
  SequenceError,
  TimeUnits,
};
use evgseq_lib::constants::END_OF_SEQUENCE;

fn add_event(seq : &Sequence, name : &str, code : u8, time : f64) {
  let agg = seq.aggregator();
  let h = agg.declare_event(name).unwrap();
  agg.set_field(&h, FieldValue::Code(code)).unwrap();
  agg.set_field(&h, FieldValue::Time(time)).unwrap();
}

#[test]
fn write_config_file() {
  let settings = EvgSeqSettings::new();
  println!("{}", settings);
  settings.to_toml("evgseq-config-test.toml").unwrap();
  let back = EvgSeqSettings::from_toml("evgseq-config-test.toml").unwrap();
  assert_eq!(settings, back);
  let _ = std::fs::remove_file("evgseq-config-test.toml");
}

#[test]
fn missing_config_file() {
  assert!(EvgSeqSettings::from_toml("/nonexistent/evgseq.toml").is_err());
}

#[test]
fn scenario_two_events_out_of_order() {
  let seq = Sequence::new(0, 0);
  add_event(&seq, "A", 10, 5.0);
  add_event(&seq, "B", 20, 2.0);
  let table = seq.aggregator().finalize(TimeUnits::Ticks, 1.0);
  assert_eq!(table.codes, vec![20, 10]);
  assert_eq!(table.timestamps, vec![2, 5]);
  seq.commit_inputs(1.0).unwrap();
  let snap = seq.snapshot();
  assert_eq!(snap.codes, vec![20, 10, END_OF_SEQUENCE]);
  assert_eq!(snap.timestamps, vec![2, 5, 6]);
}

#[test]
fn scenario_all_disabled() {
  let seq = Sequence::new(0, 0);
  add_event(&seq, "A", 10, 5.0);
  let h = seq.aggregator().event("A").unwrap();
  seq.aggregator().set_field(&h, FieldValue::Enable(false)).unwrap();
  let table = seq.aggregator().finalize(TimeUnits::Ticks, 1.0);
  assert!(table.codes.is_empty());
  assert!(table.timestamps.is_empty());
  assert!(seq.commit_inputs(1.0).is_ok());
  let snap = seq.snapshot();
  assert_eq!(snap.codes, vec![END_OF_SEQUENCE]);
  assert_eq!(snap.n_events(), 0);
}

#[test]
fn scenario_priority_tie_break() {
  let seq = Sequence::new(0, 0);
  let agg = seq.aggregator();
  add_event(&seq, "X", 2, 7.0);
  add_event(&seq, "Y", 1, 7.0);
  agg.set_field(&agg.event("X").unwrap(), FieldValue::Priority(2)).unwrap();
  agg.set_field(&agg.event("Y").unwrap(), FieldValue::Priority(1)).unwrap();
  assert_eq!(agg.finalize(TimeUnits::Ticks, 1.0).codes, vec![1, 2]);
}

#[test]
fn scenario_size_mismatch() {
  let seq = Sequence::new(0, 0);
  seq.commit_table(&[1, 2], &[1, 2]).unwrap();
  let before = seq.snapshot();
  assert_eq!(seq.commit_table(&[1, 2, 3], &[1, 2]),
             Err(SequenceError::SizeMismatch {codes : 3, timestamps : 2}));
  assert_eq!(seq.snapshot(), before);
}

#[test]
fn redeclared_names_do_not_duplicate() {
  let seq = Sequence::new(0, 0);
  for _ in 0..5 {
    add_event(&seq, "same", 4, 9.0);
  }
  assert_eq!(seq.aggregator().len(), 1);
  assert_eq!(seq.aggregator().finalize(TimeUnits::Ticks, 1.0).codes, vec![4]);
}

#[test]
fn random_inputs_finalize_sorted() {
  let mut rng = rand::thread_rng();
  let seq = Sequence::new(0, 0);
  let mut names : Vec<usize> = (0..500).collect();
  names.shuffle(&mut rng);
  for k in names {
    let code : u8 = rng.gen_range(1..0x7f);
    let time : f64 = rng.gen_range(0.0..10000.0);
    add_event(&seq, &format!("ev{}", k), code, time);
    let h = seq.aggregator().event(&format!("ev{}", k)).unwrap();
    seq.aggregator().set_field(&h, FieldValue::Priority(rng.gen_range(-3..3))).unwrap();
    if rng.gen_bool(0.1) {
      seq.aggregator().set_field(&h, FieldValue::Enable(false)).unwrap();
    }
  }
  let table = seq.aggregator().finalize(TimeUnits::Ticks, 1.0);
  assert_eq!(table.codes.len(), table.timestamps.len());
  for k in 1..table.timestamps.len() {
    assert!(table.timestamps[k-1] <= table.timestamps[k]);
  }
  seq.commit_inputs(1.0).unwrap();
  let snap = seq.snapshot();
  assert_eq!(&snap.codes[..table.len()], &table.codes[..]);
  assert_eq!(&snap.timestamps[..table.len()], &table.timestamps[..]);
  assert_eq!(snap.codes[table.len()], END_OF_SEQUENCE);
}

#[test]
fn concurrent_snapshots_are_consistent() {
  let seq = Arc::new(Sequence::new(0, 0));
  let writer_seq = Arc::clone(&seq);
  let writer = thread::spawn(move || {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
      let n : usize = rng.gen_range(0..64);
      let codes : Vec<u8> = (0..n).map(|_| rng.gen_range(1..0x7f)).collect();
      let mut times : Vec<u32> = (0..n).map(|_| rng.gen_range(0..100000)).collect();
      times.sort();
      writer_seq.commit_table(&codes, &times).unwrap();
    }
  });
  let mut readers = Vec::new();
  for _ in 0..4 {
    let reader_seq = Arc::clone(&seq);
    readers.push(thread::spawn(move || {
      for _ in 0..500 {
        let snap = reader_seq.snapshot();
        assert_eq!(snap.codes.len(), snap.timestamps.len());
        assert_eq!(snap.codes.last(), Some(&END_OF_SEQUENCE));
        for k in 1..snap.timestamps.len() {
          assert!(snap.timestamps[k-1] <= snap.timestamps[k]);
        }
      }
    }));
  }
  writer.join().unwrap();
  for r in readers {
    r.join().unwrap();
  }
  assert_eq!(seq.snapshot().generation, 200);
}
