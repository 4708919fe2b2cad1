//! Settings for the card and its sequences
//!
//! This replaces the startup script of the control
//! system: the card and all sequences (with their
//! events) are created from a .toml file before
//! anything else happens.
//!

use std::fs::File;
use std::io::{
  Read,
  Write,
};
use std::fmt;

use crate::constants::DEFAULT_EVENT_CLOCK_MHZ;
use crate::errors::SettingsError;
use crate::events::TimeUnits;
use crate::sequence::{
  RunMode,
  TriggerSource,
};

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CardSettings {
  /// logical card number
  pub id              : u32,
  /// uio device the register map is exposed through
  pub uio_device      : String,
  /// size of the register map in bytes
  pub regmap_size     : usize,
  /// use the simulated registers instead of the card
  pub simulate        : bool,
  /// used when the card reports no event clock (MHz)
  pub event_clock_mhz : f64,
}

impl CardSettings {
  pub fn new() -> Self {
    Self {
      id              : 0,
      uio_device      : String::from("/dev/uio0"),
      regmap_size     : 0x10000,
      simulate        : false,
      event_clock_mhz : DEFAULT_EVENT_CLOCK_MHZ,
    }
  }
}

impl Default for CardSettings {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DispatcherSettings {
  /// how often pending swaps are checked when no
  /// interrupt arrives
  pub poll_interval_ms   : u64,
  /// print the card report every n seconds (0 is never)
  pub report_interval_s  : u64,
  /// play armed sequences every n milliseconds
  /// (simulation only)
  pub sim_period_ms      : u64,
}

impl DispatcherSettings {
  pub fn new() -> Self {
    Self {
      poll_interval_ms  : 100,
      report_interval_s : 10,
      sim_period_ms     : 1000,
    }
  }
}

impl Default for DispatcherSettings {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EventSettings {
  pub name     : String,
  pub code     : u8,
  pub time     : f64,
  #[serde(default = "default_true")]
  pub enable   : bool,
  #[serde(default)]
  pub priority : i32,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SequenceSettings {
  pub id             : u32,
  #[serde(default)]
  pub description    : String,
  #[serde(default)]
  pub trigger_source : TriggerSource,
  #[serde(default)]
  pub run_mode       : RunMode,
  #[serde(default)]
  pub time_units     : TimeUnits,
  /// arm the sequence RAM after loading
  #[serde(default)]
  pub enable         : bool,
  /// bind the sequence to a sequence RAM at startup
  #[serde(default)]
  pub load           : bool,
  #[serde(default)]
  pub events         : Vec<EventSettings>,
}

impl SequenceSettings {
  pub fn new(id : u32) -> Self {
    Self {
      id             : id,
      description    : String::new(),
      trigger_source : TriggerSource::default(),
      run_mode       : RunMode::default(),
      time_units     : TimeUnits::default(),
      enable         : false,
      load           : false,
      events         : Vec::<EventSettings>::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EvgSeqSettings {
  pub card         : CardSettings,
  pub dispatcher   : DispatcherSettings,
  #[serde(default)]
  pub sequences    : Vec<SequenceSettings>,
}

impl EvgSeqSettings {
  pub fn new() -> Self {
    let mut demo = SequenceSettings::new(0);
    demo.description = String::from("demo");
    demo.load        = true;
    demo.enable      = true;
    demo.run_mode    = RunMode::Normal;
    for (k, (name, code)) in [("start", 1u8), ("kick", 2), ("stop", 3)].iter().enumerate() {
      demo.events.push(EventSettings {
        name     : String::from(*name),
        code     : *code,
        time     : 125000000.0*(k as f64 + 1.0),
        enable   : true,
        priority : 0,
      });
    }
    Self {
      card       : CardSettings::new(),
      dispatcher : DispatcherSettings::new(),
      sequences  : vec![demo],
    }
  }

  /// Write the settings to a toml file
  pub fn to_toml(&self, filename : &str) -> Result<(), SettingsError> {
    let toml_string = toml::to_string(self)?;
    let mut file = File::create(filename)?;
    file.write_all(toml_string.as_bytes())?;
    info!("Wrote settings to {}", filename);
    Ok(())
  }

  /// Read settings from a toml file
  pub fn from_toml(filename : &str) -> Result<EvgSeqSettings, SettingsError> {
    let mut file = match File::open(filename) {
      Err(err) => {
        error!("Unable to open {}! {}", filename, err);
        return Err(SettingsError::Io(err));
      }
      Ok(file) => file,
    };
    let mut toml_string = String::new();
    file.read_to_string(&mut toml_string)?;
    Self::from_toml_str(&toml_string)
  }

  pub fn from_toml_str(toml_string : &str) -> Result<EvgSeqSettings, SettingsError> {
    match toml::from_str(toml_string) {
      Err(err) => {
        error!("Can't interpret toml! {}", err);
        Err(SettingsError::TomlDecoding(err))
      }
      Ok(settings) => Ok(settings),
    }
  }

  /// The event clock in ticks per second, as configured
  pub fn ticks_per_second(&self) -> f64 {
    self.card.event_clock_mhz*1e6
  }
}

impl Default for EvgSeqSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for EvgSeqSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp : String;
    match toml::to_string(self) {
      Err(err) => {
        error!("Serialization error! {err}");
        disp = String::from("-- SERIALIZATION ERROR! --");
      }
      Ok(_disp) => {
        disp = _disp;
      }
    }
    write!(f, "<EvgSeqSettings :\n{}>", disp)
  }
}

#[cfg(test)]
mod test_settings {
  use super::*;

  #[test]
  fn default_settings_survive_toml() {
    let settings = EvgSeqSettings::new();
    let as_str   = toml::to_string(&settings).unwrap();
    let back     = EvgSeqSettings::from_toml_str(&as_str).unwrap();
    assert_eq!(settings, back);
  }

  #[test]
  fn minimal_sequence_section() {
    let cfg = r#"
      [card]
      id = 1
      uio_device = "/dev/uio3"
      regmap_size = 65536
      simulate = true
      event_clock_mhz = 100.0

      [dispatcher]
      poll_interval_ms = 50
      report_interval_s = 0
      sim_period_ms = 10

      [[sequences]]
      id = 2
      trigger_source = { Mxc = 3 }

      [[sequences.events]]
      name = "A"
      code = 10
      time = 5.0
    "#;
    let settings = EvgSeqSettings::from_toml_str(cfg).unwrap();
    assert_eq!(settings.card.id, 1);
    assert_eq!(settings.ticks_per_second(), 100e6);
    let seq = &settings.sequences[0];
    assert_eq!(seq.trigger_source, TriggerSource::Mxc(3));
    assert_eq!(seq.run_mode, RunMode::Single);
    assert!(!seq.load);
    assert!(seq.events[0].enable);
    assert_eq!(seq.events[0].priority, 0);
  }

  #[test]
  fn garbage_is_rejected() {
    assert!(EvgSeqSettings::from_toml_str("card = 5").is_err());
  }
}
