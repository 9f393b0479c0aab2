//! The configuration shipped in `config/` loads and validates.

use callisto_daq::config::DaemonConfig;
use callisto_daq::daemon::{load_frequency_table, load_schedule};
use std::path::PathBuf;

fn sample() -> DaemonConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/callisto.toml");
    DaemonConfig::load_from(path).unwrap()
}

#[test]
fn sample_config_is_valid() {
    let config = sample();
    config.validate().unwrap();
    assert_eq!(config.control.net_port, 6789);
    assert_eq!(config.output.filetime, 900);
}

#[test]
fn sample_auxiliary_files_resolve_next_to_config() {
    let config = sample();

    let table = load_frequency_table(&config);
    assert_eq!(table.as_slice(), &[45.0, 46.5, 48.0, 49.5]);

    let schedule = load_schedule(&config);
    let times: Vec<u32> = schedule.iter().map(|e| e.t).collect();
    assert_eq!(times, vec![14_400, 43_200, 70_200]);
}
