use sysinfo::System;

const MONITORING_MACHINE: &str = "MONITORING_MACHINE";

const DEFAULT_MACHINE: &str = "localhost";

/// Machine name written into events
///
/// `MONITORING_MACHINE` wins over the host name reported by the OS.
pub fn machine_name() -> String {
    std::env::var(MONITORING_MACHINE)
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(System::host_name)
        .unwrap_or_else(|| DEFAULT_MACHINE.to_string())
}

const MONITORING_CONFIG: &str = "MONITORING_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "monitoring.json";

pub fn get_config_path() -> String {
    std::env::var(MONITORING_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
