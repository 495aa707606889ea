use std::sync::OnceLock;

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

// Log every bank select (trace level).
pub fn trace_banks() -> bool {
    static ON: OnceLock<bool> = OnceLock::new();
    *ON.get_or_init(|| env_flag("MEMBUS_TRACE_BANKS", false))
}

// Log writes suppressed by read-only protection while the machine runs.
pub fn trace_rom_writes() -> bool {
    static ON: OnceLock<bool> = OnceLock::new();
    *ON.get_or_init(|| env_flag("MEMBUS_TRACE_ROM_WRITES", false))
}

// Log every page mapping as it is installed, page by page.
pub fn trace_mapping() -> bool {
    static ON: OnceLock<bool> = OnceLock::new();
    *ON.get_or_init(|| env_flag("MEMBUS_TRACE_MAPPING", false))
}
