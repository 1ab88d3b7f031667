const fn override_or_cargo_version(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Reported by `--version` and the startup log line. Release builds may pin
/// an explicit version through the `WANOTIFY_VERSION` build-time variable.
pub const VERSION: &str = override_or_cargo_version(option_env!("WANOTIFY_VERSION"));
