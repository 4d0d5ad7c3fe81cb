/// Interpret the value of a rankc environment flag, such as "1" or "no", as
/// a boolean.
///
/// Unrecognized values are treated as false, with a warning.
pub fn str_as_bool(s: &str) -> bool {
    match s {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => {
            log::warn!("Unrecognized boolean value \"{}\"", s);
            false
        }
    }
}

/// Return whether the compile option controlled by the environment variable
/// `name` is enabled, or `default` if the variable is not set.
///
/// Used for `RANKC_IGNORE_STORED_MODELS` and `RANKC_SEQUENTIAL`, see
/// [`CompileOptions::with_defaults`](crate::CompileOptions::with_defaults).
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .as_ref()
        .map(|s| str_as_bool(s))
        .unwrap_or(default)
}
