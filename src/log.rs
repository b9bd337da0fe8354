use std::sync::atomic::{AtomicBool, Ordering};

// All diagnostics go to stderr so they never mix with rendered views on stdout.
// The verbose flag is set once at startup and read everywhere through verbose_log!.
static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::Relaxed);
}

pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! verbose_log {
    ($($arg:tt)*) => {
        if $crate::log::verbose() { eprintln!("debug: {}", format!($($arg)*)); }
    };
}
