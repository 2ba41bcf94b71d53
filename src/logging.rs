use std::cell::Cell;
use std::sync::Once;

static INIT: Once = Once::new();
pub fn setup_logging() {
    #[cfg(feature = "pretty_env_logger")]
    INIT.call_once(pretty_env_logger::init);
    #[cfg(not(feature = "pretty_env_logger"))]
    INIT.call_once(|| ());
}

thread_local! {
    static WARNINGS: Cell<usize> = const { Cell::new(0) };
}

/// Number of recoverable-condition warnings raised on this thread.
pub fn warning_count() -> usize {
    WARNINGS.with(|w| w.get())
}

#[doc(hidden)]
pub fn note_warning() {
    WARNINGS.with(|w| w.set(w.get() + 1));
}

/// Log a recoverable condition (bad handle, malformed input, capacity) and
/// count it.
#[macro_export]
macro_rules! qc_warn {
    ($($fmt:tt)+) => {{
        $crate::logging::note_warning();
        ::log::warn!($($fmt)+);
    }};
}
