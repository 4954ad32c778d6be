//! Telemetry suppression for the pipeline's own threads.
//!
//! Exporters use libraries (`hyper`, `tonic`, `reqwest`) that emit `tracing`
//! events of their own. If the application also installs
//! [`TelemetryLayer`](crate::appender::TelemetryLayer), those events would be
//! turned into log records, exported, and produce more events. Background
//! workers therefore run inside a suppressed scope and the layer drops every
//! event raised there.
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static SUPPRESSED: Cell<bool> = const { Cell::new(false) };
}

/// Restores the previous suppression state when dropped.
#[derive(Debug)]
pub struct SuppressionGuard {
    was_suppressed: bool,
    // Tied to the thread that created it.
    _marker: PhantomData<*const ()>,
}

/// Suppress telemetry on the current thread until the guard is dropped.
pub fn enter_suppressed_scope() -> SuppressionGuard {
    let was_suppressed = SUPPRESSED.with(|s| s.replace(true));
    SuppressionGuard {
        was_suppressed,
        _marker: PhantomData,
    }
}

/// Suppress telemetry on the current thread for the rest of its life.
///
/// For threads owned by the pipeline, such as the gRPC client's runtime
/// workers.
pub(crate) fn suppress_current_thread() {
    SUPPRESSED.with(|s| s.set(true));
}

/// Whether telemetry is suppressed on the current thread.
pub fn is_suppressed() -> bool {
    SUPPRESSED.with(Cell::get)
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        SUPPRESSED.with(|s| s.set(self.was_suppressed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest() {
        assert!(!is_suppressed());
        {
            let _outer = enter_suppressed_scope();
            assert!(is_suppressed());
            {
                let _inner = enter_suppressed_scope();
                assert!(is_suppressed());
            }
            assert!(is_suppressed());
        }
        assert!(!is_suppressed());
    }

    #[test]
    fn suppression_is_per_thread() {
        let _guard = enter_suppressed_scope();
        let other = std::thread::spawn(is_suppressed).join().unwrap();
        assert!(!other);
    }

    #[test]
    fn thread_wide_suppression_outlives_guards() {
        let suppressed = std::thread::spawn(|| {
            suppress_current_thread();
            drop(enter_suppressed_scope());
            is_suppressed()
        })
        .join()
        .unwrap();
        assert!(suppressed);
    }
}
