//! The per-request failure boundary.
//!
//! [`guard`] runs a closure and turns any unwind into a [`Fault`]. Two kinds
//! of unwind exist:
//!
//! - [`HttpError::raise`] unwinds with a pre-built error. It bypasses the
//!   panic hook and comes back as [`Fault::Abort`] carrying that error.
//! - Anything else is a bug. A process-wide panic hook, installed on first
//!   use, captures a backtrace at the panic site for threads currently inside
//!   a guard. The fault renders as a `500` whose message is
//!   `"[panic] <cause>\n<trace>"`.
//!
//! Panics on threads outside a guard still reach the previously installed
//! hook untouched.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use http::StatusCode;

use crate::error::HttpError;
use crate::outcome::Outcome;

/// An unwind caught by [`guard`].
#[derive(Debug)]
pub(crate) enum Fault {
    Abort(HttpError),
    Panic { cause: String, trace: String },
}

impl Fault {
    pub(crate) fn into_error(self) -> HttpError {
        match self {
            Self::Abort(err) => err,
            Self::Panic { cause, trace } => HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("[panic] {cause}\n{trace}"),
            ),
        }
    }

    pub(crate) fn into_outcome(self) -> Outcome {
        Outcome::Error(self.into_error())
    }
}

thread_local! {
    static GUARDED: Cell<bool> = const { Cell::new(false) };
    static TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARDED.with(Cell::get) {
                TRACE.with(|t| *t.borrow_mut() = Some(Backtrace::force_capture()));
            } else {
                previous(info);
            }
        }));
    });
}

/// Runs `f`; an unwind out of `f` becomes `Err(Fault)`.
pub(crate) fn guard<T>(f: impl FnOnce() -> T) -> Result<T, Fault> {
    install_hook();

    let outer = GUARDED.with(|g| g.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    GUARDED.with(|g| g.set(outer));

    result.map_err(|payload| {
        let trace = TRACE.with(|t| t.borrow_mut().take());
        classify(payload, trace)
    })
}

fn classify(payload: Box<dyn Any + Send>, trace: Option<Backtrace>) -> Fault {
    let payload = match payload.downcast::<HttpError>() {
        Ok(err) => return Fault::Abort(*err),
        Err(other) => other,
    };
    let cause = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    };
    let trace = trace.map_or_else(|| "<no trace captured>".to_owned(), |t| t.to_string());
    Fault::Panic { cause, trace }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_passes_through() {
        assert_eq!(guard(|| 7).unwrap(), 7);
    }

    #[test]
    fn panic_becomes_500_with_trace() {
        let fault = guard(|| -> () { panic!("boom {}", 42) }).unwrap_err();
        let err = fault.into_error();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let (head, trace) = err.message().split_once('\n').unwrap();
        assert_eq!(head, "[panic] boom 42");
        assert!(!trace.trim().is_empty());
    }

    #[test]
    fn raised_error_is_returned_verbatim() {
        let fault = guard(|| -> () {
            HttpError::new(StatusCode::PAYMENT_REQUIRED, "pay up").raise()
        })
        .unwrap_err();
        match fault {
            Fault::Abort(err) => {
                assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
                assert_eq!(err.message(), "pay up");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_guard_restores_outer_state() {
        let outer = guard(|| {
            let inner = guard(|| -> () { panic!("inner") });
            assert!(inner.is_err());
            GUARDED.with(Cell::get)
        });
        assert!(outer.unwrap());
        assert!(!GUARDED.with(Cell::get));
    }
}
