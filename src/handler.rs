//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A route chain mixes handlers of *different* types: a CORS closure, an ACL
//! closure, a named `fn`. Rust collections hold one concrete type, so every
//! handler is hidden behind a trait object (`dyn ErasedHandler`) and stored
//! uniformly:
//!
//! ```text
//! fn show(ctx: &mut Context) -> Response { … }   ← user writes this
//!        ↓ router.query("users/:id", show)
//! show.into_boxed_handler()                      ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                      ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(&mut ctx)  at request time        ← one vtable dispatch
//!        ↓
//! show(ctx).into_outcome()                       ← Outcome
//! ```
//!
//! Handlers are synchronous. The dispatcher runs each request's chain on a
//! blocking thread, so a handler that performs blocking I/O stalls only its
//! own request.

use std::sync::Arc;

use crate::context::Context;
use crate::outcome::{IntoOutcome, Outcome};

/// What the dispatcher calls for each step of a chain.
///
/// Public only because [`BoxedHandler`] names it; hidden from the docs.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: &mut Context) -> Outcome;
}

/// One step of a chain, shared by every request that resolves to it.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid handler.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure with the signature:
///
/// ```text
/// fn name(ctx: &mut Context) -> impl IntoOutcome
/// ```
///
/// Return `()` (or [`Outcome::Continue`]) to pass control to the next
/// handler; return anything else to end the chain.
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, R> private::Sealed for F
where
    F: Fn(&mut Context) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
}

impl<F, R> Handler for F
where
    F: Fn(&mut Context) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Adapts a closure to [`ErasedHandler`], converting its return value
/// with [`IntoOutcome`].
struct FnHandler<F>(F);

impl<F, R> ErasedHandler for FnHandler<F>
where
    F: Fn(&mut Context) -> R,
    R: IntoOutcome,
{
    fn call(&self, ctx: &mut Context) -> Outcome {
        (self.0)(ctx).into_outcome()
    }
}

/// Builds an ordered handler chain for [`Router::query_chain`](crate::Router::query_chain)
/// and [`Router::mutation_chain`](crate::Router::mutation_chain).
///
/// ```rust
/// use sluice::{Context, Router, chain, middleware};
///
/// fn purge(_ctx: &mut Context) -> &'static str { "purged" }
///
/// let router = Router::new()
///     .mutation_chain("cache/purge", chain![middleware::acl(["admin"]), purge]);
/// ```
#[macro_export]
macro_rules! chain {
    ($($handler:expr),* $(,)?) => {
        ::std::vec![$($crate::Handler::into_boxed_handler($handler)),*]
    };
}
