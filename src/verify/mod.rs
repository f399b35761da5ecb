//! Invariant checks (pure functions, no I/O) asserting the postconditions
//! the Reconciler and Supervisor are expected to uphold. Exercised by the
//! test suite and, in debug builds, by the Reconciler as a cheap
//! after-the-fact self-check before persisting a new book.

pub mod invariants;
