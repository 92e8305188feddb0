//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: the current bearer token, persisted on every change
//! - `PendingRedirect`: where to send the user after they log in again
//! - `IdentityLogin`: sign-in through a third-party identity widget
//!
//! Presence of a token is the only signal used to gate protected views.

pub mod identity;
pub mod redirect;
pub mod session;

pub use identity::{
    AssertionCallback, IdentityError, IdentityLogin, IdentityOutcome, IdentityWidget, LazyWidget,
    ManualAssertionWidget,
};
pub use redirect::PendingRedirect;
pub use session::{ObserverId, SessionChange, SessionSnapshot, SessionStore, Token};
