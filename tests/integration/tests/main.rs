//! End-to-end tests of authentication and user/group resolution.
//!
//! Every test runs against in-memory directory servers; no network or
//! Kerberos setup is needed.

mod groups;
mod realm;
mod search;
