//! Infrastructure layer for the host.
//!
//! Contains the OS-facing adapters: TCP and serial transports, the in-memory
//! transport used by tests, and config file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `marlin_core`, but MUST NOT be imported by the `application` layer outside
//! of tests.

pub mod storage;
pub mod transport;
