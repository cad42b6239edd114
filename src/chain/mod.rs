//! Chain Adapter Module
//!
//! The custody core talks to blockchains only through [`ChainAdapter`].
//! One adapter instance is bound per network in the [`AdapterRegistry`].
//! Every call is treated as fallible, possibly slow, and not transactional
//! with the ledger store.

pub mod adapter;
pub mod registry;
pub mod simulated;

pub use adapter::{
    ChainAdapter, ChainError, ConfirmationStatus, KeyPair, RawTransfer, SigningMaterial,
    with_timeout,
};
pub use registry::AdapterRegistry;
pub use simulated::{BroadcastOutcome, SimulatedChain};
