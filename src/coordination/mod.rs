//! Coordination of detected and requested swaps
//!
//! The coordination layer:
//! 1. Runs one worker per platform on the polling interval
//! 2. Settles inbound swaps on the native chain exactly once
//! 3. Drives outbound settlement requests through signing and verification
//! 4. Keeps the ledger of in-progress and settled swaps and the swap address registry

pub mod engine;
pub mod ledger;
pub mod registry;

pub use engine::SwapOrchestrator;
pub use ledger::{PossibleFailure, SwapLedger};
pub use registry::{AddressRegistry, SwapAddress};
