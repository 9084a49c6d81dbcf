// ============================================================================
// Delivery Domain - Delivery commitments derived from created orders
// ============================================================================
//
// - Value objects (DeliveryCommitment, DeliveryPolicy)
// - Errors (DeliveryError, transient vs permanent)
// - Command Handler (DeliveryCommitmentHandler, the idempotent side effect
//   applied by the order-created consumer)
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod command_handler;

pub use value_objects::*;
pub use errors::*;
pub use command_handler::*;
