// ============================================================================
// Order Domain - Business Logic for Order Aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderLineInput, OrderLine, OrderStatus)
// - Idempotency key derivation
// - Events (OrderCreated, OrderApproved)
// - Commands (CreateOrder, ApproveOrder, CancelOrder)
// - Errors (OrderError enum)
// - Aggregate (Order with the approval rules)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod value_objects;
pub mod idempotency;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use idempotency::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
