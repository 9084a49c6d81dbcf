// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with:
// - Value objects
// - Events
// - Commands
// - Errors
// - Aggregate implementation
// - Command handler
//
// Persistence and messaging are reached only through the ports declared in
// `crate::store` and `crate::messaging`.
//
// ============================================================================

pub mod order;
pub mod customer;
pub mod delivery;
