// ============================================================================
// Customer Domain - Reference data the order pipeline resolves
// ============================================================================
//
// Customers and payment conditions are owned by other parts of the system;
// the order pipeline only reads them by id.
//
// ============================================================================

pub mod value_objects;

pub use value_objects::*;
