// tests/property_test.rs

//! Property-based tests for the state store and the query layer.
//!
//! These verify invariants that should hold regardless of input values:
//! inserted records are retrievable through every index, iteration order is
//! the lexicographic key order, and pagination laws hold.

mod property {
    pub mod consistency_test;
    pub mod roundtrip_test;
}
