//! Concurrency integration tests
//!
//! Randomized (seeded) interleavings of lifecycle commands and requests.
