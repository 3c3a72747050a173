//! Property-based tests for document parsing

mod extraction;
