mod harness;

pub use harness::{wait_for, TestContext};
