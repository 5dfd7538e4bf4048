#![allow(dead_code, unused_imports)]

pub use pipedag_test_utils::{init_tracing, with_timeout};
