pub mod assertions;

pub use assertions::assert_contains;
pub use fixtures::{FakeEngine, case};
pub use logging::init_test_logging;
