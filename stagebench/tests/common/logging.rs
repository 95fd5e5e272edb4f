pub fn init_test_logging() {
    stagebench_common::init_test_logging();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
