//! Log capture for tests.

use tracing_subscriber::EnvFilter;

/// Directives applied when `RUST_LOG` is not set.
///
/// Server internals log everything; request spans from `tower_http` show which request a failure
/// belongs to; everything else only reports warnings.
const DEFAULT_DIRECTIVES: &str = "WARN,\
    tower_http=DEBUG,\
    remotesrv=TRACE,\
    remotesrv_server=TRACE,\
    remotesrv_service=TRACE";

/// Installs a subscriber writing to the output captured by the test runner.
///
/// `RUST_LOG` replaces the default directives when set. Calling this more than once is a no-op, so
/// every test may call it.
///
/// # Example
///
/// ```
/// remotesrv_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
