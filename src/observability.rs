// SPDX-License-Identifier: Apache-2.0

//! Test-only tracing setup. A library has no business installing a global
//! subscriber on behalf of whatever binds it in, so this stays `cfg(test)`
//! — its only job is making `tracing::debug!`/`warn!` output from the
//! registry, compiler, and migrator visible when a test is run with
//! `--nocapture`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qore=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
