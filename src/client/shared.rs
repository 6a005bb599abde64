//! Process-wide client holder
//!
//! Lets independent parts of a program reuse one connection instead of
//! each opening their own.

use parking_lot::{const_mutex, Mutex};
use tracing::debug;

use super::client::{ClientConfig, EventClient};

static SHARED: Mutex<Option<EventClient>> = const_mutex(None);

/// Return the shared client, creating it from `config` on first use
///
/// `config` is ignored when a client already exists.
pub fn get_or_create(config: ClientConfig) -> EventClient {
    let mut slot = SHARED.lock();
    slot.get_or_insert_with(|| {
        debug!(url = %config.url, "Creating shared client");
        EventClient::new(config)
    })
    .clone()
}

/// The shared client, if one exists
pub fn current() -> Option<EventClient> {
    SHARED.lock().clone()
}

/// Close the shared client and forget it
///
/// The next `get_or_create` builds a fresh client.
pub fn teardown() {
    let client = SHARED.lock().take();
    if let Some(client) = client {
        debug!(url = %client.url(), "Tearing down shared client");
        client.close();
    }
}
