use std::sync::{Arc, Mutex, OnceLock};

use tracing::info;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;

use rtc_proto::{CoreError, CoreResult};

/// Process-wide, reference-counted handle onto the embedded WebRTC engine.
/// The first `init()` builds the (fairly heavy) `API` object; subsequent
/// calls from independent owners (the Peer Manager, a test harness) just
/// bump the count. `release()` tears the engine down on the zero transition.
struct EngineState {
    api: Arc<API>,
    refcount: usize,
}

static ENGINE: OnceLock<Mutex<Option<EngineState>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<EngineState>> {
    ENGINE.get_or_init(|| Mutex::new(None))
}

/// Initializes the engine if this is the first caller, otherwise bumps the
/// refcount. Safe to call concurrently from multiple owners.
pub fn init() -> CoreResult<()> {
    let mut guard = slot().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(state) = guard.as_mut() {
        state.refcount += 1;
        return Ok(());
    }

    let mut media_engine = MediaEngine::default();
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| CoreError::Init(format!("failed to register interceptors: {e}")))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    info!("WebRTC engine initialized");
    *guard = Some(EngineState {
        api: Arc::new(api),
        refcount: 1,
    });
    Ok(())
}

/// Decrements the refcount; tears the engine down on the zero transition.
/// Calling this without a matching `init()` is a no-op.
pub fn release() {
    let mut guard = slot().lock().unwrap_or_else(|e| e.into_inner());
    let torn_down = if let Some(state) = guard.as_mut() {
        state.refcount = state.refcount.saturating_sub(1);
        state.refcount == 0
    } else {
        false
    };
    if torn_down {
        info!("WebRTC engine torn down");
        *guard = None;
    }
}

/// Returns the shared `API` handle. `Init` if the library hasn't been
/// initialized yet.
pub fn api() -> CoreResult<Arc<API>> {
    slot()
        .lock()
        .unwrap()
        .as_ref()
        .map(|s| Arc::clone(&s.api))
        .ok_or_else(|| CoreError::Init("engine not initialized; call engine::init() first".into()))
}

/// Current refcount, for tests and diagnostics.
pub fn refcount() -> usize {
    slot().lock().unwrap_or_else(|e| e.into_inner()).as_ref().map(|s| s.refcount).unwrap_or(0)
}

/// Test-only helper to serialize access to the process-wide refcount.
/// `cargo test` runs tests in parallel threads by default; without this,
/// two tests bumping/checking the same global counter would race.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    pub fn guard() -> MutexGuard<'static, ()> {
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both assertions share the process-wide refcount, so they run as one
    // test rather than risking interleaving with a sibling test thread.
    #[test]
    fn refcount_lifecycle_is_balanced() {
        let _guard = test_support::guard();
        assert_eq!(refcount(), 0);
        let err = api().unwrap_err();
        assert!(matches!(err, CoreError::Init(_)));

        init().unwrap();
        init().unwrap();
        assert_eq!(refcount(), 2);
        assert!(api().is_ok());

        release();
        assert_eq!(refcount(), 1);
        release();
        assert_eq!(refcount(), 0);
        assert!(api().is_err());
    }
}
