//! Typed error kinds for the listener pipeline (spec §7).
//!
//! Bus-facing handlers never let these cross the wire as an exception: every
//! `ListenerError` that reaches a service-facade request handler is turned
//! into a `{"error": "..."}` reply body instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    /// Mic overflow or device disconnect. Recoverable via `AudioSource::restart`
    /// up to `MAX_MIC_RESTARTS` times.
    #[error("audio io error: {0}")]
    AudioIo(String),

    /// Input audio could not be decoded to the configured PCM format.
    #[error("decode error: {0}")]
    Decode(String),

    /// A configured STT/hotword/transformer plugin id is missing or failed to
    /// construct.
    #[error("failed to load plugin {plugin_id}: {reason}")]
    PluginLoad { plugin_id: String, reason: String },

    /// A loaded plugin raised during `execute`/`found_wake_word`/etc.
    #[error("plugin {plugin_id} failed at runtime: {reason}")]
    PluginRuntime { plugin_id: String, reason: String },

    /// A `configuration.patch` was rejected and rolled back.
    #[error("invalid config patch: {0}")]
    ConfigInvalid(String),

    /// STT or downstream skills did not respond within the allotted time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The messagebus connection dropped; caller should back off and retry.
    #[error("bus disconnected: {0}")]
    BusDisconnected(String),

    /// Shutdown was requested while this operation was in flight.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ListenerError>;
