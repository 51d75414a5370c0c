use std::fmt;

use smol_str::SmolStr;

/// Channel whose messages report the application lifecycle state.
pub const LIFECYCLE_CHANNEL: &str = "engine/lifecycle";
/// Channel carrying raster control requests from the application.
pub const RASTER_CONTROL_CHANNEL: &str = "engine/raster";
pub const SET_RESOURCE_CACHE_MAX_BYTES_METHOD: &str = "Raster.setResourceCacheMaxBytes";

pub type PlatformMessageResponse = Box<dyn FnOnce(Option<Vec<u8>>) + Send>;

/// A message on a named channel, optionally awaiting a reply.
pub struct PlatformMessage {
    channel: SmolStr,
    data: Vec<u8>,
    response: Option<PlatformMessageResponse>,
}

impl PlatformMessage {
    pub fn new(channel: impl Into<SmolStr>, data: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            data,
            response: None,
        }
    }

    pub fn with_response(
        channel: impl Into<SmolStr>,
        data: Vec<u8>,
        response: PlatformMessageResponse,
    ) -> Self {
        Self {
            channel: channel.into(),
            data,
            response: Some(response),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn take_response(&mut self) -> Option<PlatformMessageResponse> {
        self.response.take()
    }

    pub fn respond(mut self, data: Vec<u8>) {
        if let Some(response) = self.response.take() {
            response(Some(data));
        }
    }

    pub fn respond_empty(mut self) {
        if let Some(response) = self.response.take() {
            response(None);
        }
    }
}

impl fmt::Debug for PlatformMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformMessage")
            .field("channel", &self.channel)
            .field("data_len", &self.data.len())
            .field("has_response", &self.has_response())
            .finish()
    }
}

/// Receives messages sent by the engine without a hop to the platform context.
pub trait PlatformMessageHandler: Send + Sync {
    fn handle_platform_message(&self, message: PlatformMessage);
}
