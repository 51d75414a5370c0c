//! Diagnostic requests a running shell answers with JSON documents.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use assets::{AssetManager, DirectoryAssetBundle};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use persistent_cache::base32_encode;
use serde::Serialize;

use crate::error::{ShellError, ShellResult};
use crate::rasterizer::ScreenshotType;
use crate::shell::Shell;

pub const GET_SKSLS_METHOD: &str = "_engine.getSkSLs";
pub const ESTIMATE_RASTER_CACHE_MEMORY_METHOD: &str = "_engine.estimateRasterCacheMemory";
pub const SET_ASSET_BUNDLE_PATH_METHOD: &str = "_engine.setAssetBundlePath";
pub const SCREENSHOT_METHOD: &str = "_engine.screenshot";
pub const FLUSH_UI_THREAD_TASKS_METHOD: &str = "_engine.flushUIThreadTasks";
pub const GET_DISPLAY_REFRESH_RATE_METHOD: &str = "_engine.getDisplayRefreshRate";

pub const ASSET_DIRECTORY_PARAM: &str = "assetDirectory";

/// Every method name a shell answers.
pub const SERVICE_PROTOCOL_METHODS: [&str; 6] = [
    GET_SKSLS_METHOD,
    ESTIMATE_RASTER_CACHE_MEMORY_METHOD,
    SET_ASSET_BUNDLE_PATH_METHOD,
    SCREENSHOT_METHOD,
    FLUSH_UI_THREAD_TASKS_METHOD,
    GET_DISPLAY_REFRESH_RATE_METHOD,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServiceProtocolResponse {
    Success,
    GetSkSLs {
        /// base32 file key to base64 cache object value.
        #[serde(rename = "SkSLs")]
        sksls: BTreeMap<String, String>,
    },
    EstimateRasterCacheMemory {
        #[serde(rename = "layerBytes")]
        layer_bytes: usize,
        #[serde(rename = "pictureBytes")]
        picture_bytes: usize,
    },
    Screenshot {
        /// Base64 encoded PNG.
        screenshot: String,
    },
    DisplayRefreshRate {
        fps: f64,
    },
}

impl ServiceProtocolResponse {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize)]
struct ServiceProtocolError<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a str,
}

/// JSON body reported for a failed request.
pub fn error_json(error: &ShellError) -> serde_json::Result<String> {
    let message = error.to_string();
    serde_json::to_string(&ServiceProtocolError {
        kind: "Error",
        message: &message,
    })
}

impl Shell {
    /// Answers `method`, running each request on the context that owns the
    /// state it reads.
    #[tracing::instrument(skip(self, params))]
    pub fn handle_service_protocol_message(
        &self,
        method: &str,
        params: &HashMap<String, String>,
    ) -> ShellResult<ServiceProtocolResponse> {
        match method {
            GET_SKSLS_METHOD => self.on_service_protocol_get_sksls(),
            ESTIMATE_RASTER_CACHE_MEMORY_METHOD => self.on_service_protocol_estimate_raster_cache_memory(),
            SET_ASSET_BUNDLE_PATH_METHOD => self.on_service_protocol_set_asset_bundle_path(params),
            SCREENSHOT_METHOD => self.on_service_protocol_screenshot(),
            FLUSH_UI_THREAD_TASKS_METHOD => {
                self.with_engine(|_| ())?;
                Ok(ServiceProtocolResponse::Success)
            }
            GET_DISPLAY_REFRESH_RATE_METHOD => {
                let fps = self.with_engine(|engine| engine.animator().vsync_waiter().refresh_rate())?;
                Ok(ServiceProtocolResponse::DisplayRefreshRate { fps })
            }
            other => Err(ShellError::UnknownServiceProtocolMethod(other.to_owned())),
        }
    }

    fn on_service_protocol_get_sksls(&self) -> ShellResult<ServiceProtocolResponse> {
        let persistent_cache = self.process_context().persistent_cache();
        let entries = self
            .task_runners()
            .io
            .post_sync(move || persistent_cache.load_sksls())?;
        let sksls = entries
            .into_iter()
            .map(|entry| (base32_encode(&entry.key), BASE64.encode(&entry.value)))
            .collect();
        Ok(ServiceProtocolResponse::GetSkSLs { sksls })
    }

    fn on_service_protocol_estimate_raster_cache_memory(&self) -> ShellResult<ServiceProtocolResponse> {
        let (layer_bytes, picture_bytes) = self.with_rasterizer(|rasterizer| {
            let raster_cache = rasterizer.compositor_context().raster_cache();
            (
                raster_cache.estimate_layer_cache_byte_size(),
                raster_cache.estimate_picture_cache_byte_size(),
            )
        })?;
        Ok(ServiceProtocolResponse::EstimateRasterCacheMemory {
            layer_bytes,
            picture_bytes,
        })
    }

    fn on_service_protocol_set_asset_bundle_path(
        &self,
        params: &HashMap<String, String>,
    ) -> ShellResult<ServiceProtocolResponse> {
        let asset_directory = params
            .get(ASSET_DIRECTORY_PARAM)
            .cloned()
            .ok_or_else(|| ShellError::ServiceProtocolFailure(format!("missing `{ASSET_DIRECTORY_PARAM}`")))?;

        let updated = self.with_engine(move |engine| {
            let asset_manager = Arc::new(AssetManager::new());
            if !asset_manager.push_front(Box::new(DirectoryAssetBundle::new(asset_directory, false))) {
                return false;
            }
            // Resolvers that survive a bundle change keep serving their assets.
            if let Some(previous) = engine.asset_manager() {
                for resolver in previous.take_resolvers() {
                    if resolver.is_valid_after_asset_manager_change() {
                        asset_manager.push_back(resolver);
                    }
                }
            }
            engine.update_asset_manager(asset_manager)
        })?;

        if !updated {
            return Err(ShellError::ServiceProtocolFailure(
                "could not update asset directory".to_owned(),
            ));
        }
        Ok(ServiceProtocolResponse::Success)
    }

    fn on_service_protocol_screenshot(&self) -> ShellResult<ServiceProtocolResponse> {
        let screenshot = self.screenshot(ScreenshotType::CompressedImage, true)?;
        let Some(data) = screenshot.data else {
            return Err(ShellError::ServiceProtocolFailure(
                "could not capture image screenshot".to_owned(),
            ));
        };
        let screenshot = String::from_utf8(data)
            .map_err(|error| ShellError::ServiceProtocolFailure(error.to_string()))?;
        Ok(ServiceProtocolResponse::Screenshot { screenshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_serialize_with_type_tag_first() {
        let estimate = ServiceProtocolResponse::EstimateRasterCacheMemory {
            layer_bytes: 40_000,
            picture_bytes: 400,
        };
        assert_eq!(
            estimate.to_json().expect("serialize"),
            r#"{"type":"EstimateRasterCacheMemory","layerBytes":40000,"pictureBytes":400}"#
        );
        assert_eq!(
            ServiceProtocolResponse::Success.to_json().expect("serialize"),
            r#"{"type":"Success"}"#
        );

        let mut sksls = BTreeMap::new();
        sksls.insert("IE".to_owned(), "eA==".to_owned());
        assert_eq!(
            ServiceProtocolResponse::GetSkSLs { sksls }.to_json().expect("serialize"),
            r#"{"type":"GetSkSLs","SkSLs":{"IE":"eA=="}}"#
        );
    }

    #[test]
    fn errors_carry_their_message() {
        let error = ShellError::UnknownServiceProtocolMethod("_engine.nope".to_owned());
        assert_eq!(
            error_json(&error).expect("serialize"),
            r#"{"type":"Error","message":"unknown service protocol method `_engine.nope`"}"#
        );
    }
}
