use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use compositor::{CallbackViewEmbedder, Color, ISize, PostPrerollResult};
use crossbeam_channel::unbounded;
use image::Rgba;
use persistent_cache::{PersistentCache, base32_encode};
use task_runner::TaskQueues;

use crate::error::ShellError;
use crate::frame_timing::{FrameTiming, FrameTimingPhase};
use crate::platform_message::{LIFECYCLE_CHANNEL, PlatformMessage, RASTER_CONTROL_CHANNEL};
use crate::process_context::ProcessContext;
use crate::rasterizer::ScreenshotType;
use crate::service_protocol::{
    ASSET_DIRECTORY_PARAM, ESTIMATE_RASTER_CACHE_MEMORY_METHOD, FLUSH_UI_THREAD_TASKS_METHOD,
    GET_DISPLAY_REFRESH_RATE_METHOD, GET_SKSLS_METHOD, SCREENSHOT_METHOD, SET_ASSET_BUNDLE_PATH_METHOD,
    ServiceProtocolResponse,
};
use crate::settings::Settings;
use crate::shell_test::{
    AppEvent, FixtureOptions, RecordingMessageHandler, ShellFixture, TEST_TIMEOUT, add_picture, merging_embedder,
    pump_empty_frame, pump_one_frame, recv, resubmitting_embedder, square_picture,
};
use crate::viewport_metrics::ViewportMetrics;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn no_params() -> HashMap<String, String> {
    HashMap::new()
}

#[test]
fn engine_launches_with_initial_route() {
    let fixture = ShellFixture::with_settings(Settings::default());
    assert_eq!(recv(&fixture.events), AppEvent::Launched(Some("/test".to_owned())));
    assert!(fixture.shell.with_engine(|engine| engine.is_running()).expect("engine"));
}

#[test]
fn merged_threads_separate_after_the_lease_runs_out() {
    let (end_frames, end_frame_events) = unbounded();
    let merged_once = AtomicBool::new(false);
    let embedder = Arc::new(CallbackViewEmbedder::new(
        Box::new(move |should_resubmit_frame, raster_thread_merger| {
            if let Some(raster_thread_merger) = raster_thread_merger {
                if !merged_once.swap(true, Ordering::AcqRel) {
                    raster_thread_merger.merge_with_lease(2);
                }
            }
            let _ = end_frames.send(should_resubmit_frame);
        }),
        PostPrerollResult::Success,
        true,
    ));
    let fixture = ShellFixture::with_embedder(embedder.clone());
    fixture.shell.notify_created().expect("notify created");
    let merger = fixture.shell.raster_thread_merger().expect("merger for merging embedder");
    assert!(!merger.is_merged());

    pump_empty_frame(&fixture.shell, 100.0, 100.0);
    assert!(!recv(&end_frame_events));
    assert!(merger.is_merged());

    pump_empty_frame(&fixture.shell, 100.0, 100.0);
    assert!(!recv(&end_frame_events));
    assert!(merger.is_merged());

    pump_empty_frame(&fixture.shell, 100.0, 100.0);
    assert!(!recv(&end_frame_events));
    fixture.flush();
    assert!(!merger.is_merged());

    let task_runners = fixture.shell.task_runners();
    assert!(
        !fixture
            .task_queues
            .runs_on_the_same_thread(task_runners.platform.queue_id(), task_runners.raster.queue_id())
    );
    assert_eq!(fixture.presented_frames.count(), 3);
    // The first frame was drawn before the merge and bypassed the embedder.
    assert_eq!(embedder.submitted_frame_count(), 2);
}

#[test]
fn resubmitted_frame_is_drawn_once_after_merging() {
    let (end_frames, end_frame_events) = unbounded();
    let embedder = resubmitting_embedder(PostPrerollResult::ResubmitFrame, 10, end_frames);
    let rasterized = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rasterized);
    let settings = Settings {
        frame_rasterized_callback: Some(Arc::new(move |_: &FrameTiming| {
            counter.fetch_add(1, Ordering::AcqRel);
        })),
        ..Settings::default()
    };
    let fixture = ShellFixture::new(FixtureOptions {
        settings,
        external_view_embedder: Some(embedder.clone()),
        ..FixtureOptions::default()
    });
    fixture.shell.notify_created().expect("notify created");

    pump_empty_frame(&fixture.shell, 120.0, 80.0);
    assert!(recv(&end_frame_events), "first pass asks for a resubmission");
    assert!(!recv(&end_frame_events), "second pass draws the frame");
    fixture.flush();

    assert!(fixture.shell.raster_thread_merger().is_some_and(|merger| merger.is_merged()));
    assert_eq!(embedder.submitted_frame_count(), 1);
    assert_eq!(embedder.last_submitted_frame_size(), ISize::new(120, 80));
    assert_eq!(fixture.presented_frames.count(), 1);
    assert_eq!(rasterized.load(Ordering::Acquire), 1);
    assert!(end_frame_events.try_recv().is_err());
}

#[test]
fn skipped_frame_is_retried_once_after_merging() {
    let (end_frames, end_frame_events) = unbounded();
    let embedder = resubmitting_embedder(PostPrerollResult::SkipAndRetryFrame, 10, end_frames);
    let fixture = ShellFixture::with_embedder(embedder.clone());
    fixture.shell.notify_created().expect("notify created");

    pump_empty_frame(&fixture.shell, 120.0, 80.0);
    assert!(recv(&end_frame_events), "skipped pass");
    assert!(!recv(&end_frame_events), "retried pass");
    fixture.flush();

    assert_eq!(embedder.submitted_frame_count(), 1);
    assert_eq!(embedder.last_submitted_frame_size(), ISize::new(120, 80));
    assert_eq!(fixture.presented_frames.count(), 1);
    assert!(end_frame_events.try_recv().is_err());
}

#[test]
fn frames_of_a_stale_size_are_discarded() {
    let (end_frames, end_frame_events) = unbounded();
    let embedder = Arc::new(CallbackViewEmbedder::new(
        Box::new(move |should_resubmit_frame, _| {
            let _ = end_frames.send(should_resubmit_frame);
        }),
        PostPrerollResult::Success,
        false,
    ));
    let fixture = ShellFixture::with_embedder(embedder.clone());
    fixture.shell.notify_created().expect("notify created");

    fixture.shell.set_viewport_metrics(ViewportMetrics::new(1.0, 400.0, 200.0));
    pump_empty_frame(&fixture.shell, 400.0, 200.0);
    recv(&end_frame_events);
    assert_eq!(embedder.submitted_frame_count(), 1);
    assert_eq!(embedder.last_submitted_frame_size(), ISize::new(400, 200));

    fixture.shell.set_viewport_metrics(ViewportMetrics::new(1.0, 800.0, 600.0));
    pump_empty_frame(&fixture.shell, 400.0, 200.0);
    // The embedder still sees the end of the discarded pass.
    recv(&end_frame_events);
    assert_eq!(embedder.submitted_frame_count(), 1);
    assert_eq!(fixture.presented_frames.count(), 1);

    pump_empty_frame(&fixture.shell, 800.0, 600.0);
    recv(&end_frame_events);
    assert_eq!(embedder.submitted_frame_count(), 2);
    assert_eq!(embedder.last_submitted_frame_size(), ISize::new(800, 600));
    assert_eq!(fixture.presented_frames.count(), 2);
    let last_frame_size = fixture
        .shell
        .with_rasterizer(|rasterizer| rasterizer.last_layer_tree().map(|layer_tree| layer_tree.frame_size()))
        .expect("rasterizer");
    assert_eq!(last_frame_size, Some(ISize::new(800, 600)));
}

#[test]
fn invalid_viewport_metrics_are_ignored() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let valid = ViewportMetrics::new(0.8, 400.0, 200.0);
    fixture.shell.set_viewport_metrics(valid);
    fixture.shell.set_viewport_metrics(ViewportMetrics::new(0.0, 400.0, 200.0));
    fixture.shell.set_viewport_metrics(ViewportMetrics::new(0.8, 0.0, 200.0));
    fixture.shell.set_viewport_metrics(ViewportMetrics::new(0.8, 400.0, -1.0));
    fixture.flush();

    assert_eq!(fixture.shell.viewport_metrics(), valid);
    assert_eq!(fixture.shell.with_engine(|engine| engine.viewport_metrics()).expect("engine"), valid);
    let changes: Vec<_> = fixture
        .events
        .try_iter()
        .filter(|event| matches!(event, AppEvent::MetricsChanged(_)))
        .collect();
    assert_eq!(changes, vec![AppEvent::MetricsChanged(valid)]);
}

#[test]
fn resource_cache_follows_viewport_until_the_user_overrides_it() {
    let fixture = ShellFixture::with_settings(Settings::default());
    fixture.shell.notify_created().expect("notify created");
    let max_bytes = |fixture: &ShellFixture| {
        fixture
            .shell
            .with_rasterizer(|rasterizer| rasterizer.resource_cache_max_bytes())
            .expect("rasterizer")
    };
    assert_eq!(max_bytes(&fixture), Some(24 * 1024 * 1024));

    fixture.shell.set_viewport_metrics(ViewportMetrics::new(1.0, 400.0, 200.0));
    fixture.flush();
    assert_eq!(max_bytes(&fixture), Some(3_840_000));

    let (responses, response_events) = unbounded();
    fixture
        .shell
        .with_engine(move |engine| {
            engine.handle_platform_message(PlatformMessage::with_response(
                RASTER_CONTROL_CHANNEL,
                br#"{"method":"Raster.setResourceCacheMaxBytes","args":10000}"#.to_vec(),
                Box::new(move |data| {
                    let _ = responses.send(data);
                }),
            ));
        })
        .expect("engine");
    assert_eq!(recv(&response_events), Some(b"[true]".to_vec()));
    assert_eq!(max_bytes(&fixture), Some(10_000));

    fixture.shell.set_viewport_metrics(ViewportMetrics::new(1.0, 800.0, 400.0));
    fixture.flush();
    assert_eq!(max_bytes(&fixture), Some(10_000));
}

#[test]
fn malformed_raster_control_messages_get_an_empty_response() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let (responses, response_events) = unbounded();
    fixture
        .shell
        .with_engine(move |engine| {
            engine.handle_platform_message(PlatformMessage::with_response(
                RASTER_CONTROL_CHANNEL,
                br#"{"method":"Raster.setResourceCacheMaxBytes","args":"lots"}"#.to_vec(),
                Box::new(move |data| {
                    let _ = responses.send(data);
                }),
            ));
        })
        .expect("engine");
    assert_eq!(recv(&response_events), None);
}

#[test]
fn repeated_complex_picture_enters_the_raster_cache() {
    let fixture = ShellFixture::with_settings(Settings::default());
    fixture.shell.notify_created().expect("notify created");
    let picture = square_picture(50.0, Color::BLUE);

    let picture_bytes = |fixture: &ShellFixture| {
        fixture
            .shell
            .with_rasterizer(|rasterizer| rasterizer.compositor_context().raster_cache().estimate_picture_cache_byte_size())
            .expect("rasterizer")
    };

    for _ in 0..3 {
        let picture = Arc::clone(&picture);
        pump_one_frame(&fixture.shell, 100.0, 100.0, move |root| add_picture(root, picture));
        fixture.flush();
    }
    assert_eq!(picture_bytes(&fixture), 0);

    let frame_picture = Arc::clone(&picture);
    pump_one_frame(&fixture.shell, 100.0, 100.0, move |root| add_picture(root, frame_picture));
    fixture.flush();
    assert_eq!(picture_bytes(&fixture), 50 * 50 * 4);

    let response = fixture
        .shell
        .handle_service_protocol_message(ESTIMATE_RASTER_CACHE_MEMORY_METHOD, &no_params())
        .expect("estimate");
    assert_eq!(
        response,
        ServiceProtocolResponse::EstimateRasterCacheMemory {
            layer_bytes: 0,
            picture_bytes: 50 * 50 * 4,
        }
    );
}

#[test]
fn destroying_the_surface_unmerges_the_threads() {
    let (end_frames, end_frame_events) = unbounded();
    let fixture = ShellFixture::with_embedder(merging_embedder(10, end_frames));
    let task_runners = fixture.shell.task_runners().clone();

    for _ in 0..2 {
        fixture.shell.notify_created().expect("notify created");
        pump_empty_frame(&fixture.shell, 64.0, 64.0);
        recv(&end_frame_events);
        let merger = fixture.shell.raster_thread_merger().expect("merger");
        assert!(merger.is_merged());

        fixture.shell.notify_destroyed().expect("notify destroyed");
        assert!(!merger.is_merged());
        assert!(merger.is_enabled());
        assert!(
            !fixture
                .task_queues
                .runs_on_the_same_thread(task_runners.platform.queue_id(), task_runners.raster.queue_id())
        );
        assert!(!fixture.shell.with_rasterizer(|rasterizer| rasterizer.has_surface()).expect("rasterizer"));
    }
}

#[test]
fn failed_teardown_leaves_the_merger_enabled() {
    let (end_frames, end_frame_events) = unbounded();
    let mut fixture = ShellFixture::with_embedder(merging_embedder(10, end_frames));
    fixture.shell.notify_created().expect("notify created");
    pump_empty_frame(&fixture.shell, 64.0, 64.0);
    recv(&end_frame_events);
    let merger = fixture.shell.raster_thread_merger().expect("merger");
    assert!(merger.is_merged());

    fixture.stop_ui_thread();
    assert!(fixture.shell.notify_destroyed().is_err());
    assert!(merger.is_enabled());
    merger.unmerge_now();
    assert!(!merger.is_merged());
}

#[test]
fn waiting_for_the_first_frame() {
    let fixture = ShellFixture::with_settings(Settings::default());
    assert!(matches!(
        fixture.shell.wait_for_first_frame(Duration::from_millis(20)),
        Err(ShellError::DeadlineExceeded(_))
    ));

    let shell = Arc::clone(&fixture.shell);
    let from_ui = fixture
        .shell
        .with_engine(move |_| shell.wait_for_first_frame(Duration::from_millis(20)))
        .expect("engine");
    assert!(matches!(from_ui, Err(ShellError::FailedPrecondition(_))));

    fixture.shell.notify_created().expect("notify created");
    pump_empty_frame(&fixture.shell, 10.0, 10.0);
    fixture.shell.wait_for_first_frame(TEST_TIMEOUT).expect("first frame");
    // Stays satisfied.
    fixture
        .shell
        .wait_for_first_frame(Duration::from_millis(1))
        .expect("first frame again");
}

#[test]
fn frame_timings_are_ordered_and_reported_in_batches() {
    let (timings, timing_events) = unbounded();
    let (reports, report_events) = unbounded();
    let settings = Settings {
        frame_rasterized_callback: Some(Arc::new(move |timing: &FrameTiming| {
            let _ = timings.send(*timing);
        })),
        report_timings_callback: Some(Arc::new(move |batch: &[i64]| {
            let _ = reports.send(batch.to_vec());
        })),
        frame_timings_report_interval: Duration::from_millis(20),
        ..Settings::default()
    };
    let fixture = ShellFixture::with_settings(settings);
    fixture.shell.notify_created().expect("notify created");

    pump_empty_frame(&fixture.shell, 30.0, 30.0);
    let timing = recv(&timing_events);
    let ordered = [
        FrameTimingPhase::VsyncStart,
        FrameTimingPhase::BuildStart,
        FrameTimingPhase::BuildFinish,
        FrameTimingPhase::RasterStart,
        FrameTimingPhase::RasterFinish,
    ]
    .map(|phase| timing.get(phase));
    assert!(ordered.windows(2).all(|pair| pair[0] <= pair[1]), "{ordered:?}");

    // The first frame is reported right away.
    let first_report = recv(&report_events);
    let expected: Vec<i64> = FrameTimingPhase::PHASES
        .iter()
        .map(|phase| timing.get(*phase).as_micros())
        .collect();
    assert_eq!(first_report, expected);

    // Later frames wait for the report interval.
    pump_empty_frame(&fixture.shell, 30.0, 30.0);
    recv(&timing_events);
    pump_empty_frame(&fixture.shell, 30.0, 30.0);
    recv(&timing_events);
    let mut reported_frames = 0;
    while reported_frames < 2 {
        reported_frames += recv(&report_events).len() / FrameTimingPhase::COUNT;
    }
    assert_eq!(reported_frames, 2);
}

#[test]
fn engine_messages_prefer_the_platform_handler() {
    let handler = Arc::new(RecordingMessageHandler::default());
    let fixture = ShellFixture::new(FixtureOptions {
        platform_message_handler: Some(handler.clone()),
        ..FixtureOptions::default()
    });
    let (responses, response_events) = unbounded();
    fixture
        .shell
        .with_engine(move |engine| {
            engine.handle_platform_message(PlatformMessage::with_response(
                "app/telemetry",
                b"hello".to_vec(),
                Box::new(move |data| {
                    let _ = responses.send(data);
                }),
            ));
        })
        .expect("engine");
    assert_eq!(recv(&response_events), Some(b"handled".to_vec()));
    assert_eq!(
        *handler.channels.lock().expect("channels"),
        vec!["app/telemetry".to_owned()]
    );
}

#[test]
fn engine_messages_fall_back_to_the_platform_view() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let (responses, response_events) = unbounded();
    fixture
        .shell
        .with_engine(move |engine| {
            engine.handle_platform_message(PlatformMessage::with_response(
                "app/unhandled",
                Vec::new(),
                Box::new(move |data| {
                    let _ = responses.send(data);
                }),
            ));
        })
        .expect("engine");
    assert_eq!(recv(&response_events), None);
}

#[test]
fn platform_messages_reach_the_application() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let (responses, response_events) = unbounded();
    fixture.shell.dispatch_platform_message(PlatformMessage::with_response(
        "app/navigation",
        b"/details".to_vec(),
        Box::new(move |data| {
            let _ = responses.send(data);
        }),
    ));
    assert_eq!(recv(&response_events), Some(b"ack".to_vec()));
    fixture.flush();
    assert!(
        fixture
            .events
            .try_iter()
            .any(|event| event == AppEvent::Message("app/navigation".to_owned()))
    );
}

#[test]
fn lifecycle_messages_pause_and_resume_the_animator() {
    let fixture = ShellFixture::with_settings(Settings::default());
    fixture.shell.notify_created().expect("notify created");
    let is_paused = |fixture: &ShellFixture| {
        fixture
            .shell
            .with_engine(|engine| engine.animator().is_paused())
            .expect("engine")
    };
    assert!(!is_paused(&fixture));

    fixture
        .shell
        .dispatch_platform_message(PlatformMessage::new(LIFECYCLE_CHANNEL, b"paused".to_vec()));
    assert!(is_paused(&fixture));

    fixture
        .shell
        .dispatch_platform_message(PlatformMessage::new(LIFECYCLE_CHANNEL, b"resumed".to_vec()));
    assert!(!is_paused(&fixture));

    let states: Vec<_> = fixture
        .events
        .try_iter()
        .filter_map(|event| match event {
            AppEvent::Lifecycle(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec!["paused".to_owned(), "resumed".to_owned()]);
}

#[test]
fn get_sksls_lists_every_stored_shader() {
    let cache_directory = tempfile::tempdir().expect("tempdir");
    let cache = PersistentCache::new(Some(cache_directory.path()), false);
    cache.store(b"shader-a", b"program a").expect("store");
    cache.store(b"shader-b", b"program b").expect("store");

    let fixture = ShellFixture::with_settings(Settings {
        cache_directory: Some(cache_directory.path().to_path_buf()),
        ..Settings::default()
    });
    let response = fixture
        .shell
        .handle_service_protocol_message(GET_SKSLS_METHOD, &no_params())
        .expect("get sksls");

    let mut sksls = BTreeMap::new();
    sksls.insert(base32_encode(b"shader-a"), BASE64.encode(b"program a"));
    sksls.insert(base32_encode(b"shader-b"), BASE64.encode(b"program b"));
    assert_eq!(response, ServiceProtocolResponse::GetSkSLs { sksls });
}

#[test]
fn get_sksls_without_a_cache_is_empty() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let response = fixture
        .shell
        .handle_service_protocol_message(GET_SKSLS_METHOD, &no_params())
        .expect("get sksls");
    assert_eq!(
        response.to_json().expect("serialize"),
        r#"{"type":"GetSkSLs","SkSLs":{}}"#
    );
}

#[test]
fn set_asset_bundle_path_replaces_the_asset_manager() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let bundle = tempfile::tempdir().expect("tempdir");
    let mut params = HashMap::new();
    params.insert(
        ASSET_DIRECTORY_PARAM.to_owned(),
        bundle.path().to_string_lossy().into_owned(),
    );
    let response = fixture
        .shell
        .handle_service_protocol_message(SET_ASSET_BUNDLE_PATH_METHOD, &params)
        .expect("set asset bundle path");
    assert_eq!(response, ServiceProtocolResponse::Success);
    let resolver_count = fixture
        .shell
        .with_engine(|engine| engine.asset_manager().map(|asset_manager| asset_manager.resolver_count()))
        .expect("engine");
    assert_eq!(resolver_count, Some(1));

    params.insert(
        ASSET_DIRECTORY_PARAM.to_owned(),
        bundle.path().join("missing").to_string_lossy().into_owned(),
    );
    assert!(matches!(
        fixture
            .shell
            .handle_service_protocol_message(SET_ASSET_BUNDLE_PATH_METHOD, &params),
        Err(ShellError::ServiceProtocolFailure(_))
    ));
    assert!(matches!(
        fixture
            .shell
            .handle_service_protocol_message(SET_ASSET_BUNDLE_PATH_METHOD, &no_params()),
        Err(ShellError::ServiceProtocolFailure(_))
    ));
}

#[test]
fn screenshot_method_returns_a_base64_png() {
    let fixture = ShellFixture::with_settings(Settings::default());
    assert!(matches!(
        fixture.shell.handle_service_protocol_message(SCREENSHOT_METHOD, &no_params()),
        Err(ShellError::ServiceProtocolFailure(_))
    ));

    fixture.shell.notify_created().expect("notify created");
    let picture = square_picture(8.0, Color::RED);
    pump_one_frame(&fixture.shell, 16.0, 16.0, move |root| add_picture(root, picture));
    fixture.flush();

    let response = fixture
        .shell
        .handle_service_protocol_message(SCREENSHOT_METHOD, &no_params())
        .expect("screenshot");
    let ServiceProtocolResponse::Screenshot { screenshot } = response else {
        panic!("unexpected response {response:?}");
    };
    let png = BASE64.decode(screenshot).expect("base64");
    assert_eq!(png[..PNG_SIGNATURE.len()], PNG_SIGNATURE);
}

#[test]
fn remaining_service_methods() {
    let fixture = ShellFixture::with_settings(Settings::default());
    assert_eq!(
        fixture
            .shell
            .handle_service_protocol_message(FLUSH_UI_THREAD_TASKS_METHOD, &no_params())
            .expect("flush"),
        ServiceProtocolResponse::Success
    );
    let ServiceProtocolResponse::DisplayRefreshRate { fps } = fixture
        .shell
        .handle_service_protocol_message(GET_DISPLAY_REFRESH_RATE_METHOD, &no_params())
        .expect("refresh rate")
    else {
        panic!("unexpected response");
    };
    assert!(fps > 0.0);
    assert!(matches!(
        fixture
            .shell
            .handle_service_protocol_message("_engine.doesNotExist", &no_params()),
        Err(ShellError::UnknownServiceProtocolMethod(method)) if method == "_engine.doesNotExist"
    ));
}

#[test]
fn screenshots_before_and_after_the_first_frame() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let empty = fixture
        .shell
        .screenshot(ScreenshotType::UncompressedImage, false)
        .expect("screenshot");
    assert_eq!(empty.data, None);

    fixture.shell.notify_created().expect("notify created");
    let picture = square_picture(4.0, Color::GREEN);
    pump_one_frame(&fixture.shell, 4.0, 2.0, move |root| add_picture(root, picture));
    fixture.flush();

    let raw = fixture
        .shell
        .screenshot(ScreenshotType::UncompressedImage, false)
        .expect("screenshot");
    assert_eq!(raw.frame_size, ISize::new(4, 2));
    let data = raw.data.expect("pixels");
    assert_eq!(data.len(), 4 * 2 * 4);
    assert_eq!(data[..4], [0, 255, 0, 255]);

    let compressed = fixture
        .shell
        .screenshot(ScreenshotType::CompressedImage, false)
        .expect("screenshot");
    assert_eq!(compressed.data.expect("png")[..PNG_SIGNATURE.len()], PNG_SIGNATURE);
}

#[test]
fn raster_snapshot_renders_a_picture_off_screen() {
    let fixture = ShellFixture::with_settings(Settings::default());
    let snapshot = fixture
        .shell
        .make_raster_snapshot(square_picture(10.0, Color::RED), ISize::new(10, 10))
        .expect("rasterizer")
        .expect("snapshot");
    assert_eq!(snapshot.dimensions(), (10, 10));
    assert_eq!(*snapshot.get_pixel(5, 5), Rgba([255, 0, 0, 255]));

    assert!(
        fixture
            .shell
            .make_raster_snapshot(square_picture(10.0, Color::RED), ISize::new(0, 10))
            .expect("rasterizer")
            .is_none()
    );
}

#[test]
fn frames_are_discarded_while_the_gpu_is_unavailable() {
    let fixture = ShellFixture::with_settings(Settings::default());
    fixture.shell.notify_created().expect("notify created");

    fixture.shell.set_gpu_available(false);
    assert!(fixture.shell.is_gpu_disabled());
    pump_empty_frame(&fixture.shell, 20.0, 20.0);
    fixture.flush();
    assert_eq!(fixture.presented_frames.count(), 0);

    fixture.shell.set_gpu_available(true);
    pump_empty_frame(&fixture.shell, 20.0, 20.0);
    fixture.flush();
    assert_eq!(fixture.presented_frames.count(), 1);
}

#[test]
fn next_frame_callback_fires_after_submission() {
    let fixture = ShellFixture::with_settings(Settings::default());
    fixture.shell.notify_created().expect("notify created");
    let (sender, fired) = unbounded();
    fixture.shell.set_next_frame_callback(Box::new(move || {
        let _ = sender.send(());
    }));
    assert!(fired.recv_timeout(Duration::from_millis(20)).is_err());

    pump_empty_frame(&fixture.shell, 20.0, 20.0);
    recv(&fired);
    pump_empty_frame(&fixture.shell, 20.0, 20.0);
    fixture.flush();
    assert!(fired.try_recv().is_err(), "callback runs once");
}

#[test]
fn process_context_counts_running_shells() {
    let process_context = ProcessContext::new(Arc::new(TaskQueues::new()), PersistentCache::new(None, false));
    assert!(!process_context.is_instance_running());

    let first = ShellFixture::new(FixtureOptions {
        process_context: Some(Arc::clone(&process_context)),
        ..FixtureOptions::default()
    });
    let second = ShellFixture::new(FixtureOptions {
        process_context: Some(Arc::clone(&process_context)),
        ..FixtureOptions::default()
    });
    assert_eq!(process_context.running_shell_count(), 2);

    drop(first);
    assert_eq!(process_context.running_shell_count(), 1);
    drop(second);
    assert!(!process_context.is_instance_running());
}
