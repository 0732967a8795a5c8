//! Camera frame source.
//!
//! `CameraSource` ingests frames from an RTSP stream or a local webcam.
//!
//! - `stub://` RTSP URLs produce synthetic frames (always available)
//! - Real RTSP URLs and webcams decode through GStreamer (feature `rtsp-gstreamer`)
//!
//! Reopening rebuilds the decode pipeline from scratch so a stalled or
//! errored stream does not leak state into the next session.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

use crate::config::SourceSpec;
use crate::frame::Frame;
use crate::ingest::FrameSource;

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const SYNTHETIC_FPS: u32 = 10;

/// Camera frame source.
pub struct CameraSource {
    spec: SourceSpec,
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerCamera),
}

impl CameraSource {
    pub fn new(spec: SourceSpec) -> Result<Self> {
        let backend = match &spec {
            SourceSpec::Rtsp(url) if url.starts_with("stub://") => {
                CameraBackend::Synthetic(SyntheticCamera::new(url.clone()))
            }
            _ => {
                #[cfg(feature = "rtsp-gstreamer")]
                {
                    CameraBackend::Gstreamer(GstreamerCamera::new(spec.clone())?)
                }
                #[cfg(not(feature = "rtsp-gstreamer"))]
                {
                    return Err(anyhow!(
                        "{} requires the rtsp-gstreamer feature (use a stub:// url for dry runs)",
                        spec
                    ));
                }
            }
        };
        Ok(Self { spec, backend })
    }

    /// Frames decoded since this source was created, across reconnects.
    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.frame_count,
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Gstreamer(camera) => camera.frame_count,
        }
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.open(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Gstreamer(camera) => camera.open(),
        }
    }

    fn read(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.read(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Gstreamer(camera) => camera.read(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.close(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Gstreamer(camera) => camera.close(),
        }
    }

    fn describe(&self) -> String {
        self.spec.to_string()
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and dry runs
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    url: String,
    open: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    fn new(url: String) -> Self {
        Self {
            url,
            open: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        log::info!("camera: connected to {} (synthetic)", self.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("synthetic camera {} is not open", self.url));
        }

        // Pace to the nominal frame rate so the pipeline behaves like a live stream.
        let interval = Duration::from_millis(1000 / SYNTHETIC_FPS as u64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;

        let shift = (self.frame_count % 256) as u32;
        let image = RgbImage::from_fn(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        });
        Ok(Frame::new(image, self.frame_count))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

// ----------------------------------------------------------------------------
// Production source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerCamera {
    spec: SourceSpec,
    session: Option<GstreamerSession>,
    frame_count: u64,
}

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSession {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerCamera {
    fn new(spec: SourceSpec) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            spec,
            session: None,
            frame_count: 0,
        })
    }

    fn pipeline_description(&self) -> String {
        let input = match &self.spec {
            SourceSpec::Rtsp(url) => format!("rtspsrc location={} latency=0 ! decodebin", url),
            SourceSpec::Webcam(id) => format!("v4l2src device=/dev/video{}", id),
        };
        format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            input
        )
    }

    fn open(&mut self) -> Result<()> {
        self.close();

        let pipeline = gstreamer::parse_launch(&self.pipeline_description())
            .context("build camera pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("camera pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set camera pipeline to Playing")?;
        log::info!("camera: connected to {}", self.spec);

        self.session = Some(GstreamerSession { pipeline, appsink });
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("camera {} is not open", self.spec))?;
        poll_bus(&session.pipeline)?;

        let sample = session
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_seconds(2))
            .ok_or_else(|| anyhow!("camera stream stalled"))?;
        let image = sample_to_image(&sample)?;

        self.frame_count += 1;
        Ok(Frame::new(image, self.frame_count))
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.pipeline.set_state(gstreamer::State::Null) {
                log::warn!("camera: failed to stop pipeline for {}: {}", self.spec, e);
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn poll_bus(pipeline: &gstreamer::Pipeline) -> Result<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
        use gstreamer::MessageView;
        match message.view() {
            MessageView::Error(err) => {
                return Err(anyhow!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
            MessageView::Eos(..) => return Err(anyhow!("gstreamer reached EOS")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_image(sample: &gstreamer::Sample) -> Result<RgbImage> {
    let buffer = sample.buffer().context("camera sample missing buffer")?;
    let caps = sample.caps().context("camera sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse camera caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map camera buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("camera buffer row is out of bounds")?,
        );
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("camera frame size does not match {}x{}", width, height))
}
