//! Screen mirroring through a virtual display
//!
//! Mirroring needs a grant token obtained from the host's consent flow. With
//! it, a virtual display sized to the host screen renders into a shallow
//! image surface. The frame-available handler always takes the latest image
//! and drops anything older: the surface must never back up, or the platform
//! compositor stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CaptureSource, SourceKind};
use crate::constants::{SCREEN_BUFFER_DEPTH, VIRTUAL_DISPLAY_NAME};
use crate::error::CaptureError;
use crate::frame::{create_shared_pool, Frame, FrameStamper, ImageView, PixelFormat, SharedFramePool};
use crate::pipeline::FrameProducer;

/// Opaque proof that the user approved screen capture
#[derive(Clone, PartialEq, Eq)]
pub struct GrantToken(String);

impl GrantToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for GrantToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GrantToken(..)")
    }
}

/// Consent request sent to the host, keyed by `request_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentRequest {
    pub request_id: u32,
}

/// The host's answer to a [`ConsentRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentResponse {
    pub request_id: u32,
    pub grant: Option<GrantToken>,
}

impl ConsentResponse {
    pub fn granted(request_id: u32, grant: GrantToken) -> Self {
        Self {
            request_id,
            grant: Some(grant),
        }
    }

    pub fn declined(request_id: u32) -> Self {
        Self {
            request_id,
            grant: None,
        }
    }
}

/// Result of the consent exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentOutcome {
    Granted(GrantToken),
    Declined,
}

impl ConsentRequest {
    pub fn new(request_id: u32) -> Self {
        Self { request_id }
    }

    /// Match a response to this request.
    ///
    /// A response for another request or without a grant counts as declined.
    pub fn resolve(&self, response: ConsentResponse) -> ConsentOutcome {
        if response.request_id != self.request_id {
            tracing::debug!(
                expected = self.request_id,
                got = response.request_id,
                "Ignoring consent response for another request"
            );
            return ConsentOutcome::Declined;
        }

        match response.grant {
            Some(grant) => ConsentOutcome::Granted(grant),
            None => {
                tracing::info!(request_id = self.request_id, "Screen capture declined");
                ConsentOutcome::Declined
            }
        }
    }
}

/// Current host display geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

/// Parameters for a virtual display and its receiving surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisplaySpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub format: PixelFormat,
    /// Images the surface holds at most
    pub buffer_depth: usize,
}

/// An image checked out of an [`ImageSurface`]
pub trait PlatformImage: Send {
    fn view(&self) -> ImageView<'_>;

    /// Return the image to its surface
    fn close(&mut self);
}

/// Receiving surface of a virtual display
pub trait ImageSurface: Send + Sync {
    /// Newest image, discarding any older queued ones. `None` if nothing is
    /// queued or every slot is checked out.
    fn acquire_latest_image(&self) -> Option<Box<dyn PlatformImage>>;
}

/// Frame-available notification, invoked on the display's callback thread
pub type ImageAvailableCallback = Arc<dyn Fn(&dyn ImageSurface) + Send + Sync>;

/// A running virtual display
pub trait VirtualDisplay: Send {
    /// Install or clear the frame-available listener.
    ///
    /// Clearing waits for a running notification to return.
    fn set_image_listener(&mut self, listener: Option<ImageAvailableCallback>);

    /// Tear down the display and its surface
    fn release(&mut self);
}

/// Platform display service
pub trait DisplayBackend: Send + Sync {
    fn metrics(&self) -> DisplayMetrics;

    fn create_virtual_display(
        &self,
        grant: &GrantToken,
        spec: &VirtualDisplaySpec,
    ) -> Result<Box<dyn VirtualDisplay>, CaptureError>;
}

/// Closes the wrapped image when dropped, on every exit path
struct ImageGuard(Box<dyn PlatformImage>);

impl Drop for ImageGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Capture source mirroring the host screen
pub struct ScreenMirrorSource {
    backend: Arc<dyn DisplayBackend>,
    consent: ConsentOutcome,
    buffer_depth: usize,
    allow_background: bool,
    pool_size: usize,
    display: Option<Box<dyn VirtualDisplay>>,
    spec: Option<VirtualDisplaySpec>,
    active: Arc<AtomicBool>,
    pool: SharedFramePool,
    stamper: Arc<FrameStamper>,
}

impl ScreenMirrorSource {
    pub fn new(backend: Arc<dyn DisplayBackend>, consent: ConsentOutcome) -> Self {
        Self {
            backend,
            consent,
            buffer_depth: SCREEN_BUFFER_DEPTH,
            allow_background: true,
            pool_size: SCREEN_BUFFER_DEPTH + 2,
            display: None,
            spec: None,
            active: Arc::new(AtomicBool::new(false)),
            pool: create_shared_pool(1, 0),
            stamper: Arc::new(FrameStamper::new()),
        }
    }

    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth.max(1);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Whether mirroring may continue while the host is backgrounded
    pub fn allow_background(mut self, allow: bool) -> Self {
        self.allow_background = allow;
        self
    }

    /// Geometry of the current virtual display
    pub fn display_spec(&self) -> Option<&VirtualDisplaySpec> {
        self.spec.as_ref()
    }

    pub fn frames_captured(&self) -> u64 {
        self.stamper.stamped()
    }

    fn image_listener(&self, producer: FrameProducer) -> ImageAvailableCallback {
        let active = self.active.clone();
        let pool = self.pool.clone();
        let stamper = self.stamper.clone();

        let listener: ImageAvailableCallback = Arc::new(move |surface: &dyn ImageSurface| {
            if !active.load(Ordering::Acquire) {
                return;
            }

            let Some(image) = surface.acquire_latest_image() else {
                return;
            };
            let image = ImageGuard(image);

            let (sequence, timestamp) = stamper.stamp();
            match Frame::from_view(&image.0.view(), &pool, sequence, timestamp) {
                Ok(frame) => {
                    producer.submit(frame);
                }
                Err(e) => {
                    tracing::warn!(sequence, error = %e, "Dropping malformed screen frame");
                }
            }
        });
        listener
    }
}

impl CaptureSource for ScreenMirrorSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ScreenMirror
    }

    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.display.is_some() {
            return Err(CaptureError::AlreadyAcquired);
        }

        let grant = match &self.consent {
            ConsentOutcome::Granted(grant) => grant,
            ConsentOutcome::Declined => return Err(CaptureError::ConsentDenied),
        };

        let metrics = self.backend.metrics();
        let spec = VirtualDisplaySpec {
            name: VIRTUAL_DISPLAY_NAME.to_string(),
            width: metrics.width,
            height: metrics.height,
            density_dpi: metrics.density_dpi,
            format: PixelFormat::Rgba8888,
            buffer_depth: self.buffer_depth,
        };

        let display = self.backend.create_virtual_display(grant, &spec).map_err(|e| {
            tracing::error!(error = %e, "Failed to create virtual display");
            e
        })?;

        self.pool = create_shared_pool(
            self.pool_size,
            spec.width as usize * spec.height as usize * PixelFormat::Rgba8888.bytes_per_pixel(),
        );
        tracing::info!(
            width = spec.width,
            height = spec.height,
            density = spec.density_dpi,
            depth = spec.buffer_depth,
            "Virtual display created"
        );
        self.display = Some(display);
        self.spec = Some(spec);
        Ok(())
    }

    fn produce_frames(&mut self, producer: FrameProducer) -> Result<(), CaptureError> {
        let listener = self.image_listener(producer);
        let display = self.display.as_mut().ok_or(CaptureError::NotAcquired)?;

        self.active.store(true, Ordering::Release);
        display.set_image_listener(Some(listener));
        Ok(())
    }

    fn release(&mut self) {
        self.active.store(false, Ordering::Release);

        if let Some(mut display) = self.display.take() {
            display.set_image_listener(None);
            display.release();
            self.spec = None;
            tracing::info!("Virtual display released");
        }
    }

    fn is_acquired(&self) -> bool {
        self.display.is_some()
    }

    fn requires_foreground(&self) -> bool {
        !self.allow_background
    }
}

impl Drop for ScreenMirrorSource {
    fn drop(&mut self) {
        self.release();
    }
}
