//! On-screen preview of grabbed images.
//!
//! The window is optional (feature `preview-window`). Closing it cancels
//! the shared token so the copy loop stops like it would on Ctrl-C.

use crate::cancel::CancelToken;
use crate::frame::VideoImage;

pub trait Preview {
    fn show(&mut self, image: &VideoImage);
}

/// Discards images; counts them for tests and headless runs.
#[derive(Debug, Default)]
pub struct NullPreview {
    pub shown: u64,
}

impl Preview for NullPreview {
    fn show(&mut self, _image: &VideoImage) {
        self.shown += 1;
    }
}

/// Open a preview window titled `title`, or a `NullPreview` when disabled
/// or when windows are not built in.
pub fn open(title: &str, enabled: bool, cancel: &CancelToken) -> Box<dyn Preview> {
    if !enabled {
        return Box::new(NullPreview::default());
    }
    #[cfg(feature = "preview-window")]
    {
        match window::WindowPreview::new(title, cancel.clone()) {
            Ok(preview) => return Box::new(preview),
            Err(err) => log::warn!("preview window unavailable: {}", err),
        }
    }
    #[cfg(not(feature = "preview-window"))]
    {
        let _ = cancel;
        log::warn!(
            "preview '{}' requested but the preview-window feature is not enabled",
            title
        );
    }
    Box::new(NullPreview::default())
}

#[cfg(feature = "preview-window")]
mod window {
    use minifb::{Window, WindowOptions};

    const PREVIEW_FPS: usize = 60;

    use super::Preview;
    use crate::cancel::CancelToken;
    use crate::frame::VideoImage;

    /// The window is created lazily at the first image's size.
    pub struct WindowPreview {
        title: String,
        window: Option<Window>,
        buffer: Vec<u32>,
        width: usize,
        height: usize,
        cancel: CancelToken,
    }

    impl WindowPreview {
        pub fn new(title: &str, cancel: CancelToken) -> Result<Self, minifb::Error> {
            Ok(Self {
                title: title.to_string(),
                window: None,
                buffer: Vec::new(),
                width: 0,
                height: 0,
                cancel,
            })
        }

        fn ensure_window(&mut self, width: usize, height: usize) -> Result<(), minifb::Error> {
            if self.window.is_some() && width == self.width && height == self.height {
                return Ok(());
            }
            if self.window.is_none() {
                let mut window =
                    Window::new(&self.title, width, height, WindowOptions::default())?;
                window.set_target_fps(PREVIEW_FPS);
                self.window = Some(window);
            }
            self.width = width;
            self.height = height;
            self.buffer.resize(width * height, 0);
            Ok(())
        }
    }

    impl Preview for WindowPreview {
        fn show(&mut self, image: &VideoImage) {
            let (width, height) = (image.width as usize, image.height as usize);
            if width == 0 || height == 0 || self.cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.ensure_window(width, height) {
                log::warn!("preview window failed: {}", err);
                return;
            }
            for (pixel, rgb) in self
                .buffer
                .iter_mut()
                .zip(image.as_bytes().chunks_exact(3))
            {
                *pixel = 0xFF << 24 | (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32;
            }
            let Some(window) = self.window.as_mut() else {
                return;
            };
            if !window.is_open() {
                log::info!("preview window closed");
                self.cancel.cancel();
                return;
            }
            if let Err(err) = window.update_with_buffer(&self.buffer, self.width, self.height) {
                log::warn!("preview update failed: {}", err);
            }
        }
    }
}
