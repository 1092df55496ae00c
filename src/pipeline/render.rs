//! Rasterisation: turn the submitted PDF into one PNG per page.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot for vision models (around 1,024–2,048 px).
//!
//! The PNGs written here are the coordinate space of every region the oracle
//! reports, and the source the region engine crops from.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::JobWorkspace;
use crate::model::PageImage;
use async_trait::async_trait;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Produces ordered page images inside the job's working storage.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        document: &[u8],
        workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError>;
}

/// [`Rasterizer`] backed by pdfium.
///
/// The library is looked up in `PDFIUM_DYNAMIC_LIB_PATH` (if set), then the
/// working directory, then the system library path.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_pixels: config.max_rendered_pixels,
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &[u8],
        workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError> {
        let io_err = |e: std::io::Error| PipelineError::Rasterization {
            detail: format!("working storage: {e}"),
        };
        tokio::fs::create_dir_all(workspace.dir())
            .await
            .map_err(io_err)?;
        let source = workspace.source_path();
        tokio::fs::write(&source, document).await.map_err(io_err)?;

        let ws = workspace.clone();
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || render_pages_blocking(&source, &ws, max_pixels))
            .await
            .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind_pdfium() -> Result<Pdfium, PipelineError> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(PathBuf::from("./"));

    for dir in &dirs {
        if let Ok(bindings) =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        {
            return Ok(Pdfium::new(bindings));
        }
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| PipelineError::Rasterization {
            detail: format!("pdfium library not available: {:?}", e),
        })
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    workspace: &JobWorkspace,
    max_pixels: u32,
) -> Result<Vec<PageImage>, PipelineError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PipelineError::Rasterization {
            detail: format!("cannot open document: {:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);
    if total_pages == 0 {
        return Err(PipelineError::Rasterization {
            detail: "document has no pages".into(),
        });
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx as u32 + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            PipelineError::Rasterization {
                detail: format!("page {}: {:?}", page_number, e),
            }
        })?;

        let image = bitmap.as_image();
        let path = workspace.page_path(page_number);
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| PipelineError::Rasterization {
                detail: format!("page {}: {}", page_number, e),
            })?;
        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );

        results.push(PageImage {
            page_number,
            path,
            width: image.width(),
            height: image.height(),
        });
    }

    Ok(results)
}
