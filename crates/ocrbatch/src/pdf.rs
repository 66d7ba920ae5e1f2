//! PDF page counting and page rasterization.
//!
//! Counting prefers lopdf; when lopdf can't parse a PDF (e.g. invalid
//! cross-reference table) it falls back to `pdfinfo`. Rendering shells out
//! to `pdftoppm` (poppler-utils), which handles more PDF variants than any
//! pure-Rust rasterizer we could embed.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::PdfError;

/// Returns the total page count of a PDF.
pub fn page_count(pdf_path: &Path) -> Result<u32, PdfError> {
    let pdf_bytes = std::fs::read(pdf_path).map_err(|e| PdfError::Read {
        path: pdf_path.to_path_buf(),
        source: e,
    })?;

    match lopdf::Document::load_mem(&pdf_bytes) {
        Ok(doc) => Ok(doc.get_pages().len() as u32),
        Err(e) => {
            tracing::warn!(
                "lopdf failed to parse {}: {}. Falling back to pdfinfo.",
                pdf_path.display(),
                e
            );
            count_pages_with_pdfinfo(pdf_path)
        }
    }
}

/// Renders one zero-based page of a PDF to a PNG at `output_image_path`.
///
/// An already-rendered page is reused, so re-running a job after a partial
/// failure does not re-rasterize pages that were produced before.
pub fn render_page(
    pdf_path: &Path,
    page_index: u32,
    output_image_path: &Path,
    dpi: u32,
) -> Result<PathBuf, PdfError> {
    if output_image_path.exists() {
        return Ok(output_image_path.to_path_buf());
    }

    let total_pages = page_count(pdf_path)?;
    if page_index >= total_pages {
        return Err(PdfError::PageOutOfRange {
            path: pdf_path.to_path_buf(),
            page_index,
            page_count: total_pages,
        });
    }

    let parent = output_image_path
        .parent()
        .ok_or_else(|| PdfError::Render("Output image path has no parent directory".to_string()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| PdfError::Render(format!("Failed to create work directory: {e}")))?;

    // pdftoppm numbers pages from 1 and appends the page number to the prefix.
    let page_number = page_index + 1;
    let output_prefix = parent.join(format!("render_{}", uuid::Uuid::new_v4()));

    let output = Command::new("pdftoppm")
        .args([
            "-png",
            "-r",
            &dpi.to_string(),
            "-f",
            &page_number.to_string(),
            "-l",
            &page_number.to_string(),
        ])
        .arg(pdf_path)
        .arg(&output_prefix)
        .output()
        .map_err(|e| {
            PdfError::Render(format!(
                "Failed to run pdftoppm: {e}. Make sure poppler-utils is installed."
            ))
        })?;

    if !output.status.success() {
        return Err(PdfError::Render(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm pads the page-number suffix depending on the document size.
    let candidates = [
        format!("{}-{}.png", output_prefix.display(), page_number),
        format!("{}-{:02}.png", output_prefix.display(), page_number),
        format!("{}-{:03}.png", output_prefix.display(), page_number),
    ];
    let rendered = candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| PdfError::Render("Failed to find rendered page image".to_string()))?;

    std::fs::rename(&rendered, output_image_path)
        .map_err(|e| PdfError::Render(format!("Failed to move rendered image: {e}")))?;

    Ok(output_image_path.to_path_buf())
}

/// Page count via pdfinfo (poppler-utils). Fallback when lopdf can't parse
/// the PDF structure.
fn count_pages_with_pdfinfo(pdf_path: &Path) -> Result<u32, PdfError> {
    let output = Command::new("pdfinfo").arg(pdf_path).output().map_err(|e| {
        PdfError::Parse {
            path: pdf_path.to_path_buf(),
            reason: format!("Failed to run pdfinfo: {e}. Make sure poppler-utils is installed."),
        }
    })?;

    if !output.status.success() {
        return Err(PdfError::Parse {
            path: pdf_path.to_path_buf(),
            reason: format!("pdfinfo failed: {}", String::from_utf8_lossy(&output.stderr)),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(count_str) = line.strip_prefix("Pages:") {
            if let Ok(count) = count_str.trim().parse::<u32>() {
                return Ok(count);
            }
        }
    }

    Err(PdfError::Parse {
        path: pdf_path.to_path_buf(),
        reason: "pdfinfo output contained no page count".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal valid PDF with the requested number of empty pages.
    pub(crate) fn make_pdf_bytes(pages: usize) -> Vec<u8> {
        use lopdf::{dictionary, Document, Object};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids: Vec<Object> = Vec::with_capacity(pages);
        for _ in 0..pages {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut pdf_bytes = Vec::new();
        doc.save_to(&mut pdf_bytes).unwrap();
        pdf_bytes
    }

    #[test]
    fn test_page_count_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.pdf");
        std::fs::write(&path, make_pdf_bytes(1)).unwrap();

        assert_eq!(page_count(&path).unwrap(), 1);
    }

    #[test]
    fn test_page_count_multi_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.pdf");
        std::fs::write(&path, make_pdf_bytes(3)).unwrap();

        assert_eq!(page_count(&path).unwrap(), 3);
    }

    #[test]
    fn test_page_count_missing_file() {
        let result = page_count(Path::new("/nonexistent/file.pdf"));
        assert!(matches!(result, Err(PdfError::Read { .. })));
    }

    #[test]
    fn test_page_count_garbage_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.pdf");
        std::fs::write(&path, b"not a valid pdf").unwrap();

        // Both lopdf and the pdfinfo fallback reject this.
        assert!(page_count(&path).is_err());
    }

    #[test]
    fn test_render_page_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.pdf");
        std::fs::write(&path, make_pdf_bytes(1)).unwrap();

        let target = dir.path().join("work").join("page.png");
        let result = render_page(&path, 5, &target, 200);
        assert!(matches!(
            result,
            Err(PdfError::PageOutOfRange {
                page_index: 5,
                page_count: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_render_page_reuses_existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let pdf_path = dir.path().join("one.pdf");
        std::fs::write(&pdf_path, make_pdf_bytes(1)).unwrap();

        let target = dir.path().join("page.png");
        std::fs::write(&target, b"already rendered").unwrap();

        // Returns the cached image without invoking pdftoppm.
        let rendered = render_page(&pdf_path, 0, &target, 200).unwrap();
        assert_eq!(rendered, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"already rendered");
    }
}
