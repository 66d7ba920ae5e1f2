//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ocrbatch::error::EngineError;
use ocrbatch::{JobRegistry, OcrEngine, RecognizeRequest};

/// Engine stub that answers with text derived from the image filename, so
/// merged output can be checked for ordering without a real OCR engine.
pub struct NamedStubEngine;

impl OcrEngine for NamedStubEngine {
    fn recognize(
        &self,
        image_path: &Path,
        _request: &RecognizeRequest<'_>,
    ) -> Result<String, EngineError> {
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(format!("ocr text for {name}"))
    }
}

/// Engine stub that takes a while, to keep a run active.
pub struct SlowEngine {
    pub delay: Duration,
}

impl OcrEngine for SlowEngine {
    fn recognize(
        &self,
        _image_path: &Path,
        _request: &RecognizeRequest<'_>,
    ) -> Result<String, EngineError> {
        std::thread::sleep(self.delay);
        Ok("slow text".to_string())
    }
}

/// Engine stub that requests job cancellation during its first invocation,
/// simulating an operator pressing cancel while a task is in flight.
pub struct CancellingEngine {
    pub registry: JobRegistry,
    pub job_root: PathBuf,
    calls: AtomicUsize,
}

impl CancellingEngine {
    pub fn new(registry: JobRegistry, job_root: PathBuf) -> Self {
        Self {
            registry,
            job_root,
            calls: AtomicUsize::new(0),
        }
    }
}

impl OcrEngine for CancellingEngine {
    fn recognize(
        &self,
        image_path: &Path,
        _request: &RecognizeRequest<'_>,
    ) -> Result<String, EngineError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.registry.cancel(&self.job_root);
        }
        Ok(format!(
            "text from {}",
            image_path.file_name().unwrap_or_default().to_string_lossy()
        ))
    }
}

/// Minimal valid PDF with the requested number of empty pages.
pub fn make_pdf_bytes(pages: usize) -> Vec<u8> {
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
