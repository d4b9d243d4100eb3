use crate::document::PdfDocument;
use crate::storage::Storage;
use crate::validator::{ValidationReport, Validator};
use tracing::{info, warn};

/// Validation functionality for PdfDocument.
impl<S: Storage> PdfDocument<S> {
    // ── Validation ────────────────────────────────────────────────────────────

    /// Check the document's structure without changing anything.
    ///
    /// Reports references reachable from the trailer that do not resolve, a
    /// catalog without `/Pages`, name-tree keys out of order or duplicated,
    /// file specifications that do not lead to an embedded-file stream, and
    /// streams whose decoded length or MD5 disagrees with `/Params`.
    pub fn validate(&self) -> ValidationReport {
        let report = Validator::new(self.store(), self.config().effective_fan_out()).run();
        if report.is_valid() {
            info!("document is structurally valid");
        } else {
            for violation in &report.violations {
                warn!(%violation, "validation failed");
            }
        }
        report
    }
}
