use std::path::Path;

use wfctl_core::model::WorkflowLanguage;

/// Detects the workflow language from the main file's extension.
///
/// `None` for anything that is not `.go`, `.ts` or `.wasm`.
pub fn detect_language(main_file: &Path) -> Option<WorkflowLanguage> {
    match main_file.extension()?.to_str()? {
        "go" => Some(WorkflowLanguage::GolangWasm),
        "ts" => Some(WorkflowLanguage::TypescriptWasm),
        "wasm" => Some(WorkflowLanguage::PrebuiltWasm),
        _ => None,
    }
}
