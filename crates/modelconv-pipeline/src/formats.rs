//! Registry of model-file extensions accepted by the converter.
//!
//! Extensions are compared exactly, including the leading dot and case:
//! `.FBX` is not `.fbx`.

use std::path::Path;

/// Extensions the external converter can import.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".abc", ".blend", ".dae", ".fbx", ".obj", ".ply", ".stl", ".usd", ".wrl", ".x3d",
];

/// Extension of the converter's output artifact.
pub const OUTPUT_EXTENSION: &str = ".glb";

/// Extension of accepted upload archives.
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// Returns `true` if `extension` (with leading dot) is a supported model format.
pub fn is_supported(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension)
}

/// Leading-dot extension of the final path component.
///
/// Returns `None` when the name has no extension. A dotfile such as
/// `.blend` has no extension, matching `Path::extension`.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
}

/// Returns `true` if the path's extension is a supported model format.
pub fn is_supported_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| is_supported(&ext))
}

/// Returns `true` if the filename carries the archive extension.
pub fn is_archive_name(filename: &str) -> bool {
    extension_of(Path::new(filename)).as_deref() == Some(ARCHIVE_EXTENSION)
}

/// Name of the artifact the converter produces for `input`:
/// the input's file stem with [`OUTPUT_EXTENSION`] appended.
pub fn output_name_for(input: &Path) -> Option<String> {
    let stem = input.file_stem()?.to_str()?;
    Some(format!("{stem}{OUTPUT_EXTENSION}"))
}
