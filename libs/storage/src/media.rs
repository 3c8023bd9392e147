use std::path::Path;

/// Container extensions treated as recordings
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "ts", "flv", "webm"];

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Muxer name for an output file extension
pub fn format_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => Some("mp4"),
        "mkv" => Some("matroska"),
        "avi" => Some("avi"),
        "mov" => Some("mov"),
        "ts" => Some("mpegts"),
        "flv" => Some("flv"),
        "webm" => Some("webm"),
        _ => None,
    }
}

/// File extension for a muxer name
pub fn extension_for_format(format: &str) -> &str {
    match format {
        "matroska" => "mkv",
        "mpegts" => "ts",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("cam/cam_2024-01-15_12-00-00.mp4")));
        assert!(is_media_file(Path::new("cam/clip.MKV")));
        assert!(!is_media_file(Path::new("cam/index.json")));
        assert!(!is_media_file(Path::new("cam/noext")));
    }

    #[test]
    fn test_format_and_extension_agree() {
        for ext in MEDIA_EXTENSIONS {
            let file = format!("a.{ext}");
            let format = format_from_extension(Path::new(&file)).unwrap();
            assert_eq!(extension_for_format(format), *ext);
        }
    }
}
