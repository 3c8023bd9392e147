pub mod media;
pub mod path;
pub mod stream;
pub mod template;
pub mod timestamp;

pub use media::{extension_for_format, format_from_extension, is_media_file};
pub use path::{archive_path, sanitize_component, validate_path};
pub use stream::infer_stream;
pub use template::{recording_path, render_template};
pub use timestamp::{FilenameTimestamp, TimestampPattern, parse_filename_timestamp};
