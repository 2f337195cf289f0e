/// File name the BlazeFace short-range ONNX export is cached under.
pub const BLAZEFACE_MODEL_NAME: &str = "blaze_face_short_range.onnx";

/// Sampling cadence: 5 frames per second.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 200;

/// Pixels of padding added around a detected face before cropping.
pub const DEFAULT_CROP_MARGIN_PX: u32 = 7;

pub const CROP_JPEG_QUALITY: u8 = 95;

/// Quality used for full-frame captures (the `image` crate's JPEG default).
pub const FRAME_JPEG_QUALITY: u8 = 75;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8000";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const REGISTER_FACE_PATH: &str = "/register-face";
pub const VERIFY_FACE_PATH: &str = "/verify_face";
pub const ATTENDANCE_PATH: &str = "/attendance";

/// File name the crop is attached under in multipart uploads.
pub const UPLOAD_FILE_NAME: &str = "face.jpg";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
