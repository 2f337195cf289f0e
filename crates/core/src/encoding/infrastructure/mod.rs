pub mod jpeg_image_encoder;
