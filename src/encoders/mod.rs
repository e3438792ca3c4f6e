//! Frame encoders for the camera surface and snapshots

mod image;

pub use self::image::{
    decode_frame, encode_frame, is_jpeg, is_png, EncodeError, EncodedImage, ImageFormat,
    ImageMetadata,
};
