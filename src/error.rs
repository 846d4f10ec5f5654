use thiserror::Error;

#[derive(Debug, Error)]
pub enum EastError {
    #[error(transparent)]
    Runtime(#[from] ort::Error),
    #[error("failed to read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("unexpected model output: {0}")]
    InvalidOutput(String),
    #[error("input image has no pixels")]
    EmptyImage,
}

pub type Result<T, E = EastError> = std::result::Result<T, E>;
