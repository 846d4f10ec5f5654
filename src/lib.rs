use std::{path::PathBuf, time::Instant};

use east_net::{EastNet, NetConfig};

pub mod detect;
mod east_net;
mod error;
pub mod geometry;
pub mod lanms;
pub mod overlay;
mod result;
pub mod util;

pub use error::{EastError, Result};
pub use geometry::Quad;
use image::DynamicImage;
pub use result::*;
use tracing::instrument;
use util::resize_image;

pub use ort as runtime;

pub struct EastDetectorBuilder {
    threads: usize,
    gpu_index: Option<u32>,
    model_path: Option<PathBuf>,
    input_name: String,
    input_layout: InputLayout,
    max_side_len: u32,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl EastDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Device used by the CUDA, TensorRT and DirectML providers.
    pub fn gpu_index(mut self, index: Option<u32>) -> Self {
        self.gpu_index = index;
        self
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Name of the image input of the graph. Defaults to `input_images`.
    pub fn input_name(mut self, name: impl Into<String>) -> Self {
        self.input_name = name.into();
        self
    }

    pub fn input_layout(mut self, layout: InputLayout) -> Self {
        self.input_layout = layout;
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<EastDetector> {
        let path = self
            .model_path
            .take()
            .unwrap_or_else(|| "models/east_text_detection.onnx".into());
        let config = NetConfig {
            path,
            input_name: self.input_name,
            layout: self.input_layout,
            num_threads: self.threads,
            max_side_len: self.max_side_len,
            gpu_index: self.gpu_index,
            cache_path: self.cache_path,
        };
        let net = EastNet::init(config, &self.execution_providers)?;
        Ok(EastDetector {
            net,
            max_side_len: self.max_side_len,
        })
    }
}

impl Default for EastDetectorBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            gpu_index: None,
            model_path: None,
            input_name: "input_images".into(),
            input_layout: InputLayout::Nhwc,
            max_side_len: 2400,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

pub struct EastDetector {
    net: EastNet,
    max_side_len: u32,
}

impl EastDetector {
    #[instrument(skip(self, image))]
    pub fn detect(&self, image: &DynamicImage, options: DetectionOptions) -> Result<Detection> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EastError::EmptyImage);
        }
        let max_side_len = if options.max_side_len != 0 {
            options.max_side_len
        } else {
            self.max_side_len
        };
        let scale = resize_image(image.width(), image.height(), max_side_len);

        let mut timings = Timings::default();
        let start = Instant::now();
        let (score_map, geo_map) = self.net.predict(image, scale)?;
        timings.net = start.elapsed();

        #[cfg(feature = "debug")]
        if let Err(err) = util::to_luma_image(score_map.view()).save("score_map.png") {
            log::warn!("Failed to save score map: {err}");
        }

        let boxes = detect::decode(score_map.view(), geo_map.view(), &options, &mut timings);
        let boxes = detect::to_image_boxes(boxes, scale, &options);
        log::info!(
            "{} boxes: net {:.0}ms, restore {:.0}ms, nms {:.0}ms",
            boxes.len(),
            timings.net.as_secs_f64() * 1000.0,
            timings.restore.as_secs_f64() * 1000.0,
            timings.nms.as_secs_f64() * 1000.0,
        );
        Ok(Detection { boxes, timings })
    }

    /// Loads an image from disk and runs [`EastDetector::detect`] on it.
    pub fn detect_file(
        &self,
        path: impl AsRef<std::path::Path>,
        options: DetectionOptions,
    ) -> Result<(DynamicImage, Detection)> {
        let image = image::open(path)?;
        let detection = self.detect(&image, options)?;
        Ok((image, detection))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// Overrides the detector's `max_side_len` when non-zero.
    pub max_side_len: u32,
    /// Minimum score map value for a pixel to propose a box.
    pub score_map_threshold: f32,
    /// Minimum mean score inside a box after NMS.
    pub box_threshold: f32,
    pub nms_threshold: f32,
    /// Boxes with a side shorter than this many pixels are dropped.
    pub min_edge: f32,
    pub padding_horizontal: f32,
    pub padding_vertical: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_side_len: 0,
            score_map_threshold: 0.8,
            box_threshold: 0.1,
            nms_threshold: 0.2,
            min_edge: 5.0,
            padding_horizontal: 0.0,
            padding_vertical: 0.0,
        }
    }
}

/// Memory layout of the image tensor the model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputLayout {
    /// `1 x H x W x 3`, as exported from TensorFlow.
    #[default]
    Nhwc,
    /// `1 x 3 x H x W`
    Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
