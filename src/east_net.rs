use std::path::PathBuf;

use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array2, Array3, ArrayViewD, Axis, Ix3};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    detect::GEOMETRY_CHANNELS,
    error::{EastError, Result},
    util::{to_input_tensor, Scale},
    ExecutionProvider, InputLayout,
};

pub struct EastNet {
    session: Session,
    input_name: String,
    layout: InputLayout,
}

#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
pub(crate) struct NetConfig {
    pub path: PathBuf,
    pub input_name: String,
    pub layout: InputLayout,
    pub num_threads: usize,
    pub max_side_len: u32,
    pub gpu_index: Option<u32>,
    pub cache_path: Option<PathBuf>,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(config: &NetConfig) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    let NetConfig {
        input_name,
        layout,
        max_side_len,
        ..
    } = config;
    let max_side_len = *max_side_len;
    let cache_path = config.cache_path.clone().unwrap_or_else(|| {
        config
            .path
            .parent()
            .map(|dir| dir.join(".cache"))
            .unwrap_or_else(|| PathBuf::from(".cache"))
    });
    let shape = |side: u32| match layout {
        InputLayout::Nhwc => format!("{input_name}:1x{side}x{side}x3"),
        InputLayout::Nchw => format!("{input_name}:1x3x{side}x{side}"),
    };
    let mut provider = TensorRTExecutionProvider::default();
    if let Some(index) = config.gpu_index {
        provider = provider.with_device_id(index as i32);
    }
    provider
        .with_profile_min_shapes(shape(32))
        .with_profile_max_shapes(shape(max_side_len))
        .with_profile_opt_shapes(shape(max_side_len))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda(gpu_index: Option<u32>) -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    let mut provider = CUDAExecutionProvider::default();
    if let Some(index) = gpu_index {
        provider = provider.with_device_id(index as i32);
    }
    provider.build()
}

#[cfg(feature = "directml")]
fn setup_directml(gpu_index: Option<u32>) -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    let mut provider = DirectMLExecutionProvider::default();
    if let Some(index) = gpu_index {
        provider = provider.with_device_id(index as i32);
    }
    provider.build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

impl EastNet {
    #[instrument(level = "debug")]
    pub(crate) fn init(
        config: NetConfig,
        execution_providers: &[ExecutionProvider],
    ) -> ort::Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => Some(setup_tensorrt(&config)),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda(config.gpu_index)),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml(config.gpu_index)),
                }
            },
        );
        #[cfg(not(any(feature = "tensorrt", feature = "cuda", feature = "directml")))]
        if let Some(index) = config.gpu_index {
            log::warn!("GPU {index} requested but no GPU execution provider is enabled");
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(config.num_threads)?
            .with_intra_threads(config.num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(&config.path)?;

        log::debug!("Detector session inputs: {:?}", session.inputs);
        log::debug!("Detector session outputs: {:?}", session.outputs);

        Ok(Self {
            session,
            input_name: config.input_name,
            layout: config.layout,
        })
    }

    /// Runs the network on `image` resized to `scale`, returning the score map
    /// (`H/4 x W/4`) and geometry map (`H/4 x W/4 x 5`).
    #[instrument(skip(self, image), level = "debug")]
    pub fn predict(&self, image: &DynamicImage, scale: Scale) -> Result<(Array2<f32>, Array3<f32>)> {
        let image =
            image.resize_exact(scale.target_width, scale.target_height, FilterType::Triangle);
        let input_values = to_input_tensor(&image, self.layout == InputLayout::Nchw);
        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => input_values]?)?;

        let mut score_map = None;
        let mut geo_map = None;
        for (name, value) in outputs.iter() {
            let tensor = value.try_extract_tensor::<f32>()?;
            let map = to_hwc(tensor).map_err(|err| {
                EastError::InvalidOutput(format!("output `{name}`: {err}"))
            })?;
            match map.len_of(Axis(2)) {
                1 => score_map = Some(map.index_axis_move(Axis(2), 0).to_owned()),
                GEOMETRY_CHANNELS => geo_map = Some(map.to_owned()),
                channels => log::warn!("Ignoring output `{name}` with {channels} channels"),
            }
        }

        match (score_map, geo_map) {
            (Some(score), Some(geo)) if score.dim() == (geo.dim().0, geo.dim().1) => {
                Ok((score, geo))
            }
            (Some(score), Some(geo)) => Err(EastError::InvalidOutput(format!(
                "score map {:?} and geometry map {:?} disagree in size",
                score.dim(),
                geo.dim()
            ))),
            _ => Err(EastError::InvalidOutput(
                "expected a 1-channel score map and a 5-channel geometry map".into(),
            )),
        }
    }
}

/// Drops the batch axis and brings a `1 x H x W x C` or `1 x C x H x W`
/// tensor into `H x W x C` order. Map sides are at least 8 cells, so a 1 or 5
/// in the channel slot identifies the layout.
fn to_hwc(tensor: ArrayViewD<'_, f32>) -> std::result::Result<ndarray::ArrayView3<'_, f32>, String> {
    let shape = tensor.shape().to_vec();
    if shape.len() != 4 || shape[0] != 1 {
        return Err(format!("expected a 4d single-batch tensor, got shape {shape:?}"));
    }
    let map = tensor
        .index_axis_move(Axis(0), 0)
        .into_dimensionality::<Ix3>()
        .map_err(|err| err.to_string())?;
    let is_channel = |dim: usize| dim == 1 || dim == GEOMETRY_CHANNELS;
    if is_channel(shape[3]) {
        Ok(map)
    } else if is_channel(shape[1]) {
        Ok(map.permuted_axes([1, 2, 0]))
    } else {
        Err(format!("no channel axis in shape {shape:?}"))
    }
}
