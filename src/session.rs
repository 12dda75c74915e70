use std::path::Path;
#[cfg(feature = "tensorrt")]
use std::path::PathBuf;

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

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

pub(crate) const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
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

/// Input shape profile handed to TensorRT, as `(min, opt, max)`.
#[cfg(feature = "tensorrt")]
pub(crate) struct ShapeProfile {
    pub min: String,
    pub opt: String,
    pub max: String,
}

/// Session settings shared by the detection, classification and recognition models.
#[derive(Debug, Clone)]
pub(crate) struct SessionConfig<'a> {
    pub threads: usize,
    pub execution_providers: &'a [ExecutionProvider],
    #[cfg(feature = "tensorrt")]
    pub cache_path: Option<PathBuf>,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, profile: &ShapeProfile) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(&profile.min)
        .with_profile_max_shapes(&profile.max)
        .with_profile_opt_shapes(&profile.opt)
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    ort::CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    ort::DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    ort::CoreMLExecutionProvider::default().build()
}

#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub(crate) fn build_session(
    path: &Path,
    config: &SessionConfig<'_>,
    #[cfg(feature = "tensorrt")] profile: ShapeProfile,
) -> ort::Result<Session> {
    #[cfg(feature = "directml")]
    let parallel = !config
        .execution_providers
        .contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    #[cfg(feature = "tensorrt")]
    let cache_path = config.cache_path.clone().unwrap_or_else(|| {
        path.parent()
            .map(|it| it.join(".cache"))
            .unwrap_or_else(|| PathBuf::from(".cache"))
    });

    let execution_providers = config.execution_providers.iter().filter_map(
        |provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => Some(setup_tensorrt(cache_path.clone(), &profile)),
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
            }
        },
    );

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(config.threads)?
        .with_intra_threads(config.threads)?
        .with_execution_providers(execution_providers)?
        .commit_from_file(path)?;

    log::debug!("Session inputs for {}: {:?}", path.display(), session.inputs);
    log::debug!("Session outputs for {}: {:?}", path.display(), session.outputs);
    Ok(session)
}
