//! Cross-crate scenarios: passes run through the pipeline and checked with the interpreter.

#[cfg(test)]
mod ir;
#[cfg(test)]
mod pipeline;
#[cfg(test)]
mod transforms;

#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Runs `names` over the sample module with every probability forced to 1.0.
#[cfg(test)]
pub(crate) fn run_passes(
    names: &[&str],
    seed: u64,
) -> (veil_core::Module, veil_transform::ModuleReport) {
    use veil_transform::{config::PASS_ORDER, Pipeline, PipelineConfig};

    let config = PASS_ORDER
        .iter()
        .fold(PipelineConfig::only(names), |config, pass| {
            config.with_probability(pass, 1.0)
        });
    let pipeline = Pipeline::from_names(names, &config)
        .unwrap()
        .with_seed(seed);
    let mut module = veil_core::samples::sample_module().unwrap();
    let report = pipeline.run_module(&mut module);
    (module, report)
}
