use crate::registry::LoggerRegistry;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

/// Which layers [`init_tracing_with_config`] installs.
///
/// **Fields**
/// - `enable_stdout`: add a `tracing_subscriber::fmt` layer that prints
///   events to the console. It carries the registry's passthrough filter,
///   so levels forwarded by a console patch are hidden unless the patch
///   asked for passthrough.
/// - `forward_console`: add the registry's console layer so that
///   [`LoggerRegistry::patch_console`] has something to switch on.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub enable_stdout: bool,
    pub forward_console: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            forward_console: true,
        }
    }
}

/// Install the global `tracing` subscriber for `registry`.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with the layers selected by `config` as
/// the global default subscriber. Fails if a global subscriber is already
/// set.
pub fn init_tracing_with_config(
    registry: &LoggerRegistry,
    config: LayerConfig,
) -> Result<(), SetGlobalDefaultError> {
    let console = config.forward_console.then(|| registry.console_layer());
    let stdout = config.enable_stdout.then(|| {
        tracing_subscriber::fmt::layer().with_filter(registry.passthrough_filter())
    });

    // `Option<L>` is itself a layer, so one subscriber type covers every
    // combination.
    let subscriber = Registry::default().with(console).with(stdout);
    tracing::subscriber::set_global_default(subscriber)
}

/// Equivalent to [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(registry: &LoggerRegistry) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(registry, LayerConfig::default())
}
