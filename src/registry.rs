//! Process-level logger registry and console patching.
//!
//! A [`LoggerRegistry`] owns at most one registered [`WsLogger`] and at most
//! one console patch. The `log`/`info`/... methods are a facade: they go to
//! the registered logger, or to plain `tracing` output when there is none.
//!
//! "Console" here is the process's `tracing` output. Patching installs
//! nothing by itself; the application wires [`LoggerRegistry::console_layer`]
//! and [`LoggerRegistry::passthrough_filter`] into its subscriber once (see
//! [`crate::init`]) and the registry switches them on and off.

use crate::config::LoggerOptions;
use crate::connection::{CONSOLE_TARGET, REGISTRY_TARGET};
use crate::console::{ActivePatch, ConsoleLayer, PassthroughFilter, PatchSlot};
use crate::error::RegistryError;
use crate::logger::WsLogger;
use crate::record::LogLevel;
use crate::value::{format_message, Arg};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Options for [`LoggerRegistry::initialize`].
#[derive(Debug, Clone, Default)]
pub struct InitializeOptions {
    pub logger: LoggerOptions,
    /// Forward console events into the new logger.
    pub patch_console: bool,
    /// Levels to forward; all levels when `None`.
    pub console_levels: Option<Vec<LogLevel>>,
    /// Keep patched events on the console too. Defaults to the logger's
    /// effective `enable_console`.
    pub console_passthrough: Option<bool>,
}

impl InitializeOptions {
    pub fn new(logger: LoggerOptions) -> Self {
        InitializeOptions {
            logger,
            ..Default::default()
        }
    }

    pub fn patch_console(mut self, levels: Option<Vec<LogLevel>>) -> Self {
        self.patch_console = true;
        self.console_levels = levels;
        self
    }

    pub fn with_console_passthrough(mut self, passthrough: bool) -> Self {
        self.console_passthrough = Some(passthrough);
        self
    }
}

/// Options for [`LoggerRegistry::patch_console`].
#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    /// Logger to forward into; the registered logger when `None`.
    pub logger: Option<WsLogger>,
    /// Levels to forward; all levels when `None`. `tracing` has no `log`
    /// level: [`LogLevel::Log`] takes INFO events, forwarded as `log` unless
    /// [`LogLevel::Info`] is patched too.
    pub levels: Option<Vec<LogLevel>>,
    /// Keep patched events on the console too.
    pub passthrough: bool,
}

/// Undoes one [`LoggerRegistry::patch_console`] call.
///
/// A handle whose patch was already replaced by a later one does nothing.
pub struct ConsoleRestore {
    slot: PatchSlot,
    id: u64,
}

impl ConsoleRestore {
    pub fn restore(self) {
        let mut slot = self.slot.write();
        if slot.as_ref().is_some_and(|p| p.id == self.id) {
            *slot = None;
        }
    }
}

/// Holder of the registered logger and the console patch.
pub struct LoggerRegistry {
    logger: RwLock<Option<WsLogger>>,
    patch: PatchSlot,
    next_patch_id: AtomicU64,
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerRegistry {
    pub fn new() -> Self {
        LoggerRegistry {
            logger: RwLock::new(None),
            patch: Arc::new(RwLock::new(None)),
            next_patch_id: AtomicU64::new(0),
        }
    }

    /// Close any registered logger, then create and register a new one.
    ///
    /// With `patch_console` set, `enable_console` defaults to `false` so that
    /// forwarded console events are not printed twice.
    pub fn initialize(&self, options: InitializeOptions) -> Result<WsLogger, RegistryError> {
        let previous = self.logger.write().take();
        if let Some(previous) = previous {
            self.drop_patch_for(&previous);
            previous.close();
        }

        let mut logger_options = options.logger;
        let enable_console = logger_options
            .enable_console
            .unwrap_or(!options.patch_console);
        logger_options.enable_console = Some(enable_console);

        let logger = WsLogger::new(logger_options)?;
        *self.logger.write() = Some(logger.clone());
        tracing::debug!(
            target: REGISTRY_TARGET,
            source = %logger.options().source,
            "logger registered"
        );

        if options.patch_console {
            // The registry keeps track of the patch; the handle is not needed.
            let _restore = self.patch_console(PatchOptions {
                logger: Some(logger.clone()),
                levels: options.console_levels,
                passthrough: options.console_passthrough.unwrap_or(enable_console),
            })?;
        }
        Ok(logger)
    }

    /// The registered logger, if any.
    pub fn logger(&self) -> Option<WsLogger> {
        self.logger.read().clone()
    }

    /// Start forwarding console events at `levels` into a logger, replacing
    /// any previous patch.
    pub fn patch_console(&self, options: PatchOptions) -> Result<ConsoleRestore, RegistryError> {
        let logger = options
            .logger
            .or_else(|| self.logger())
            .ok_or(RegistryError::NoLogger)?;
        let levels: HashSet<LogLevel> = match options.levels {
            Some(levels) => levels.into_iter().collect(),
            None => LogLevel::ALL.into_iter().collect(),
        };

        let id = self.next_patch_id.fetch_add(1, Ordering::Relaxed) + 1;
        *self.patch.write() = Some(ActivePatch {
            id,
            logger,
            levels,
            passthrough: options.passthrough,
        });
        Ok(ConsoleRestore {
            slot: Arc::clone(&self.patch),
            id,
        })
    }

    /// Remove whatever patch is active. No-op when nothing is patched.
    pub fn unpatch_console(&self) {
        *self.patch.write() = None;
    }

    pub fn is_console_patched(&self) -> bool {
        self.patch.read().is_some()
    }

    /// Unpatch the console, close and unregister the logger.
    pub fn shutdown(&self) {
        self.unpatch_console();
        let logger = self.logger.write().take();
        if let Some(logger) = logger {
            logger.close();
        }
    }

    /// Layer that forwards patched console events. Add it to the
    /// application's subscriber once.
    pub fn console_layer(&self) -> ConsoleLayer {
        ConsoleLayer::new(Arc::clone(&self.patch))
    }

    /// Per-layer filter for the application's console output layer that
    /// hides patched levels unless passthrough is on.
    pub fn passthrough_filter(&self) -> PassthroughFilter {
        PassthroughFilter::new(Arc::clone(&self.patch))
    }

    fn drop_patch_for(&self, logger: &WsLogger) {
        let mut slot = self.patch.write();
        if slot.as_ref().is_some_and(|p| p.logger.same_instance(logger)) {
            *slot = None;
        }
    }

    pub fn write(&self, level: LogLevel, args: impl IntoIterator<Item = Arg>) {
        match self.logger() {
            Some(logger) => logger.write(level, args),
            None => fallback(level, args),
        }
    }

    pub fn log(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Log, args);
    }

    pub fn info(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Info, args);
    }

    pub fn warn(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Warn, args);
    }

    pub fn error(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Error, args);
    }

    pub fn debug(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Debug, args);
    }

    /// Set the registered logger's request id; `None` or an empty id
    /// clears it. No-op without a logger.
    pub fn set_request_id(&self, request_id: Option<&str>) {
        let Some(logger) = self.logger() else {
            return;
        };
        match request_id.filter(|id| !id.is_empty()) {
            Some(id) => logger.set_request_id(id),
            None => logger.clear_request_id(),
        }
    }

    pub fn set_context(&self, context: Map<String, Value>) {
        if let Some(logger) = self.logger() {
            logger.set_context(context);
        }
    }

    pub fn update_context(&self, context: Map<String, Value>) {
        if let Some(logger) = self.logger() {
            logger.update_context(context);
        }
    }

    pub fn clear_context(&self) {
        if let Some(logger) = self.logger() {
            logger.clear_context();
        }
    }

    /// Remove only the listed context keys from the registered logger.
    pub fn clear_context_keys<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        if let Some(logger) = self.logger() {
            logger.clear_context_keys(keys);
        }
    }
}

impl std::fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerRegistry")
            .field("logger", &*self.logger.read())
            .field("console_patched", &self.is_console_patched())
            .finish()
    }
}

impl std::fmt::Debug for ConsoleRestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleRestore").field("id", &self.id).finish()
    }
}

fn fallback(level: LogLevel, args: impl IntoIterator<Item = Arg>) {
    let args: Vec<Arg> = args.into_iter().collect();
    let message = format_message(&args);
    match level {
        LogLevel::Error => tracing::error!(target: CONSOLE_TARGET, "{}", message),
        LogLevel::Warn => tracing::warn!(target: CONSOLE_TARGET, "{}", message),
        LogLevel::Info | LogLevel::Log => tracing::info!(target: CONSOLE_TARGET, "{}", message),
        LogLevel::Debug => tracing::debug!(target: CONSOLE_TARGET, "{}", message),
    }
}
