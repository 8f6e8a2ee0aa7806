use crate::connection::{CONSOLE_TARGET, INTERNAL_TARGET, OWN_TARGETS};
use crate::logger::WsLogger;
use crate::record::LogLevel;
use crate::value::Arg;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Filter, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Console patch currently in effect.
#[derive(Clone)]
pub(crate) struct ActivePatch {
    pub(crate) id: u64,
    pub(crate) logger: WsLogger,
    pub(crate) levels: HashSet<LogLevel>,
    pub(crate) passthrough: bool,
}

impl ActivePatch {
    /// Level a `tracing` event is forwarded at, or `None` when the patch
    /// does not cover it. `tracing` has no `log` level, so a patch on
    /// [`LogLevel::Log`] takes INFO events that `Info` does not.
    pub(crate) fn forwarded_level(&self, level: &tracing::Level) -> Option<LogLevel> {
        let level = LogLevel::from(*level);
        if self.levels.contains(&level) {
            Some(level)
        } else if level == LogLevel::Info && self.levels.contains(&LogLevel::Log) {
            Some(LogLevel::Log)
        } else {
            None
        }
    }
}

pub(crate) type PatchSlot = Arc<RwLock<Option<ActivePatch>>>;

fn is_own(meta: &Metadata<'_>) -> bool {
    OWN_TARGETS.contains(&meta.target())
}

/// `tracing_subscriber` layer that routes `tracing` events into the logger
/// registered by [`LoggerRegistry::patch_console`](crate::registry::LoggerRegistry::patch_console).
///
/// While no patch is active the layer does nothing. Obtain one from
/// [`LoggerRegistry::console_layer`](crate::registry::LoggerRegistry::console_layer).
pub struct ConsoleLayer {
    slot: PatchSlot,
    /// Events handed to a logger.
    pub forwarded_events: Arc<AtomicU64>,
    /// Events seen while no patch was active or whose level was not patched.
    pub skipped_events: Arc<AtomicU64>,
}

impl ConsoleLayer {
    pub(crate) fn new(slot: PatchSlot) -> Self {
        ConsoleLayer {
            slot,
            forwarded_events: Arc::new(AtomicU64::new(0)),
            skipped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> Layer<S> for ConsoleLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_own(meta) {
            return;
        }

        let patch = self.slot.read().clone();
        let Some((patch, level)) =
            patch.and_then(|p| p.forwarded_level(meta.level()).map(|level| (p, level)))
        else {
            self.skipped_events.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let mut fields = Map::new();
        let mut message: Option<String> = None;
        event.record(&mut FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        });

        let mut args = Vec::with_capacity(2);
        if let Some(message) = message {
            args.push(Arg::Text(message));
        }
        if !fields.is_empty() {
            args.push(Arg::Json(Value::Object(fields)));
        }

        patch.logger.write(level, args);
        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-layer filter for the application's console output layer.
///
/// It hides events whose level is currently patched unless the patch asked
/// for passthrough. The logger's own console mirror is always shown.
#[derive(Clone)]
pub struct PassthroughFilter {
    slot: PatchSlot,
}

impl PassthroughFilter {
    pub(crate) fn new(slot: PatchSlot) -> Self {
        PassthroughFilter { slot }
    }

    pub fn allows(&self, meta: &Metadata<'_>) -> bool {
        if meta.target() == CONSOLE_TARGET || meta.target() == INTERNAL_TARGET {
            return true;
        }
        match &*self.slot.read() {
            None => true,
            Some(patch) => patch.passthrough || patch.forwarded_level(meta.level()).is_none(),
        }
    }
}

impl<S> Filter<S> for PassthroughFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        self.allows(meta)
    }
}

struct FieldVisitor<'a> {
    fields: &'a mut Map<String, Value>,
    message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            *self.message = Some(rendered);
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(rendered));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::{CONSOLE_TARGET, INTERNAL_TARGET, REGISTRY_TARGET, TRANSPORT_TARGET};
    use crate::registry::{LoggerRegistry, PatchOptions};
    use crate::test_support::ScriptedFactory;
    use crate::{LogLevel, LoggerOptions, WsLogger};
    use rstest::rstest;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    /// Connected logger patched into `registry` at `levels`.
    fn patched(registry: &LoggerRegistry, levels: Option<Vec<LogLevel>>) -> Arc<ScriptedFactory> {
        let factory = ScriptedFactory::new();
        let logger = WsLogger::new(
            LoggerOptions::new("ws://console.test")
                .with_source("svc")
                .with_console(false)
                .with_reconnect_interval(Duration::ZERO)
                .with_transport_factory(factory.factory()),
        )
        .unwrap();
        factory.last().open();
        let _restore = registry
            .patch_console(PatchOptions {
                logger: Some(logger),
                levels,
                passthrough: false,
            })
            .unwrap();
        factory
    }

    fn sent_levels(factory: &ScriptedFactory) -> Vec<String> {
        factory
            .last()
            .sent_json()
            .iter()
            .filter_map(|f| f["value"]["level"].as_str().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn only_the_crate_own_targets_are_skipped() {
        let registry = LoggerRegistry::new();
        let factory = patched(&registry, None);
        let subscriber = tracing_subscriber::registry().with(registry.console_layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "ws_log_sinker", "sibling crate");
            tracing::warn!(target: "ws_log_sink_app::jobs", "app crate");
            tracing::warn!(target: "myapp", "plain app");
            tracing::warn!("from a module of this crate");
            tracing::warn!(target: INTERNAL_TARGET, "internal");
            tracing::warn!(target: CONSOLE_TARGET, "mirror");
            tracing::warn!(target: TRANSPORT_TARGET, "transport");
            tracing::warn!(target: REGISTRY_TARGET, "registry");
        });

        assert_eq!(
            factory.last().sent_messages(),
            vec![
                "sibling crate",
                "app crate",
                "plain app",
                "from a module of this crate"
            ]
        );
    }

    #[rstest]
    #[case(vec![LogLevel::Log], Some("log"))]
    #[case(vec![LogLevel::Info], Some("info"))]
    #[case(vec![LogLevel::Info, LogLevel::Log], Some("info"))]
    #[case(vec![LogLevel::Warn], None)]
    #[tokio::test]
    async fn info_events_match_log_and_info_patches(
        #[case] levels: Vec<LogLevel>,
        #[case] forwarded_as: Option<&str>,
    ) {
        let registry = LoggerRegistry::new();
        let factory = patched(&registry, Some(levels));
        let subscriber = tracing_subscriber::registry().with(registry.console_layer());

        tracing::subscriber::with_default(subscriber, || tracing::info!("hello"));

        let expected: Vec<String> = forwarded_as.into_iter().map(String::from).collect();
        assert_eq!(sent_levels(&factory), expected);
    }
}
