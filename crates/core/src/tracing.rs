//! Log subscriber setup.

#[cfg(feature = "trace")]
pub use tracer::init_tracer;

#[cfg(feature = "trace")]
mod tracer {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

    static TRACER_SET: AtomicBool = AtomicBool::new(false);

    /// Installs the global subscriber. Subsequent calls are no-ops.
    ///
    /// `RUST_LOG` directives take precedence over `level`. Setting
    /// `CHIMERA_LOG_TO_STDERR` keeps the log out of stdout, where the terminal
    /// view prints.
    pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        if TRACER_SET
            .compare_exchange(false, true, Ordering::Release, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(level.unwrap_or(default_filter).into())
            .from_env_lossy()
            .add_directive("tungstenite=info".parse()?)
            .add_directive("tokio_tungstenite=info".parse()?);

        let to_stderr = std::env::var("CHIMERA_LOG_TO_STDERR").is_ok();
        let layer = tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_file(cfg!(any(test, debug_assertions)))
            .with_line_number(cfg!(any(test, debug_assertions)));
        let layer = if to_stderr {
            layer.with_writer(std::io::stderr).boxed()
        } else {
            layer.boxed()
        };

        let subscriber = Registry::default().with(layer.with_filter(filter_layer));
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
