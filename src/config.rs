use crate::{context::StaticContext, Engine};

/// Configuration for [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) app_name: Option<String>,
    pub(crate) environment: Option<String>,
    pub(crate) record_metrics: bool,
}

impl EngineConfig {
    /// Create a default configuration: no static context, metrics recorded.
    ///
    /// ```
    /// # use toggle_engine::EngineConfig;
    /// EngineConfig::new();
    /// ```
    pub fn new() -> Self {
        EngineConfig {
            app_name: None,
            environment: None,
            record_metrics: true,
        }
    }

    /// Application name used when a context does not carry `appName`.
    ///
    /// ```
    /// # use toggle_engine::EngineConfig;
    /// let mut config = EngineConfig::new();
    /// config.app_name("checkout").environment("production");
    /// ```
    pub fn app_name(&mut self, app_name: impl Into<String>) -> &mut Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Environment used when a context does not carry `environment`.
    pub fn environment(&mut self, environment: impl Into<String>) -> &mut Self {
        self.environment = Some(environment.into());
        self
    }

    /// Whether `is_enabled` and `get_variant` record metrics. Enabled by default.
    pub fn record_metrics(&mut self, record_metrics: bool) -> &mut Self {
        self.record_metrics = record_metrics;
        self
    }

    /// Create a new [`Engine`] using the specified configuration.
    ///
    /// ```
    /// # use toggle_engine::{Engine, EngineConfig};
    /// let engine: Engine = EngineConfig::new().to_engine();
    /// ```
    pub fn to_engine(self) -> Engine {
        Engine::with_config(self)
    }

    pub(crate) fn static_context(&self) -> StaticContext {
        StaticContext {
            app_name: self.app_name.clone(),
            environment: self.environment.clone(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
