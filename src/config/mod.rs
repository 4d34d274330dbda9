mod settings;

pub use settings::{
    IngressConfig, LogConfig, LogFormat, OtelConfig, ProducerConfig, ServerConfig, Settings,
    ShutdownSettings, WebSocketConfig,
};
