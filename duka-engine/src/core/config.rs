/// 引擎配置 - 同步引擎的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | ENVIRONMENT | development | 运行环境 |
/// | CONFIRM_TIMEOUT_MS | 3000 | 乐观写确认等待上限(毫秒) |
/// | FEED_RETRY_DELAY_MS | 5000 | 订阅重连间隔(毫秒) |
/// | FEED_MAX_RETRIES | 3 | 重连尝试次数上限 |
///
/// # 示例
///
/// ```ignore
/// CONFIRM_TIMEOUT_MS=1000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 运行环境: development | staging | production
    pub environment: String,
    /// Upper bound on the wait for a feed event confirming an optimistic
    /// write; past it the write's own success response is ground truth
    pub confirm_timeout_ms: u64,
    /// Delay between resubscription attempts after a feed drop
    pub feed_retry_delay_ms: u64,
    /// Consecutive resubscription failures before the handle surfaces an
    /// error (retrying continues regardless)
    pub feed_max_retries: u32,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            confirm_timeout_ms: std::env::var("CONFIRM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            feed_retry_delay_ms: std::env::var("FEED_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            feed_max_retries: std::env::var("FEED_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            confirm_timeout_ms: 3000,
            feed_retry_delay_ms: 5000,
            feed_max_retries: 3,
        }
    }
}
