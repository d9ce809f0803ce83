// ==========================================
// 日志系统初始化
// ==========================================
// tracing + tracing-subscriber
// RUST_LOG 控制级别，FDW_LOG_FORMAT=json 切换为 JSON 行输出
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "FDW_LOG_FORMAT";

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=fdw_warehouse=debug,slow_sql=warn
/// - FDW_LOG_FORMAT: `json` 时输出结构化 JSON（worker 部署使用）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_line_number(true)
            .init();
    }
}

/// 初始化测试环境的日志系统（debug 级别，重复调用安全）
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
